//! Opponent and context adjusted rolling form.
//!
//! Every pooled historical match is first normalised into the frame of the match being
//! evaluated (competition strength, opponent strength, scoring environment and venue),
//! then averaged over several recency windows.

use std::convert::Infallible;

use chrono::Duration;
use rayon::prelude::*;

use crate::baseline::LeagueBaseline;
use crate::config::FormConfig;
use crate::elo::RatingPass;
use crate::fixtures::{Fixture, Side, SidePair, Timeline};
use crate::snapshot::FormMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Intrinsic,
    Market,
}

impl Variant {
    pub fn quality(self, m: &Fixture) -> Option<SidePair<f64>> {
        match self {
            Variant::Intrinsic => m.intrinsic_quality(),
            Variant::Market => m.market_quality(),
        }
    }
}

/// The match whose form is being computed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurrentContext {
    pub competition_id: u32,
    pub league_elo: f64,
    pub avg_goals: f64,
}

/// One historical match as seen from the focal team.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PooledMatch {
    pub competition_id: u32,
    pub side: Side,
    pub metric_for: f64,
    pub metric_against: f64,
    pub league_elo: f64,
    pub opponent_elo: f64,
    pub avg_goals: f64,
    pub home_adv: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdjustedForm {
    pub offense: f64,
    pub defense: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TeamForm {
    pub offense: Option<f64>,
    pub defense: Option<f64>,
}

pub fn adjust(pooled: &PooledMatch, ctx: &CurrentContext) -> AdjustedForm {
    let comp_scale = (pooled.league_elo / ctx.league_elo).powi(2);
    let opponent_scale = pooled.opponent_elo / pooled.league_elo;
    let goals_scale = if pooled.competition_id != ctx.competition_id && pooled.avg_goals > 0.0 {
        ctx.avg_goals / pooled.avg_goals
    } else {
        1.0
    };
    let scale = comp_scale * opponent_scale * goals_scale;

    // Strip the venue effect: home sides get half the advantage removed from what they
    // created and added to what they conceded, away sides the reverse.
    let half = pooled.home_adv / 2.0;
    let (off_shift, def_shift) = match pooled.side {
        Side::Home => (-half, half),
        Side::Away => (half, -half),
    };

    AdjustedForm {
        offense: pooled.metric_for * scale + off_shift,
        defense: pooled.metric_against * scale + def_shift,
    }
}

/// Mean of the per-window means over `recent_first`, clamped. Windows longer than the
/// sample use all of it.
pub fn rolling_average(recent_first: &[f64], windows: &[usize], bounds: (f64, f64)) -> Option<f64> {
    if recent_first.is_empty() || windows.is_empty() {
        return None;
    }
    let mut total = 0.0;
    for &w in windows {
        let take = w.clamp(1, recent_first.len());
        total += recent_first[..take].iter().sum::<f64>() / take as f64;
    }
    Some((total / windows.len() as f64).clamp(bounds.0, bounds.1))
}

/// Form from a pooled history (most recent first). Unset below the minimum sample.
pub fn team_form(pooled: &[PooledMatch], ctx: &CurrentContext, cfg: &FormConfig) -> TeamForm {
    if pooled.len() < cfg.min_matches.max(1) {
        return TeamForm::default();
    }
    let adjusted = pooled.iter().map(|p| adjust(p, ctx)).collect::<Vec<_>>();
    let offense = adjusted.iter().map(|a| a.offense).collect::<Vec<_>>();
    let defense = adjusted.iter().map(|a| a.defense).collect::<Vec<_>>();
    TeamForm {
        offense: rolling_average(&offense, &cfg.windows, cfg.bounds),
        defense: rolling_average(&defense, &cfg.windows, cfg.bounds),
    }
}

/// Derived per-match values the form stage reads from earlier stages.
#[derive(Debug, Clone, Copy)]
pub struct FormInputs<'a> {
    pub baselines: &'a [LeagueBaseline],
    pub ratings: &'a RatingPass,
}

impl FormInputs<'_> {
    pub fn context(&self, timeline: &Timeline, idx: usize) -> CurrentContext {
        CurrentContext {
            competition_id: timeline.fixtures[idx].competition_id,
            league_elo: self.ratings.league_elo[idx],
            avg_goals: self.baselines[idx].avg_goals,
        }
    }
}

fn qualifies(timeline: &Timeline, current: &Fixture, hist: &Fixture) -> bool {
    if hist.competition_id == current.competition_id {
        return true;
    }
    match (
        timeline.competition(current.competition_id),
        timeline.competition(hist.competition_id),
    ) {
        (Some(cur), Some(other)) => cur.pools_with(other),
        (Some(cur), None) => cur.is_cup(),
        _ => false,
    }
}

/// The team's qualifying history for the match at `idx`, most recent first.
pub fn pool_history(
    timeline: &Timeline,
    idx: usize,
    side: Side,
    variant: Variant,
    inputs: &FormInputs<'_>,
    cfg: &FormConfig,
) -> Vec<PooledMatch> {
    let current = &timeline.fixtures[idx];
    let team_id = current.team(side);
    let earliest = current.kickoff - Duration::days(cfg.lookback_days);
    let limit = cfg.max_matches();

    let mut out = Vec::with_capacity(limit);
    for &h_idx in timeline.team_history_before(team_id, current.kickoff).iter().rev() {
        if out.len() >= limit {
            break;
        }
        let hist = &timeline.fixtures[h_idx];
        if hist.kickoff < earliest {
            break;
        }
        if !hist.is_finished() || !qualifies(timeline, current, hist) {
            continue;
        }
        let Some(hist_side) = hist.side_of(team_id) else {
            continue;
        };
        let Some(metric) = variant.quality(hist) else {
            continue;
        };
        let pre = inputs.ratings.pre_match[h_idx];
        let opponent_elo = match hist_side {
            Side::Home => pre.away,
            Side::Away => pre.home,
        };
        out.push(PooledMatch {
            competition_id: hist.competition_id,
            side: hist_side,
            metric_for: metric.get(hist_side),
            metric_against: metric.get(hist_side.opposite()),
            league_elo: inputs.ratings.league_elo[h_idx],
            opponent_elo: f64::from(opponent_elo),
            avg_goals: inputs.baselines[h_idx].avg_goals,
            home_adv: inputs.baselines[h_idx].home_adv,
        });
    }
    out
}

pub fn match_form(
    timeline: &Timeline,
    idx: usize,
    variant: Variant,
    inputs: &FormInputs<'_>,
    cfg: &FormConfig,
) -> FormMetrics {
    let ctx = inputs.context(timeline, idx);
    let home = team_form(
        &pool_history(timeline, idx, Side::Home, variant, inputs, cfg),
        &ctx,
        cfg,
    );
    let away = team_form(
        &pool_history(timeline, idx, Side::Away, variant, inputs, cfg),
        &ctx,
        cfg,
    );
    FormMetrics {
        home_off: home.offense,
        home_def: home.defense,
        away_off: away.offense,
        away_def: away.defense,
    }
}

/// Form for every match of the timeline, aligned with `timeline.fixtures`.
pub fn compute_form(
    timeline: &Timeline,
    variant: Variant,
    inputs: &FormInputs<'_>,
    cfg: &FormConfig,
) -> Vec<FormMetrics> {
    let out = compute_form_chunked(timeline, variant, inputs, cfg, usize::MAX, || {
        Ok::<(), Infallible>(())
    });
    match out {
        Ok(form) => form,
        Err(never) => match never {},
    }
}

/// Like `compute_form`, but runs `checkpoint` after every `chunk` matches and stops at
/// its first error.
pub fn compute_form_chunked<E>(
    timeline: &Timeline,
    variant: Variant,
    inputs: &FormInputs<'_>,
    cfg: &FormConfig,
    chunk: usize,
    mut checkpoint: impl FnMut() -> Result<(), E>,
) -> Result<Vec<FormMetrics>, E> {
    let chunk = chunk.max(1);
    let mut out = Vec::with_capacity(timeline.len());
    let mut start = 0;
    while start < timeline.len() {
        let end = start.saturating_add(chunk).min(timeline.len());
        out.par_extend(
            (start..end)
                .into_par_iter()
                .map(|idx| match_form(timeline, idx, variant, inputs, cfg)),
        );
        checkpoint()?;
        start = end;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BaselineConfig, EloConfig};
    use crate::fixtures::{Competition, CompetitionKind, MatchStatus, parse_kickoff};

    fn pooled(side: Side, metric_for: f64, metric_against: f64) -> PooledMatch {
        PooledMatch {
            competition_id: 1,
            side,
            metric_for,
            metric_against,
            league_elo: 1500.0,
            opponent_elo: 1500.0,
            avg_goals: 2.7,
            home_adv: 0.3,
        }
    }

    fn ctx() -> CurrentContext {
        CurrentContext {
            competition_id: 1,
            league_elo: 1500.0,
            avg_goals: 2.7,
        }
    }

    #[test]
    fn venue_shift_is_mirrored() {
        let home = adjust(&pooled(Side::Home, 1.5, 1.0), &ctx());
        assert!((home.offense - 1.35).abs() < 1e-12);
        assert!((home.defense - 1.15).abs() < 1e-12);

        let away = adjust(&pooled(Side::Away, 1.5, 1.0), &ctx());
        assert!((away.offense - 1.65).abs() < 1e-12);
        assert!((away.defense - 0.85).abs() < 1e-12);
    }

    #[test]
    fn strength_and_scoring_environment_scale() {
        let mut p = pooled(Side::Home, 1.0, 1.0);
        p.home_adv = 0.0;
        p.league_elo = 1200.0;
        p.opponent_elo = 1800.0;
        p.competition_id = 2;
        p.avg_goals = 2.0;
        let c = CurrentContext {
            competition_id: 1,
            league_elo: 1600.0,
            avg_goals: 3.0,
        };
        let a = adjust(&p, &c);
        let expected = (1200.0_f64 / 1600.0).powi(2) * (1800.0 / 1200.0) * (3.0 / 2.0);
        assert!((a.offense - expected).abs() < 1e-12);
        assert!((a.defense - expected).abs() < 1e-12);

        // Same competition: the scoring environment ratio is not applied.
        p.competition_id = 1;
        let a = adjust(&p, &c);
        let expected = (1200.0_f64 / 1600.0).powi(2) * (1800.0 / 1200.0);
        assert!((a.offense - expected).abs() < 1e-12);
    }

    #[test]
    fn rolling_average_blends_three_windows() {
        // 32 values, most recent first: 8 twos, then 24 ones.
        let mut values = vec![2.0; 8];
        values.extend(vec![1.0; 24]);
        let avg = rolling_average(&values, &[8, 16, 32], (0.1, 4.0)).unwrap();
        let expected = (2.0 + 1.5 + 1.25) / 3.0;
        assert!((avg - expected).abs() < 1e-12);

        // Short samples collapse every window onto what exists.
        let avg = rolling_average(&[1.0, 2.0, 3.0, 4.0, 5.0], &[8, 16, 32], (0.1, 4.0)).unwrap();
        assert!((avg - 3.0).abs() < 1e-12);

        assert_eq!(rolling_average(&[9.0; 4], &[8], (0.1, 4.0)), Some(4.0));
        assert_eq!(rolling_average(&[-1.0; 4], &[8], (0.1, 4.0)), Some(0.1));
        assert_eq!(rolling_average(&[], &[8], (0.1, 4.0)), None);
    }

    #[test]
    fn fewer_than_minimum_leaves_form_unset() {
        let cfg = FormConfig::default();
        let three = vec![pooled(Side::Home, 1.0, 1.0); 3];
        assert_eq!(team_form(&three, &ctx(), &cfg), TeamForm::default());

        let four = vec![pooled(Side::Home, 1.0, 1.0); 4];
        let form = team_form(&four, &ctx(), &cfg);
        assert!((form.offense.unwrap() - 0.85).abs() < 1e-12);
        assert!((form.defense.unwrap() - 1.15).abs() < 1e-12);
    }

    fn comp(id: u32, kind: CompetitionKind, region: &str) -> Competition {
        Competition {
            id,
            name: format!("C{id}"),
            kind,
            region: region.to_string(),
            seed_rating: None,
        }
    }

    fn played(id: u64, competition_id: u32, kickoff: &str, home: u32, away: u32) -> Fixture {
        Fixture {
            id,
            competition_id,
            kickoff: parse_kickoff(kickoff).unwrap(),
            home_id: home,
            away_id: away,
            status: MatchStatus::Finished,
            goals: Some(SidePair::new(1, 1)),
            xg: Some(SidePair::new(1.2, 0.8)),
            market_xg: None,
        }
    }

    #[test]
    fn pool_respects_competition_and_lookback() {
        let comps = vec![
            comp(1, CompetitionKind::League, "ENG"),
            comp(2, CompetitionKind::League, "ENG"),
            comp(3, CompetitionKind::Cup, "ENG"),
            comp(4, CompetitionKind::League, "ESP"),
        ];
        let mut fixtures = vec![
            played(1, 1, "2022-09-01T15:00:00Z", 7, 8),
            played(2, 1, "2023-09-01T15:00:00Z", 7, 9),
            played(3, 2, "2023-10-01T15:00:00Z", 10, 7),
            played(4, 3, "2023-11-01T15:00:00Z", 7, 11),
            played(5, 4, "2023-12-01T15:00:00Z", 12, 7),
        ];
        let mut no_xg = played(6, 1, "2024-01-01T15:00:00Z", 7, 13);
        no_xg.xg = None;
        fixtures.push(no_xg);
        let mut league_target = played(7, 1, "2024-02-01T15:00:00Z", 7, 14);
        league_target.status = MatchStatus::Scheduled;
        fixtures.push(league_target);
        let mut cup_target = played(8, 3, "2024-02-08T15:00:00Z", 15, 7);
        cup_target.status = MatchStatus::Scheduled;
        fixtures.push(cup_target);

        let timeline = Timeline::new(fixtures, comps);
        let baselines = crate::baseline::compute_baselines(&timeline, &BaselineConfig::default());
        let ratings = crate::elo::run_ratings(&timeline, &EloConfig::default());
        let inputs = FormInputs {
            baselines: &baselines,
            ratings: &ratings,
        };
        let cfg = FormConfig::default();

        let league_idx = timeline.position(7).unwrap();
        let pool = pool_history(&timeline, league_idx, Side::Home, Variant::Intrinsic, &inputs, &cfg);
        // 2 (same league) and 3 (same region league); 1 is too old, 4 a cup, 5 abroad, 6 no xG.
        assert_eq!(pool.len(), 2);
        assert_eq!(pool[0].competition_id, 2);
        assert_eq!(pool[0].side, Side::Away);
        assert!((pool[0].metric_for - 0.8).abs() < 1e-12);

        // The market cascade falls back to goals for match 6.
        let pool = pool_history(&timeline, league_idx, Side::Home, Variant::Market, &inputs, &cfg);
        assert_eq!(pool.len(), 3);
        assert!((pool[0].metric_for - 1.0).abs() < 1e-12);

        let cup_idx = timeline.position(8).unwrap();
        let pool = pool_history(&timeline, cup_idx, Side::Away, Variant::Intrinsic, &inputs, &cfg);
        assert_eq!(pool.len(), 4);

        // Four qualifying matches are enough for the cup tie, not for the league match.
        let form = compute_form(&timeline, Variant::Intrinsic, &inputs, &cfg);
        assert!(form[league_idx].home_off.is_none());
        assert!(form[cup_idx].away_off.is_some());
        assert!(form[cup_idx].home_off.is_none());

        let mut calls = 0;
        let chunked = compute_form_chunked(&timeline, Variant::Intrinsic, &inputs, &cfg, 3, || {
            calls += 1;
            Ok::<(), ()>(())
        })
        .unwrap();
        assert_eq!(chunked, form);
        assert_eq!(calls, timeline.len().div_ceil(3));

        // A failing checkpoint stops the pass after the first chunk.
        let mut calls = 0;
        let stopped = compute_form_chunked(&timeline, Variant::Intrinsic, &inputs, &cfg, 3, || {
            calls += 1;
            Err("over budget")
        });
        assert_eq!(stopped, Err("over budget"));
        assert_eq!(calls, 1);
    }
}
