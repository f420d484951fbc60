use std::collections::HashMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::config::BaselineConfig;
use crate::fixtures::{Fixture, Timeline};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LeagueBaseline {
    pub sample_matches: usize,
    pub avg_goals: f64,
    pub home_adv: f64,
}

impl LeagueBaseline {
    pub fn defaults(cfg: &BaselineConfig) -> Self {
        Self {
            sample_matches: 0,
            avg_goals: cfg.default_goals,
            home_adv: cfg.default_home_adv,
        }
    }

    fn from_sums(n: usize, goals_total: i64, home_minus_away: i64, cfg: &BaselineConfig) -> Self {
        let mut out = Self::defaults(cfg);
        out.sample_matches = n;
        // Small samples are not trusted at all; they fall back to the defaults.
        if n >= cfg.min_sample.max(1) {
            out.avg_goals = goals_total as f64 / n as f64;
            out.home_adv = home_minus_away as f64 / n as f64;
        }
        out.avg_goals = out.avg_goals.clamp(cfg.goals_bounds.0, cfg.goals_bounds.1);
        out.home_adv = out.home_adv.clamp(cfg.home_adv_bounds.0, cfg.home_adv_bounds.1);
        out
    }
}

fn sample(m: &Fixture) -> Option<(i64, i64)> {
    if !m.is_finished() {
        return None;
    }
    let goals = m.goals?;
    let (h, a) = (i64::from(goals.home), i64::from(goals.away));
    Some((h + a, h - a))
}

/// Baseline for one competition as it stood just before `as_of`.
pub fn baseline_as_of(
    competition_id: u32,
    as_of: NaiveDateTime,
    fixtures: &[Fixture],
    cfg: &BaselineConfig,
) -> LeagueBaseline {
    let mut prior: Vec<&Fixture> = fixtures
        .iter()
        .filter(|m| m.competition_id == competition_id && m.kickoff < as_of)
        .filter(|m| sample(m).is_some())
        .collect();
    prior.sort_by(|a, b| crate::fixtures::chronological(a, b));

    let start = prior.len().saturating_sub(cfg.window);
    let mut goals_total = 0i64;
    let mut home_minus_away = 0i64;
    let mut n = 0usize;
    for m in &prior[start..] {
        if let Some((total, diff)) = sample(m) {
            goals_total += total;
            home_minus_away += diff;
            n += 1;
        }
    }
    LeagueBaseline::from_sums(n, goals_total, home_minus_away, cfg)
}

#[derive(Default)]
struct CompetitionSamples {
    kickoffs: Vec<NaiveDateTime>,
    // Prefix sums; index i holds the totals of the first i samples.
    goals_prefix: Vec<i64>,
    diff_prefix: Vec<i64>,
}

/// Baselines for every match of the timeline, aligned with `timeline.fixtures`.
pub fn compute_baselines(timeline: &Timeline, cfg: &BaselineConfig) -> Vec<LeagueBaseline> {
    let mut per_comp: HashMap<u32, CompetitionSamples> = HashMap::new();
    for m in &timeline.fixtures {
        let Some((total, diff)) = sample(m) else {
            continue;
        };
        let entry = per_comp.entry(m.competition_id).or_insert_with(|| CompetitionSamples {
            goals_prefix: vec![0],
            diff_prefix: vec![0],
            ..Default::default()
        });
        entry.kickoffs.push(m.kickoff);
        let g = entry.goals_prefix.last().copied().unwrap_or(0) + total;
        let d = entry.diff_prefix.last().copied().unwrap_or(0) + diff;
        entry.goals_prefix.push(g);
        entry.diff_prefix.push(d);
    }

    timeline
        .fixtures
        .iter()
        .map(|m| {
            let Some(samples) = per_comp.get(&m.competition_id) else {
                return LeagueBaseline::from_sums(0, 0, 0, cfg);
            };
            let end = samples.kickoffs.partition_point(|k| *k < m.kickoff);
            let start = end.saturating_sub(cfg.window);
            LeagueBaseline::from_sums(
                end - start,
                samples.goals_prefix[end] - samples.goals_prefix[start],
                samples.diff_prefix[end] - samples.diff_prefix[start],
                cfg,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::fixtures::{MatchStatus, SidePair, parse_kickoff};

    fn finished(id: u64, day: i64, home_goals: u8, away_goals: u8) -> Fixture {
        Fixture {
            id,
            competition_id: 1,
            kickoff: parse_kickoff("2023-08-01T15:00:00Z").unwrap() + Duration::days(day),
            home_id: (id % 10) as u32 + 1,
            away_id: (id % 10) as u32 + 11,
            status: MatchStatus::Finished,
            goals: Some(SidePair::new(home_goals, away_goals)),
            xg: None,
            market_xg: None,
        }
    }

    #[test]
    fn small_sample_falls_back_to_defaults() {
        let cfg = BaselineConfig::default();
        // Wildly high scoring, but only 10 matches.
        let fixtures: Vec<Fixture> = (0..10).map(|i| finished(i + 1, i as i64, 5, 0)).collect();
        let as_of = fixtures[9].kickoff + Duration::days(1);

        let b = baseline_as_of(1, as_of, &fixtures, &cfg);
        assert_eq!(b.sample_matches, 10);
        assert!((b.avg_goals - 2.70).abs() < 1e-12);
        assert!((b.home_adv - 0.30).abs() < 1e-12);
    }

    #[test]
    fn estimates_are_clamped() {
        let cfg = BaselineConfig::default();
        let fixtures: Vec<Fixture> = (0..40).map(|i| finished(i + 1, i as i64, 5, 0)).collect();
        let as_of = fixtures[39].kickoff + Duration::days(1);

        let b = baseline_as_of(1, as_of, &fixtures, &cfg);
        assert_eq!(b.sample_matches, 40);
        assert!((b.avg_goals - 4.0).abs() < 1e-12);
        assert!((b.home_adv - 0.60).abs() < 1e-12);
    }

    #[test]
    fn only_strictly_earlier_matches_count() {
        let cfg = BaselineConfig {
            min_sample: 2,
            ..BaselineConfig::default()
        };
        let fixtures = vec![finished(1, 0, 2, 1), finished(2, 1, 1, 1), finished(3, 2, 4, 0)];
        let b = baseline_as_of(1, fixtures[2].kickoff, &fixtures, &cfg);
        assert_eq!(b.sample_matches, 2);
        assert!((b.avg_goals - 2.5).abs() < 1e-12);
        assert!((b.home_adv - 0.5).abs() < 1e-12);
    }

    #[test]
    fn batch_matches_single_lookup() {
        let cfg = BaselineConfig {
            window: 25,
            ..BaselineConfig::default()
        };
        let fixtures: Vec<Fixture> = (0..80)
            .map(|i| finished(i + 1, i as i64 / 2, (i % 4) as u8, (i % 3) as u8))
            .collect();
        let timeline = Timeline::new(fixtures.clone(), Vec::new());
        let batch = compute_baselines(&timeline, &cfg);

        for (m, b) in timeline.fixtures.iter().zip(&batch) {
            let single = baseline_as_of(m.competition_id, m.kickoff, &fixtures, &cfg);
            assert_eq!(*b, single, "match {}", m.id);
        }
    }
}
