use std::collections::HashMap;

use chrono::NaiveDateTime;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{EloConfig, OutcomeRule};
use crate::fixtures::{Fixture, SidePair, Timeline};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamRatingState {
    pub team_id: u32,
    // Competition of the last match that touched this team.
    pub competition_id: u32,
    pub rating: i32,
    pub last_match_id: Option<u64>,
    pub last_kickoff: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreMatchRatings {
    pub home: i32,
    pub away: i32,
}

/// Per-run arena of team ratings. Starts empty; teams are seeded on first sight.
#[derive(Debug, Clone, Default)]
pub struct RatingBook {
    teams: HashMap<u32, TeamRatingState>,
}

impl RatingBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rating(&self, team_id: u32) -> Option<i32> {
        self.teams.get(&team_id).map(|t| t.rating)
    }

    pub fn state(&self, team_id: u32) -> Option<&TeamRatingState> {
        self.teams.get(&team_id)
    }

    pub fn len(&self) -> usize {
        self.teams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.teams.is_empty()
    }

    /// Final states ordered by team id.
    pub fn into_states(self) -> Vec<TeamRatingState> {
        let mut out = self.teams.into_values().collect::<Vec<_>>();
        out.sort_by_key(|t| t.team_id);
        out
    }

    fn current_or_seed(&mut self, team_id: u32, competition_id: u32, seed: i32) -> i32 {
        self.teams
            .entry(team_id)
            .or_insert_with(|| TeamRatingState {
                team_id,
                competition_id,
                rating: seed,
                last_match_id: None,
                last_kickoff: None,
            })
            .rating
    }

    fn store(&mut self, team_id: u32, rating: i32, m: &Fixture) {
        if let Some(state) = self.teams.get_mut(&team_id) {
            state.rating = rating;
            state.competition_id = m.competition_id;
            state.last_match_id = Some(m.id);
            state.last_kickoff = Some(m.kickoff);
        }
    }

    /// Reads both sides' current ratings (the pre-match values) and, when the match
    /// has a usable result, applies the ELO update.
    pub fn apply(&mut self, m: &Fixture, seed: i32, cfg: &EloConfig) -> PreMatchRatings {
        let seed = seed.clamp(cfg.floor, cfg.ceiling);
        let pre = PreMatchRatings {
            home: self.current_or_seed(m.home_id, m.competition_id, seed),
            away: self.current_or_seed(m.away_id, m.competition_id, seed),
        };

        if !m.is_finished() || m.home_id == m.away_id {
            return pre;
        }
        let Some(signal) = m.rating_signal() else {
            return pre;
        };

        let expected_home = expected_score(f64::from(pre.home), f64::from(pre.away));
        let expected_away = 1.0 - expected_home;
        let actual = actual_scores(signal, cfg);

        let home = (pre.home + rating_delta(expected_home, actual.home, cfg.k))
            .clamp(cfg.floor, cfg.ceiling);
        let away = (pre.away + rating_delta(expected_away, actual.away, cfg.k))
            .clamp(cfg.floor, cfg.ceiling);
        self.store(m.home_id, home, m);
        self.store(m.away_id, away, m);
        pre
    }
}

pub fn expected_score(r_a: f64, r_b: f64) -> f64 {
    1.0 / (1.0 + 10.0_f64.powf((r_b - r_a) / 400.0))
}

pub fn rating_delta(expected: f64, actual: f64, k: f64) -> i32 {
    (k * (actual - expected)).round() as i32
}

/// Actual ELO scores for (home, away) derived from a per-side quality signal.
pub fn actual_scores(signal: SidePair<f64>, cfg: &EloConfig) -> SidePair<f64> {
    if signal.home + signal.away < cfg.min_signal_total {
        return SidePair::new(0.5, 0.5);
    }
    let diff = signal.home - signal.away;
    let home = match cfg.outcome_rule {
        OutcomeRule::DrawThreshold(threshold) => {
            if diff.abs() < threshold {
                0.5
            } else if diff > 0.0 {
                1.0
            } else {
                0.0
            }
        }
        OutcomeRule::Sigmoid { steepness } => 1.0 / (1.0 + (-steepness * diff).exp()),
    };
    SidePair::new(home, 1.0 - home)
}

#[derive(Debug, Clone)]
pub struct RatingPass {
    // Aligned with `timeline.fixtures`.
    pub pre_match: Vec<PreMatchRatings>,
    pub league_elo: Vec<f64>,
    pub book: RatingBook,
}

/// Replays the whole timeline from seed ratings, in (kickoff, id) order.
pub fn run_ratings(timeline: &Timeline, cfg: &EloConfig) -> RatingPass {
    let mut book = RatingBook::new();
    let mut pre_match = Vec::with_capacity(timeline.len());
    for m in &timeline.fixtures {
        let seed = timeline.seed_for(m.competition_id);
        pre_match.push(book.apply(m, seed, cfg));
    }
    let league_elo = compute_league_ratings(timeline, &pre_match, cfg);
    RatingPass {
        pre_match,
        league_elo,
        book,
    }
}

/// Competition strength per match: mean pre-match home rating over the competition's
/// matches that kicked off strictly earlier. Competitions are independent.
pub fn compute_league_ratings(
    timeline: &Timeline,
    pre_match: &[PreMatchRatings],
    cfg: &EloConfig,
) -> Vec<f64> {
    let mut by_comp: HashMap<u32, Vec<usize>> = HashMap::new();
    for (idx, m) in timeline.fixtures.iter().enumerate() {
        by_comp.entry(m.competition_id).or_default().push(idx);
    }

    let per_comp: Vec<Vec<(usize, f64)>> = by_comp
        .par_iter()
        .map(|(competition_id, indices)| {
            let seed = f64::from(timeline.seed_for(*competition_id).clamp(cfg.floor, cfg.ceiling));
            let mut out = Vec::with_capacity(indices.len());
            let mut sum = 0i64;
            let mut count = 0usize;
            let mut consumed = 0usize;
            for &idx in indices {
                let kickoff = timeline.fixtures[idx].kickoff;
                while consumed < indices.len()
                    && timeline.fixtures[indices[consumed]].kickoff < kickoff
                {
                    sum += i64::from(pre_match[indices[consumed]].home);
                    count += 1;
                    consumed += 1;
                }
                let value = if count == 0 {
                    seed
                } else {
                    sum as f64 / count as f64
                };
                out.push((idx, value));
            }
            out
        })
        .collect();

    let mut league_elo = vec![0.0; timeline.len()];
    for (idx, value) in per_comp.into_iter().flatten() {
        league_elo[idx] = value;
    }
    league_elo
}
