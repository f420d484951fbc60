use crate::config::RestConfig;
use crate::fixtures::{Side, SidePair, Timeline};

/// Hours since the team's previous non-cancelled match, capped; gaps shorter than the
/// minimum are treated as bad data and left unset.
pub fn hours_since_previous(
    timeline: &Timeline,
    idx: usize,
    side: Side,
    cfg: &RestConfig,
) -> Option<f64> {
    let m = &timeline.fixtures[idx];
    let team_id = m.team(side);
    let prev = timeline
        .team_history_before(team_id, m.kickoff)
        .iter()
        .rev()
        .map(|&i| &timeline.fixtures[i])
        .find(|p| !p.is_cancelled())?;

    let hours = (m.kickoff - prev.kickoff).num_seconds() as f64 / 3600.0;
    if hours < cfg.min_gap_hours {
        return None;
    }
    Some(hours.min(cfg.cap_hours))
}

pub fn compute_rest(timeline: &Timeline, cfg: &RestConfig) -> Vec<SidePair<Option<f64>>> {
    (0..timeline.len())
        .map(|idx| {
            SidePair::new(
                hours_since_previous(timeline, idx, Side::Home, cfg),
                hours_since_previous(timeline, idx, Side::Away, cfg),
            )
        })
        .collect()
}
