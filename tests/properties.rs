use chrono::Duration;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use fixture_form::config::{EngineConfig, OutcomeRule};
use fixture_form::fixtures::{
    Competition, CompetitionKind, Fixture, MatchStatus, SidePair, Timeline, parse_kickoff,
};
use fixture_form::recalc::compute_snapshots;
use fixture_form::snapshot::FixtureStatSnapshot;

fn competitions() -> Vec<Competition> {
    vec![
        Competition {
            id: 1,
            name: "Top Flight".to_string(),
            kind: CompetitionKind::League,
            region: "ESP".to_string(),
            seed_rating: Some(1600),
        },
        Competition {
            id: 2,
            name: "Second Tier".to_string(),
            kind: CompetitionKind::League,
            region: "ESP".to_string(),
            seed_rating: Some(1400),
        },
        Competition {
            id: 3,
            name: "National Cup".to_string(),
            kind: CompetitionKind::Cup,
            region: "ESP".to_string(),
            seed_rating: None,
        },
    ]
}

fn random_history(seed: u64, matches: usize) -> Vec<Fixture> {
    let mut rng = StdRng::seed_from_u64(seed);
    let start = parse_kickoff("2022-08-01T18:00:00Z").unwrap();
    (0..matches)
        .map(|i| {
            let home_id = rng.gen_range(1..=16u32);
            let away_id = (home_id + rng.gen_range(1..16u32) - 1) % 16 + 1;
            let status = match rng.gen_range(0..20) {
                0 => MatchStatus::Cancelled,
                1 | 2 => MatchStatus::Scheduled,
                _ => MatchStatus::Finished,
            };
            let finished = status == MatchStatus::Finished;
            let xg = (finished && rng.gen_bool(0.85))
                .then(|| SidePair::new(rng.gen_range(0.0..4.0), rng.gen_range(0.0..3.5)));
            Fixture {
                id: 1000 + i as u64,
                competition_id: rng.gen_range(1..=3u32),
                // Distinct kickoffs keep every prefix a clean cut of the history.
                kickoff: start + Duration::hours(i as i64 * 30),
                home_id,
                away_id,
                status,
                goals: finished.then(|| SidePair::new(rng.gen_range(0..6), rng.gen_range(0..5))),
                xg,
                market_xg: (finished && rng.gen_bool(0.5))
                    .then(|| SidePair::new(rng.gen_range(0.3..3.0), rng.gen_range(0.3..2.5))),
            }
        })
        .collect()
}

fn snapshots(fixtures: Vec<Fixture>, cfg: &EngineConfig) -> Vec<FixtureStatSnapshot> {
    let timeline = Timeline::new(fixtures, competitions());
    compute_snapshots(&timeline, cfg).unwrap().snapshots
}

#[test]
fn snapshots_ignore_later_matches() {
    let cfg = EngineConfig::default();
    let history = random_history(17, 600);
    let full = snapshots(history.clone(), &cfg);

    for cut in [1, 45, 250, 599] {
        let prefix = snapshots(history[..cut].to_vec(), &cfg);
        assert_eq!(prefix.len(), cut);
        assert_eq!(prefix[..], full[..cut], "prefix of {cut} matches diverged");
    }
}

#[test]
fn rewriting_a_late_result_leaves_earlier_snapshots_unchanged() {
    let cfg = EngineConfig::default();
    let mut history = random_history(5, 300);
    let before = snapshots(history.clone(), &cfg);

    history[200].status = MatchStatus::Finished;
    history[200].xg = Some(SidePair::new(3.9, 0.1));
    history[200].goals = Some(SidePair::new(6, 0));
    let after = snapshots(history, &cfg);

    assert_eq!(before[..=200], after[..=200]);
    assert_ne!(before[201..], after[201..]);
}

#[test]
fn derived_values_stay_in_bounds() {
    let mut cfg = EngineConfig::default();
    cfg.elo.k = 400.0;
    cfg.elo.outcome_rule = OutcomeRule::Sigmoid { steepness: 3.0 };

    for seed in [1, 2, 3] {
        for snap in snapshots(random_history(seed, 500), &cfg) {
            for elo in [snap.elo_home, snap.elo_away] {
                let elo = elo.unwrap();
                assert!((1000..=3000).contains(&elo), "elo {elo} out of range");
            }
            let league = snap.league_elo.unwrap();
            assert!((1000.0..=3000.0).contains(&league));

            let goals = snap.avg_goals_league.unwrap();
            assert!((1.5..=4.0).contains(&goals));
            let adv = snap.home_advantage.unwrap();
            assert!((0.10..=0.60).contains(&adv));

            for rest in [snap.hours_since_home, snap.hours_since_away].into_iter().flatten() {
                assert!((12.0..=240.0).contains(&rest));
            }

            for form in [snap.xg, snap.market_xg] {
                for v in [form.home_off, form.home_def, form.away_off, form.away_def]
                    .into_iter()
                    .flatten()
                {
                    assert!((0.1..=4.0).contains(&v), "form {v} out of range");
                }
            }
        }
    }
}

#[test]
fn established_teams_get_form_values() {
    let cfg = EngineConfig::default();
    let all = snapshots(random_history(23, 600), &cfg);
    let with_form = all.iter().filter(|s| s.xg.home_off.is_some()).count();
    assert!(with_form > 100, "only {with_form} matches had form");
    assert!(all[0].xg.home_off.is_none());
    assert!(all[0].market_xg.away_def.is_none());
}
