use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RunError;

/// Calculation stages in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    HoursSinceLastMatch,
    Baseline,
    Ratings,
    RollingFormIntrinsic,
    RollingFormMarket,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::HoursSinceLastMatch,
        Stage::Baseline,
        Stage::Ratings,
        Stage::RollingFormIntrinsic,
        Stage::RollingFormMarket,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::HoursSinceLastMatch => "hours-since-last-match",
            Stage::Baseline => "baseline",
            Stage::Ratings => "ratings",
            Stage::RollingFormIntrinsic => "rolling-form-intrinsic",
            Stage::RollingFormMarket => "rolling-form-market",
        }
    }

    /// Snapshot columns owned by this stage.
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Stage::HoursSinceLastMatch => &["hours_since_home", "hours_since_away"],
            Stage::Baseline => &["avg_goals_league", "home_advantage"],
            Stage::Ratings => &["elo_home", "elo_away", "league_elo"],
            Stage::RollingFormIntrinsic => &[
                "xg_home_off",
                "xg_home_def",
                "xg_away_off",
                "xg_away_def",
            ],
            Stage::RollingFormMarket => &[
                "mxg_home_off",
                "mxg_home_def",
                "mxg_away_off",
                "mxg_away_def",
            ],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = RunError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let key = raw.trim().to_ascii_lowercase().replace('_', "-");
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == key)
            .or(match key.as_str() {
                "hours" | "rest" => Some(Stage::HoursSinceLastMatch),
                "elo" => Some(Stage::Ratings),
                "form-xg" | "xg" => Some(Stage::RollingFormIntrinsic),
                "form-market" | "market" => Some(Stage::RollingFormMarket),
                _ => None,
            })
            .ok_or_else(|| RunError::InvalidStage(raw.trim().to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSet(BTreeSet<Stage>);

impl StageSet {
    pub fn all() -> Self {
        Self(Stage::ALL.into_iter().collect())
    }

    pub fn only(stages: &[Stage]) -> Self {
        Self(stages.iter().copied().collect())
    }

    /// Parses `all` or a comma separated list of stage names.
    pub fn parse(raw: &str) -> Result<Self, RunError> {
        let mut out = BTreeSet::new();
        for part in raw.split([',', ';', ' ']).map(str::trim) {
            if part.is_empty() {
                continue;
            }
            if part.eq_ignore_ascii_case("all") {
                return Ok(Self::all());
            }
            out.insert(part.parse::<Stage>()?);
        }
        if out.is_empty() {
            return Err(RunError::InvalidStage(raw.to_string()));
        }
        Ok(Self(out))
    }

    pub fn contains(&self, stage: Stage) -> bool {
        self.0.contains(&stage)
    }

    pub fn iter(&self) -> impl Iterator<Item = Stage> + '_ {
        self.0.iter().copied()
    }

    pub fn needs_baseline(&self) -> bool {
        self.contains(Stage::Baseline) || self.needs_form()
    }

    pub fn needs_form(&self) -> bool {
        self.contains(Stage::RollingFormIntrinsic) || self.contains(Stage::RollingFormMarket)
    }
}

impl Default for StageSet {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Display for StageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.iter().map(Stage::as_str).collect::<Vec<_>>();
        f.write_str(&names.join(","))
    }
}

/// Opponent/context adjusted rolling form for both sides of a match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FormMetrics {
    pub home_off: Option<f64>,
    pub home_def: Option<f64>,
    pub away_off: Option<f64>,
    pub away_def: Option<f64>,
}

/// Derived feature row for one match; every field reflects pre-match information only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixtureStatSnapshot {
    pub match_id: u64,
    pub hours_since_home: Option<f64>,
    pub hours_since_away: Option<f64>,
    pub avg_goals_league: Option<f64>,
    pub home_advantage: Option<f64>,
    pub elo_home: Option<i32>,
    pub elo_away: Option<i32>,
    pub league_elo: Option<f64>,
    pub xg: FormMetrics,
    pub market_xg: FormMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_set_parses_names_and_aliases() {
        let set = StageSet::parse("ratings, rolling-form-market").unwrap();
        assert!(set.contains(Stage::Ratings));
        assert!(set.contains(Stage::RollingFormMarket));
        assert!(!set.contains(Stage::Baseline));
        assert!(set.needs_baseline());

        let set = StageSet::parse("hours,elo").unwrap();
        assert_eq!(
            set.iter().collect::<Vec<_>>(),
            vec![Stage::HoursSinceLastMatch, Stage::Ratings]
        );

        assert_eq!(StageSet::parse("baseline,all").unwrap(), StageSet::all());
    }

    #[test]
    fn stage_set_rejects_unknown_or_empty() {
        assert!(matches!(
            StageSet::parse("ratings,vibes"),
            Err(RunError::InvalidStage(s)) if s == "vibes"
        ));
        assert!(StageSet::parse(" , ").is_err());
    }

    #[test]
    fn stage_columns_do_not_overlap() {
        let mut seen = BTreeSet::new();
        for stage in Stage::ALL {
            for col in stage.columns() {
                assert!(seen.insert(*col), "{col} owned twice");
            }
        }
        assert_eq!(seen.len(), 15);
    }
}
