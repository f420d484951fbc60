use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const DEFAULT_SEED_RATING: i32 = 1500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompetitionKind {
    League,
    Cup,
}

impl CompetitionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CompetitionKind::League => "league",
            CompetitionKind::Cup => "cup",
        }
    }
}

impl FromStr for CompetitionKind {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "league" => Ok(CompetitionKind::League),
            "cup" => Ok(CompetitionKind::Cup),
            other => Err(anyhow!("unknown competition kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Competition {
    pub id: u32,
    pub name: String,
    pub kind: CompetitionKind,
    // Grouping used to decide which leagues may be pooled together (usually a country).
    pub region: String,
    pub seed_rating: Option<i32>,
}

impl Competition {
    pub fn seed(&self) -> i32 {
        self.seed_rating.unwrap_or(DEFAULT_SEED_RATING)
    }

    pub fn is_cup(&self) -> bool {
        self.kind == CompetitionKind::Cup
    }

    /// Whether matches played in `other` may be pooled into form for a match played here.
    pub fn pools_with(&self, other: &Competition) -> bool {
        if self.is_cup() {
            return true;
        }
        other.kind == CompetitionKind::League && other.region == self.region
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Scheduled,
    Finished,
    Cancelled,
}

impl MatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchStatus::Scheduled => "scheduled",
            MatchStatus::Finished => "finished",
            MatchStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for MatchStatus {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "scheduled" | "notstarted" => Ok(MatchStatus::Scheduled),
            "finished" | "ft" => Ok(MatchStatus::Finished),
            "cancelled" | "canceled" | "postponed" => Ok(MatchStatus::Cancelled),
            other => Err(anyhow!("unknown match status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Home,
    Away,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Home => Side::Away,
            Side::Away => Side::Home,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Home => f.write_str("home"),
            Side::Away => f.write_str("away"),
        }
    }
}

/// A per-side numeric pair (goals, xG, market xG).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SidePair<T> {
    pub home: T,
    pub away: T,
}

impl<T: Copy> SidePair<T> {
    pub fn new(home: T, away: T) -> Self {
        Self { home, away }
    }

    pub fn get(&self, side: Side) -> T {
        match side {
            Side::Home => self.home,
            Side::Away => self.away,
        }
    }
}

impl SidePair<u8> {
    pub fn as_f64(&self) -> SidePair<f64> {
        SidePair::new(f64::from(self.home), f64::from(self.away))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fixture {
    pub id: u64,
    pub competition_id: u32,
    #[serde(serialize_with = "serialize_kickoff", deserialize_with = "deserialize_kickoff")]
    pub kickoff: NaiveDateTime,
    pub home_id: u32,
    pub away_id: u32,
    pub status: MatchStatus,
    pub goals: Option<SidePair<u8>>,
    pub xg: Option<SidePair<f64>>,
    pub market_xg: Option<SidePair<f64>>,
}

impl Fixture {
    pub fn is_finished(&self) -> bool {
        self.status == MatchStatus::Finished
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == MatchStatus::Cancelled
    }

    pub fn team(&self, side: Side) -> u32 {
        match side {
            Side::Home => self.home_id,
            Side::Away => self.away_id,
        }
    }

    pub fn side_of(&self, team_id: u32) -> Option<Side> {
        if self.home_id == team_id {
            Some(Side::Home)
        } else if self.away_id == team_id {
            Some(Side::Away)
        } else {
            None
        }
    }

    /// Quality metric used by the intrinsic signal: event xG only.
    pub fn intrinsic_quality(&self) -> Option<SidePair<f64>> {
        self.xg
    }

    /// Quality metric used by the market signal: market xG, then event xG, then goals.
    pub fn market_quality(&self) -> Option<SidePair<f64>> {
        self.market_xg
            .or(self.xg)
            .or_else(|| self.goals.map(|g| g.as_f64()))
    }

    /// Outcome signal for ratings: event xG, falling back to goals.
    pub fn rating_signal(&self) -> Option<SidePair<f64>> {
        self.xg.or_else(|| self.goals.map(|g| g.as_f64()))
    }
}

pub fn chronological(a: &Fixture, b: &Fixture) -> std::cmp::Ordering {
    a.kickoff.cmp(&b.kickoff).then(a.id.cmp(&b.id))
}

pub fn parse_kickoff(raw: &str) -> Result<NaiveDateTime> {
    let trimmed = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.naive_utc());
    }
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|err| anyhow!("invalid kickoff timestamp {trimmed:?}: {err}"))
}

pub fn format_kickoff(kickoff: &NaiveDateTime) -> String {
    kickoff.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn serialize_kickoff<S: Serializer>(kickoff: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_kickoff(kickoff))
}

fn deserialize_kickoff<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
    let raw = String::deserialize(d)?;
    parse_kickoff(&raw).map_err(|err| serde::de::Error::custom(format!("{err:#}")))
}

/// The ordered match history of one run plus the lookups every stage needs.
#[derive(Debug, Clone)]
pub struct Timeline {
    pub fixtures: Vec<Fixture>,
    pub competitions: HashMap<u32, Competition>,
    index: HashMap<u64, usize>,
    // Team id -> indices into `fixtures`, ascending.
    team_history: HashMap<u32, Vec<usize>>,
}

impl Timeline {
    pub fn new(mut fixtures: Vec<Fixture>, competitions: Vec<Competition>) -> Self {
        let mut seen = HashSet::new();
        fixtures.retain(|m| seen.insert(m.id));
        fixtures.sort_by(chronological);

        let mut index = HashMap::with_capacity(fixtures.len());
        let mut team_history: HashMap<u32, Vec<usize>> = HashMap::new();
        for (idx, m) in fixtures.iter().enumerate() {
            index.insert(m.id, idx);
            team_history.entry(m.home_id).or_default().push(idx);
            if m.away_id != m.home_id {
                team_history.entry(m.away_id).or_default().push(idx);
            }
        }

        Self {
            fixtures,
            competitions: competitions.into_iter().map(|c| (c.id, c)).collect(),
            index,
            team_history,
        }
    }

    pub fn len(&self) -> usize {
        self.fixtures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixtures.is_empty()
    }

    pub fn position(&self, match_id: u64) -> Option<usize> {
        self.index.get(&match_id).copied()
    }

    pub fn competition(&self, competition_id: u32) -> Option<&Competition> {
        self.competitions.get(&competition_id)
    }

    pub fn seed_for(&self, competition_id: u32) -> i32 {
        self.competition(competition_id)
            .map(Competition::seed)
            .unwrap_or(DEFAULT_SEED_RATING)
    }

    pub fn team_history(&self, team_id: u32) -> &[usize] {
        self.team_history
            .get(&team_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Team's matches that kicked off strictly before `kickoff`, oldest first.
    pub fn team_history_before(&self, team_id: u32, kickoff: NaiveDateTime) -> &[usize] {
        let history = self.team_history(team_id);
        let end = history.partition_point(|&idx| self.fixtures[idx].kickoff < kickoff);
        &history[..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_kickoff_accepts_common_shapes() {
        let a = parse_kickoff("2024-03-02T15:00:00Z").unwrap();
        let b = parse_kickoff("2024-03-02 15:00:00").unwrap();
        let c = parse_kickoff("2024-03-02T16:00:00+01:00").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(format_kickoff(&a), "2024-03-02T15:00:00Z");
        assert!(parse_kickoff("yesterday").is_err());
    }

    #[test]
    fn league_pools_only_same_region_leagues() {
        let epl = Competition {
            id: 47,
            name: "Premier League".to_string(),
            kind: CompetitionKind::League,
            region: "ENG".to_string(),
            seed_rating: Some(1700),
        };
        let champ = Competition {
            id: 48,
            name: "Championship".to_string(),
            kind: CompetitionKind::League,
            region: "ENG".to_string(),
            seed_rating: None,
        };
        let fa_cup = Competition {
            id: 132,
            name: "FA Cup".to_string(),
            kind: CompetitionKind::Cup,
            region: "ENG".to_string(),
            seed_rating: None,
        };
        let liga = Competition {
            id: 87,
            name: "LaLiga".to_string(),
            kind: CompetitionKind::League,
            region: "ESP".to_string(),
            seed_rating: None,
        };

        assert!(epl.pools_with(&champ));
        assert!(!epl.pools_with(&fa_cup));
        assert!(!epl.pools_with(&liga));
        assert!(fa_cup.pools_with(&liga));
        assert_eq!(champ.seed(), DEFAULT_SEED_RATING);
    }

    #[test]
    fn market_quality_cascades_to_goals() {
        let mut m = Fixture {
            id: 1,
            competition_id: 1,
            kickoff: parse_kickoff("2024-01-01T12:00:00Z").unwrap(),
            home_id: 1,
            away_id: 2,
            status: MatchStatus::Finished,
            goals: Some(SidePair::new(2, 1)),
            xg: None,
            market_xg: None,
        };
        assert_eq!(m.market_quality(), Some(SidePair::new(2.0, 1.0)));
        assert_eq!(m.intrinsic_quality(), None);

        m.xg = Some(SidePair::new(1.4, 0.9));
        assert_eq!(m.market_quality(), Some(SidePair::new(1.4, 0.9)));

        m.market_xg = Some(SidePair::new(1.1, 1.0));
        assert_eq!(m.market_quality(), Some(SidePair::new(1.1, 1.0)));
        assert_eq!(m.rating_signal(), Some(SidePair::new(1.4, 0.9)));
    }
}
