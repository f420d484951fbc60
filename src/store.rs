use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params, params_from_iter};
use serde::Deserialize;
use tracing::debug;

use crate::fixtures::{
    Competition, CompetitionKind, Fixture, MatchStatus, SidePair, format_kickoff, parse_kickoff,
};
use crate::recalc::{FixtureSource, RunRecord, SnapshotSink};
use crate::snapshot::{FixtureStatSnapshot, FormMetrics, Stage, StageSet};

const APP_DIR: &str = "fixture_form";
const DB_FILE: &str = "fixture_form.sqlite";

/// Provider payload accepted by `FixtureStore::import`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImportBatch {
    #[serde(default)]
    pub competitions: Vec<Competition>,
    #[serde(default)]
    pub fixtures: Vec<Fixture>,
}

pub fn read_import_file(path: &Path) -> Result<ImportBatch> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read import file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse import file {}", path.display()))
}

/// SQLite backed match timeline and snapshot table.
pub struct FixtureStore {
    conn: Connection,
}

pub fn default_db_path() -> Option<PathBuf> {
    if let Ok(base) = std::env::var("XDG_DATA_HOME")
        && !base.trim().is_empty()
    {
        return Some(PathBuf::from(base).join(APP_DIR).join(DB_FILE));
    }
    let home = std::env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(
        PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR)
            .join(DB_FILE),
    )
}

impl FixtureStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn =
            Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .context("enable wal")?;
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite db")?;
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Upserts competitions and matches in one transaction.
    pub fn import(&mut self, competitions: &[Competition], fixtures: &[Fixture]) -> Result<usize> {
        let tx = self.conn.transaction().context("begin import transaction")?;
        for c in competitions {
            upsert_competition(&tx, c)?;
        }
        for m in fixtures {
            upsert_fixture(&tx, m)?;
        }
        tx.commit().context("commit import transaction")?;
        Ok(competitions.len() + fixtures.len())
    }

    pub fn load_snapshot(&self, match_id: u64) -> Result<Option<FixtureStatSnapshot>> {
        self.conn
            .query_row(
                &format!("SELECT {SNAPSHOT_COLUMNS} FROM fixture_stats WHERE match_id = ?1"),
                params![sql_id(match_id)?],
                snapshot_from_row,
            )
            .optional()
            .context("query snapshot")
    }

    pub fn load_snapshots(&self) -> Result<Vec<FixtureStatSnapshot>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM fixture_stats ORDER BY match_id ASC"
            ))
            .context("prepare load snapshots query")?;
        let rows = stmt
            .query_map([], snapshot_from_row)
            .context("query load snapshots")?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("decode snapshot row")?);
        }
        Ok(out)
    }

    pub fn run_count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM stat_runs", [], |row| row.get(0))
            .context("count stat runs")?;
        Ok(n as usize)
    }
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS competitions (
            competition_id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            region TEXT NOT NULL,
            seed_rating INTEGER NULL
        );

        CREATE TABLE IF NOT EXISTS matches (
            match_id INTEGER PRIMARY KEY,
            competition_id INTEGER NOT NULL,
            kickoff_utc TEXT NOT NULL,
            home_team_id INTEGER NOT NULL,
            away_team_id INTEGER NOT NULL,
            status TEXT NOT NULL,
            home_goals INTEGER NULL,
            away_goals INTEGER NULL,
            home_xg REAL NULL,
            away_xg REAL NULL,
            home_market_xg REAL NULL,
            away_market_xg REAL NULL
        );
        CREATE INDEX IF NOT EXISTS idx_matches_competition ON matches(competition_id);
        CREATE INDEX IF NOT EXISTS idx_matches_kickoff ON matches(kickoff_utc, match_id);

        CREATE TABLE IF NOT EXISTS fixture_stats (
            match_id INTEGER PRIMARY KEY,
            hours_since_home REAL NULL,
            hours_since_away REAL NULL,
            avg_goals_league REAL NULL,
            home_advantage REAL NULL,
            elo_home INTEGER NULL,
            elo_away INTEGER NULL,
            league_elo REAL NULL,
            xg_home_off REAL NULL,
            xg_home_def REAL NULL,
            xg_away_off REAL NULL,
            xg_away_def REAL NULL,
            mxg_home_off REAL NULL,
            mxg_home_def REAL NULL,
            mxg_away_off REAL NULL,
            mxg_away_def REAL NULL
        );

        CREATE TABLE IF NOT EXISTS stat_runs (
            run_id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            mode TEXT NOT NULL,
            stages TEXT NOT NULL,
            matches_in_scope INTEGER NOT NULL,
            updated_json TEXT NOT NULL,
            elapsed_ms INTEGER NOT NULL,
            error TEXT NULL
        );
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

fn upsert_competition(tx: &Transaction<'_>, c: &Competition) -> Result<()> {
    tx.execute(
        r#"
        INSERT INTO competitions (competition_id, name, kind, region, seed_rating)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(competition_id) DO UPDATE SET
            name = excluded.name,
            kind = excluded.kind,
            region = excluded.region,
            seed_rating = excluded.seed_rating
        "#,
        params![c.id as i64, c.name, c.kind.as_str(), c.region, c.seed_rating],
    )
    .context("upsert competition")?;
    Ok(())
}

/// SQLite integers are signed; ids past `i64::MAX` cannot be stored faithfully.
fn sql_id(id: u64) -> Result<i64> {
    i64::try_from(id).with_context(|| format!("match id {id} exceeds the sqlite integer range"))
}

fn upsert_fixture(tx: &Transaction<'_>, m: &Fixture) -> Result<()> {
    tx.execute(
        r#"
        INSERT INTO matches (
            match_id, competition_id, kickoff_utc, home_team_id, away_team_id, status,
            home_goals, away_goals, home_xg, away_xg, home_market_xg, away_market_xg
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        ON CONFLICT(match_id) DO UPDATE SET
            competition_id = excluded.competition_id,
            kickoff_utc = excluded.kickoff_utc,
            home_team_id = excluded.home_team_id,
            away_team_id = excluded.away_team_id,
            status = excluded.status,
            home_goals = excluded.home_goals,
            away_goals = excluded.away_goals,
            home_xg = excluded.home_xg,
            away_xg = excluded.away_xg,
            home_market_xg = excluded.home_market_xg,
            away_market_xg = excluded.away_market_xg
        "#,
        params![
            sql_id(m.id)?,
            m.competition_id as i64,
            format_kickoff(&m.kickoff),
            m.home_id as i64,
            m.away_id as i64,
            m.status.as_str(),
            m.goals.map(|g| g.home),
            m.goals.map(|g| g.away),
            m.xg.map(|x| x.home),
            m.xg.map(|x| x.away),
            m.market_xg.map(|x| x.home),
            m.market_xg.map(|x| x.away),
        ],
    )
    .context("upsert match")?;
    Ok(())
}

const FIXTURE_COLUMNS: &str = "match_id, competition_id, kickoff_utc, home_team_id, away_team_id, \
    status, home_goals, away_goals, home_xg, away_xg, home_market_xg, away_market_xg";

fn fixture_from_row(row: &Row<'_>) -> Result<Fixture> {
    let kickoff: String = row.get(2)?;
    let status: String = row.get(5)?;
    let goals = pair(row.get::<_, Option<i64>>(6)?, row.get::<_, Option<i64>>(7)?)
        .map(|(h, a)| -> Result<SidePair<u8>> {
            Ok(SidePair::new(
                u8::try_from(h).context("home goals out of range")?,
                u8::try_from(a).context("away goals out of range")?,
            ))
        })
        .transpose()?;

    Ok(Fixture {
        id: row.get::<_, u64>(0)?,
        competition_id: row.get::<_, u32>(1)?,
        kickoff: parse_kickoff(&kickoff)?,
        home_id: row.get::<_, u32>(3)?,
        away_id: row.get::<_, u32>(4)?,
        status: status.parse::<MatchStatus>()?,
        goals,
        xg: pair(row.get(8)?, row.get(9)?).map(|(h, a)| SidePair::new(h, a)),
        market_xg: pair(row.get(10)?, row.get(11)?).map(|(h, a)| SidePair::new(h, a)),
    })
}

fn pair<T>(home: Option<T>, away: Option<T>) -> Option<(T, T)> {
    Some((home?, away?))
}

const SNAPSHOT_COLUMNS: &str = "match_id, hours_since_home, hours_since_away, avg_goals_league, \
    home_advantage, elo_home, elo_away, league_elo, xg_home_off, xg_home_def, xg_away_off, \
    xg_away_def, mxg_home_off, mxg_home_def, mxg_away_off, mxg_away_def";

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<FixtureStatSnapshot> {
    Ok(FixtureStatSnapshot {
        match_id: row.get::<_, u64>(0)?,
        hours_since_home: row.get(1)?,
        hours_since_away: row.get(2)?,
        avg_goals_league: row.get(3)?,
        home_advantage: row.get(4)?,
        elo_home: row.get(5)?,
        elo_away: row.get(6)?,
        league_elo: row.get(7)?,
        xg: FormMetrics {
            home_off: row.get(8)?,
            home_def: row.get(9)?,
            away_off: row.get(10)?,
            away_def: row.get(11)?,
        },
        market_xg: FormMetrics {
            home_off: row.get(12)?,
            home_def: row.get(13)?,
            away_off: row.get(14)?,
            away_def: row.get(15)?,
        },
    })
}

fn stage_upsert_sql(stage: Stage) -> String {
    let cols = stage.columns();
    let placeholders = (0..cols.len())
        .map(|i| format!("?{}", i + 2))
        .collect::<Vec<_>>()
        .join(", ");
    let updates = cols
        .iter()
        .map(|c| format!("{c} = excluded.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO fixture_stats (match_id, {}) VALUES (?1, {placeholders}) \
         ON CONFLICT(match_id) DO UPDATE SET {updates}",
        cols.join(", ")
    )
}

fn form_values(form: &FormMetrics) -> [Value; 4] {
    [
        form.home_off.into(),
        form.home_def.into(),
        form.away_off.into(),
        form.away_def.into(),
    ]
}

fn stage_values(stage: Stage, s: &FixtureStatSnapshot) -> Result<Vec<Value>> {
    let mut out = vec![Value::Integer(sql_id(s.match_id)?)];
    match stage {
        Stage::HoursSinceLastMatch => {
            out.push(s.hours_since_home.into());
            out.push(s.hours_since_away.into());
        }
        Stage::Baseline => {
            out.push(s.avg_goals_league.into());
            out.push(s.home_advantage.into());
        }
        Stage::Ratings => {
            out.push(s.elo_home.into());
            out.push(s.elo_away.into());
            out.push(s.league_elo.into());
        }
        Stage::RollingFormIntrinsic => out.extend(form_values(&s.xg)),
        Stage::RollingFormMarket => out.extend(form_values(&s.market_xg)),
    }
    Ok(out)
}

impl FixtureSource for FixtureStore {
    fn load_competitions(&self) -> Result<Vec<Competition>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT competition_id, name, kind, region, seed_rating
                 FROM competitions ORDER BY competition_id ASC",
            )
            .context("prepare load competitions query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<i32>>(4)?,
                ))
            })
            .context("query load competitions")?;

        let mut out = Vec::new();
        for row in rows {
            let (id, name, kind, region, seed_rating) = row.context("decode competition row")?;
            out.push(Competition {
                id,
                name,
                kind: kind.parse::<CompetitionKind>()?,
                region,
                seed_rating,
            });
        }
        Ok(out)
    }

    fn load_fixtures(&self, filter: Option<&[u64]>) -> Result<Vec<Fixture>> {
        let mut out = Vec::new();
        match filter {
            None => {
                let mut stmt = self
                    .conn
                    .prepare(&format!(
                        "SELECT {FIXTURE_COLUMNS} FROM matches ORDER BY kickoff_utc ASC, match_id ASC"
                    ))
                    .context("prepare load matches query")?;
                let mut rows = stmt.query([]).context("query load matches")?;
                while let Some(row) = rows.next().context("step match rows")? {
                    out.push(fixture_from_row(row).context("decode match row")?);
                }
            }
            Some(ids) => {
                let mut stmt = self
                    .conn
                    .prepare(&format!(
                        "SELECT {FIXTURE_COLUMNS} FROM matches WHERE match_id = ?1"
                    ))
                    .context("prepare load match query")?;
                for id in ids {
                    let mut rows = stmt.query(params![sql_id(*id)?]).context("query match")?;
                    if let Some(row) = rows.next().context("step match row")? {
                        out.push(fixture_from_row(row).context("decode match row")?);
                    }
                }
            }
        }
        Ok(out)
    }
}

impl SnapshotSink for FixtureStore {
    fn write_snapshots(&mut self, stages: &StageSet, rows: &[FixtureStatSnapshot]) -> Result<usize> {
        let tx = self.conn.transaction().context("begin snapshot transaction")?;
        for stage in stages.iter() {
            let mut stmt = tx
                .prepare_cached(&stage_upsert_sql(stage))
                .with_context(|| format!("prepare {stage} upsert"))?;
            for row in rows {
                stmt.execute(params_from_iter(stage_values(stage, row)?))
                    .with_context(|| format!("upsert {stage} for match {}", row.match_id))?;
            }
        }
        tx.commit().context("commit snapshot transaction")?;
        debug!(rows = rows.len(), stages = %stages, "snapshot batch committed");
        Ok(rows.len())
    }

    fn record_run(&mut self, record: &RunRecord) -> Result<()> {
        let updated_json =
            serde_json::to_string(&record.report.updated).context("serialize stage counts")?;
        let affected = self
            .conn
            .execute(
                "INSERT INTO stat_runs(started_at, finished_at, mode, stages, matches_in_scope, updated_json, elapsed_ms, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.started_at,
                    record.finished_at,
                    record.report.mode.as_str(),
                    record.stages.to_string(),
                    record.report.matches_in_scope as i64,
                    updated_json,
                    record.report.elapsed.as_millis() as i64,
                    record.error,
                ],
            )
            .context("insert stat run")?;
        if affected != 1 {
            return Err(anyhow!("stat run insert affected {affected} rows"));
        }
        Ok(())
    }
}
