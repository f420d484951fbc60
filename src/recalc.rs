use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::baseline::{self, LeagueBaseline};
use crate::config::EngineConfig;
use crate::elo::{self, TeamRatingState};
use crate::error::RunError;
use crate::fixtures::{Competition, Fixture, Timeline};
use crate::form::{self, FormInputs, Variant};
use crate::rest;
use crate::snapshot::{FixtureStatSnapshot, FormMetrics, Stage, StageSet};

/// Match Timeline Provider.
pub trait FixtureSource {
    fn load_competitions(&self) -> Result<Vec<Competition>>;

    /// All matches when `filter` is `None`, otherwise only the listed ones that exist.
    fn load_fixtures(&self, filter: Option<&[u64]>) -> Result<Vec<Fixture>>;
}

/// Destination for computed snapshots. Each `write_snapshots` call is atomic and only
/// touches the columns of the given stages.
pub trait SnapshotSink {
    fn write_snapshots(&mut self, stages: &StageSet, rows: &[FixtureStatSnapshot]) -> Result<usize>;

    fn record_run(&mut self, _record: &RunRecord) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Full,
    Incremental,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Full => "full",
            RunMode::Incremental => "incremental",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub stages: StageSet,
    pub match_ids: Option<Vec<u64>>,
}

impl RunRequest {
    pub fn full() -> Self {
        Self {
            stages: StageSet::all(),
            match_ids: None,
        }
    }

    pub fn incremental(match_ids: Vec<u64>) -> Self {
        Self {
            stages: StageSet::all(),
            match_ids: Some(match_ids),
        }
    }

    pub fn with_stages(mut self, stages: StageSet) -> Self {
        self.stages = stages;
        self
    }

    /// Builds a request from the raw trigger surface (stage list and id list).
    pub fn parse(stages: Option<&str>, match_ids: Option<&str>) -> Result<Self, RunError> {
        let stages = match stages {
            Some(raw) => StageSet::parse(raw)?,
            None => StageSet::all(),
        };
        let match_ids = match_ids.map(parse_match_ids).transpose()?;
        Ok(Self { stages, match_ids })
    }

    pub fn mode(&self) -> RunMode {
        if self.match_ids.is_some() {
            RunMode::Incremental
        } else {
            RunMode::Full
        }
    }
}

pub fn parse_match_ids(raw: &str) -> Result<Vec<u64>, RunError> {
    let mut out = Vec::new();
    for part in raw.split([',', ';', ' ', '\n']).map(str::trim) {
        if part.is_empty() {
            continue;
        }
        let id = part
            .parse::<u64>()
            .map_err(|_| RunError::InvalidFilter(format!("malformed match id {part:?}")))?;
        out.push(id);
    }
    Ok(out)
}

/// Rejects unusable filters and returns the ids deduplicated in input order.
fn validate_filter(ids: &[u64], cfg: &EngineConfig) -> Result<Vec<u64>, RunError> {
    if ids.is_empty() {
        return Err(RunError::InvalidFilter("empty match id list".to_string()));
    }
    if ids.len() > cfg.max_filter_ids {
        return Err(RunError::InvalidFilter(format!(
            "{} match ids exceeds the limit of {}",
            ids.len(),
            cfg.max_filter_ids
        )));
    }
    if let Some(id) = ids.iter().find(|id| **id == 0 || **id > i64::MAX as u64) {
        return Err(RunError::InvalidFilter(format!("match id {id} is out of range")));
    }
    let mut seen = HashSet::new();
    Ok(ids.iter().copied().filter(|id| seen.insert(*id)).collect())
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub mode: RunMode,
    pub stages: StageSet,
    pub matches_in_scope: usize,
    pub updated: BTreeMap<Stage, usize>,
    pub elapsed: Duration,
}

impl RunReport {
    fn new(mode: RunMode, stages: &StageSet) -> Self {
        Self {
            mode,
            stages: stages.clone(),
            matches_in_scope: 0,
            updated: stages.iter().map(|s| (s, 0)).collect(),
            elapsed: Duration::ZERO,
        }
    }
}

/// Ledger entry handed to the sink at the end of every run, successful or not.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub started_at: String,
    pub finished_at: String,
    pub stages: StageSet,
    pub report: RunReport,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: RunReport,
    // Rating state after replaying the whole history, ordered by team id.
    pub ratings: Vec<TeamRatingState>,
}

struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    fn new(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    fn check(&self, phase: &str) -> Result<(), RunError> {
        let elapsed = self.started.elapsed();
        if elapsed > self.budget {
            return Err(RunError::TimedOut {
                phase: phase.to_string(),
                budget: self.budget,
                elapsed,
            });
        }
        Ok(())
    }
}

// Matches per rolling-form slice between budget checks.
const FORM_CHUNK: usize = 2_000;

pub struct Computed {
    // Aligned with `timeline.fixtures`.
    pub snapshots: Vec<FixtureStatSnapshot>,
    pub ratings: Vec<TeamRatingState>,
}

/// Computes every snapshot of the timeline for all stages within `cfg.budget`.
pub fn compute_snapshots(timeline: &Timeline, cfg: &EngineConfig) -> Result<Computed, RunError> {
    let deadline = Deadline::new(cfg.budget);
    compute_stages(timeline, &StageSet::all(), cfg, &deadline)
}

fn compute_stages(
    timeline: &Timeline,
    stages: &StageSet,
    cfg: &EngineConfig,
    deadline: &Deadline,
) -> Result<Computed, RunError> {
    let mut snapshots: Vec<FixtureStatSnapshot> = timeline
        .fixtures
        .iter()
        .map(|m| FixtureStatSnapshot {
            match_id: m.id,
            ..Default::default()
        })
        .collect();

    if stages.contains(Stage::HoursSinceLastMatch) {
        let rest = rest::compute_rest(timeline, &cfg.rest);
        for (snap, r) in snapshots.iter_mut().zip(rest) {
            snap.hours_since_home = r.home;
            snap.hours_since_away = r.away;
        }
        debug!(elapsed = ?deadline.started.elapsed(), "hours since last match computed");
        deadline.check(Stage::HoursSinceLastMatch.as_str())?;
    }

    let baselines: Vec<LeagueBaseline> = if stages.needs_baseline() {
        let out = baseline::compute_baselines(timeline, &cfg.baseline);
        for (snap, b) in snapshots.iter_mut().zip(&out) {
            snap.avg_goals_league = Some(b.avg_goals);
            snap.home_advantage = Some(b.home_adv);
        }
        debug!(elapsed = ?deadline.started.elapsed(), "baselines computed");
        deadline.check(Stage::Baseline.as_str())?;
        out
    } else {
        Vec::new()
    };

    // Always replayed: the final team states are part of every outcome.
    let pass = elo::run_ratings(timeline, &cfg.elo);
    for ((snap, pre), league) in snapshots
        .iter_mut()
        .zip(&pass.pre_match)
        .zip(&pass.league_elo)
    {
        snap.elo_home = Some(pre.home);
        snap.elo_away = Some(pre.away);
        snap.league_elo = Some(*league);
    }
    debug!(
        teams = pass.book.len(),
        elapsed = ?deadline.started.elapsed(),
        "ratings replayed"
    );
    deadline.check(Stage::Ratings.as_str())?;

    if stages.needs_form() {
        let inputs = FormInputs {
            baselines: &baselines,
            ratings: &pass,
        };
        for (stage, variant) in [
            (Stage::RollingFormIntrinsic, Variant::Intrinsic),
            (Stage::RollingFormMarket, Variant::Market),
        ] {
            if !stages.contains(stage) {
                continue;
            }
            let form = form::compute_form_chunked(
                timeline,
                variant,
                &inputs,
                &cfg.form,
                FORM_CHUNK,
                || deadline.check(stage.as_str()),
            )?;
            for (snap, f) in snapshots.iter_mut().zip(form) {
                set_form(snap, variant, f);
            }
            debug!(%stage, elapsed = ?deadline.started.elapsed(), "rolling form computed");
        }
    }

    Ok(Computed {
        snapshots,
        ratings: pass.book.into_states(),
    })
}

fn set_form(snap: &mut FixtureStatSnapshot, variant: Variant, form: FormMetrics) {
    match variant {
        Variant::Intrinsic => snap.xg = form,
        Variant::Market => snap.market_xg = form,
    }
}

/// Runs one recalculation.
///
/// Both modes replay the complete history from seed ratings. Incremental mode only
/// narrows which snapshots are written, so its output for a match always equals what
/// a full run would have written for it.
pub fn run<B>(backend: &mut B, request: &RunRequest, cfg: &EngineConfig) -> Result<RunOutcome, RunError>
where
    B: FixtureSource + SnapshotSink + ?Sized,
{
    let scope_ids = match &request.match_ids {
        Some(ids) => Some(validate_filter(ids, cfg)?),
        None => None,
    };

    let started_at = Utc::now().to_rfc3339();
    let deadline = Deadline::new(cfg.budget);
    let mut report = RunReport::new(request.mode(), &request.stages);
    info!(
        mode = report.mode.as_str(),
        stages = %request.stages,
        "recalculation started"
    );

    let result = run_inner(
        backend,
        &request.stages,
        scope_ids.as_deref(),
        cfg,
        &deadline,
        &mut report,
    );
    report.elapsed = deadline.started.elapsed();

    let record = RunRecord {
        started_at,
        finished_at: Utc::now().to_rfc3339(),
        stages: request.stages.clone(),
        report: report.clone(),
        error: result.as_ref().err().map(|e| e.to_string()),
    };
    if let Err(err) = backend.record_run(&record) {
        warn!("failed to record run: {err:#}");
    }

    match result {
        Ok(ratings) => {
            info!(
                mode = report.mode.as_str(),
                matches = report.matches_in_scope,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "recalculation finished"
            );
            Ok(RunOutcome { report, ratings })
        }
        Err(err) => {
            warn!("recalculation aborted: {err}");
            Err(err)
        }
    }
}

fn run_inner<B>(
    backend: &mut B,
    stages: &StageSet,
    scope_ids: Option<&[u64]>,
    cfg: &EngineConfig,
    deadline: &Deadline,
    report: &mut RunReport,
) -> Result<Vec<TeamRatingState>, RunError>
where
    B: FixtureSource + SnapshotSink + ?Sized,
{
    if let Some(ids) = scope_ids {
        let found: HashSet<u64> = backend
            .load_fixtures(Some(ids))?
            .into_iter()
            .map(|m| m.id)
            .collect();
        let missing: Vec<u64> = ids.iter().copied().filter(|id| !found.contains(id)).collect();
        if !missing.is_empty() {
            return Err(RunError::UnknownMatch(missing));
        }
    }

    let competitions = backend.load_competitions()?;
    let fixtures = backend.load_fixtures(None)?;
    let timeline = Timeline::new(fixtures, competitions);
    info!(
        fixtures = timeline.len(),
        competitions = timeline.competitions.len(),
        "timeline loaded"
    );
    deadline.check("load")?;

    let computed = compute_stages(&timeline, stages, cfg, deadline)?;

    let mut scope: Vec<usize> = match scope_ids {
        None => (0..timeline.len()).collect(),
        Some(ids) => ids.iter().filter_map(|id| timeline.position(*id)).collect(),
    };
    scope.sort_unstable();
    report.matches_in_scope = scope.len();

    for chunk in scope.chunks(cfg.write_batch.max(1)) {
        deadline.check("write")?;
        let rows: Vec<FixtureStatSnapshot> = chunk
            .iter()
            .map(|&idx| computed.snapshots[idx].clone())
            .collect();
        let written = backend.write_snapshots(stages, &rows)?;
        for stage in stages.iter() {
            *report.updated.entry(stage).or_insert(0) += written;
        }
    }

    Ok(computed.ratings)
}
