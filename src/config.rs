use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a finished match's quality metric turns into an ELO score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OutcomeRule {
    /// Differences below the threshold count as a draw, anything else a full win.
    DrawThreshold(f64),
    /// Logistic squash of the metric difference into (0, 1).
    Sigmoid { steepness: f64 },
}

impl Default for OutcomeRule {
    fn default() -> Self {
        OutcomeRule::DrawThreshold(0.38)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EloConfig {
    pub k: f64,
    pub floor: i32,
    pub ceiling: i32,
    pub outcome_rule: OutcomeRule,
    // Combined metric totals below this are too thin to call a winner.
    pub min_signal_total: f64,
}

impl Default for EloConfig {
    fn default() -> Self {
        Self {
            k: 32.0,
            floor: 1000,
            ceiling: 3000,
            outcome_rule: OutcomeRule::default(),
            min_signal_total: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BaselineConfig {
    pub window: usize,
    pub min_sample: usize,
    pub default_goals: f64,
    pub default_home_adv: f64,
    pub goals_bounds: (f64, f64),
    pub home_adv_bounds: (f64, f64),
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            window: 200,
            min_sample: 20,
            default_goals: 2.70,
            default_home_adv: 0.30,
            goals_bounds: (1.5, 4.0),
            home_adv_bounds: (0.10, 0.60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormConfig {
    pub windows: Vec<usize>,
    pub min_matches: usize,
    pub lookback_days: i64,
    pub bounds: (f64, f64),
}

impl FormConfig {
    pub fn max_matches(&self) -> usize {
        self.windows.iter().copied().max().unwrap_or(0)
    }
}

impl Default for FormConfig {
    fn default() -> Self {
        Self {
            windows: vec![8, 16, 32],
            min_matches: 4,
            lookback_days: 365,
            bounds: (0.1, 4.0),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RestConfig {
    pub cap_hours: f64,
    pub min_gap_hours: f64,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            cap_hours: 240.0,
            min_gap_hours: 12.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub elo: EloConfig,
    pub baseline: BaselineConfig,
    pub form: FormConfig,
    pub rest: RestConfig,
    pub budget: Duration,
    pub write_batch: usize,
    pub max_filter_ids: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            elo: EloConfig::default(),
            baseline: BaselineConfig::default(),
            form: FormConfig::default(),
            rest: RestConfig::default(),
            budget: Duration::from_secs(300),
            write_batch: 500,
            max_filter_ids: 10_000,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `FIXTURE_FORM_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(k) = env_f64("FIXTURE_FORM_ELO_K") {
            cfg.elo.k = k.clamp(1.0, 100.0);
        }
        if let Some(threshold) = env_f64("FIXTURE_FORM_DRAW_THRESHOLD") {
            cfg.elo.outcome_rule = OutcomeRule::DrawThreshold(threshold.clamp(0.0, 2.0));
        }
        if let Some(steepness) = env_f64("FIXTURE_FORM_SIGMOID_STEEPNESS") {
            cfg.elo.outcome_rule = OutcomeRule::Sigmoid {
                steepness: steepness.clamp(0.1, 10.0),
            };
        }
        if let Some(window) = env_usize("FIXTURE_FORM_BASELINE_WINDOW") {
            cfg.baseline.window = window.clamp(20, 1000);
        }
        if let Some(min_sample) = env_usize("FIXTURE_FORM_BASELINE_MIN_SAMPLE") {
            cfg.baseline.min_sample = min_sample.clamp(1, cfg.baseline.window);
        }
        if let Some(days) = env_usize("FIXTURE_FORM_LOOKBACK_DAYS") {
            cfg.form.lookback_days = days.clamp(30, 1460) as i64;
        }
        if let Some(secs) = env_usize("FIXTURE_FORM_BUDGET_SECS") {
            cfg.budget = Duration::from_secs(secs.clamp(1, 86_400) as u64);
        }
        if let Some(batch) = env_usize("FIXTURE_FORM_WRITE_BATCH") {
            cfg.write_batch = batch.clamp(1, 50_000);
        }
        cfg
    }
}

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse::<usize>().ok())
}
