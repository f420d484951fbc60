use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fixture_form::config::EngineConfig;
use fixture_form::recalc::{self, RunOutcome, RunRequest};
use fixture_form::store::{self, FixtureStore};

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let db_path = arg_value(&args, "--db")
        .map(PathBuf::from)
        .or_else(|| std::env::var("FIXTURE_FORM_DB").ok().map(PathBuf::from))
        .or_else(store::default_db_path)
        .context("unable to resolve sqlite path")?;

    let mut cfg = EngineConfig::from_env();
    if let Some(raw) = arg_value(&args, "--budget-secs") {
        let secs = raw
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid --budget-secs value {raw:?}"))?;
        cfg.budget = Duration::from_secs(secs.max(1));
    }

    let request = RunRequest::parse(
        arg_value(&args, "--stages").as_deref(),
        arg_value(&args, "--match-ids").as_deref(),
    )?;

    let mut store = FixtureStore::open(&db_path)?;
    if let Some(import_path) = arg_value(&args, "--import") {
        let batch = store::read_import_file(&PathBuf::from(&import_path))?;
        let rows = store.import(&batch.competitions, &batch.fixtures)?;
        info!(rows, path = %import_path, "import complete");
    }

    let outcome = recalc::run(&mut store, &request, &cfg)?;

    if args.iter().any(|a| a == "--json") {
        print_json(&outcome)?;
    } else {
        print_report(&db_path, &outcome);
    }
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fixture_form=debug"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .init();
}

fn print_report(db_path: &std::path::Path, outcome: &RunOutcome) {
    let report = &outcome.report;
    println!("Recalculation complete");
    println!("DB: {}", db_path.display());
    println!("Mode: {}", report.mode.as_str());
    println!("Stages: {}", report.stages);
    println!("Matches in scope: {}", report.matches_in_scope);
    for (stage, count) in &report.updated {
        println!("  {stage}: {count} updated");
    }
    println!("Teams rated: {}", outcome.ratings.len());
    let mut top = outcome.ratings.iter().collect::<Vec<_>>();
    top.sort_by(|a, b| b.rating.cmp(&a.rating).then(a.team_id.cmp(&b.team_id)));
    for state in top.iter().take(5) {
        println!("  team {}: {}", state.team_id, state.rating);
    }
    println!("Elapsed: {:.2}s", report.elapsed.as_secs_f64());
}

fn print_json(outcome: &RunOutcome) -> Result<()> {
    let value = json!({
        "report": outcome.report,
        "ratings": outcome.ratings,
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&value).context("serialize run report")?
    );
    Ok(())
}

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    let prefix = format!("{flag}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&prefix) {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        if arg == flag
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(next.trim().to_string());
        }
    }
    None
}
