use std::path::PathBuf;

use anyhow::{Context, Result};

use fixture_form::export;
use fixture_form::store::{self, FixtureStore};

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let db_path = parse_path_arg(&args, "--db")
        .or_else(|| std::env::var("FIXTURE_FORM_DB").ok().map(PathBuf::from))
        .or_else(store::default_db_path)
        .context("unable to resolve sqlite path")?;
    let out_path =
        parse_path_arg(&args, "--out").unwrap_or_else(|| PathBuf::from("fixture_features.xlsx"));

    let store = FixtureStore::open(&db_path)?;
    let report = export::export_features(&out_path, &store)?;

    println!("Feature export complete");
    println!("DB: {}", db_path.display());
    println!("Workbook: {}", out_path.display());
    println!("Competitions: {}", report.competitions);
    println!(
        "Matches: {} ({} with features)",
        report.fixtures, report.with_features
    );
    Ok(())
}

fn parse_path_arg(args: &[String], flag: &str) -> Option<PathBuf> {
    let prefix = format!("{flag}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(path) = arg.strip_prefix(&prefix) {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
        if arg == flag {
            let Some(next) = args.get(idx + 1) else {
                continue;
            };
            if !next.trim().is_empty() {
                return Some(PathBuf::from(next));
            }
        }
    }
    None
}
