use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use rust_xlsxwriter::{Workbook, Worksheet};

use crate::fixtures::{Competition, Fixture, chronological, format_kickoff};
use crate::recalc::FixtureSource;
use crate::snapshot::{FixtureStatSnapshot, FormMetrics};
use crate::store::FixtureStore;

pub struct ExportReport {
    pub competitions: usize,
    pub fixtures: usize,
    pub with_features: usize,
}

/// Writes competitions and every match joined with its stored feature row.
pub fn export_features(path: &Path, store: &FixtureStore) -> Result<ExportReport> {
    let competitions = store.load_competitions()?;
    let mut fixtures = store.load_fixtures(None)?;
    fixtures.sort_by(chronological);
    let snapshots = store.load_snapshots()?;

    let competition_rows = competition_rows(&competitions);
    let feature_rows = feature_rows(&fixtures, &competitions, &snapshots);

    let mut workbook = Workbook::new();
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Competitions")?;
        write_rows(sheet, &competition_rows)?;
    }
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Features")?;
        write_rows(sheet, &feature_rows)?;
    }

    workbook
        .save(path)
        .with_context(|| format!("failed writing workbook to {}", path.display()))?;

    let by_id: HashMap<u64, &FixtureStatSnapshot> =
        snapshots.iter().map(|s| (s.match_id, s)).collect();
    Ok(ExportReport {
        competitions: competitions.len(),
        fixtures: fixtures.len(),
        with_features: fixtures.iter().filter(|m| by_id.contains_key(&m.id)).count(),
    })
}

pub fn competition_rows(competitions: &[Competition]) -> Vec<Vec<String>> {
    let mut rows = vec![vec![
        "Competition ID".to_string(),
        "Name".to_string(),
        "Kind".to_string(),
        "Region".to_string(),
        "Seed Rating".to_string(),
    ]];
    for c in competitions {
        rows.push(vec![
            c.id.to_string(),
            c.name.clone(),
            c.kind.as_str().to_string(),
            c.region.clone(),
            c.seed().to_string(),
        ]);
    }
    rows
}

pub fn feature_rows(
    fixtures: &[Fixture],
    competitions: &[Competition],
    snapshots: &[FixtureStatSnapshot],
) -> Vec<Vec<String>> {
    let names: HashMap<u32, &str> = competitions
        .iter()
        .map(|c| (c.id, c.name.as_str()))
        .collect();
    let by_id: HashMap<u64, &FixtureStatSnapshot> =
        snapshots.iter().map(|s| (s.match_id, s)).collect();

    let mut header = vec![
        "Match ID".to_string(),
        "Kickoff (UTC)".to_string(),
        "Competition".to_string(),
        "Home ID".to_string(),
        "Away ID".to_string(),
        "Status".to_string(),
        "Score".to_string(),
        "Rest Home (h)".to_string(),
        "Rest Away (h)".to_string(),
        "League Goals".to_string(),
        "Home Adv".to_string(),
        "ELO Home".to_string(),
        "ELO Away".to_string(),
        "League ELO".to_string(),
    ];
    for prefix in ["xG", "mxG"] {
        for col in ["Home Off", "Home Def", "Away Off", "Away Def"] {
            header.push(format!("{prefix} {col}"));
        }
    }
    let mut rows = vec![header];

    let empty = FixtureStatSnapshot::default();
    for m in fixtures {
        let s = by_id.get(&m.id).copied().unwrap_or(&empty);
        let mut row = vec![
            m.id.to_string(),
            format_kickoff(&m.kickoff),
            names
                .get(&m.competition_id)
                .map(|n| n.to_string())
                .unwrap_or_else(|| m.competition_id.to_string()),
            m.home_id.to_string(),
            m.away_id.to_string(),
            m.status.as_str().to_string(),
            m.goals
                .map(|g| format!("{}-{}", g.home, g.away))
                .unwrap_or_default(),
            opt_float(s.hours_since_home, 1),
            opt_float(s.hours_since_away, 1),
            opt_float(s.avg_goals_league, 3),
            opt_float(s.home_advantage, 3),
            opt_to_string(s.elo_home),
            opt_to_string(s.elo_away),
            opt_float(s.league_elo, 1),
        ];
        push_form(&mut row, &s.xg);
        push_form(&mut row, &s.market_xg);
        rows.push(row);
    }
    rows
}

fn push_form(row: &mut Vec<String>, form: &FormMetrics) {
    for v in [form.home_off, form.home_def, form.away_off, form.away_def] {
        row.push(opt_float(v, 3));
    }
}

fn opt_float(value: Option<f64>, decimals: usize) -> String {
    value
        .map(|v| format!("{v:.decimals$}"))
        .unwrap_or_default()
}

fn opt_to_string<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn write_rows(worksheet: &mut Worksheet, rows: &[Vec<String>]) -> Result<()> {
    for (row_idx, row) in rows.iter().enumerate() {
        for (col_idx, value) in row.iter().enumerate() {
            worksheet
                .write_string(row_idx as u32, col_idx as u16, value)
                .with_context(|| format!("write cell ({row_idx},{col_idx})"))?;
        }
    }
    Ok(())
}
