use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::info;

pub mod compare;
pub mod config;
pub mod driver;
pub mod error;
pub mod fsutil;
pub mod history;
pub mod record;
pub mod report;

pub use compare::{build_table, ComparisonStore, ComparisonTable};
pub use config::{BenchConfig, MissingBaseline, SolutionVariant, CONFIG_FILE_NAME};
pub use driver::{extract_score, load_seeds, read_input_params, Driver, TestCase};
pub use error::HarnessError;
pub use history::HistoryStore;
pub use record::{CaseResult, InputParams, ScoreRecord, FAILED_SCORE};
pub use report::{build_report, Report};

pub struct RunResult {
    pub report: Report,
    pub results: Vec<CaseResult>,
    pub output_dir: PathBuf,
    pub history_path: PathBuf,
}

pub struct CompareResult {
    pub table: ComparisonTable,
    pub executed: Vec<String>,
    pub skipped: Vec<String>,
    pub comparison_path: PathBuf,
}

/// Generates inputs, runs the solver on each, reports against the history
/// store and writes the updated store back.
///
/// The history file is read before anything runs so a corrupt store fails
/// fast, and written once after the report is built. Any toolchain failure
/// aborts before the store is touched.
pub fn run_benchmark(config: &BenchConfig) -> Result<RunResult> {
    let history_path = config.history_path();
    let mut history = HistoryStore::load(&history_path)?;

    let driver = Driver::new(config);
    let cases = prepare_cases(&driver)?;
    let output_dir = config.output_dir_path();
    driver.prepare_output_dir(&output_dir)?;
    let results = driver.run_all(&cases, &output_dir, &[])?;

    let report = build_report(&results, &mut history, Utc::now(), config.missing_baseline);
    history.save(&history_path)?;
    info!(
        cases = results.len(),
        new_records = report.new_records,
        history = %history_path.display(),
        "benchmark finished"
    );

    Ok(RunResult {
        report,
        results,
        output_dir,
        history_path,
    })
}

/// Runs every configured solution variant over the same inputs and tabulates
/// them. Non-primary variants whose stored results already cover the current
/// seed set are not re-run.
pub fn run_comparison(config: &BenchConfig) -> Result<CompareResult> {
    let primary = config
        .primary_solution()
        .ok_or_else(|| HarnessError::InvalidConfig("no solutions configured".to_string()))?
        .name
        .clone();
    let comparison_path = config.comparison_path();
    let mut store = ComparisonStore::load(&comparison_path)?;

    let driver = Driver::new(config);
    let cases = prepare_cases(&driver)?;
    let seeds: BTreeSet<String> = cases.iter().map(|c| c.seed.clone()).collect();

    let mut executed = Vec::new();
    let mut skipped = Vec::new();
    for variant in &config.solutions {
        if !compare::needs_run(&store, &variant.name, &primary, &seeds) {
            info!(solution = %variant.name, "stored results cover current seeds, skipping");
            skipped.push(variant.name.clone());
            continue;
        }
        let output_dir = config.output_dir_path().join(&variant.name);
        driver.prepare_output_dir(&output_dir)?;
        info!(solution = %variant.name, cases = cases.len(), "running solution");
        let results = driver
            .run_all(&cases, &output_dir, &variant.args)
            .with_context(|| format!("solution {} failed", variant.name))?;
        store.replace(&variant.name, &results);
        executed.push(variant.name.clone());
    }

    let names: Vec<String> = config.solutions.iter().map(|s| s.name.clone()).collect();
    let table = build_table(&store, &names, &primary);
    store.save(&comparison_path)?;

    Ok(CompareResult {
        table,
        executed,
        skipped,
        comparison_path,
    })
}

fn prepare_cases(driver: &Driver<'_>) -> Result<Vec<TestCase>> {
    let config = driver.config();
    driver.generate()?;
    let seeds = load_seeds(&config.seeds_path())?;
    driver.build()?;
    let cases = driver.discover_cases(&seeds)?;
    info!(cases = cases.len(), "discovered inputs");
    Ok(cases)
}
