use anyhow::{Context, Result};
use chrono::Utc;
use rayon::prelude::*;
use regex::Regex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::BenchConfig;
use crate::error::HarnessError;
use crate::fsutil::{recreate_dir, remove_dir_if_exists};
use crate::record::{CaseResult, InputParams, ScoreRecord, FAILED_SCORE};

/// One generated input, already matched to its seed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub index: usize,
    pub filename: String,
    pub seed: String,
    pub input_path: PathBuf,
}

pub struct Driver<'a> {
    config: &'a BenchConfig,
}

impl<'a> Driver<'a> {
    pub fn new(config: &'a BenchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BenchConfig {
        self.config
    }

    /// Wipes the input directory and asks the generator for a fresh set.
    pub fn generate(&self) -> Result<()> {
        let input_dir = self.config.input_dir_path();
        if remove_dir_if_exists(&input_dir)? {
            debug!(dir = %input_dir.display(), "removed previous inputs");
        }
        let generator = self.config.generator_path();
        let mut cmd = Command::new(&generator);
        cmd.arg(self.config.seeds_path());
        cmd.current_dir(&self.config.root);
        cmd.stdout(Stdio::null());
        info!(generator = %generator.display(), "generating inputs");
        run_checked("generator", cmd)
    }

    pub fn build(&self) -> Result<()> {
        let Some((program, args)) = self.config.build.split_first() else {
            debug!("no build command configured");
            return Ok(());
        };
        let mut cmd = Command::new(self.config.resolve_program(program));
        cmd.args(args);
        cmd.current_dir(&self.config.root);
        info!(command = ?self.config.build, "building solver");
        run_checked("build", cmd)
    }

    pub fn prepare_output_dir(&self, dir: &Path) -> Result<()> {
        recreate_dir(dir).with_context(|| format!("failed to recreate {}", dir.display()))
    }

    /// Lists generated inputs, ordered by their numeric stem.
    pub fn discover_cases(&self, seeds: &[String]) -> Result<Vec<TestCase>> {
        let input_dir = self.config.input_dir_path();
        let mut cases = Vec::new();
        let entries = fs::read_dir(&input_dir)
            .with_context(|| format!("failed to list {}", input_dir.display()))?;
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            let filename = entry.file_name().to_string_lossy().to_string();
            let index = parse_case_index(&path)?;
            let seed = seeds
                .get(index)
                .ok_or(HarnessError::SeedIndexOutOfRange {
                    index,
                    len: seeds.len(),
                })?
                .clone();
            cases.push(TestCase {
                index,
                filename,
                seed,
                input_path: path,
            });
        }
        cases.sort_by_key(|c| c.index);
        Ok(cases)
    }

    /// Runs the solver then the visualizer for one case and extracts its score.
    pub fn run_case(
        &self,
        case: &TestCase,
        output_dir: &Path,
        extra_args: &[String],
    ) -> Result<CaseResult> {
        let params = read_input_params(&case.input_path)?;

        let output_path = output_dir.join(&case.filename);
        let diag_path = output_dir.join(format!("{}.stderr", case.filename));

        let (program, args) = self
            .config
            .solver
            .split_first()
            .ok_or_else(|| HarnessError::InvalidConfig("solver command cannot be empty".into()))?;
        let mut solver = Command::new(self.config.resolve_program(program));
        solver.args(args);
        solver.args(extra_args);
        solver.current_dir(&self.config.root);
        solver.stdin(File::open(&case.input_path)?);
        solver.stdout(File::create(&output_path)?);
        solver.stderr(File::create(&diag_path)?);

        let started = Instant::now();
        run_checked("solver", solver)?;
        let elapsed = started.elapsed();

        let mut visualizer = Command::new(self.config.visualizer_path());
        visualizer.arg(&case.input_path);
        visualizer.arg(&output_path);
        visualizer.current_dir(&self.config.root);
        visualizer.stdout(OpenOptions::new().append(true).open(&diag_path)?);
        run_checked("visualizer", visualizer)?;

        let mut diag = OpenOptions::new().append(true).open(&diag_path)?;
        writeln!(diag, "time: {} secs", elapsed.as_secs_f64())?;
        drop(diag);

        let diagnostics = String::from_utf8_lossy(&fs::read(&diag_path)?).to_string();
        let result = CaseResult {
            index: case.index,
            record: ScoreRecord {
                seed: case.seed.clone(),
                filename: case.filename.clone(),
                score: extract_score(&diagnostics),
                time: Utc::now(),
            },
            params,
            elapsed,
        };
        if result.is_failed() {
            warn!(file = %case.filename, "no score line, counting as failed run");
        }
        Ok(result)
    }

    /// Runs every case into `output_dir`. Results come back in case order
    /// regardless of `jobs`.
    pub fn run_all(
        &self,
        cases: &[TestCase],
        output_dir: &Path,
        extra_args: &[String],
    ) -> Result<Vec<CaseResult>> {
        let total = cases.len();
        let run_one = |(i, case): (usize, &TestCase)| {
            info!("testing {}... ({}/{})", case.filename, i + 1, total);
            self.run_case(case, output_dir, extra_args)
                .with_context(|| format!("case {} failed", case.filename))
        };
        if self.config.jobs <= 1 {
            return cases.iter().enumerate().map(run_one).collect();
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.jobs)
            .build()?;
        pool.install(|| cases.par_iter().enumerate().map(run_one).collect())
    }
}

pub fn load_seeds(path: &Path) -> Result<Vec<String>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read seed list {}", path.display()))?;
    Ok(raw.lines().map(|s| s.trim().to_string()).collect())
}

fn parse_case_index(path: &Path) -> Result<usize, HarnessError> {
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or(HarnessError::InvalidInputName { name })
}

/// Reads only the first line of an input file; the rest belongs to the
/// solver and need not be text.
pub fn read_input_params(path: &Path) -> Result<InputParams> {
    let file = File::open(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mut first = String::new();
    BufReader::new(file)
        .read_line(&mut first)
        .with_context(|| format!("failed to read first line of {}", path.display()))?;
    Ok(parse_input_params(&first, path)?)
}

/// Reads the four problem parameters from the first line of an input.
pub fn parse_input_params(text: &str, path: &Path) -> Result<InputParams, HarnessError> {
    let malformed = |reason: String| HarnessError::MalformedInput {
        path: path.to_path_buf(),
        reason,
    };
    let first = text
        .lines()
        .next()
        .ok_or_else(|| malformed("empty input".to_string()))?;
    let values = first
        .split_whitespace()
        .map(|tok| {
            tok.parse::<i64>()
                .map_err(|_| malformed(format!("not an integer: {}", tok)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    match values[..] {
        [n, m, d, k] => Ok(InputParams { n, m, d, k }),
        _ => Err(malformed(format!(
            "expected 4 integers on the first line, found {}",
            values.len()
        ))),
    }
}

fn score_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"Score = (\d+)").expect("score pattern compiles"))
}

/// First `Score = N` in the diagnostics, or `FAILED_SCORE`.
pub fn extract_score(diagnostics: &str) -> i64 {
    score_pattern()
        .captures(diagnostics)
        .and_then(|cap| cap[1].parse().ok())
        .unwrap_or(FAILED_SCORE)
}

fn run_checked(tool: &str, mut cmd: Command) -> Result<()> {
    debug!(tool, command = ?cmd, "spawning");
    let status = cmd
        .status()
        .with_context(|| format!("failed to spawn {}", tool))?;
    check_status(tool, status)
}

fn check_status(tool: &str, status: ExitStatus) -> Result<()> {
    if status.success() {
        return Ok(());
    }
    let status = status
        .code()
        .map(|c| format!("exit code {}", c))
        .unwrap_or_else(|| "terminated by signal".to_string());
    Err(HarnessError::ToolchainFailure {
        tool: tool.to_string(),
        status,
    }
    .into())
}
