#![cfg(unix)]

use bench_runner::report::RecordStatus;
use bench_runner::{
    run_benchmark, run_comparison, BenchConfig, HarnessError, HistoryStore, SolutionVariant,
    FAILED_SCORE,
};
use chrono::Utc;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

// Scripts written by one test must not be open for writing while another
// test execs its own, so the tests in this file run one at a time.
static SERIAL: Mutex<()> = Mutex::new(());

const GEN: &str = r#"#!/bin/sh
set -e
mkdir -p in
i=0
while IFS= read -r seed || [ -n "$seed" ]; do
  printf '%s 2 3 4\n%s\n' "$seed" "$seed" > "in/$(printf '%04d' "$i").txt"
  i=$((i+1))
done < "$1"
"#;

const SOLVER: &str = r#"#!/bin/sh
read -r n m d k
echo "solver log" >&2
if [ "$1" = "double" ]; then
  echo $((n * 2))
else
  echo "$n"
fi
"#;

const VIS: &str = r#"#!/bin/sh
ans=$(head -n 1 "$2")
if [ "$ans" = "0" ]; then
  echo "no score for you"
else
  echo "Score = $ans"
fi
"#;

fn write_script(path: &Path, body: &str) {
    fs::write(path, body).expect("write script");
    let mut perms = fs::metadata(path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("chmod");
}

fn harness(label: &str, seeds: &str) -> BenchConfig {
    let root: PathBuf = std::env::temp_dir().join(format!(
        "scorebench_it_{}_{}_{}",
        label,
        std::process::id(),
        Utc::now().timestamp_micros()
    ));
    fs::create_dir_all(&root).expect("root");
    write_script(&root.join("gen.sh"), GEN);
    write_script(&root.join("solver.sh"), SOLVER);
    write_script(&root.join("vis.sh"), VIS);
    fs::write(root.join("seeds.txt"), seeds).expect("seeds");
    BenchConfig {
        root,
        generator: PathBuf::from("gen.sh"),
        visualizer: PathBuf::from("vis.sh"),
        solver: vec!["./solver.sh".to_string()],
        build: Vec::new(),
        ..BenchConfig::default()
    }
}

#[test]
fn run_scores_every_case_and_persists_history() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let config = harness("run", "30\n10\n20\n");

    let first = run_benchmark(&config).expect("first run");
    let scores: Vec<_> = first.report.results.iter().map(|l| l.score).collect();
    assert_eq!(scores, vec![10, 20, 30]);
    assert_eq!(first.report.new_records, 3);
    assert_eq!(first.report.total_score, 60);
    assert_eq!(first.report.relative_total, None);

    let diag = fs::read_to_string(first.output_dir.join("0000.txt.stderr")).expect("diag");
    assert!(diag.contains("solver log"), "{}", diag);
    assert!(diag.contains("Score = 30"), "{}", diag);
    assert!(diag.lines().last().unwrap_or("").starts_with("time: "), "{}", diag);
    let answer = fs::read_to_string(first.output_dir.join("0001.txt")).expect("answer");
    assert_eq!(answer.trim(), "10");

    let history = HistoryStore::load(&config.history_path()).expect("history");
    assert_eq!(history.len(), 3);
    assert_eq!(history.latest("20").map(|r| r.filename.as_str()), Some("0002.txt"));

    let second = run_benchmark(&config).expect("second run");
    assert_eq!(second.report.new_records, 0);
    for line in &second.report.results {
        assert!(
            matches!(line.status, RecordStatus::NoImprovement { delta: 0, .. }),
            "{:?}",
            line
        );
    }
    let history = HistoryStore::load(&config.history_path()).expect("history");
    assert!(history.seeds().all(|s| history.trace(s).len() == 1));
    let _ = fs::remove_dir_all(&config.root);
}

#[test]
fn relative_root_runs_tools_from_the_harness_directory() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let rel = PathBuf::from(format!(
        "scorebench_rel_{}_{}",
        std::process::id(),
        Utc::now().timestamp_micros()
    ));
    assert!(rel.is_relative());
    fs::create_dir_all(&rel).expect("root");
    write_script(&rel.join("gen.sh"), GEN);
    write_script(&rel.join("solver.sh"), SOLVER);
    write_script(&rel.join("vis.sh"), VIS);
    fs::write(rel.join("seeds.txt"), "4\n2\n").expect("seeds");
    fs::write(
        rel.join("bench.yaml"),
        "generator: gen.sh\nvisualizer: vis.sh\nsolver: [./solver.sh]\nbuild: []\n",
    )
    .expect("config");

    let config = BenchConfig::load(&rel).expect("load");
    assert!(config.root.is_absolute());
    let run = run_benchmark(&config);
    let unloaded = BenchConfig {
        root: rel.clone(),
        generator: PathBuf::from("gen.sh"),
        visualizer: PathBuf::from("vis.sh"),
        solver: vec!["./solver.sh".to_string()],
        build: Vec::new(),
        ..BenchConfig::default()
    };
    let rerun = run_benchmark(&unloaded);
    let _ = fs::remove_dir_all(&rel);

    let run = run.expect("run with loaded relative root");
    assert_eq!(run.report.total_score, 6);
    assert!(run.history_path.starts_with(&config.root));
    let rerun = rerun.expect("run with relative root field");
    assert_eq!(rerun.report.new_records, 0);
}

#[test]
fn unscored_case_gets_failed_score() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let config = harness("unscored", "5\n0\n");

    let run = run_benchmark(&config).expect("run");
    let failed = run
        .results
        .iter()
        .find(|r| r.record.seed == "0")
        .expect("seed 0");
    assert_eq!(failed.record.score, FAILED_SCORE);
    assert_eq!(run.report.results.last().map(|l| l.score), Some(1_000_000_000));
    let _ = fs::remove_dir_all(&config.root);
}

#[test]
fn solver_failure_aborts_without_touching_history() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let config = harness("solver_fails", "1\n2\n");
    write_script(&config.root.join("solver.sh"), "#!/bin/sh\nexit 3\n");

    let err = run_benchmark(&config).err().expect("run must fail");
    match err.downcast_ref::<HarnessError>() {
        Some(HarnessError::ToolchainFailure { tool, status }) => {
            assert_eq!(tool, "solver");
            assert_eq!(status, "exit code 3");
        }
        other => panic!("unexpected error {:?}: {:#}", other, err),
    }
    assert!(!config.history_path().exists());
    let _ = fs::remove_dir_all(&config.root);
}

#[test]
fn generator_failure_is_fatal() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let config = harness("gen_fails", "1\n");
    write_script(&config.root.join("gen.sh"), "#!/bin/sh\nexit 1\n");

    let err = run_benchmark(&config).err().expect("run must fail");
    assert!(err.to_string().contains("generator failed"), "{:#}", err);
    let _ = fs::remove_dir_all(&config.root);
}

#[test]
fn stale_inputs_and_outputs_are_cleared() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let config = harness("stale", "7\n");
    fs::create_dir_all(config.input_dir_path()).expect("in");
    fs::write(config.input_dir_path().join("0099.txt"), "1 1 1 1\n").expect("stale input");
    fs::create_dir_all(config.output_dir_path()).expect("out");
    fs::write(config.output_dir_path().join("old.txt"), "x").expect("stale output");

    let run = run_benchmark(&config).expect("run");
    assert_eq!(run.results.len(), 1);
    assert!(!config.output_dir_path().join("old.txt").exists());
    let _ = fs::remove_dir_all(&config.root);
}

#[test]
fn parallel_jobs_keep_case_order() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let mut config = harness("parallel", "9\n8\n7\n6\n5\n4\n");
    config.jobs = 3;

    let run = run_benchmark(&config).expect("run");
    let order: Vec<_> = run.results.iter().map(|r| r.index).collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(run.report.total_score, 39);
    let _ = fs::remove_dir_all(&config.root);
}

#[test]
fn comparison_reruns_only_primary_when_seeds_unchanged() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let mut config = harness("compare", "3\n1\n");
    config.solutions = vec![
        SolutionVariant {
            name: "plain".to_string(),
            args: Vec::new(),
        },
        SolutionVariant {
            name: "doubled".to_string(),
            args: vec!["double".to_string()],
        },
    ];
    config.primary_solution = Some("doubled".to_string());

    let first = run_comparison(&config).expect("first compare");
    assert_eq!(first.executed, vec!["plain", "doubled"]);
    assert!(first.skipped.is_empty());
    let rows: Vec<_> = first.table.rows.iter().map(|r| r.seed.as_str()).collect();
    assert_eq!(rows, vec!["1", "3"]);
    let cell = first.table.rows[0].cells[1].as_ref().expect("doubled cell");
    assert_eq!(cell.score, 2);
    assert_eq!(cell.relative, Some(0.5));
    assert!(config.output_dir_path().join("plain").join("0000.txt").exists());

    let second = run_comparison(&config).expect("second compare");
    assert_eq!(second.executed, vec!["doubled"]);
    assert_eq!(second.skipped, vec!["plain"]);
    assert!(!config.history_path().exists());
    let _ = fs::remove_dir_all(&config.root);
}
