use anyhow::{Context, Result};
use bench_runner::{BenchConfig, HistoryStore, CONFIG_FILE_NAME};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::error::Error;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bench", version, about = "Score benchmark harness")]
struct Cli {
    /// Harness root; relative paths in the config resolve against it.
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    /// Explicit config file. Its directory becomes the root unless --root is set.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate inputs, run the solver on each and report against history.
    Run {
        #[arg(long)]
        json: bool,
    },
    /// Run every configured solution variant and print a comparison table.
    Compare {
        #[arg(long)]
        json: bool,
    },
    /// Show recorded bests, or the full trace of one seed.
    History {
        #[arg(long)]
        seed: Option<String>,
        #[arg(long)]
        json: bool,
    },
    Init {
        #[arg(long)]
        force: bool,
    },
    Clean {
        /// Also remove the history and comparison stores.
        #[arg(long)]
        history: bool,
    },
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let json_mode = cli.command.as_ref().map(command_json_mode).unwrap_or(false);
    match run_command(cli) {
        Ok(Some(payload)) => emit_json(&payload),
        Ok(None) => {}
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", format!("{:#}", err), json!({})));
            } else {
                eprintln!("error: {}", err);
                let mut curr: &dyn Error = &*err;
                while let Some(cause) = curr.source() {
                    eprintln!("caused by: {}", cause);
                    curr = cause;
                }
            }
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run_command(cli: Cli) -> Result<Option<Value>> {
    let command = cli.command.unwrap_or(Commands::Run { json: false });
    match command {
        Commands::Run { json } => {
            let config = load_config(cli.root, cli.config)?;
            let result = bench_runner::run_benchmark(&config)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "run",
                    "root": config.root.display().to_string(),
                    "output_dir": result.output_dir.display().to_string(),
                    "history": result.history_path.display().to_string(),
                    "report": serde_json::to_value(&result.report)?,
                })));
            }
            print!("{}", result.report);
        }
        Commands::Compare { json } => {
            let config = load_config(cli.root, cli.config)?;
            let result = bench_runner::run_comparison(&config)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "compare",
                    "executed": result.executed,
                    "skipped": result.skipped,
                    "comparison": result.comparison_path.display().to_string(),
                    "table": serde_json::to_value(&result.table)?,
                })));
            }
            print!("{}", result.table);
        }
        Commands::History { seed, json } => {
            let config = load_config(cli.root, cli.config)?;
            let history = HistoryStore::load(&config.history_path())?;
            return history_command(&history, seed.as_deref(), json);
        }
        Commands::Init { force } => {
            let root = resolve_root(cli.root, cli.config.as_deref())?;
            let path = cli
                .config
                .unwrap_or_else(|| root.join(CONFIG_FILE_NAME));
            if !force && path.exists() {
                return Err(anyhow::anyhow!(
                    "config already exists (use --force): {}",
                    path.display()
                ));
            }
            std::fs::write(&path, BenchConfig::default().to_yaml()?)?;
            println!("wrote: {}", path.display());
            println!("next: edit the tool paths, then run `bench run`");
        }
        Commands::Clean { history } => {
            let config = load_config(cli.root, cli.config)?;
            let mut dirs = vec![config.input_dir_path(), config.output_dir_path()];
            dirs.dedup();
            for dir in dirs {
                if bench_runner::fsutil::remove_dir_if_exists(&dir)? {
                    println!("removed: {}", dir.display());
                }
            }
            if history {
                for file in [config.history_path(), config.comparison_path()] {
                    if file.exists() {
                        std::fs::remove_file(&file)?;
                        println!("removed: {}", file.display());
                    }
                }
            }
        }
    }
    Ok(None)
}

fn history_command(history: &HistoryStore, seed: Option<&str>, json: bool) -> Result<Option<Value>> {
    if let Some(seed) = seed {
        let trace = history.trace(seed);
        if json {
            return Ok(Some(json!({
                "ok": true,
                "command": "history",
                "seed": seed,
                "trace": serde_json::to_value(trace)?,
            })));
        }
        if trace.is_empty() {
            println!("no history for seed {}", seed);
        }
        for record in trace {
            println!(
                "{} {} score = {}",
                record.time.to_rfc3339(),
                record.filename,
                record.score
            );
        }
        return Ok(None);
    }

    let bests: Vec<Value> = history
        .seeds()
        .filter_map(|s| {
            history.latest(s).map(|best| {
                json!({
                    "seed": s,
                    "score": best.score,
                    "time": best.time.to_rfc3339(),
                    "entries": history.trace(s).len(),
                })
            })
        })
        .collect();
    if json {
        return Ok(Some(json!({
            "ok": true,
            "command": "history",
            "seeds": bests,
        })));
    }
    for s in history.seeds() {
        if let Some(best) = history.latest(s) {
            println!(
                "{}: {} ({} entries, best since {})",
                s,
                best.score,
                history.trace(s).len(),
                best.time.to_rfc3339()
            );
        }
    }
    Ok(None)
}

fn resolve_root(root: Option<PathBuf>, config: Option<&Path>) -> Result<PathBuf> {
    let root = match (root, config.and_then(Path::parent)) {
        (Some(root), _) => root,
        (None, Some(parent)) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    root.canonicalize()
        .with_context(|| format!("harness root not found: {}", root.display()))
}

fn load_config(root: Option<PathBuf>, config_path: Option<PathBuf>) -> Result<BenchConfig> {
    let resolved_root = resolve_root(root, config_path.as_deref())?;
    let mut config = match config_path {
        Some(path) => BenchConfig::load_file(&path)?,
        None => BenchConfig::load(&resolved_root)?,
    };
    config.root = resolved_root;
    tracing::debug!(root = %config.root.display(), "loaded config");
    Ok(config)
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Run { json }
        | Commands::Compare { json }
        | Commands::History { json, .. } => *json,
        _ => false,
    }
}
