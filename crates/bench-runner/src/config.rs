use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::HarnessError;

pub const CONFIG_FILE_NAME: &str = "bench.yaml";

/// How missing lookback baselines affect the relative-score total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingBaseline {
    /// Any missing baseline makes the total undefined.
    #[default]
    Propagate,
    /// Missing baselines are left out of the total and counted.
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SolutionVariant {
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Everything the harness needs to know about paths and tools. Built once at
/// start and handed to each component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BenchConfig {
    #[serde(skip)]
    pub root: PathBuf,
    pub generator: PathBuf,
    pub visualizer: PathBuf,
    pub solver: Vec<String>,
    pub build: Vec<String>,
    pub seeds: PathBuf,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub history: PathBuf,
    pub comparison: PathBuf,
    pub jobs: usize,
    pub missing_baseline: MissingBaseline,
    pub solutions: Vec<SolutionVariant>,
    pub primary_solution: Option<String>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            generator: PathBuf::from("tools/target/release/gen"),
            visualizer: PathBuf::from("tools/target/release/vis"),
            solver: vec!["../target/release/main".to_string()],
            build: vec![
                "cargo".to_string(),
                "build".to_string(),
                "--release".to_string(),
            ],
            seeds: PathBuf::from("seeds.txt"),
            input_dir: PathBuf::from("in"),
            output_dir: PathBuf::from("out"),
            history: PathBuf::from("score_history.json"),
            comparison: PathBuf::from("comparison.json"),
            jobs: 1,
            missing_baseline: MissingBaseline::Propagate,
            solutions: Vec::new(),
            primary_solution: None,
        }
    }
}

impl BenchConfig {
    /// Reads `root/bench.yaml` when present; defaults otherwise. The root is
    /// canonicalised because tools run with it as their working directory.
    pub fn load(root: &Path) -> Result<Self> {
        let root = canonical_root(root)?;
        let path = root.join(CONFIG_FILE_NAME);
        if path.exists() {
            Self::load_file(&path)
        } else {
            let config = Self {
                root,
                ..Self::default()
            };
            config.validate()?;
            Ok(config)
        }
    }

    /// Reads an explicit config file. Its directory becomes the harness root.
    pub fn load_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut config = Self::from_yaml(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.root = canonical_root(
            path.parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new(".")),
        )?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.jobs == 0 {
            return Err(HarnessError::InvalidConfig(
                "jobs must be at least 1".to_string(),
            ));
        }
        if self.solver.is_empty() {
            return Err(HarnessError::InvalidConfig(
                "solver command cannot be empty".to_string(),
            ));
        }
        let mut names = std::collections::BTreeSet::new();
        for variant in &self.solutions {
            if variant.name.trim().is_empty() {
                return Err(HarnessError::InvalidConfig(
                    "solution name cannot be empty".to_string(),
                ));
            }
            if !names.insert(variant.name.as_str()) {
                return Err(HarnessError::InvalidConfig(format!(
                    "duplicate solution name: {}",
                    variant.name
                )));
            }
        }
        if let Some(primary) = &self.primary_solution {
            if !names.contains(primary.as_str()) {
                return Err(HarnessError::InvalidConfig(format!(
                    "primary_solution {} is not listed in solutions",
                    primary
                )));
            }
        }
        Ok(())
    }

    /// Absolute form of `path`, taken relative to the root. A relative root is
    /// itself taken against the current directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        if self.root.is_absolute() {
            return self.root.join(path);
        }
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(&self.root).join(path),
            Err(_) => self.root.join(path),
        }
    }

    /// Path-like programs resolve against the root; bare names stay as-is for
    /// PATH lookup.
    pub fn resolve_program(&self, program: &str) -> PathBuf {
        if program.contains('/') || program.starts_with('.') {
            self.resolve(Path::new(program))
        } else {
            PathBuf::from(program)
        }
    }

    pub fn generator_path(&self) -> PathBuf {
        self.resolve(&self.generator)
    }

    pub fn visualizer_path(&self) -> PathBuf {
        self.resolve(&self.visualizer)
    }

    pub fn seeds_path(&self) -> PathBuf {
        self.resolve(&self.seeds)
    }

    pub fn input_dir_path(&self) -> PathBuf {
        self.resolve(&self.input_dir)
    }

    pub fn output_dir_path(&self) -> PathBuf {
        self.resolve(&self.output_dir)
    }

    pub fn history_path(&self) -> PathBuf {
        self.resolve(&self.history)
    }

    pub fn comparison_path(&self) -> PathBuf {
        self.resolve(&self.comparison)
    }

    pub fn primary_solution(&self) -> Option<&SolutionVariant> {
        match &self.primary_solution {
            Some(name) => self.solutions.iter().find(|s| &s.name == name),
            None => self.solutions.first(),
        }
    }
}

fn canonical_root(root: &Path) -> Result<PathBuf> {
    root.canonicalize()
        .with_context(|| format!("harness root not found: {}", root.display()))
}
