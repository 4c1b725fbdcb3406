//! Side-by-side scores of several solver variants over the same inputs.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;
use unicode_width::UnicodeWidthStr;

use crate::error::HarnessError;
use crate::fsutil::atomic_write_json_pretty;
use crate::record::{relative_score, CaseResult, ScoreRecord};

pub const COMPARISON_SCHEMA_VERSION: &str = "comparison_v1";

/// Latest results per solution variant, keyed by seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonStore {
    schema_version: String,
    #[serde(default)]
    solutions: BTreeMap<String, BTreeMap<String, ScoreRecord>>,
}

impl ComparisonStore {
    pub fn new() -> Self {
        Self {
            schema_version: COMPARISON_SCHEMA_VERSION.to_string(),
            solutions: BTreeMap::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read comparison {}", path.display()))
            }
        };
        let store: Self =
            serde_json::from_slice(&bytes).map_err(|e| HarnessError::CorruptComparison {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if store.schema_version != COMPARISON_SCHEMA_VERSION {
            return Err(HarnessError::CorruptComparison {
                path: path.to_path_buf(),
                reason: format!("unsupported schema_version {}", store.schema_version),
            }
            .into());
        }
        Ok(store)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        atomic_write_json_pretty(path, self)
            .with_context(|| format!("failed to write comparison {}", path.display()))
    }

    /// True when `solution` has stored results for exactly `seeds`.
    pub fn covers_exactly(&self, solution: &str, seeds: &BTreeSet<String>) -> bool {
        self.solutions
            .get(solution)
            .map(|by_seed| by_seed.keys().eq(seeds.iter()))
            .unwrap_or(false)
    }

    pub fn replace(&mut self, solution: &str, results: &[CaseResult]) {
        let by_seed = results
            .iter()
            .map(|r| (r.record.seed.clone(), r.record.clone()))
            .collect();
        self.solutions.insert(solution.to_string(), by_seed);
    }

    pub fn get(&self, solution: &str, seed: &str) -> Option<&ScoreRecord> {
        self.solutions.get(solution)?.get(seed)
    }

    fn seeds_of(&self, solution: &str) -> Vec<&ScoreRecord> {
        self.solutions
            .get(solution)
            .map(|by_seed| by_seed.values().collect())
            .unwrap_or_default()
    }
}

/// The primary variant is always re-run; the others only when their stored
/// seed set differs from the current one.
pub fn needs_run(
    store: &ComparisonStore,
    solution: &str,
    primary: &str,
    seeds: &BTreeSet<String>,
) -> bool {
    solution == primary || !store.covers_exactly(solution, seeds)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonCell {
    pub score: i64,
    pub relative: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonRow {
    pub seed: String,
    pub cells: Vec<Option<ComparisonCell>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonTable {
    pub solutions: Vec<String>,
    pub primary: String,
    pub rows: Vec<ComparisonRow>,
    pub totals: Vec<f64>,
}

/// One row per seed of the primary variant, best primary score first. Each
/// cell's relative score is the row minimum divided by the cell's score.
pub fn build_table(store: &ComparisonStore, solutions: &[String], primary: &str) -> ComparisonTable {
    let mut primary_records = store.seeds_of(primary);
    primary_records.sort_by(|a, b| a.score.cmp(&b.score).then_with(|| a.seed.cmp(&b.seed)));

    let mut totals = vec![0.0; solutions.len()];
    let mut rows = Vec::with_capacity(primary_records.len());
    for primary_record in primary_records {
        let seed = &primary_record.seed;
        let scores: Vec<Option<i64>> = solutions
            .iter()
            .map(|s| store.get(s, seed).map(|r| r.score))
            .collect();
        let min_score = scores.iter().flatten().min().copied();
        let cells: Vec<Option<ComparisonCell>> = scores
            .iter()
            .map(|score| {
                score.map(|score| ComparisonCell {
                    score,
                    relative: min_score.and_then(|min| relative_score(min, score)),
                })
            })
            .collect();
        for (total, cell) in totals.iter_mut().zip(&cells) {
            if let Some(relative) = cell.as_ref().and_then(|c| c.relative) {
                *total += relative;
            }
        }
        rows.push(ComparisonRow {
            seed: seed.clone(),
            cells,
        });
    }

    ComparisonTable {
        solutions: solutions.to_vec(),
        primary: primary.to_string(),
        rows,
        totals,
    }
}

impl ComparisonTable {
    fn grid(&self) -> (Vec<String>, Vec<Vec<String>>, Vec<String>) {
        let header = std::iter::once("seed".to_string())
            .chain(self.solutions.iter().cloned())
            .collect();
        let body = self
            .rows
            .iter()
            .map(|row| {
                std::iter::once(row.seed.clone())
                    .chain(row.cells.iter().map(|cell| match cell {
                        Some(c) => match c.relative {
                            Some(rel) => format!("{} / {:.8}", c.score, rel),
                            None => format!("{} / -", c.score),
                        },
                        None => "-".to_string(),
                    }))
                    .collect()
            })
            .collect();
        let footer = std::iter::once("total".to_string())
            .chain(self.totals.iter().map(|t| format!("{:.7}", t)))
            .collect();
        (header, body, footer)
    }
}

impl fmt::Display for ComparisonTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (header, body, footer) = self.grid();
        let mut widths: Vec<usize> = header.iter().map(|c| c.width()).collect();
        for row in body.iter().chain(std::iter::once(&footer)) {
            for (w, cell) in widths.iter_mut().zip(row) {
                *w = (*w).max(cell.width());
            }
        }
        let separator: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
        let separator = format!("|-{}-|", separator.join("-|-"));

        write_row(f, &header, &widths)?;
        writeln!(f, "{}", separator)?;
        for row in &body {
            write_row(f, row, &widths)?;
        }
        writeln!(f, "{}", separator)?;
        write_row(f, &footer, &widths)
    }
}

fn write_row(f: &mut fmt::Formatter<'_>, row: &[String], widths: &[usize]) -> fmt::Result {
    let cells: Vec<String> = row
        .iter()
        .zip(widths)
        .map(|(cell, &w)| pad_left(cell, w))
        .collect();
    writeln!(f, "| {} |", cells.join(" | "))
}

/// Right-aligns by terminal display width, so wide glyphs take two columns.
fn pad_left(cell: &str, width: usize) -> String {
    let padding = " ".repeat(width.saturating_sub(cell.width()));
    format!("{}{}", padding, cell)
}
