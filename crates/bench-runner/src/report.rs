//! Score report: new-record detection against the history store and a
//! lookback comparison against the best scores known one day earlier.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;

use crate::config::MissingBaseline;
use crate::history::HistoryStore;
use crate::record::{relative_score, CaseResult};

pub fn lookback_window() -> Duration {
    Duration::days(1)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordStatus {
    NewRecord,
    NoImprovement {
        past_score: i64,
        delta: i64,
        ratio: Option<f64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultLine {
    pub seed: String,
    pub filename: String,
    pub score: i64,
    pub desc: String,
    pub status: RecordStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LookbackLine {
    pub seed: String,
    pub filename: String,
    pub score: i64,
    pub desc: String,
    pub baseline: Option<i64>,
    pub delta: Option<i64>,
    pub ratio: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub cutoff: DateTime<Utc>,
    pub policy: MissingBaseline,
    pub results: Vec<ResultLine>,
    pub lookback: Vec<LookbackLine>,
    pub new_records: usize,
    pub total_score: i64,
    pub relative_total: Option<f64>,
    pub missing_baselines: usize,
}

/// Builds the report and records every new best into `history`.
///
/// Results are visited best score first. Each one is checked against the
/// seed's latest entry as it stands at that moment, so when a seed appears
/// twice in one run the worse result is compared against the better one.
pub fn build_report(
    results: &[CaseResult],
    history: &mut HistoryStore,
    now: DateTime<Utc>,
    policy: MissingBaseline,
) -> Report {
    let mut ordered: Vec<&CaseResult> = results.iter().collect();
    ordered.sort_by_key(|r| (r.record.score, r.index));

    let mut lines = Vec::with_capacity(ordered.len());
    let mut new_records = 0;
    for result in &ordered {
        let record = &result.record;
        let status = match history.latest(&record.seed) {
            Some(past) if past.score <= record.score => RecordStatus::NoImprovement {
                past_score: past.score,
                delta: record.score - past.score,
                ratio: relative_score(past.score, record.score),
            },
            _ => RecordStatus::NewRecord,
        };
        if status == RecordStatus::NewRecord && history.record(record.clone()).is_ok() {
            new_records += 1;
        }
        lines.push(ResultLine {
            seed: record.seed.clone(),
            filename: record.filename.clone(),
            score: record.score,
            desc: result.desc(),
            status,
        });
    }

    let cutoff = now - lookback_window();
    let mut lookback = Vec::with_capacity(ordered.len());
    let mut total_score = 0i64;
    let mut ratios = Vec::with_capacity(ordered.len());
    for result in &ordered {
        let record = &result.record;
        total_score += record.score;
        let baseline = history
            .best_as_of(&record.seed, cutoff)
            .map(|past| past.score);
        let ratio = baseline.and_then(|past| relative_score(past, record.score));
        ratios.push(ratio);
        lookback.push(LookbackLine {
            seed: record.seed.clone(),
            filename: record.filename.clone(),
            score: record.score,
            desc: result.desc(),
            baseline,
            delta: baseline.map(|past| record.score - past),
            ratio,
        });
    }
    let (relative_total, missing_baselines) = sum_ratios(&ratios, policy);

    Report {
        generated_at: now,
        cutoff,
        policy,
        results: lines,
        lookback,
        new_records,
        total_score,
        relative_total,
        missing_baselines,
    }
}

/// Sums relative scores. Returns the total and how many were undefined.
pub fn sum_ratios(ratios: &[Option<f64>], policy: MissingBaseline) -> (Option<f64>, usize) {
    let missing = ratios.iter().filter(|r| r.is_none()).count();
    let defined = ratios.iter().flatten().sum::<f64>();
    let total = match policy {
        MissingBaseline::Propagate if missing > 0 => None,
        _ => Some(defined),
    };
    (total, missing)
}

fn fmt_ratio(ratio: Option<f64>) -> String {
    ratio
        .map(|r| r.to_string())
        .unwrap_or_else(|| "undefined".to_string())
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# Results")?;
        writeln!(f)?;
        for line in &self.results {
            match &line.status {
                RecordStatus::NewRecord => writeln!(f, "{} (new record)", line.desc)?,
                RecordStatus::NoImprovement { delta, ratio, .. } => {
                    writeln!(f, "{} ({:+}, {})", line.desc, delta, fmt_ratio(*ratio))?
                }
            }
        }
        writeln!(f)?;
        writeln!(
            f,
            "# relative scores until {} UTC",
            self.cutoff.format("%Y-%m-%d %H:%M:%S")
        )?;
        writeln!(f)?;
        for line in &self.lookback {
            let delta = line
                .delta
                .map(|d| format!("{:+}", d))
                .unwrap_or_else(|| "undefined".to_string());
            writeln!(f, "{} ({}: {})", line.desc, delta, fmt_ratio(line.ratio))?;
        }
        write!(
            f,
            "total score: {}, rel score: {}",
            self.total_score,
            fmt_ratio(self.relative_total)
        )?;
        if self.policy == MissingBaseline::Skip && self.missing_baselines > 0 {
            write!(f, " ({} without baseline)", self.missing_baselines)?;
        }
        writeln!(f)
    }
}
