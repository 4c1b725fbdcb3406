use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Score assigned to a run whose diagnostics carry no `Score = N` line.
pub const FAILED_SCORE: i64 = 1_000_000_000;

/// One scored run. This is the unit persisted in the history store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub seed: String,
    pub filename: String,
    pub score: i64,
    pub time: DateTime<Utc>,
}

/// Problem parameters from the first line of an input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputParams {
    pub n: i64,
    pub m: i64,
    pub d: i64,
    pub k: i64,
}

impl fmt::Display for InputParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "N = {}, M = {}, D = {}, K = {}",
            self.n, self.m, self.d, self.k
        )
    }
}

/// A scored run together with the data only the current report needs.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseResult {
    pub index: usize,
    pub record: ScoreRecord,
    pub params: InputParams,
    pub elapsed: Duration,
}

impl CaseResult {
    pub fn desc(&self) -> String {
        format!(
            "{} ({}) ... score = {}",
            self.record.filename, self.params, self.record.score
        )
    }

    pub fn is_failed(&self) -> bool {
        self.record.score == FAILED_SCORE
    }
}

/// `past / current`. Undefined when the current score is zero.
pub fn relative_score(past: i64, current: i64) -> Option<f64> {
    if current == 0 {
        return None;
    }
    Some(past as f64 / current as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn desc_lists_params_and_score() {
        let result = CaseResult {
            index: 3,
            record: ScoreRecord {
                seed: "42".to_string(),
                filename: "0003.txt".to_string(),
                score: 1234,
                time: Utc::now(),
            },
            params: InputParams {
                n: 10,
                m: 20,
                d: 3,
                k: 4,
            },
            elapsed: Duration::from_millis(10),
        };
        assert_eq!(
            result.desc(),
            "0003.txt (N = 10, M = 20, D = 3, K = 4) ... score = 1234"
        );
        assert!(!result.is_failed());
    }

    #[test]
    fn relative_score_is_undefined_for_zero_current() {
        assert_eq!(relative_score(100, 80), Some(1.25));
        assert_eq!(relative_score(0, 0), None);
        assert_eq!(relative_score(100, 0), None);
    }
}
