//! Persisted per-seed history of best scores.
//!
//! Each seed maps to an append-only sequence that only grows when a run
//! strictly beats the last entry, so every sequence is ascending in time and
//! non-increasing in score. The last entry is the all-time best.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::error::HarnessError;
use crate::fsutil::atomic_write_json_pretty;
use crate::record::ScoreRecord;

pub const HISTORY_SCHEMA_VERSION: &str = "score_history_v1";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryStore {
    seeds: BTreeMap<String, Vec<ScoreRecord>>,
}

#[derive(Serialize, Deserialize)]
struct HistoryFile {
    schema_version: String,
    #[serde(default)]
    seeds: BTreeMap<String, Vec<ScoreRecord>>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the store from `path`. A missing file is an empty history.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no history file, starting empty");
                return Ok(Self::new());
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read history {}", path.display()))
            }
        };
        let file: HistoryFile =
            serde_json::from_slice(&bytes).map_err(|e| HarnessError::CorruptHistory {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if file.schema_version != HISTORY_SCHEMA_VERSION {
            return Err(HarnessError::CorruptHistory {
                path: path.to_path_buf(),
                reason: format!("unsupported schema_version {}", file.schema_version),
            }
            .into());
        }
        debug!(path = %path.display(), seeds = file.seeds.len(), "loaded history");
        Ok(Self { seeds: file.seeds })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = HistoryFile {
            schema_version: HISTORY_SCHEMA_VERSION.to_string(),
            seeds: self.seeds.clone(),
        };
        atomic_write_json_pretty(path, &file)
            .with_context(|| format!("failed to write history {}", path.display()))
    }

    pub fn is_new_record(&self, seed: &str, score: i64) -> bool {
        match self.latest(seed) {
            Some(last) => last.score > score,
            None => true,
        }
    }

    pub fn record(&mut self, result: ScoreRecord) -> Result<(), HarnessError> {
        if !self.is_new_record(&result.seed, result.score) {
            return Err(HarnessError::NotARecord {
                seed: result.seed,
                score: result.score,
            });
        }
        self.seeds
            .entry(result.seed.clone())
            .or_default()
            .push(result);
        Ok(())
    }

    pub fn latest(&self, seed: &str) -> Option<&ScoreRecord> {
        self.seeds.get(seed).and_then(|h| h.last())
    }

    /// Best record known at `cutoff`. Sequences only improve, so the newest
    /// entry at or before the cutoff is also the best one.
    pub fn best_as_of(&self, seed: &str, cutoff: DateTime<Utc>) -> Option<&ScoreRecord> {
        self.seeds
            .get(seed)?
            .iter()
            .rev()
            .find(|r| r.time <= cutoff)
    }

    pub fn trace(&self, seed: &str) -> &[ScoreRecord] {
        self.seeds.get(seed).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn seeds(&self) -> impl Iterator<Item = &str> {
        self.seeds.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsutil::temp_root;
    use chrono::{Duration, TimeZone};

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap() + Duration::days(n)
    }

    fn rec(seed: &str, score: i64, time: DateTime<Utc>) -> ScoreRecord {
        ScoreRecord {
            seed: seed.to_string(),
            filename: "0000.txt".to_string(),
            score,
            time,
        }
    }

    fn seeded_42() -> HistoryStore {
        let mut store = HistoryStore::new();
        store.record(rec("42", 100, day(0))).expect("first record");
        store
    }

    #[test]
    fn improvement_is_appended() {
        let mut store = seeded_42();
        assert!(store.is_new_record("42", 80));
        store.record(rec("42", 80, day(2))).expect("record");
        let scores: Vec<_> = store.trace("42").iter().map(|r| (r.score, r.time)).collect();
        assert_eq!(scores, vec![(100, day(0)), (80, day(2))]);
    }

    #[test]
    fn tie_is_not_a_record() {
        let mut store = seeded_42();
        assert!(!store.is_new_record("42", 100));
        let err = store.record(rec("42", 100, day(3))).expect_err("tie");
        assert!(matches!(err, HarnessError::NotARecord { score: 100, .. }));
        assert_eq!(store.trace("42").len(), 1);
    }

    #[test]
    fn unknown_seed_is_always_a_record() {
        let store = seeded_42();
        assert!(store.is_new_record("7", i64::MAX));
        assert!(store.latest("7").is_none());
    }

    #[test]
    fn best_as_of_picks_newest_entry_before_cutoff() {
        let mut store = seeded_42();
        store.record(rec("42", 80, day(2))).expect("record");
        assert_eq!(store.best_as_of("42", day(1)).map(|r| r.score), Some(100));
        assert_eq!(store.best_as_of("42", day(2)).map(|r| r.score), Some(80));
        assert_eq!(store.best_as_of("42", day(-1)), None);
        assert_eq!(store.best_as_of("missing", day(5)), None);
        assert_eq!(store.best_as_of("42", day(1)), store.best_as_of("42", day(1)));
    }

    #[test]
    fn sequences_stay_monotonic_under_mixed_updates() {
        let mut store = HistoryStore::new();
        let scores = [500, 700, 400, 400, 450, 100, 300, 99];
        for (i, score) in scores.iter().enumerate() {
            let r = rec("s", *score, day(i as i64));
            if store.is_new_record(&r.seed, r.score) {
                store.record(r).expect("record");
            }
        }
        let trace = store.trace("s");
        assert_eq!(
            trace.iter().map(|r| r.score).collect::<Vec<_>>(),
            vec![500, 400, 100, 99]
        );
        for pair in trace.windows(2) {
            assert!(pair[0].time < pair[1].time);
            assert!(pair[0].score > pair[1].score);
        }
    }

    #[test]
    fn missing_file_loads_empty() {
        let root = temp_root("history_missing");
        let store = HistoryStore::load(&root.join("score_history.json")).expect("load");
        assert!(store.is_empty());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn save_then_load_round_trips() {
        let root = temp_root("history_round_trip");
        let path = root.join("score_history.json");
        let mut store = seeded_42();
        store.record(rec("42", 80, day(2))).expect("record");
        store.record(rec("b", 5, day(1))).expect("record");
        store.save(&path).expect("save");

        let loaded = HistoryStore::load(&path).expect("load");
        assert_eq!(loaded, store);
        assert_eq!(loaded.seeds().collect::<Vec<_>>(), vec!["42", "b"]);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn corrupt_file_is_fatal() {
        let root = temp_root("history_corrupt");
        let path = root.join("score_history.json");
        fs::write(&path, "{not json").expect("write");
        let err = HistoryStore::load(&path).expect_err("corrupt");
        assert!(matches!(
            err.downcast_ref::<HarnessError>(),
            Some(HarnessError::CorruptHistory { .. })
        ));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn unknown_schema_version_is_rejected() {
        let root = temp_root("history_schema");
        let path = root.join("score_history.json");
        fs::write(&path, r#"{"schema_version":"score_history_v9","seeds":{}}"#).expect("write");
        let err = HistoryStore::load(&path).expect_err("schema");
        assert!(err.to_string().contains("score_history_v9"), "{}", err);
        let _ = fs::remove_dir_all(root);
    }
}
