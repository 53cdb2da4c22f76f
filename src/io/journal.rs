//! Append-only JSON-lines log of strategy outcomes.
//!
//! Several unit sessions may share one journal. Each record is serialized
//! up front and written with a single lock acquisition, so lines from
//! different sessions never interleave.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use crate::core::errors::{CovforgeError, Result};
use crate::core::pipeline::StrategyOutcome;

/// Single-writer outcome journal
#[derive(Debug)]
pub struct OutcomeJournal {
    path: PathBuf,
    file: Mutex<File>,
}

impl OutcomeJournal {
    /// Open `path` for appending, creating it and its parent directory
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                CovforgeError::io(format!("Failed to create {}", parent.display()), e)
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                CovforgeError::io(format!("Failed to open journal {}", path.display()), e)
            })?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one outcome as a whole line
    pub fn append(&self, outcome: &StrategyOutcome) -> Result<()> {
        let mut line = serde_json::to_vec(outcome)?;
        line.push(b'\n');

        let mut file = self.file.lock();
        file.write_all(&line).map_err(|e| {
            CovforgeError::io(format!("Failed to append to {}", self.path.display()), e)
        })?;
        file.flush().map_err(|e| {
            CovforgeError::io(format!("Failed to flush {}", self.path.display()), e)
        })?;
        debug!(
            unit = %outcome.unit_id,
            iteration = outcome.iteration,
            "outcome journaled"
        );
        Ok(())
    }

    /// Read every outcome in a journal file
    pub fn read_all(path: &Path) -> Result<Vec<StrategyOutcome>> {
        let file = File::open(path).map_err(|e| {
            CovforgeError::io(format!("Failed to open journal {}", path.display()), e)
        })?;
        let mut outcomes = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let outcome = serde_json::from_str(&line).map_err(|e| {
                CovforgeError::parse_with_location(
                    "journal",
                    e.to_string(),
                    path.display().to_string(),
                    Some(index + 1),
                )
            })?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::gaps::Strategy;
    use chrono::Utc;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn outcome(unit: &str, iteration: usize) -> StrategyOutcome {
        StrategyOutcome {
            unit_id: unit.to_string(),
            iteration,
            strategy: Strategy::Branch,
            function: "Program::run".to_string(),
            delta: 1.5,
            coverage_after: 40.0,
            accepted: true,
            failure: None,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn appends_and_reads_back_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/outcomes.jsonl");
        let journal = OutcomeJournal::open(&path).unwrap();
        journal.append(&outcome("a", 1)).unwrap();
        journal.append(&outcome("a", 2)).unwrap();

        let read = OutcomeJournal::read_all(&path).unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[0].iteration, 1);
        assert_eq!(read[1].iteration, 2);
    }

    #[test]
    fn reopening_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("outcomes.jsonl");
        OutcomeJournal::open(&path).unwrap().append(&outcome("a", 1)).unwrap();
        OutcomeJournal::open(&path).unwrap().append(&outcome("b", 1)).unwrap();
        assert_eq!(OutcomeJournal::read_all(&path).unwrap().len(), 2);
    }

    #[test]
    fn concurrent_writers_never_interleave_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("outcomes.jsonl");
        let journal = Arc::new(OutcomeJournal::open(&path).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let journal = Arc::clone(&journal);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        journal.append(&outcome(&format!("unit-{worker}"), i)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let read = OutcomeJournal::read_all(&path).unwrap();
        assert_eq!(read.len(), 200);
        for worker in 0..4 {
            let unit = format!("unit-{worker}");
            let iterations: Vec<usize> = read
                .iter()
                .filter(|o| o.unit_id == unit)
                .map(|o| o.iteration)
                .collect();
            assert_eq!(iterations, (0..50).collect::<Vec<_>>());
        }
    }

    #[test]
    fn corrupt_line_reports_location() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("outcomes.jsonl");
        std::fs::write(&path, "{not json}\n").unwrap();
        let err = OutcomeJournal::read_all(&path).unwrap_err();
        assert!(matches!(err, CovforgeError::Parse { line: Some(1), .. }));
    }
}
