//! Feedback records and the append-only feedback log.
//!
//! One JSON object per line. Records are never edited or removed; the
//! pattern store can be rebuilt from them (see [`crate::learner::replay`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::error::{NlsqlError, NlsqlResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Accepted,
    Corrected,
}

/// Which stage produced the generated SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Pattern,
    Fallback,
    /// Generic answer returned when the fallback generator was unavailable.
    Degraded,
}

impl Route {
    pub fn is_fallback(self) -> bool {
        matches!(self, Route::Fallback | Route::Degraded)
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Route::Pattern => "pattern",
            Route::Fallback => "fallback",
            Route::Degraded => "degraded",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub question: String,
    pub generated_sql: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrected_sql: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_id: Option<String>,
    pub route: Route,
}

impl FeedbackRecord {
    pub fn new(
        question: impl Into<String>,
        generated_sql: impl Into<String>,
        corrected_sql: Option<String>,
        route: Route,
        pattern_id: Option<String>,
    ) -> Self {
        let outcome = if corrected_sql.is_some() {
            Outcome::Corrected
        } else {
            Outcome::Accepted
        };
        Self {
            question: question.into(),
            generated_sql: generated_sql.into(),
            corrected_sql,
            timestamp: Utc::now(),
            outcome,
            pattern_id,
            route,
        }
    }
}

/// Append-only record log. Without a path it only keeps records in memory.
///
/// Records that could not be written stay queued at the tail of `records`
/// and are written, in order, before the next record.
#[derive(Debug)]
pub struct FeedbackLog {
    path: Option<PathBuf>,
    file: Option<File>,
    records: Vec<FeedbackRecord>,
    /// Tail records not yet on disk.
    pending: usize,
    /// A write failed mid-line; terminate it before writing again.
    needs_guard: bool,
}

impl FeedbackLog {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            file: None,
            records: Vec::new(),
            pending: 0,
            needs_guard: false,
        }
    }

    /// Read the existing log, if any. The file is opened for append on the
    /// first write. A line cut short by an interrupted write is skipped.
    pub fn open(path: impl AsRef<Path>) -> NlsqlResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut records = Vec::new();

        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for (i, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<FeedbackRecord>(&line) {
                    Ok(record) => records.push(record),
                    Err(e) if e.is_eof() => {
                        tracing::warn!("Skipping truncated record at {} line {}", path.display(), i + 1);
                    }
                    Err(e) => {
                        return Err(NlsqlError::Config(format!(
                            "{} line {}: {}",
                            path.display(),
                            i + 1,
                            e
                        )));
                    }
                }
            }
            tracing::info!("Loaded {} feedback records from {}", records.len(), path.display());
        }

        Ok(Self {
            path: Some(path),
            file: None,
            records,
            pending: 0,
            needs_guard: false,
        })
    }

    pub fn records(&self) -> &[FeedbackRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records kept in memory only, after a failed write.
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Append one record and flush it, along with any queued records. On a
    /// write failure the record is still kept in memory and `Persistence` is
    /// returned.
    pub fn append(&mut self, record: FeedbackRecord) -> NlsqlResult<()> {
        self.records.push(record);
        self.pending += 1;
        self.flush_pending()
    }

    /// Write queued records in order. Stops at the first failure.
    pub fn flush_pending(&mut self) -> NlsqlResult<()> {
        if self.path.is_none() {
            self.pending = 0;
            return Ok(());
        }
        while self.pending > 0 {
            let next = self.records.len() - self.pending;
            let line = serde_json::to_string(&self.records[next])?;
            if let Err(e) = self.write_line(&line) {
                self.file = None;
                self.needs_guard = true;
                return Err(e);
            }
            self.pending -= 1;
        }
        Ok(())
    }

    fn write_line(&mut self, record: &str) -> NlsqlResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut line = String::with_capacity(record.len() + 2);
        if self.needs_guard {
            line.push('\n');
        }
        line.push_str(record);
        line.push('\n');

        let persist = |e: std::io::Error| NlsqlError::Persistence(format!("{}: {}", path.display(), e));
        if self.file.is_none() {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir).map_err(persist)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(persist)?;
            self.file = Some(file);
        }
        if let Some(file) = self.file.as_mut() {
            file.write_all(line.as_bytes()).map_err(persist)?;
            file.flush().map_err(persist)?;
        }
        self.needs_guard = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(corrected: Option<&str>) -> FeedbackRecord {
        FeedbackRecord::new(
            "Show me all parts",
            "SELECT * FROM vMTL_SYSTEM_ITEMS",
            corrected.map(str::to_string),
            Route::Pattern,
            Some("list_items".into()),
        )
    }

    #[test]
    fn test_outcome_follows_correction() {
        assert_eq!(record(None).outcome, Outcome::Accepted);
        assert_eq!(record(Some("SELECT PART_NUMBER FROM vMTL_SYSTEM_ITEMS")).outcome, Outcome::Corrected);
    }

    #[test]
    fn test_append_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("feedback.jsonl");

        let mut log = FeedbackLog::open(&path).unwrap();
        assert!(log.is_empty());
        log.append(record(None)).unwrap();
        log.append(record(Some("SELECT PART_NUMBER FROM vMTL_SYSTEM_ITEMS"))).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(!content.lines().next().unwrap().contains("corrected_sql"));

        let reopened = FeedbackLog::open(&path).unwrap();
        assert_eq!(reopened.records(), log.records());
    }

    #[test]
    fn test_failed_append_keeps_record_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "").unwrap();

        let mut log = FeedbackLog::open(blocker.join("feedback.jsonl")).unwrap();
        let err = log.append(record(None)).unwrap_err();
        assert!(matches!(err, NlsqlError::Persistence(_)));
        assert_eq!(log.len(), 1);
        assert_eq!(log.pending(), 1);
    }

    #[test]
    fn test_queued_records_are_written_on_next_append() {
        let dir = tempfile::tempdir().unwrap();
        let parent = dir.path().join("logs");
        std::fs::write(&parent, "").unwrap();
        let path = parent.join("feedback.jsonl");

        let mut log = FeedbackLog::open(&path).unwrap();
        assert!(log.append(record(None)).is_err());
        assert!(log.flush_pending().is_err());
        assert_eq!(log.pending(), 1);

        std::fs::remove_file(&parent).unwrap();
        log.append(record(Some("SELECT PART_NUMBER FROM vMTL_SYSTEM_ITEMS"))).unwrap();
        assert_eq!(log.pending(), 0);

        let reopened = FeedbackLog::open(&path).unwrap();
        assert_eq!(reopened.records(), log.records());
        assert_eq!(reopened.records()[0].outcome, Outcome::Accepted);
    }

    #[test]
    fn test_truncated_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feedback.jsonl");
        let full = serde_json::to_string(&record(None)).unwrap();
        let torn = &full[..full.len() / 2];
        std::fs::write(&path, format!("{}\n{}\n{}\n", full, torn, full)).unwrap();

        let log = FeedbackLog::open(&path).unwrap();
        assert_eq!(log.len(), 2);

        std::fs::write(&path, "{\"question\": 3}\n").unwrap();
        assert!(matches!(FeedbackLog::open(&path), Err(NlsqlError::Config(_))));
    }
}
