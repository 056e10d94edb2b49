//! Push outcome sinks.
//!
//! Every pool owns an `ok` and a `fail` sink and every push outcome is written
//! to exactly one of them. Sinks come in two flavours: a bounded in-memory
//! buffer for tests and embedding, and an append-only JSON-lines file.

use std::collections::VecDeque;
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::error::DispatchError;
use super::message::TaskId;
use crate::util::clock::now_ms;

/// Which of the two sinks a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Delivered.
    Ok,
    /// Not delivered.
    Fail,
}

impl OutcomeKind {
    /// Suffix used in sink names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Fail => "fail",
        }
    }
}

/// One line in an outcome log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    /// Milliseconds since epoch.
    pub at_ms: u128,
    /// Scope that produced the record, e.g. `pool-0` or `dispatcher`.
    pub scope: String,
    /// Task the record belongs to.
    pub task_id: TaskId,
    /// Worker that pushed, when there was one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<usize>,
    /// Device token, absent for task-level failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// Provider HTTP status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Provider notification id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apns_id: Option<String>,
    /// Error text for failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OutcomeRecord {
    /// Task-level record with no device.
    pub fn task_failure(scope: impl Into<String>, task_id: TaskId, error: impl Into<String>) -> Self {
        Self {
            at_ms: now_ms(),
            scope: scope.into(),
            task_id,
            worker_id: None,
            device: None,
            status: None,
            apns_id: None,
            error: Some(error.into()),
        }
    }
}

/// Outcome sink abstraction.
pub trait OutcomeSink: Send + Sync {
    /// Append a record.
    fn append(&self, record: &OutcomeRecord);

    /// Flush buffered records.
    fn flush(&self) {}
}

/// The `ok` and `fail` sinks of one pool.
#[derive(Clone)]
pub struct PoolSinks {
    /// Successful pushes.
    pub ok: Arc<dyn OutcomeSink>,
    /// Failed pushes and task-level failures.
    pub fail: Arc<dyn OutcomeSink>,
}

impl PoolSinks {
    /// Route a record by kind.
    pub fn record(&self, kind: OutcomeKind, record: &OutcomeRecord) {
        match kind {
            OutcomeKind::Ok => self.ok.append(record),
            OutcomeKind::Fail => self.fail.append(record),
        }
    }

    /// Flush both sinks.
    pub fn flush(&self) {
        self.ok.flush();
        self.fail.flush();
    }
}

/// Bounded in-memory sink; the oldest record is dropped when full.
pub struct InMemoryOutcomeSink {
    records: Mutex<VecDeque<OutcomeRecord>>,
    max_records: usize,
}

impl InMemoryOutcomeSink {
    /// Create a sink holding at most `max_records`.
    #[must_use]
    pub fn new(max_records: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(max_records.min(4096))),
            max_records,
        }
    }

    /// Snapshot of stored records.
    #[must_use]
    pub fn records(&self) -> Vec<OutcomeRecord> {
        self.records.lock().iter().cloned().collect()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OutcomeSink for InMemoryOutcomeSink {
    fn append(&self, record: &OutcomeRecord) {
        let mut records = self.records.lock();
        if records.len() >= self.max_records {
            records.pop_front();
        }
        records.push_back(record.clone());
    }
}

/// JSON-lines file sink.
pub struct FileOutcomeSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl FileOutcomeSink {
    /// Open `<dir>/<name>_<millis>.log` for appending, creating `dir` if needed.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Backend`] when the directory or file cannot be created.
    pub fn open(dir: impl AsRef<Path>, name: &str) -> Result<Self, DispatchError> {
        let dir = dir.as_ref();
        create_dir_all(dir).map_err(|e| DispatchError::Backend(e.to_string()))?;
        let path = dir.join(format!("{name}_{}.log", now_ms()));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| DispatchError::Backend(format!("{}: {e}", path.display())))?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OutcomeSink for FileOutcomeSink {
    fn append(&self, record: &OutcomeRecord) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode outcome record");
                return;
            }
        };
        let mut writer = self.writer.lock();
        if let Err(e) = writeln!(writer, "{line}") {
            tracing::error!(path = %self.path.display(), error = %e, "failed to write outcome record");
        }
    }

    fn flush(&self) {
        if let Err(e) = self.writer.lock().flush() {
            tracing::error!(path = %self.path.display(), error = %e, "failed to flush outcome log");
        }
    }
}

impl Drop for FileOutcomeSink {
    fn drop(&mut self) {
        let _ = self.writer.get_mut().flush();
    }
}

/// Where pools and the dispatcher write outcomes.
#[derive(Clone)]
pub enum OutcomeTarget {
    /// Shared in-memory sinks across all pools.
    Memory {
        /// Receives every `ok` record.
        ok: Arc<InMemoryOutcomeSink>,
        /// Receives every `fail` record.
        fail: Arc<InMemoryOutcomeSink>,
    },
    /// One file per scope and kind inside a directory.
    Directory(PathBuf),
}

impl OutcomeTarget {
    /// In-memory target with bounded sinks.
    #[must_use]
    pub fn memory(max_records: usize) -> Self {
        Self::Memory {
            ok: Arc::new(InMemoryOutcomeSink::new(max_records)),
            fail: Arc::new(InMemoryOutcomeSink::new(max_records)),
        }
    }

    /// Open the sink for `scope` and `kind`.
    ///
    /// # Errors
    ///
    /// Propagates file sink creation failures.
    pub fn open(&self, scope: &str, kind: OutcomeKind) -> Result<Arc<dyn OutcomeSink>, DispatchError> {
        match self {
            Self::Memory { ok, fail } => Ok(match kind {
                OutcomeKind::Ok => Arc::clone(ok) as Arc<dyn OutcomeSink>,
                OutcomeKind::Fail => Arc::clone(fail) as Arc<dyn OutcomeSink>,
            }),
            Self::Directory(dir) => {
                let sink = FileOutcomeSink::open(dir, &format!("{scope}_{}", kind.as_str()))?;
                Ok(Arc::new(sink))
            }
        }
    }

    /// Open both sinks for a scope.
    ///
    /// # Errors
    ///
    /// Propagates file sink creation failures.
    pub fn open_pair(&self, scope: &str) -> Result<PoolSinks, DispatchError> {
        Ok(PoolSinks {
            ok: self.open(scope, OutcomeKind::Ok)?,
            fail: self.open(scope, OutcomeKind::Fail)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(device: &str) -> OutcomeRecord {
        OutcomeRecord {
            at_ms: now_ms(),
            scope: "pool-0".into(),
            task_id: 1,
            worker_id: Some(0),
            device: Some(device.into()),
            status: Some(200),
            apns_id: None,
            error: None,
        }
    }

    #[test]
    fn test_in_memory_sink_overflow() {
        let sink = InMemoryOutcomeSink::new(2);
        sink.append(&record("a"));
        sink.append(&record("b"));
        sink.append(&record("c"));
        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].device.as_deref(), Some("b"));
        assert_eq!(records[1].device.as_deref(), Some("c"));
    }

    #[test]
    fn test_pool_sinks_route_by_kind() {
        let target = OutcomeTarget::memory(16);
        let sinks = target.open_pair("pool-0").unwrap();
        sinks.record(OutcomeKind::Ok, &record("a"));
        sinks.record(OutcomeKind::Fail, &OutcomeRecord::task_failure("dispatcher", 2, "boom"));
        let OutcomeTarget::Memory { ok, fail } = target else {
            unreachable!()
        };
        assert_eq!(ok.len(), 1);
        assert_eq!(fail.len(), 1);
        assert_eq!(fail.records()[0].error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_file_sink_writes_json_lines() {
        let dir = std::env::temp_dir().join(format!("push-dispatch-outcome-{}", uuid::Uuid::new_v4()));
        let sink = FileOutcomeSink::open(&dir, "pool-0_ok").unwrap();
        sink.append(&record("a"));
        sink.append(&record("b"));
        sink.flush();
        let content = std::fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<OutcomeRecord> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].device.as_deref(), Some("b"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
