//! Durable destinations for audit records.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::audit::types::{AuditFilter, AuditRecord};

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("audit sink unavailable: {0}")]
    Unavailable(String),

    #[error("audit queue closed")]
    QueueClosed,

    #[error("audit record not confirmed within {0:?}")]
    Unconfirmed(Duration),

    #[error("audit writer stopped before the record was written")]
    WriterStopped,
}

/// Append-only audit store, queryable by identity and correlation id.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> Result<(), AuditError>;

    /// Matching records in append order.
    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError>;

    async fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }

    fn name(&self) -> &str;
}

/// In-memory sink for development and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    records: Arc<RwLock<Vec<AuditRecord>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.read().clone()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Makes every append fail until reset, for exercising the failure path.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<(), AuditError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuditError::Unavailable("memory sink set to fail".into()));
        }
        self.records.write().push(record.clone());
        Ok(())
    }

    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        Ok(filter.apply(self.records.read().iter()))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// One JSON object per line, appended and synced to disk per record.
pub struct JsonLinesAuditSink {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
}

impl JsonLinesAuditSink {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        tracing::info!(path = %path.display(), "Audit file sink opened");
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl AuditSink for JsonLinesAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        // Held so an append in progress cannot leave a partial last line.
        let _file = self.file.lock().await;
        let content = tokio::fs::read_to_string(&self.path).await?;
        let mut records = Vec::new();
        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), line = number + 1, error = %e, "Skipping unreadable audit line");
                }
            }
        }
        Ok(filter.apply(records.iter()))
    }

    async fn flush(&self) -> Result<(), AuditError> {
        let mut file = self.file.lock().await;
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "jsonl"
    }
}

/// Sink whose appends never complete.
#[cfg(test)]
pub(crate) struct StalledAuditSink;

#[cfg(test)]
#[async_trait]
impl AuditSink for StalledAuditSink {
    async fn append(&self, _record: &AuditRecord) -> Result<(), AuditError> {
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn query(&self, _filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "stalled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::context::{CorrelationId, Operation, ResourceKind};
    use crate::security::identity::Identity;
    use serde_json::json;

    fn record(identity: &str) -> AuditRecord {
        AuditRecord::success(
            Identity::new(identity),
            Operation::Create,
            ResourceKind::Upload,
            Some("up-1".into()),
            CorrelationId::generate(),
            json!({"size_bytes": 42}),
        )
    }

    #[tokio::test]
    async fn test_memory_sink_failure_toggle() {
        let sink = MemoryAuditSink::new();
        sink.append(&record("a")).await.unwrap();
        sink.set_failing(true);
        assert!(sink.append(&record("a")).await.is_err());
        sink.set_failing(false);
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn test_jsonl_sink_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("audit.jsonl");

        let sink = JsonLinesAuditSink::open(&path).await.unwrap();
        sink.append(&record("a")).await.unwrap();
        sink.append(&record("b")).await.unwrap();
        sink.flush().await.unwrap();
        drop(sink);

        let reopened = JsonLinesAuditSink::open(&path).await.unwrap();
        reopened.append(&record("a")).await.unwrap();

        let all = reopened.query(&AuditFilter::new()).await.unwrap();
        assert_eq!(all.len(), 3);
        let only_a = reopened
            .query(&AuditFilter::new().identity(Identity::new("a")))
            .await
            .unwrap();
        assert_eq!(only_a.len(), 2);
        assert_eq!(only_a[0].detail, json!({"size_bytes": 42}));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_jsonl_query_during_appends_sees_whole_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(JsonLinesAuditSink::open(dir.path().join("audit.jsonl")).await.unwrap());

        let writer = {
            let sink = sink.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    sink.append(&record("a")).await.unwrap();
                }
            })
        };

        let mut seen = 0;
        while !writer.is_finished() {
            let count = sink.query(&AuditFilter::new()).await.unwrap().len();
            assert!(count >= seen);
            seen = count;
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();

        assert_eq!(sink.query(&AuditFilter::new()).await.unwrap().len(), 50);
    }
}
