//! Shutdown coordination.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::audit::logger::AuditLogger;

/// Broadcast that every long-running task subscribes to.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Number of tasks still listening.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Flushes the audit queue, then waits up to `deadline` for the writer to
/// exit once the last logger handle is gone.
///
/// Returns false if the writer was still running at the deadline. The
/// writer is then aborted and counts the records it never wrote as failed.
pub async fn drain_audit(logger: AuditLogger, mut writer: JoinHandle<()>, deadline: Duration) -> bool {
    let pending = logger.enqueued().saturating_sub(logger.written() + logger.failed_writes());
    tracing::info!(pending, "Draining audit queue");

    let drained = tokio::time::timeout(deadline, async {
        logger.flush().await;
        drop(logger);
        (&mut writer).await
    })
    .await;

    match drained {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Audit writer task failed");
            false
        }
        Err(_) => {
            tracing::error!(deadline = ?deadline, "Audit writer did not stop before deadline; aborting");
            writer.abort();
            let _ = writer.await;
            false
        }
    }
}
