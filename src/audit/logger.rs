//! Audit queue and writer task.
//!
//! Request handlers hold a cloneable [`AuditLogger`] and enqueue records;
//! a single [`AuditWriter`] drains the queue into the sink. One consumer
//! keeps append order equal to enqueue order, so a request's records land
//! in the order the request produced them.
//!
//! Successful mutations use the confirmed path: the caller waits, up to a
//! timeout, for the writer to report whether the record reached the sink.
//! A record is counted as failed exactly once, by whichever side settles it
//! first: the writer after exhausting retries or when it is dropped with the
//! record still queued, or the waiter when its timeout expires.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::audit::sink::{AuditError, AuditSink};
use crate::audit::types::{AuditFilter, AuditRecord, ViolationKind};
use crate::observability::metrics;
use crate::resilience::RetryPolicy;
use crate::security::context::{CorrelationId, Operation, ResourceKind, SecurityContext};
use crate::security::identity::Identity;

/// How long a confirmed write waits for the writer by default.
pub const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(5);

enum Command {
    Append(Pending),
    Flush(oneshot::Sender<()>),
}

/// A queued record and, on the confirmed path, the waiter's ack channel.
struct Pending {
    record: AuditRecord,
    ack: Option<oneshot::Sender<bool>>,
    settled: Arc<AtomicBool>,
}

impl Pending {
    fn unconfirmed(record: AuditRecord) -> Self {
        Self {
            record,
            ack: None,
            settled: Arc::new(AtomicBool::new(false)),
        }
    }

    fn confirmed(record: AuditRecord, ack: oneshot::Sender<bool>) -> Self {
        Self {
            record,
            ack: Some(ack),
            settled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// True for the first caller only.
    fn settle(&self) -> bool {
        !self.settled.swap(true, Ordering::AcqRel)
    }

    fn fail(self, stats: &AuditStats, error: &AuditError) {
        if self.settle() {
            report_failure(stats, &self.record, error);
        }
        if let Some(ack) = self.ack {
            let _ = ack.send(false);
        }
    }
}

/// Counters for the audit pipeline; `failed` is the operational signal for
/// records that never reached the sink.
#[derive(Debug, Default)]
pub struct AuditStats {
    enqueued: AtomicU64,
    written: AtomicU64,
    failed: AtomicU64,
}

/// Handle used by request handlers to record audit events.
#[derive(Clone)]
pub struct AuditLogger {
    tx: mpsc::Sender<Command>,
    sink: Arc<dyn AuditSink>,
    stats: Arc<AuditStats>,
    confirm_timeout: Duration,
}

impl AuditLogger {
    /// Creates the handle and its writer; the caller decides where the writer runs.
    pub fn new(sink: Arc<dyn AuditSink>, capacity: usize, retry: RetryPolicy) -> (Self, AuditWriter) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let stats = Arc::new(AuditStats::default());
        let logger = Self {
            tx,
            sink: sink.clone(),
            stats: stats.clone(),
            confirm_timeout: DEFAULT_CONFIRM_TIMEOUT,
        };
        let writer = AuditWriter {
            rx,
            sink,
            stats,
            retry,
            next_sequence: 0,
            in_flight: None,
        };
        (logger, writer)
    }

    /// Creates the handle and spawns the writer on the current runtime.
    pub fn spawn(sink: Arc<dyn AuditSink>, capacity: usize, retry: RetryPolicy) -> (Self, JoinHandle<()>) {
        let (logger, writer) = Self::new(sink, capacity, retry);
        let handle = tokio::spawn(writer.run());
        (logger, handle)
    }

    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }

    pub async fn log_success(
        &self,
        identity: &Identity,
        operation: Operation,
        resource_kind: ResourceKind,
        resource_id: Option<&str>,
        correlation_id: CorrelationId,
        detail: Value,
    ) {
        self.record(AuditRecord::success(
            identity.clone(),
            operation,
            resource_kind,
            resource_id.map(str::to_string),
            correlation_id,
            detail,
        ))
        .await;
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn log_violation(
        &self,
        kind: ViolationKind,
        operation: Operation,
        resource_kind: ResourceKind,
        reason: &str,
        identity: Option<&Identity>,
        resource_id: Option<&str>,
        correlation_id: CorrelationId,
        detail: Value,
    ) {
        self.record(AuditRecord::violation(
            kind,
            operation,
            resource_kind,
            reason,
            identity.cloned(),
            resource_id.map(str::to_string),
            correlation_id,
            detail,
        ))
        .await;
    }

    /// Success entry for the operation in `ctx`.
    pub async fn success_for(&self, ctx: &SecurityContext, resource_id: Option<&str>, detail: Value) {
        self.record(AuditRecord::success_for(ctx, resource_id.map(str::to_string), detail))
            .await;
    }

    /// Success entry for a completed mutation; returns whether it was
    /// persisted within the confirmation timeout.
    pub async fn confirm_success_for(&self, ctx: &SecurityContext, resource_id: Option<&str>, detail: Value) -> bool {
        self.record_confirmed(AuditRecord::success_for(ctx, resource_id.map(str::to_string), detail))
            .await
    }

    /// Violation entry attributed to the identity in `ctx`.
    pub async fn violation_for(
        &self,
        ctx: &SecurityContext,
        kind: ViolationKind,
        reason: &str,
        resource_id: Option<&str>,
        detail: Value,
    ) {
        self.record(AuditRecord::violation_for(
            ctx,
            kind,
            reason,
            resource_id.map(str::to_string),
            detail,
        ))
        .await;
    }

    /// Enqueues a record. Never fails the caller; a closed queue is reported
    /// through the failure counter and the error log.
    pub async fn record(&self, record: AuditRecord) {
        self.enqueue(Pending::unconfirmed(record)).await;
    }

    /// Enqueues a record and waits for the writer to persist it. Returns
    /// false when the write failed or did not finish within the timeout;
    /// either way the loss is already counted and logged.
    pub async fn record_confirmed(&self, record: AuditRecord) -> bool {
        let (ack_tx, ack_rx) = oneshot::channel();
        let pending = Pending::confirmed(record.clone(), ack_tx);
        let settled = pending.settled.clone();

        let confirmation = async {
            if !self.enqueue(pending).await {
                return false;
            }
            // A dropped ack means the writer stopped and counted the record.
            ack_rx.await.unwrap_or(false)
        };
        match tokio::time::timeout(self.confirm_timeout, confirmation).await {
            Ok(persisted) => persisted,
            Err(_) => {
                if !settled.swap(true, Ordering::AcqRel) {
                    report_failure(&self.stats, &record, &AuditError::Unconfirmed(self.confirm_timeout));
                }
                false
            }
        }
    }

    async fn enqueue(&self, pending: Pending) -> bool {
        metrics::record_audit_record(pending.record.outcome.label());
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        match self.tx.send(Command::Append(pending)).await {
            Ok(()) => true,
            Err(mpsc::error::SendError(cmd)) => {
                if let Command::Append(pending) = cmd {
                    pending.fail(&self.stats, &AuditError::QueueClosed);
                }
                false
            }
        }
    }

    /// Waits until everything enqueued so far has been handed to the sink.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    pub async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        self.sink.query(filter).await
    }

    pub fn enqueued(&self) -> u64 {
        self.stats.enqueued.load(Ordering::Relaxed)
    }

    pub fn written(&self) -> u64 {
        self.stats.written.load(Ordering::Relaxed)
    }

    /// Records that never reached the sink: retries exhausted, queue closed,
    /// writer stopped, or not confirmed in time.
    pub fn failed_writes(&self) -> u64 {
        self.stats.failed.load(Ordering::Relaxed)
    }

    pub fn sink_name(&self) -> &str {
        self.sink.name()
    }
}

/// Background consumer persisting queued records.
pub struct AuditWriter {
    rx: mpsc::Receiver<Command>,
    sink: Arc<dyn AuditSink>,
    stats: Arc<AuditStats>,
    retry: RetryPolicy,
    next_sequence: u64,
    in_flight: Option<Pending>,
}

impl AuditWriter {
    /// Runs until every `AuditLogger` handle has been dropped.
    pub async fn run(mut self) {
        self.next_sequence = match self.sink.query(&AuditFilter::new().limit(1)).await {
            Ok(last) => last.first().map(|r| r.sequence).unwrap_or(0),
            Err(e) => {
                tracing::warn!(sink = self.sink.name(), error = %e, "Could not read last audit sequence; starting at 0");
                0
            }
        };
        tracing::info!(sink = self.sink.name(), sequence = self.next_sequence, "Audit writer started");

        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Append(mut pending) => {
                    self.next_sequence += 1;
                    pending.record.sequence = self.next_sequence;
                    self.in_flight = Some(pending);
                    self.write_in_flight().await;
                }
                Command::Flush(ack) => {
                    if let Err(e) = self.sink.flush().await {
                        tracing::warn!(sink = self.sink.name(), error = %e, "Audit sink flush failed");
                    }
                    let _ = ack.send(());
                }
            }
        }

        if let Err(e) = self.sink.flush().await {
            tracing::warn!(sink = self.sink.name(), error = %e, "Final audit flush failed");
        }
        tracing::info!("Audit writer stopped");
    }

    /// Writes the in-flight record, keeping it in `self` while the sink is
    /// awaited so a dropped writer can still account for it.
    async fn write_in_flight(&mut self) {
        let Some(record) = self.in_flight.as_ref().map(|p| &p.record) else {
            return;
        };
        let mut attempt = 0;
        let result = loop {
            attempt += 1;
            match self.sink.append(record).await {
                Ok(()) => break Ok(()),
                Err(e) if self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_after(attempt);
                    tracing::warn!(
                        correlation_id = %record.correlation_id,
                        attempt,
                        delay = ?delay,
                        error = %e,
                        "Audit append failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => break Err(e),
            }
        };

        let Some(pending) = self.in_flight.take() else {
            return;
        };
        match result {
            Ok(()) => {
                self.stats.written.fetch_add(1, Ordering::Relaxed);
                if !pending.settle() {
                    tracing::info!(
                        correlation_id = %pending.record.correlation_id,
                        audit_id = %pending.record.id,
                        "Audit record persisted after its confirmation timed out"
                    );
                }
                if let Some(ack) = pending.ack {
                    let _ = ack.send(true);
                }
            }
            Err(e) => pending.fail(&self.stats, &e),
        }
    }
}

impl Drop for AuditWriter {
    fn drop(&mut self) {
        self.rx.close();
        let mut lost: Vec<Pending> = self.in_flight.take().into_iter().collect();
        while let Ok(command) = self.rx.try_recv() {
            if let Command::Append(pending) = command {
                lost.push(pending);
            }
        }
        if lost.is_empty() {
            return;
        }
        tracing::error!(count = lost.len(), "Audit writer stopped with records not yet written");
        for pending in lost {
            pending.fail(&self.stats, &AuditError::WriterStopped);
        }
    }
}

fn report_failure(stats: &AuditStats, record: &AuditRecord, error: &AuditError) {
    stats.failed.fetch_add(1, Ordering::Relaxed);
    metrics::record_audit_write_failure();
    tracing::error!(
        correlation_id = %record.correlation_id,
        audit_id = %record.id,
        identity = ?record.identity,
        outcome = record.outcome.label(),
        resource_kind = %record.resource_kind,
        error = %error,
        "AUDIT_WRITE_FAILED: audit record was not persisted"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::sink::{MemoryAuditSink, StalledAuditSink};
    use crate::audit::types::AuditOutcome;
    use serde_json::json;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(3, 1, 5)
    }

    #[tokio::test]
    async fn test_records_arrive_in_order_with_sequence() {
        let sink = MemoryAuditSink::new();
        let (logger, _writer) = AuditLogger::spawn(Arc::new(sink.clone()), 16, fast_retry());
        let identity = Identity::new("u1");
        let cid = CorrelationId::generate();

        for i in 0..5 {
            logger
                .log_success(&identity, Operation::Read, ResourceKind::Video, None, cid, json!({"n": i}))
                .await;
        }
        logger.flush().await;

        let records = sink.records();
        assert_eq!(records.len(), 5);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.detail, json!({"n": i}));
            assert_eq!(record.sequence, i as u64 + 1);
        }
        assert_eq!(logger.written(), 5);
    }

    #[tokio::test]
    async fn test_violation_without_identity() {
        let sink = MemoryAuditSink::new();
        let (logger, _writer) = AuditLogger::spawn(Arc::new(sink.clone()), 16, fast_retry());
        logger
            .log_violation(
                ViolationKind::InvalidSignature,
                Operation::Update,
                ResourceKind::Job,
                "signature mismatch",
                None,
                None,
                CorrelationId::generate(),
                Value::Null,
            )
            .await;
        logger.flush().await;

        let records = sink.records();
        assert_eq!(records[0].outcome, AuditOutcome::Violation(ViolationKind::InvalidSignature));
        assert!(records[0].identity.is_none());
    }

    #[tokio::test]
    async fn test_sink_failure_is_counted_not_raised() {
        let sink = MemoryAuditSink::new();
        sink.set_failing(true);
        let (logger, _writer) = AuditLogger::spawn(Arc::new(sink.clone()), 16, fast_retry());

        logger
            .log_success(
                &Identity::new("u1"),
                Operation::Delete,
                ResourceKind::Video,
                Some("v1"),
                CorrelationId::generate(),
                Value::Null,
            )
            .await;
        logger.flush().await;

        assert_eq!(logger.failed_writes(), 1);
        assert_eq!(logger.written(), 0);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_closed_queue_is_reported() {
        let sink = MemoryAuditSink::new();
        let (logger, writer) = AuditLogger::new(Arc::new(sink), 4, fast_retry());
        drop(writer);

        logger
            .log_success(
                &Identity::new("u1"),
                Operation::Read,
                ResourceKind::Job,
                None,
                CorrelationId::generate(),
                Value::Null,
            )
            .await;
        assert_eq!(logger.failed_writes(), 1);
    }

    fn delete_record() -> AuditRecord {
        AuditRecord::success(
            Identity::new("u1"),
            Operation::Delete,
            ResourceKind::Video,
            Some("v1".into()),
            CorrelationId::generate(),
            Value::Null,
        )
    }

    #[tokio::test]
    async fn test_confirmed_record_is_persisted_before_return() {
        let sink = MemoryAuditSink::new();
        let (logger, _writer) = AuditLogger::spawn(Arc::new(sink.clone()), 16, fast_retry());

        assert!(logger.record_confirmed(delete_record()).await);
        assert_eq!(sink.len(), 1);
        assert_eq!(logger.written(), 1);
    }

    #[tokio::test]
    async fn test_confirmed_record_reports_sink_failure() {
        let sink = MemoryAuditSink::new();
        sink.set_failing(true);
        let (logger, _writer) = AuditLogger::spawn(Arc::new(sink.clone()), 16, fast_retry());

        assert!(!logger.record_confirmed(delete_record()).await);
        assert_eq!(logger.failed_writes(), 1);
    }

    #[tokio::test]
    async fn test_queued_records_lost_with_writer_are_counted() {
        let sink = MemoryAuditSink::new();
        let (logger, writer) = AuditLogger::new(Arc::new(sink.clone()), 8, fast_retry());

        for _ in 0..3 {
            logger.record(delete_record()).await;
        }
        assert_eq!(logger.failed_writes(), 0);

        drop(writer);
        assert_eq!(logger.failed_writes(), 3);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_stalled_writer_counts_each_record_once() {
        let (logger, writer) = AuditLogger::spawn(Arc::new(StalledAuditSink), 8, fast_retry());
        let logger = logger.with_confirm_timeout(Duration::from_millis(20));

        // The first record is stuck in the sink; the second waits behind it.
        assert!(!logger.record_confirmed(delete_record()).await);
        assert_eq!(logger.failed_writes(), 1);
        logger.record(delete_record()).await;

        writer.abort();
        assert!(writer.await.unwrap_err().is_cancelled());
        assert_eq!(logger.failed_writes(), 2);
        assert_eq!(logger.written(), 0);
    }
}
