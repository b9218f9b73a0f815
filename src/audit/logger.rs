//! Queued audit writer.
//!
//! # Data Flow
//! ```text
//! log_* (any task)
//!     → build AuditEvent, count metrics
//!     → bounded mpsc → single writer task
//!         → retry locally buffered events, oldest first
//!         → sink.append with timeout
//!         → on failure: buffer_locally | fail_request
//!     → oneshot ack back to the caller
//! ```
//!
//! # Design Decisions
//! - One writer task keeps arrival order without a lock around the sink
//! - A caller that gives up waiting does not cancel its write; the command is
//!   already queued and the writer finishes it
//! - A caller that cannot get a queue slot within the write timeout gets an
//!   error, never an acknowledgement
//! - A sink write that outlives its timeout stays in flight and is settled
//!   before the next write, so it is never written twice
//! - Buffered events are never written ahead of older buffered events

use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::event::{AuditContext, AuditEvent, AuditEventType, Severity};
use super::sink::{AuditSink, SinkError};
use crate::clock::Clock;
use crate::config::{AuditConfig, AuditFailurePolicy};
use crate::error::{GuardError, GuardResult};
use crate::observability::metrics::{
    MetricsSink, AUDIT_EVENTS_BUFFERED, AUTHENTICATION_ATTEMPTS, INTERNAL_ERRORS, SECURITY_EVENTS,
};

enum Command {
    Append {
        event: AuditEvent,
        ack: oneshot::Sender<Result<(), SinkError>>,
    },
    Flush {
        ack: oneshot::Sender<Result<(), SinkError>>,
    },
}

pub struct AuditLogger {
    tx: mpsc::Sender<Command>,
    sink: Arc<dyn AuditSink>,
    config: AuditConfig,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsSink>,
}

impl AuditLogger {
    /// Start the writer task. Must be called inside a Tokio runtime.
    pub fn spawn(
        sink: Arc<dyn AuditSink>,
        config: AuditConfig,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let writer = Writer {
            sink: sink.clone(),
            buffer: VecDeque::new(),
            pending: None,
            policy: config.failure_policy,
            max_buffered: config.max_buffered_events,
            timeout: config.write_timeout(),
            timeout_ms: config.write_timeout_ms,
            metrics: metrics.clone(),
        };
        tokio::spawn(writer.run(rx));

        Self {
            tx,
            sink,
            config,
            clock,
            metrics,
        }
    }

    /// Record one event. Under `fail_request`, a sink failure is returned as
    /// `GuardError::AuditSinkUnavailable`.
    pub async fn log_event(
        &self,
        event_type: AuditEventType,
        actor: &str,
        action: &str,
        severity: Severity,
        details: Map<String, Value>,
        context: &AuditContext,
    ) -> GuardResult<()> {
        let event = AuditEvent::new(
            event_type,
            actor,
            action,
            severity,
            details,
            context,
            self.clock.now(),
        );

        self.metrics.increment(
            SECURITY_EVENTS,
            &[("event_type", event_type.as_str()), ("severity", severity.as_str())],
        );
        if severity.is_elevated() {
            tracing::warn!(
                event_type = event_type.as_str(),
                severity = severity.as_str(),
                actor = %actor,
                action = %action,
                "High severity security event"
            );
        } else {
            tracing::debug!(event_type = event_type.as_str(), actor = %actor, "Security event");
        }

        let (ack, done) = oneshot::channel();
        self.submit(Command::Append { event, ack }, done).await
    }

    async fn submit(
        &self,
        command: Command,
        done: oneshot::Receiver<Result<(), SinkError>>,
    ) -> GuardResult<()> {
        let timeout = self.config.write_timeout();

        // Only a queued command may be acknowledged optimistically.
        let permit = match tokio::time::timeout(timeout, self.tx.reserve()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(self.fail(SinkError::Closed)),
            Err(_) => return Err(self.fail(SinkError::QueueFull(self.config.write_timeout_ms))),
        };
        permit.send(command);

        let result = match tokio::time::timeout(timeout, done).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SinkError::Closed),
            Err(_) => Err(SinkError::Timeout(self.config.write_timeout_ms)),
        };

        match result {
            Ok(()) => Ok(()),
            // queued; the writer will land or buffer it
            Err(SinkError::Timeout(ms)) if self.config.failure_policy == AuditFailurePolicy::BufferLocally => {
                tracing::warn!(timeout_ms = ms, "Audit write still pending after timeout");
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn fail(&self, error: SinkError) -> GuardError {
        self.metrics.increment(INTERNAL_ERRORS, &[("component", "audit")]);
        tracing::error!(error = %error, "Audit write failed");
        GuardError::AuditSinkUnavailable(error)
    }

    pub async fn log_authentication(
        &self,
        user_id: &str,
        success: bool,
        extra: Map<String, Value>,
        context: &AuditContext,
    ) -> GuardResult<()> {
        let status = if success { "success" } else { "failure" };
        self.metrics
            .increment(AUTHENTICATION_ATTEMPTS, &[("status", status)]);

        let (event_type, action, severity) = if success {
            (AuditEventType::AuthenticationSuccess, "login", Severity::Info)
        } else {
            (AuditEventType::AuthenticationFailure, "login_failed", Severity::Warning)
        };

        let mut details = Map::new();
        details.insert("success".into(), json!(success));
        details.extend(extra);

        self.log_event(event_type, user_id, action, severity, details, context)
            .await
    }

    pub async fn log_admin_action(
        &self,
        admin_id: &str,
        action: &str,
        target: &str,
        extra: Map<String, Value>,
        context: &AuditContext,
    ) -> GuardResult<()> {
        let mut details = Map::new();
        details.insert("target".into(), json!(target));
        details.insert("admin_action".into(), json!(true));
        details.extend(extra);

        self.log_event(
            AuditEventType::AdminAction,
            admin_id,
            action,
            Severity::High,
            details,
            context,
        )
        .await
    }

    pub async fn log_data_access(
        &self,
        user_id: &str,
        resource_type: &str,
        resource_id: &str,
        action: &str,
        context: &AuditContext,
    ) -> GuardResult<()> {
        let mut details = Map::new();
        details.insert("resource_type".into(), json!(resource_type));
        details.insert("resource_id".into(), json!(resource_id));
        details.insert("action".into(), json!(action));

        self.log_event(
            AuditEventType::DataAccess,
            user_id,
            action,
            Severity::Info,
            details,
            context,
        )
        .await
    }

    /// Wait until every queued event is in the sink. Fails if events remain
    /// in the local buffer.
    pub async fn flush(&self) -> GuardResult<()> {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::Flush { ack }).await.is_err() {
            return Err(self.fail(SinkError::Closed));
        }
        match done.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(self.fail(e)),
            Err(_) => Err(self.fail(SinkError::Closed)),
        }
    }

    /// Events persisted in the sink, after draining the queue.
    pub async fn events(&self) -> GuardResult<Vec<AuditEvent>> {
        if let Err(e) = self.flush().await {
            tracing::warn!(error = %e, "Reading audit events with writes still buffered");
        }
        self.sink
            .load()
            .await
            .map_err(GuardError::AuditSinkUnavailable)
    }

    /// Drop events older than the retention period. Returns how many went.
    pub async fn cleanup_old_logs(&self) -> GuardResult<usize> {
        let cutoff = self.clock.now() - self.config.retention();
        let removed = match self.sink.retain_since(cutoff).await {
            Ok(removed) => removed,
            Err(e) => {
                self.metrics
                    .increment(INTERNAL_ERRORS, &[("component", "audit_retention")]);
                tracing::error!(error = %e, "Audit retention sweep failed");
                return Err(GuardError::AuditSinkUnavailable(e));
            }
        };
        tracing::info!(removed, cutoff = %cutoff, "Old audit events removed");
        Ok(removed)
    }
}

/// A sink write that outlived its timeout. It may still land, so it is
/// settled before anything else is written.
struct Pending {
    event: AuditEvent,
    task: JoinHandle<Result<(), SinkError>>,
}

struct Writer {
    sink: Arc<dyn AuditSink>,
    buffer: VecDeque<AuditEvent>,
    pending: Option<Pending>,
    policy: AuditFailurePolicy,
    max_buffered: usize,
    timeout: std::time::Duration,
    timeout_ms: u64,
    metrics: Arc<dyn MetricsSink>,
}

impl Writer {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Append { event, ack } => {
                    let result = self.append(event).await;
                    if let Err(Err(e)) = ack.send(result) {
                        self.metrics.increment(INTERNAL_ERRORS, &[("component", "audit")]);
                        tracing::error!(error = %e, "Audit write failed after the caller stopped waiting");
                    }
                }
                Command::Flush { ack } => {
                    let result = self.drain_buffer().await;
                    let _ = ack.send(result);
                }
            }
        }

        if let Err(e) = self.drain_buffer().await {
            tracing::error!(
                error = %e,
                lost = self.buffer.len() + usize::from(self.pending.is_some()),
                "Audit writer stopped with unwritten events"
            );
        }
    }

    /// Hand one event to the sink. On failure the event comes back unless
    /// its write is still in flight.
    async fn write(&mut self, event: AuditEvent) -> Result<(), (SinkError, Option<AuditEvent>)> {
        let sink = self.sink.clone();
        let record = event.clone();
        let mut task = tokio::spawn(async move { sink.append(&record).await });

        let waited = tokio::time::timeout(self.timeout, &mut task).await;
        match waited {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err((e, Some(event))),
            Ok(Err(join)) => Err((SinkError::Unavailable(join.to_string()), Some(event))),
            Err(_) => {
                self.pending = Some(Pending { event, task });
                Err((SinkError::Timeout(self.timeout_ms), None))
            }
        }
    }

    async fn settle_pending(&mut self) -> Result<(), SinkError> {
        let Some(mut pending) = self.pending.take() else {
            return Ok(());
        };

        let waited = tokio::time::timeout(self.timeout, &mut pending.task).await;
        let outcome = match waited {
            Ok(joined) => joined.unwrap_or_else(|e| Err(SinkError::Unavailable(e.to_string()))),
            Err(_) => {
                self.pending = Some(pending);
                return Err(SinkError::Timeout(self.timeout_ms));
            }
        };

        let Err(error) = outcome else {
            return Ok(());
        };
        match self.policy {
            // oldest unwritten event, so it goes back to the front
            AuditFailurePolicy::BufferLocally => self.buffer.push_front(pending.event),
            AuditFailurePolicy::FailRequest => {
                self.metrics.increment(INTERNAL_ERRORS, &[("component", "audit")]);
                tracing::error!(
                    event_id = %pending.event.event_id,
                    error = %error,
                    "Timed-out audit write failed"
                );
            }
        }
        Err(error)
    }

    async fn drain_buffer(&mut self) -> Result<(), SinkError> {
        self.settle_pending().await?;
        while let Some(event) = self.buffer.pop_front() {
            if let Err((error, unsent)) = self.write(event).await {
                if let Some(event) = unsent {
                    self.buffer.push_front(event);
                }
                return Err(error);
            }
        }
        Ok(())
    }

    async fn append(&mut self, event: AuditEvent) -> Result<(), SinkError> {
        let (error, unsent) = match self.drain_buffer().await {
            Ok(()) => match self.write(event).await {
                Ok(()) => return Ok(()),
                Err(failure) => failure,
            },
            Err(e) => (e, Some(event)),
        };

        match self.policy {
            AuditFailurePolicy::FailRequest => Err(error),
            AuditFailurePolicy::BufferLocally => {
                let Some(event) = unsent else {
                    tracing::warn!(error = %error, "Audit write in flight past its timeout");
                    return Ok(());
                };
                if self.buffer.len() >= self.max_buffered {
                    return Err(SinkError::BufferFull(self.buffer.len()));
                }
                tracing::warn!(error = %error, buffered = self.buffer.len() + 1, "Audit sink failing, buffering event");
                self.buffer.push_back(event);
                self.metrics.increment(AUDIT_EVENTS_BUFFERED, &[]);
                Ok(())
            }
        }
    }
}
