//! Drives one batch from commit to report.
//!
//! [`Session`] owns the queue handle, the engine and the metadata service. It
//! applies engine events to the queue as they arrive and drops the cached
//! install state of every confirmed package.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::configuration::Settings;
use crate::engine::{OperationEvent, OperationStream, PrivilegedExecutionEngine};
use crate::errors::{AptBatchError, Result};
use crate::metadata::{PackageMetadataService, StatusCache, TokioQueryRunner};
use crate::queue::{OperationBatch, OperationQueue, QueueNode};
use crate::traits::QueryRunner;

/// What happened to one committed batch.
#[derive(Serialize, Clone, Debug)]
pub struct BatchReport {
    pub batch: OperationBatch,
    pub confirmed: Vec<QueueNode>,
    /// Nodes without a sentinel when the process exited; their outcome is unknown.
    pub unconfirmed: Vec<QueueNode>,
    pub errors: Vec<String>,
    pub exit_code: Option<i32>,
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BatchReport {
    fn new(batch: OperationBatch, started_at: DateTime<Utc>) -> Self {
        BatchReport {
            unconfirmed: batch.nodes().to_vec(),
            batch,
            confirmed: Vec::new(),
            errors: Vec::new(),
            exit_code: None,
            success: false,
            started_at,
            finished_at: started_at,
        }
    }

    fn record(&mut self, event: &OperationEvent) {
        match event {
            OperationEvent::Completed { node, .. } => self.confirmed.push(node.clone()),
            OperationEvent::BatchError { message, .. } => self.errors.push(message.clone()),
            OperationEvent::Finished {
                exit_code,
                success,
                unconfirmed,
            } => {
                self.exit_code = *exit_code;
                self.success = *success;
                self.unconfirmed = unconfirmed.clone();
                self.finished_at = Utc::now();
            }
        }
    }

    /// Every node confirmed, nothing on stderr and a zero exit.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.success && self.errors.is_empty() && self.unconfirmed.is_empty()
    }

    /// Turns an unclean report into [`AptBatchError::Batch`].
    pub fn ensure_clean(&self) -> Result<()> {
        if self.is_clean() {
            return Ok(());
        }
        let mut problems = Vec::new();
        if let Some(first) = self.errors.first() {
            problems.push(first.clone());
        }
        if !self.unconfirmed.is_empty() {
            let names: Vec<&str> = self.unconfirmed.iter().map(|n| n.name.as_str()).collect();
            problems.push(format!("unconfirmed: {}", names.join(", ")));
        }
        if !self.success {
            problems.push(match self.exit_code {
                Some(code) => format!("exit status {}", code),
                None => "terminated by signal".to_string(),
            });
        }
        Err(AptBatchError::Batch(problems.join("; ")))
    }

    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

fn apply_event(
    queue: &OperationQueue,
    status_cache: &StatusCache,
    event: &OperationEvent,
) -> Result<()> {
    match event {
        OperationEvent::Completed { node, .. } => {
            queue.on_operation_complete(&node.name)?;
            status_cache.invalidate(&node.name);
        }
        OperationEvent::BatchError { message, .. } => {
            queue.on_batch_error(message)?;
        }
        OperationEvent::Finished { .. } => {
            let unconfirmed = queue.on_batch_finished()?;
            debug!("{} nodes left queued after batch", unconfirmed.len());
        }
    }
    Ok(())
}

/// Event stream of a running batch. If dropped before the stream ends, the
/// rest of the events are applied by a background task so the queue still
/// leaves `Draining` when the process exits.
struct PendingBatch {
    events: Option<OperationStream>,
    queue: OperationQueue,
    status_cache: StatusCache,
}

impl PendingBatch {
    async fn next(&mut self) -> Option<OperationEvent> {
        self.events.as_mut()?.next().await
    }

    fn finish(&mut self) {
        self.events = None;
    }
}

impl Drop for PendingBatch {
    fn drop(&mut self) {
        let Some(events) = self.events.take() else {
            return;
        };
        let queue = self.queue.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("Batch abandoned while running; following it in the background");
                handle.spawn(drain_abandoned(events, queue, self.status_cache.clone()));
            }
            Err(_) => {
                warn!("Batch abandoned outside a runtime; returning queue to idle");
                let _ = queue.on_batch_finished();
            }
        }
    }
}

async fn drain_abandoned(
    mut events: OperationStream,
    queue: OperationQueue,
    status_cache: StatusCache,
) {
    while let Some(event) = events.next().await {
        if let Err(e) = apply_event(&queue, &status_cache, &event) {
            warn!("Failed to apply event of abandoned batch: {}", e);
        }
    }
    if queue.is_busy().unwrap_or(false) {
        let _ = queue.on_batch_finished();
    }
}

pub struct Session<R: QueryRunner = TokioQueryRunner> {
    queue: OperationQueue,
    engine: PrivilegedExecutionEngine,
    metadata: PackageMetadataService<R>,
}

impl Session<TokioQueryRunner> {
    pub fn from_settings(settings: Settings) -> Self {
        let metadata = PackageMetadataService::from_settings(&settings);
        Session::new(
            OperationQueue::new(),
            PrivilegedExecutionEngine::new(settings),
            metadata,
        )
    }
}

impl<R: QueryRunner> Session<R> {
    pub fn new(
        queue: OperationQueue,
        engine: PrivilegedExecutionEngine,
        metadata: PackageMetadataService<R>,
    ) -> Self {
        Session {
            queue,
            engine,
            metadata,
        }
    }

    #[must_use]
    pub fn queue(&self) -> &OperationQueue {
        &self.queue
    }

    #[must_use]
    pub fn engine(&self) -> &PrivilegedExecutionEngine {
        &self.engine
    }

    #[must_use]
    pub fn metadata(&self) -> &PackageMetadataService<R> {
        &self.metadata
    }

    /// Commits the queue, runs the batch and waits for the process to exit.
    pub async fn commit(&self) -> Result<BatchReport> {
        self.commit_with(|_| {}).await
    }

    /// Like [`Session::commit`], calling `observer` for each event before it
    /// is applied to the queue.
    ///
    /// # Errors
    ///
    /// Fails without spawning anything when the queue is busy or empty. A
    /// spawn failure returns the queue to idle with every node still queued.
    ///
    /// Dropping the returned future does not stop the process; its remaining
    /// events are still applied to the queue in the background.
    pub async fn commit_with<F>(&self, mut observer: F) -> Result<BatchReport>
    where
        F: FnMut(&OperationEvent),
    {
        let batch = self.queue.commit()?;
        let started_at = Utc::now();

        let events = match self.engine.execute(&batch) {
            Ok(events) => events,
            Err(e) => {
                warn!("Batch could not start: {}", e);
                self.queue.on_batch_finished()?;
                return Err(e);
            }
        };

        let mut pending = PendingBatch {
            events: Some(events),
            queue: self.queue.clone(),
            status_cache: self.metadata.status_cache().clone(),
        };
        let mut report = BatchReport::new(batch, started_at);
        while let Some(event) = pending.next().await {
            observer(&event);
            self.apply(&event)?;
            report.record(&event);
        }
        pending.finish();

        if self.queue.is_busy()? {
            warn!("Event stream ended without a finish event");
            report.unconfirmed = self.queue.on_batch_finished()?;
            report.finished_at = Utc::now();
        }

        info!(
            "Batch done: {} confirmed, {} unconfirmed, {} errors",
            report.confirmed.len(),
            report.unconfirmed.len(),
            report.errors.len()
        );
        Ok(report)
    }

    /// Applies one engine event to the queue.
    pub fn apply(&self, event: &OperationEvent) -> Result<()> {
        apply_event(&self.queue, self.metadata.status_cache(), event)
    }
}
