//! The pending-operation queue.
//!
//! [`OperationQueue`] holds the user's intents (install, uninstall or upgrade
//! a package) keyed by package name. A name appears at most once; queueing it
//! again replaces the earlier intent in place. Committing takes an immutable
//! [`OperationBatch`] snapshot and moves the queue from idle to draining. While
//! draining, the queue only shrinks: each confirmed operation removes its node,
//! and the queue returns to idle once the batch process exits.
//!
//! The queue is a cheap, cloneable handle over shared state, so the view that
//! edits it and the task that applies engine events see the same nodes.

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_enum_str::{Deserialize_enum_str, Serialize_enum_str};
use tracing::{debug, info, trace, warn};

use crate::control;
use crate::errors::{AptBatchError, Result};

/// What to do with a package.
#[derive(Serialize_enum_str, Deserialize_enum_str, Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum OperationFlag {
    Install,
    Uninstall,
    Upgrade,
}

impl OperationFlag {
    /// The package-tool subcommand that carries out this flag.
    #[must_use]
    pub fn subcommand(&self) -> &'static str {
        match self {
            OperationFlag::Install => "install",
            OperationFlag::Uninstall => "remove",
            OperationFlag::Upgrade => "install --only-upgrade",
        }
    }
}

/// A single queued intent.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq, Hash)]
pub struct QueueNode {
    pub name: String,
    pub flag: OperationFlag,
    /// Target version; only meaningful for upgrades.
    pub version: Option<String>,
}

impl QueueNode {
    pub fn new(name: impl Into<String>, flag: OperationFlag) -> Self {
        QueueNode {
            name: name.into(),
            flag,
            version: None,
        }
    }

    pub fn install(name: impl Into<String>) -> Self {
        Self::new(name, OperationFlag::Install)
    }

    pub fn uninstall(name: impl Into<String>) -> Self {
        Self::new(name, OperationFlag::Uninstall)
    }

    pub fn upgrade(name: impl Into<String>, version: Option<String>) -> Self {
        QueueNode {
            version,
            ..Self::new(name, OperationFlag::Upgrade)
        }
    }

    /// The argument handed to the package tool: `name`, or `name=version` for
    /// a versioned upgrade.
    #[must_use]
    pub fn target(&self) -> String {
        match (&self.flag, &self.version) {
            (OperationFlag::Upgrade, Some(version)) => format!("{}={}", self.name, version),
            _ => self.name.clone(),
        }
    }

    fn validate(&self) -> Result<()> {
        if !control::is_valid_package_name(&self.name) {
            return Err(AptBatchError::invalid_package(
                &self.name,
                "not a valid Debian package name",
            ));
        }
        if let Some(version) = &self.version {
            if !control::is_valid_version(version) {
                return Err(AptBatchError::invalid_package(
                    &self.name,
                    format!("not a valid version: {:?}", version),
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Display for QueueNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{} {} ({})", self.flag, self.name, version),
            None => write!(f, "{} {}", self.flag, self.name),
        }
    }
}

/// The nodes of one commit, frozen in queue order.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct OperationBatch {
    nodes: Vec<QueueNode>,
    committed_at: DateTime<Utc>,
}

impl OperationBatch {
    pub fn new(nodes: Vec<QueueNode>) -> Self {
        OperationBatch {
            nodes,
            committed_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn nodes(&self) -> &[QueueNode] {
        &self.nodes
    }

    #[must_use]
    pub fn committed_at(&self) -> DateTime<Utc> {
        self.committed_at
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueNode> {
        self.nodes.iter()
    }
}

/// Idle accepts edits; Draining means a batch process is running.
#[derive(Serialize_enum_str, Debug, Clone, Copy, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum QueueState {
    Idle,
    Draining,
}

#[derive(Debug)]
struct Inner {
    nodes: Vec<QueueNode>,
    state: QueueState,
    in_flight: Vec<QueueNode>,
    last_error: Option<String>,
}

/// Shared handle to the pending-operation queue.
#[derive(Clone, Debug)]
pub struct OperationQueue {
    inner: Arc<Mutex<Inner>>,
}

impl Default for OperationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationQueue {
    pub fn new() -> Self {
        OperationQueue {
            inner: Arc::new(Mutex::new(Inner {
                nodes: Vec::new(),
                state: QueueState::Idle,
                in_flight: Vec::new(),
                last_error: None,
            })),
        }
    }

    fn ensure_idle(inner: &Inner, action: &str) -> Result<()> {
        match inner.state {
            QueueState::Idle => Ok(()),
            QueueState::Draining => Err(AptBatchError::Busy(format!(
                "cannot {} while a batch is executing",
                action
            ))),
        }
    }

    /// Adds `node`, or replaces the flag and version of the node with the same name.
    ///
    /// A replaced node keeps its position in the queue.
    pub fn enqueue(&self, node: QueueNode) -> Result<()> {
        node.validate()?;
        let mut inner = self.inner.lock()?;
        Self::ensure_idle(&inner, "enqueue")?;

        match inner.nodes.iter_mut().find(|existing| existing.name == node.name) {
            Some(existing) => {
                debug!("Replacing queued {} with {}", existing, node);
                existing.flag = node.flag;
                existing.version = node.version;
            }
            None => {
                debug!("Queued {}", node);
                inner.nodes.push(node);
            }
        }
        Ok(())
    }

    /// Removes the node for `node.name` if it is queued with the same flag,
    /// otherwise enqueues `node`. Returns whether the package is queued afterwards.
    pub fn toggle(&self, node: QueueNode) -> Result<bool> {
        {
            let mut inner = self.inner.lock()?;
            Self::ensure_idle(&inner, "toggle")?;
            if let Some(pos) = inner
                .nodes
                .iter()
                .position(|existing| existing.name == node.name && existing.flag == node.flag)
            {
                let removed = inner.nodes.remove(pos);
                debug!("Unqueued {}", removed);
                return Ok(false);
            }
        }
        self.enqueue(node)?;
        Ok(true)
    }

    /// Drops the node for `name`, returning it if it was queued.
    pub fn remove(&self, name: &str) -> Result<Option<QueueNode>> {
        let mut inner = self.inner.lock()?;
        Self::ensure_idle(&inner, "remove")?;
        let removed = inner
            .nodes
            .iter()
            .position(|node| node.name == name)
            .map(|pos| inner.nodes.remove(pos));
        Ok(removed)
    }

    /// Snapshots the queue into a batch and switches to draining.
    ///
    /// # Errors
    ///
    /// [`AptBatchError::Busy`] while a batch is already executing, and
    /// [`AptBatchError::EmptyQueue`] when there is nothing to run. The queue
    /// is left unchanged in both cases.
    pub fn commit(&self) -> Result<OperationBatch> {
        let mut inner = self.inner.lock()?;
        Self::ensure_idle(&inner, "commit")?;
        if inner.nodes.is_empty() {
            return Err(AptBatchError::EmptyQueue);
        }

        let batch = OperationBatch::new(inner.nodes.clone());
        inner.state = QueueState::Draining;
        inner.in_flight = inner.nodes.clone();
        inner.last_error = None;
        info!("Committed batch of {} operations", batch.len());
        Ok(batch)
    }

    /// Removes the node confirmed by the engine. Unknown names are ignored.
    pub fn on_operation_complete(&self, name: &str) -> Result<Option<QueueNode>> {
        let mut inner = self.inner.lock()?;
        if let Some(pos) = inner.in_flight.iter().position(|node| node.name == name) {
            inner.in_flight.remove(pos);
        }
        let removed = inner
            .nodes
            .iter()
            .position(|node| node.name == name)
            .map(|pos| inner.nodes.remove(pos));
        match &removed {
            Some(node) => debug!("Confirmed {}", node),
            None => warn!("Completion for {} does not match a queued operation", name),
        }
        Ok(removed)
    }

    /// Records a batch-level failure. No node is removed.
    pub fn on_batch_error(&self, message: &str) -> Result<()> {
        let mut inner = self.inner.lock()?;
        trace!("Batch error recorded: {}", message);
        inner.last_error = Some(message.to_string());
        Ok(())
    }

    /// Returns the queue to idle and hands back the nodes of the batch that
    /// were never confirmed. Those nodes stay queued.
    pub fn on_batch_finished(&self) -> Result<Vec<QueueNode>> {
        let mut inner = self.inner.lock()?;
        inner.state = QueueState::Idle;
        let unconfirmed = std::mem::take(&mut inner.in_flight);
        if !unconfirmed.is_empty() {
            warn!(
                "{} operations finished without confirmation",
                unconfirmed.len()
            );
        }
        Ok(unconfirmed)
    }

    pub fn snapshot(&self) -> Result<Vec<QueueNode>> {
        Ok(self.inner.lock()?.nodes.clone())
    }

    pub fn get(&self, name: &str) -> Result<Option<QueueNode>> {
        Ok(self
            .inner
            .lock()?
            .nodes
            .iter()
            .find(|node| node.name == name)
            .cloned())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.inner.lock()?.nodes.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn state(&self) -> Result<QueueState> {
        Ok(self.inner.lock()?.state)
    }

    /// True while a committed batch is executing; new commits are rejected.
    pub fn is_busy(&self) -> Result<bool> {
        Ok(self.state()? == QueueState::Draining)
    }

    /// The most recent batch error, cleared by the next commit.
    pub fn last_error(&self) -> Result<Option<String>> {
        Ok(self.inner.lock()?.last_error.clone())
    }
}
