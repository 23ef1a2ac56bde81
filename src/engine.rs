//! Privileged batch execution.
//!
//! A committed [`OperationBatch`] runs as one shell script under one
//! elevation prompt. Each operation is followed by an `echo` of the sentinel
//! token, and [`SentinelCorrelator`] maps every sentinel seen on stdout back
//! to the next unconfirmed node in batch order. Anything written to stderr is
//! surfaced at once as [`OperationEvent::BatchError`]; it does not stop the
//! correlation, so later sentinels still confirm their nodes.
//!
//! Sentinel order is the only link between output and operations unless
//! `tag_markers` is set, in which case the package name is echoed after the
//! sentinel and nodes are matched by name. Ordering relies on `;` running the
//! fragments sequentially inside a single `sh` under the elevation wrapper.
//!
//! There is no cancellation and no timeout: once spawned, the process runs to
//! completion and the event stream ends with [`OperationEvent::Finished`].

use std::process::Stdio;

use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::configuration::Settings;
use crate::errors::{AptBatchError, Result};
use crate::queue::{OperationBatch, QueueNode};

/// Events produced while a batch runs, in the order they were observed.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OperationEvent {
    /// A sentinel confirmed `node`, the `position`-th node of the batch.
    Completed { node: QueueNode, position: usize },
    /// The batch process wrote `message` to stderr. Nodes in `unconfirmed`
    /// are in an unknown state.
    BatchError {
        message: String,
        unconfirmed: Vec<QueueNode>,
    },
    /// The batch process exited. Always the last event.
    Finished {
        exit_code: Option<i32>,
        success: bool,
        unconfirmed: Vec<QueueNode>,
    },
}

pub type OperationStream = BoxStream<'static, OperationEvent>;

/// The shell script for one batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchScript(String);

impl BatchScript {
    /// Builds `<tool> <subcommand> -y <target>; echo <sentinel>` for every node,
    /// joined with `;` in batch order. Package names and versions are shell-escaped.
    pub fn build(batch: &OperationBatch, settings: &Settings) -> Self {
        let fragments: Vec<String> = batch
            .iter()
            .map(|node| fragment(node, settings))
            .collect();
        BatchScript(fragments.join("; "))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn fragment(node: &QueueNode, settings: &Settings) -> String {
    let target = shell_escape::escape(node.target().into());
    let marker = if settings.tag_markers {
        format!(
            "echo {} {}",
            settings.sentinel,
            shell_escape::escape(node.name.as_str().into())
        )
    } else {
        format!("echo {}", settings.sentinel)
    };
    format!(
        "{} {} -y {}; {}",
        settings.tool,
        node.flag.subcommand(),
        target,
        marker
    )
}

/// Maps sentinel lines to batch nodes.
///
/// Never confirms more nodes than the batch holds, and never confirms a
/// node twice.
#[derive(Clone, Debug)]
pub struct SentinelCorrelator {
    nodes: Vec<QueueNode>,
    confirmed: Vec<bool>,
    sentinel: String,
    tagged: bool,
}

impl SentinelCorrelator {
    pub fn new(batch: &OperationBatch, sentinel: &str, tagged: bool) -> Self {
        SentinelCorrelator {
            nodes: batch.nodes().to_vec(),
            confirmed: vec![false; batch.len()],
            sentinel: sentinel.to_string(),
            tagged,
        }
    }

    /// Feeds one stdout line and returns a completion for every sentinel on it.
    pub fn observe(&mut self, line: &str) -> Vec<OperationEvent> {
        let mut events = Vec::new();
        for (index, _) in line.match_indices(&self.sentinel) {
            let payload = line[index + self.sentinel.len()..]
                .split_whitespace()
                .next();
            let position = match (self.tagged, payload) {
                (true, Some(name)) => self.next_pending_named(name),
                _ => self.next_pending(),
            };
            match position {
                Some(position) => {
                    self.confirmed[position] = true;
                    events.push(OperationEvent::Completed {
                        node: self.nodes[position].clone(),
                        position,
                    });
                }
                None => warn!("Sentinel without a pending operation: {}", line),
            }
        }
        events
    }

    fn next_pending(&self) -> Option<usize> {
        self.confirmed.iter().position(|done| !done)
    }

    fn next_pending_named(&self, name: &str) -> Option<usize> {
        self.nodes
            .iter()
            .zip(&self.confirmed)
            .position(|(node, done)| !done && node.name == name)
    }

    /// Nodes no sentinel has confirmed yet, in batch order.
    #[must_use]
    pub fn unconfirmed(&self) -> Vec<QueueNode> {
        self.nodes
            .iter()
            .zip(&self.confirmed)
            .filter(|(_, done)| !**done)
            .map(|(node, _)| node.clone())
            .collect()
    }

    #[must_use]
    pub fn confirmed_count(&self) -> usize {
        self.confirmed.iter().filter(|done| **done).count()
    }
}

/// Runs committed batches under the configured elevation mechanism.
#[derive(Clone, Debug)]
pub struct PrivilegedExecutionEngine {
    settings: Settings,
}

impl PrivilegedExecutionEngine {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn script(&self, batch: &OperationBatch) -> BatchScript {
        BatchScript::build(batch, &self.settings)
    }

    /// Spawns the batch process and returns its event stream.
    ///
    /// Must be called from within a tokio runtime. Dropping the stream does not
    /// stop the process.
    ///
    /// # Errors
    ///
    /// [`AptBatchError::EmptyQueue`] for an empty batch, and
    /// [`AptBatchError::Spawn`] when the elevation program is missing, the
    /// process cannot be started, or it exposes no stdout or stderr. No
    /// event is produced in those cases.
    pub fn execute(&self, batch: &OperationBatch) -> Result<OperationStream> {
        if batch.is_empty() {
            return Err(AptBatchError::EmptyQueue);
        }
        let script = self.script(batch);
        debug!("Batch script: {}", script.as_str());

        let (program, args) = self.settings.elevation.command(script.as_str());
        let correlator =
            SentinelCorrelator::new(batch, &self.settings.sentinel, self.settings.tag_markers);
        info!(
            "Running {} operations via {}",
            batch.len(),
            self.settings.elevation
        );
        spawn_batch(program, &args, correlator)
    }
}

fn spawn_batch(
    program: &str,
    args: &[String],
    correlator: SentinelCorrelator,
) -> Result<OperationStream> {
    let resolved = which::which(program)
        .map_err(|e| AptBatchError::spawn(program, format!("not found: {}", e)))?;

    let mut child = Command::new(resolved)
        .args(args)
        .env("DEBIAN_FRONTEND", "noninteractive")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| AptBatchError::spawn(program, e.to_string()))?;

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        let _ = child.start_kill();
        return Err(AptBatchError::spawn(program, "no readable output streams"));
    };

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(supervise(child, stdout, stderr, correlator, tx));

    Ok(stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (event, rx))
    })
    .boxed())
}

/// Tools may print in any locale, so invalid UTF-8 is replaced rather than rejected.
fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Reads both pipes until they close, then waits for the exit status.
async fn supervise(
    mut child: Child,
    stdout: ChildStdout,
    stderr: ChildStderr,
    mut correlator: SentinelCorrelator,
    tx: mpsc::UnboundedSender<OperationEvent>,
) {
    let mut out_lines = BufReader::new(stdout).split(b'\n');
    let mut err_lines = BufReader::new(stderr).split(b'\n');
    let mut out_open = true;
    let mut err_open = true;

    // A closed receiver only means nobody is listening; the process still runs to completion.
    let emit = |event: OperationEvent| {
        let _ = tx.send(event);
    };

    while out_open || err_open {
        tokio::select! {
            biased;
            segment = out_lines.next_segment(), if out_open => match segment {
                Ok(Some(bytes)) => {
                    let line = decode_line(&bytes);
                    trace!("stdout: {}", line);
                    for event in correlator.observe(&line) {
                        emit(event);
                    }
                }
                Ok(None) => out_open = false,
                Err(e) => {
                    warn!("Failed to read batch stdout: {}", e);
                    out_open = false;
                }
            },
            segment = err_lines.next_segment(), if err_open => match segment {
                Ok(Some(bytes)) => {
                    let line = decode_line(&bytes);
                    error!("Batch error: {}", line);
                    emit(OperationEvent::BatchError {
                        message: line,
                        unconfirmed: correlator.unconfirmed(),
                    });
                }
                Ok(None) => err_open = false,
                Err(e) => {
                    warn!("Failed to read batch stderr: {}", e);
                    err_open = false;
                }
            },
        }
    }

    let (exit_code, success) = match child.wait().await {
        Ok(status) => (status.code(), status.success()),
        Err(e) => {
            emit(OperationEvent::BatchError {
                message: format!("failed to wait for batch process: {}", e),
                unconfirmed: correlator.unconfirmed(),
            });
            (None, false)
        }
    };
    info!(
        "Batch finished: {} of {} confirmed, exit code {:?}",
        correlator.confirmed_count(),
        correlator.nodes.len(),
        exit_code
    );
    emit(OperationEvent::Finished {
        exit_code,
        success,
        unconfirmed: correlator.unconfirmed(),
    });
}
