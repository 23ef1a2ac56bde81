//! apt-batch - browse, search, queue and apply Debian package operations
//!
//! apt-batch collects install, uninstall and upgrade requests in a queue and
//! applies them as one batch behind a single privilege prompt. Read-only
//! queries (`apt-cache`, `apt-get -s`, `dpkg-query`) never need elevation.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use apt_batch::{QueueNode, Session, Settings};
//!
//! # async fn example() -> apt_batch::Result<()> {
//! let session = Session::from_settings(Settings::load(None)?);
//!
//! session.queue().enqueue(QueueNode::install("htop"))?;
//! session.queue().enqueue(QueueNode::uninstall("nano"))?;
//!
//! let report = session.commit().await?;
//! for node in &report.unconfirmed {
//!     eprintln!("{} finished in an unknown state", node);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`control`]: parses `apt-cache show` control stanzas into [`PackageRecord`]s
//! - [`PackageMetadataService`]: read-only queries with an install-state cache
//! - [`OperationQueue`]: deduplicating queue with an idle/draining state machine
//! - [`PrivilegedExecutionEngine`]: runs a batch and correlates completion sentinels
//! - [`Session`]: applies engine events to the queue and produces a [`BatchReport`]
//!
//! # Error Handling
//!
//! Fallible operations return [`Result<T>`] with [`AptBatchError`]. A batch that
//! started is never an error: stderr output and unconfirmed operations are
//! reported as events and collected in the [`BatchReport`].
//!
//! # Safety
//!
//! Package names and versions are validated when queued and shell-escaped when
//! the batch script is built. Query arguments are passed to the tools directly,
//! never through a shell.

pub mod commands;
pub mod configuration;
pub mod control;
pub mod engine;
pub mod errors;
pub mod metadata;
pub mod output;
pub mod queue;
pub mod session;
pub mod traits;

// Re-export commonly used types
pub use configuration::{Elevation, Settings};
pub use control::{parse_stanza, parse_stanzas, PackageRecord, ParseOutcome};
pub use engine::{OperationEvent, PrivilegedExecutionEngine};
pub use errors::{AptBatchError, Result};
pub use metadata::{PackageMetadataService, Preview, UpgradeCandidate};
pub use queue::{OperationBatch, OperationFlag, OperationQueue, QueueNode};
pub use session::{BatchReport, Session};
