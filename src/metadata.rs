//! Read-only package queries.
//!
//! [`PackageMetadataService`] wraps `apt-cache`, `apt-get -s` and `dpkg-query`.
//! None of these calls need elevated privileges. Every query fails with
//! [`AptBatchError::Query`] when the tool writes to its error stream, except
//! [`PackageMetadataService::status`], which reports any failure as "not
//! installed".
//!
//! ```rust,no_run
//! use apt_batch::configuration::Settings;
//! use apt_batch::metadata::PackageMetadataService;
//!
//! # async fn example() -> apt_batch::Result<()> {
//! let metadata = PackageMetadataService::from_settings(&Settings::default());
//! let pending = metadata.check_updates().await?;
//! if metadata.status("htop").await {
//!     println!("htop is installed, {pending} upgrades pending");
//! }
//! # Ok(())
//! # }
//! ```

use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use moka::sync::Cache;
use regex::Regex;
use serde::Serialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, trace, warn};

use crate::configuration::Settings;
use crate::control::{self, ParseOutcome};
use crate::errors::{AptBatchError, Result};
use crate::traits::{CommandOutput, QueryRunner};

/// `Inst name [current] (candidate origin [arch])` as printed by `apt-get -s`.
static INST_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Inst (\S+)(?: \[([^\]]+)\])? \((\S+)(?: ([^\[)]*[^\[)\s]))?(?: \[[^\]]*\])?\)")
        .expect("invalid Inst line pattern")
});

/// One line of `apt-cache search` output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Preview {
    pub name: String,
    pub short_description: String,
}

impl Preview {
    /// Splits a `name - description` line. A line without the separator is all name.
    #[must_use]
    pub fn from_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let (name, short_description) = line.split_once(" - ").unwrap_or((line, ""));
        Some(Preview {
            name: name.trim().to_string(),
            short_description: short_description.trim().to_string(),
        })
    }
}

/// A package `apt-get upgrade` would touch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpgradeCandidate {
    pub name: String,
    /// Absent when the upgrade pulls in a package that is not installed yet.
    pub current_version: Option<String>,
    pub candidate_version: String,
    pub origin: Option<String>,
}

impl UpgradeCandidate {
    #[must_use]
    pub fn from_inst_line(line: &str) -> Option<Self> {
        let caps = INST_LINE_RE.captures(line)?;
        Some(UpgradeCandidate {
            name: caps.get(1)?.as_str().to_string(),
            current_version: caps.get(2).map(|m| m.as_str().to_string()),
            candidate_version: caps.get(3)?.as_str().to_string(),
            origin: caps.get(4).map(|m| m.as_str().trim().to_string()),
        })
    }
}

/// Runs query programs directly with tokio, without a shell, under a timeout.
#[derive(Clone, Debug)]
pub struct TokioQueryRunner {
    timeout: Duration,
}

impl TokioQueryRunner {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TokioQueryRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl QueryRunner for TokioQueryRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let cmdline = format!("{} {}", program, args.join(" "));
        debug!("Running query: {}", cmdline);

        let result = timeout(
            self.timeout,
            Command::new(program)
                .args(args)
                .env("LC_ALL", "C")
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await;

        match result {
            Ok(Ok(output)) => {
                let output = CommandOutput {
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                    success: output.status.success(),
                };
                trace!("{} -> success={}", cmdline, output.success);
                Ok(output)
            }
            Ok(Err(e)) => {
                error!("Process error: {}", e);
                Err(AptBatchError::query(cmdline, e.to_string()))
            }
            Err(_) => {
                error!("Query timed out after {:?}: {}", self.timeout, cmdline);
                Err(AptBatchError::query(
                    cmdline,
                    format!("timed out after {} seconds", self.timeout.as_secs()),
                ))
            }
        }
    }
}

/// Install-state cache keyed by package name.
#[derive(Clone, Debug)]
pub struct StatusCache {
    cache: Cache<String, bool>,
}

impl StatusCache {
    pub fn with_config(ttl: Duration, max_size: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_size)
            .time_to_live(ttl)
            .eviction_listener(|key, _value, cause| {
                trace!("Status cache entry '{}' removed: {:?}", key, cause);
            })
            .build();
        Self { cache }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<bool> {
        self.cache.get(name)
    }

    pub fn insert(&self, name: &str, installed: bool) {
        self.cache.insert(name.to_string(), installed);
    }

    pub fn invalidate(&self, name: &str) {
        self.cache.invalidate(name);
    }
}

/// Read-only queries against the local package database.
#[derive(Clone, Debug)]
pub struct PackageMetadataService<R: QueryRunner = TokioQueryRunner> {
    runner: R,
    tool: String,
    cache_tool: String,
    status_tool: String,
    status_cache: StatusCache,
}

impl PackageMetadataService<TokioQueryRunner> {
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        let runner = TokioQueryRunner::new(Duration::from_secs(settings.query_timeout_secs));
        Self::new(runner, settings)
    }
}

impl<R: QueryRunner> PackageMetadataService<R> {
    pub fn new(runner: R, settings: &Settings) -> Self {
        Self {
            runner,
            tool: settings.tool.clone(),
            cache_tool: settings.cache_tool.clone(),
            status_tool: settings.status_tool.clone(),
            status_cache: StatusCache::with_config(
                Duration::from_secs(settings.status_cache_ttl_secs),
                settings.status_cache_size,
            ),
        }
    }

    pub(crate) fn status_cache(&self) -> &StatusCache {
        &self.status_cache
    }

    /// Runs a query and insists on a clean error stream and a zero exit.
    async fn query(&self, program: &str, args: &[&str]) -> Result<String> {
        let output = self.runner.run(program, args).await?;
        if output.has_error_output() {
            let details = output.stderr.trim().to_string();
            warn!("{} reported: {}", program, details);
            return Err(AptBatchError::query(
                format!("{} {}", program, args.join(" ")),
                details,
            ));
        }
        if !output.success {
            return Err(AptBatchError::query(
                format!("{} {}", program, args.join(" ")),
                "exited with a non-zero status",
            ));
        }
        Ok(output.stdout)
    }

    fn simulate_upgrade_args() -> [&'static str; 4] {
        ["-s", "-o", "Debug::NoLocking=true", "upgrade"]
    }

    /// Number of packages a full upgrade would install or replace.
    pub async fn check_updates(&self) -> Result<usize> {
        let stdout = self
            .query(&self.tool, &Self::simulate_upgrade_args())
            .await?;
        let count = stdout.lines().filter(|line| line.starts_with("Inst ")).count();
        debug!("{} upgrades pending", count);
        Ok(count)
    }

    /// The packages a full upgrade would install or replace, with their versions.
    pub async fn pending_upgrades(&self) -> Result<Vec<UpgradeCandidate>> {
        let stdout = self
            .query(&self.tool, &Self::simulate_upgrade_args())
            .await?;
        let upgrades: Vec<UpgradeCandidate> = stdout
            .lines()
            .filter(|line| line.starts_with("Inst "))
            .filter_map(|line| {
                let candidate = UpgradeCandidate::from_inst_line(line);
                if candidate.is_none() {
                    warn!("Unrecognized simulation line: {}", line);
                }
                candidate
            })
            .collect();
        trace!("{:?}", upgrades);
        Ok(upgrades)
    }

    /// Whether `name` is installed. Never fails: any error means `false`.
    pub async fn status(&self, name: &str) -> bool {
        if !control::is_valid_package_name(name) {
            debug!("Not querying status of invalid package name {:?}", name);
            return false;
        }
        if let Some(installed) = self.status_cache.get(name) {
            trace!("Status cache hit for {}", name);
            return installed;
        }

        match self.runner.run(&self.status_tool, &["-W", name]).await {
            Ok(output) => {
                let installed = output.success
                    && !output.has_error_output()
                    && !output.stdout.trim().is_empty();
                self.status_cache.insert(name, installed);
                installed
            }
            // Not cached: the next call retries the query.
            Err(e) => {
                debug!("Status query for {} failed: {}", name, e);
                false
            }
        }
    }

    /// Drops the cached install state of `name`.
    pub fn invalidate_status(&self, name: &str) {
        self.status_cache.invalidate(name);
    }

    /// Raw `apt-cache show` output for every available version of `name`.
    pub async fn search(&self, name: &str) -> Result<String> {
        ensure_query_term(name)?;
        self.query(&self.cache_tool, &["show", name]).await
    }

    /// `apt-cache show` output parsed into records.
    pub async fn show(&self, name: &str) -> Result<ParseOutcome> {
        let text = self.search(name).await?;
        Ok(control::parse_stanzas(&text))
    }

    /// Name-only search returning one preview per matching package.
    pub async fn search_previews(&self, name: &str) -> Result<Vec<Preview>> {
        ensure_query_term(name)?;
        let stdout = self
            .query(&self.cache_tool, &["search", "--names-only", name])
            .await?;
        let previews: Vec<Preview> = stdout.lines().filter_map(Preview::from_line).collect();
        debug!("{} previews for {}", previews.len(), name);
        Ok(previews)
    }
}

/// Search terms go to the tool as a single argument; a leading `-` would be
/// read as an option.
fn ensure_query_term(term: &str) -> Result<()> {
    if term.trim().is_empty() {
        return Err(AptBatchError::invalid_package(term, "search term is empty"));
    }
    if term.starts_with('-') {
        return Err(AptBatchError::invalid_package(
            term,
            "search term must not start with '-'",
        ));
    }
    Ok(())
}
