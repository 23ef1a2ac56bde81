//! Command implementations for the apt-batch CLI.
//!
//! - [`search_command`]: name-only search with one-line previews
//! - [`show_command`]: full package records from `apt-cache show`
//! - [`status_command`]: install state of several packages, queried concurrently
//! - [`updates_command`]: pending upgrade count or list
//! - [`apply_command`]: queue operations and run them as one privileged batch

use dialoguer::{theme::ColorfulTheme, Confirm};
use futures::future::join_all;
use tabular::{Row, Table};
use tracing::debug;

use crate::engine::OperationEvent;
use crate::errors::{AptBatchError, Result};
use crate::metadata::PackageMetadataService;
use crate::output;
use crate::queue::QueueNode;
use crate::session::{BatchReport, Session};
use crate::traits::QueryRunner;

#[cfg(test)]
mod tests;

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| AptBatchError::Io(std::io::Error::other(e)))
}

pub async fn search_command<R: QueryRunner>(
    metadata: &PackageMetadataService<R>,
    term: &str,
    json: bool,
) -> Result<()> {
    let previews = metadata.search_previews(term).await?;
    if json {
        println!("{}", to_json(&previews)?);
    } else if previews.is_empty() {
        output::info(&format!("No packages match {}", output::package_name(term)));
    } else {
        print!("{}", output::previews_table(&previews));
    }
    Ok(())
}

/// Prints every available version of `name`. Stanzas that fail to parse are
/// reported as warnings.
pub async fn show_command<R: QueryRunner>(
    metadata: &PackageMetadataService<R>,
    name: &str,
    json: bool,
) -> Result<()> {
    let outcome = metadata.show(name).await?;
    if json {
        println!("{}", to_json(&outcome.records)?);
    } else {
        for (index, record) in outcome.records.iter().enumerate() {
            if index > 0 {
                println!();
            }
            print!("{}", output::record_table(record));
            println!("\n{}", record.description);
        }
    }
    for skipped in &outcome.skipped {
        output::warning(&format!("Skipped: {}", skipped));
    }
    if outcome.records.is_empty() {
        output::info(&format!("No readable records for {}", output::package_name(name)));
    }
    Ok(())
}

/// Queries all `names` concurrently; each query fails closed to "not installed".
pub async fn status_command<R: QueryRunner>(
    metadata: &PackageMetadataService<R>,
    names: &[String],
) -> Result<Vec<(String, bool)>> {
    let states = join_all(names.iter().map(|name| metadata.status(name))).await;
    let results: Vec<(String, bool)> = names.iter().cloned().zip(states).collect();

    let mut table = Table::new("{:<} {:<}");
    for (name, installed) in &results {
        let mark = if *installed { "✅" } else { "❌" };
        table.add_row(Row::new().with_cell(mark).with_cell(output::package_name(name)));
    }
    print!("{}", table);
    Ok(results)
}

pub async fn updates_command<R: QueryRunner>(
    metadata: &PackageMetadataService<R>,
    list: bool,
) -> Result<usize> {
    if !list {
        let count = metadata.check_updates().await?;
        println!("{} upgrades pending", output::count(count));
        return Ok(count);
    }

    let upgrades = metadata.pending_upgrades().await?;
    if upgrades.is_empty() {
        output::success("All packages are up to date");
    } else {
        print!("{}", output::upgrades_table(&upgrades));
    }
    Ok(upgrades.len())
}

/// What [`apply_command`] should queue and how to run it.
#[derive(Debug, Clone, Default)]
pub struct ApplyRequest {
    pub nodes: Vec<QueueNode>,
    /// Queue every pending upgrade at its candidate version.
    pub upgrade_all: bool,
    /// Skip the confirmation prompt.
    pub assume_yes: bool,
    /// Print the batch script instead of running it.
    pub dry_run: bool,
}

/// Queues the requested operations, confirms, and runs them as one batch.
///
/// Returns `None` when nothing ran (empty request, declined prompt or dry run).
pub async fn apply_command<R: QueryRunner>(
    session: &Session<R>,
    request: ApplyRequest,
) -> Result<Option<BatchReport>> {
    let queue = session.queue();
    for node in request.nodes {
        queue.enqueue(node)?;
    }
    if request.upgrade_all {
        for upgrade in session.metadata().pending_upgrades().await? {
            queue.enqueue(QueueNode::upgrade(
                upgrade.name,
                Some(upgrade.candidate_version),
            ))?;
        }
    }

    let nodes = queue.snapshot()?;
    if nodes.is_empty() {
        output::info("Nothing to do");
        return Ok(None);
    }
    print!("{}", output::queue_table(&nodes));

    if request.dry_run {
        let batch = crate::queue::OperationBatch::new(nodes);
        println!("{}", session.engine().script(&batch).as_str());
        return Ok(None);
    }

    if !request.assume_yes {
        let prompt = format!(
            "Apply {} operations via {}?",
            nodes.len(),
            session.engine().settings().elevation
        );
        let confirmed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .default(false)
            .interact()
            .map_err(|e| AptBatchError::Io(std::io::Error::other(e)))?;
        if !confirmed {
            output::info("Aborted");
            return Ok(None);
        }
    }

    let report = session
        .commit_with(|event| {
            if let OperationEvent::Completed { node, .. } = event {
                output::success(&node.to_string());
            }
        })
        .await?;
    debug!("{:?}", report);
    output::report(&report);
    Ok(Some(report))
}
