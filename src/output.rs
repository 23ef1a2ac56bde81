//! Terminal output for the apt-batch CLI.
//!
//! Colored one-line messages plus the tables printed by the `search`,
//! `show`, `updates` and `apply` commands.
//!
//! ```rust,no_run
//! use apt_batch::output::{success, warning};
//!
//! success("2 operations applied");
//! warning("1 operation finished in an unknown state");
//! ```

use colored::Colorize;
use tabular::{Row, Table};

use crate::control::PackageRecord;
use crate::metadata::{Preview, UpgradeCandidate};
use crate::queue::QueueNode;
use crate::session::BatchReport;

/// Print a success message in green with a checkmark
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print an error message to stderr in red with an X mark
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a warning message in yellow
pub fn warning(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an info message in blue
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Format a package name with emphasis
///
/// ```rust
/// use apt_batch::output::package_name;
///
/// assert!(package_name("htop").contains("htop"));
/// ```
pub fn package_name(name: &str) -> String {
    name.cyan().to_string()
}

pub fn version(version: &str) -> String {
    version.green().to_string()
}

pub fn count(n: usize) -> String {
    n.to_string().bold().to_string()
}

#[must_use]
pub fn previews_table(previews: &[Preview]) -> Table {
    let mut table = Table::new("{:<}  {:<}");
    for preview in previews {
        table.add_row(
            Row::new()
                .with_cell(package_name(&preview.name))
                .with_cell(&preview.short_description),
        );
    }
    table
}

#[must_use]
pub fn upgrades_table(upgrades: &[UpgradeCandidate]) -> Table {
    let mut table = Table::new("{:<}  {:<} → {:<}  {:<}");
    for upgrade in upgrades {
        table.add_row(
            Row::new()
                .with_cell(package_name(&upgrade.name))
                .with_cell(upgrade.current_version.as_deref().unwrap_or("(new)"))
                .with_cell(version(&upgrade.candidate_version))
                .with_cell(upgrade.origin.as_deref().unwrap_or("")),
        );
    }
    table
}

#[must_use]
pub fn queue_table(nodes: &[QueueNode]) -> Table {
    let mut table = Table::new("{:>}  {:<}  {:<}  {:<}");
    for (position, node) in nodes.iter().enumerate() {
        table.add_row(
            Row::new()
                .with_cell(position + 1)
                .with_cell(node.flag)
                .with_cell(package_name(&node.name))
                .with_cell(node.version.as_deref().unwrap_or("")),
        );
    }
    table
}

/// Field/value table for one package record. Absent optional fields are left out.
#[must_use]
pub fn record_table(record: &PackageRecord) -> Table {
    let mut table = Table::new("{:<}  {:<}");
    let mut field = |label: &str, value: Option<String>| {
        if let Some(value) = value {
            table.add_row(Row::new().with_cell(label.bold()).with_cell(value));
        }
    };

    field("Package", Some(package_name(&record.name)));
    field("Version", Some(version(record.version.as_str())));
    field("Maintainer", Some(record.maintainer.to_string()));
    field("Section", record.section.clone());
    field("Priority", record.priority.clone());
    field("Essential", record.essential.map(yes_no));
    field("Architecture", record.architecture.clone());
    field("Origin", record.origin.clone());
    field("Source", record.source.clone());
    field("Homepage", record.homepage.clone());
    field("Bugs", record.bugs.clone());
    field("Depends", record.depends.clone());
    field("Pre-Depends", record.pre_depends.clone());
    field("Recommends", record.recommends.clone());
    field("Suggests", record.suggests.clone());
    field("Breaks", record.breaks.clone());
    field("Conflicts", record.conflicts.clone());
    field("Replaces", record.replaces.clone());
    field("Provides", record.provides.clone());
    field(
        "Installed-Size",
        record.installed_size.map(|kib| format!("{} kB", kib)),
    );
    field("Download-Size", record.download_size.clone());
    field("Manually installed", record.manual_installed.map(yes_no));
    field("APT-Sources", record.apt_sources.clone());
    field("Tags", record.tags.as_ref().map(|tags| tags.join(", ")));
    table
}

fn yes_no(flag: bool) -> String {
    if flag { "yes" } else { "no" }.to_string()
}

/// Prints a batch summary and one line per node without confirmation.
pub fn report(report: &BatchReport) {
    let elapsed = report.duration().num_milliseconds() as f64 / 1000.0;
    if report.is_clean() {
        success(&format!(
            "{} operations applied in {:.1}s",
            count(report.confirmed.len()),
            elapsed
        ));
        return;
    }

    for message in &report.errors {
        error(message);
    }
    if !report.confirmed.is_empty() {
        info(&format!(
            "{} of {} operations confirmed",
            count(report.confirmed.len()),
            report.batch.len()
        ));
    }
    for node in &report.unconfirmed {
        warning(&format!("{} finished in an unknown state", node));
    }
    match report.exit_code {
        Some(0) => {}
        Some(code) => error(&format!("Batch process exited with status {}", code)),
        None => error("Batch process was terminated by a signal"),
    }
}
