use super::*;
use crate::configuration::{Elevation, Settings, SettingsBuilder};
use crate::engine::PrivilegedExecutionEngine;
use crate::queue::{OperationFlag, OperationQueue};
use crate::traits::CommandOutput;
use rstest::*;
use std::collections::HashMap;

#[derive(Clone, Default)]
struct FixedRunner {
    outputs: HashMap<String, String>,
}

impl FixedRunner {
    fn with(mut self, command: &str, stdout: &str) -> Self {
        self.outputs.insert(command.to_string(), stdout.to_string());
        self
    }
}

impl QueryRunner for FixedRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let key = format!("{} {}", program, args.join(" "));
        Ok(match self.outputs.get(&key) {
            Some(stdout) => CommandOutput {
                stdout: stdout.clone(),
                stderr: String::new(),
                success: true,
            },
            None => CommandOutput {
                stdout: String::new(),
                stderr: format!("E: unexpected command {}", key),
                success: false,
            },
        })
    }
}

fn local_settings() -> Settings {
    SettingsBuilder::default()
        .tool("echo")
        .elevation(Elevation::None)
        .build()
        .unwrap()
}

fn session(runner: FixedRunner) -> Session<FixedRunner> {
    let settings = local_settings();
    Session::new(
        OperationQueue::new(),
        PrivilegedExecutionEngine::new(settings.clone()),
        PackageMetadataService::new(runner, &settings),
    )
}

#[fixture]
fn runner() -> FixedRunner {
    FixedRunner::default()
        .with(
            "echo -s -o Debug::NoLocking=true upgrade",
            "Inst libssl3 [3.0.2-1] (3.0.2-2 Debian:12/stable [amd64])\n",
        )
        .with("apt-cache search --names-only htop", "htop - interactive processes viewer\n")
        .with("dpkg-query -W htop", "htop\t3.2.2-2\n")
}

#[rstest]
#[tokio::test]
async fn test_search_command(runner: FixedRunner) {
    let metadata = PackageMetadataService::new(runner, &local_settings());
    assert!(search_command(&metadata, "htop", false).await.is_ok());
    assert!(search_command(&metadata, "htop", true).await.is_ok());
}

#[rstest]
#[tokio::test]
async fn test_show_command_propagates_query_error(runner: FixedRunner) {
    let metadata = PackageMetadataService::new(runner, &local_settings());
    let err = show_command(&metadata, "nosuchpkg", false).await.unwrap_err();
    assert_eq!(err.category(), "query");
}

#[rstest]
#[tokio::test]
async fn test_status_command_reports_each_name(runner: FixedRunner) {
    let metadata = PackageMetadataService::new(runner, &local_settings());
    let names = vec!["htop".to_string(), "nano".to_string()];
    let results = status_command(&metadata, &names).await.unwrap();
    assert_eq!(
        results,
        vec![("htop".to_string(), true), ("nano".to_string(), false)]
    );
}

#[rstest]
#[tokio::test]
async fn test_updates_command_counts_and_lists(runner: FixedRunner) {
    let metadata = PackageMetadataService::new(runner, &local_settings());
    assert_eq!(updates_command(&metadata, false).await.unwrap(), 1);
    assert_eq!(updates_command(&metadata, true).await.unwrap(), 1);
}

#[rstest]
#[tokio::test]
async fn test_apply_command_runs_batch(runner: FixedRunner) {
    let session = session(runner);
    let request = ApplyRequest {
        nodes: vec![QueueNode::install("htop"), QueueNode::uninstall("nano")],
        assume_yes: true,
        ..Default::default()
    };

    let report = apply_command(&session, request).await.unwrap().unwrap();
    assert!(report.is_clean());
    assert_eq!(report.confirmed.len(), 2);
    assert!(session.queue().is_empty().unwrap());
}

#[rstest]
#[tokio::test]
async fn test_apply_command_upgrade_all_uses_candidate_versions(runner: FixedRunner) {
    let session = session(runner);
    let request = ApplyRequest {
        upgrade_all: true,
        dry_run: true,
        ..Default::default()
    };

    assert!(apply_command(&session, request).await.unwrap().is_none());
    let queued = session.queue().snapshot().unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].flag, OperationFlag::Upgrade);
    assert_eq!(queued[0].version.as_deref(), Some("3.0.2-2"));
    assert!(!session.queue().is_busy().unwrap());
}

#[rstest]
#[tokio::test]
async fn test_apply_command_with_nothing_to_do(runner: FixedRunner) {
    let session = session(runner);
    let result = apply_command(&session, ApplyRequest::default()).await.unwrap();
    assert!(result.is_none());
}
