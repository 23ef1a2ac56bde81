//! Integration tests for apt-batch components working together.
//!
//! Metadata tests run against [`MockQueryRunner`] so no package tool is
//! executed. Batch tests run real `sh` processes with `echo` standing in for
//! the package tool and elevation disabled.

pub mod batch_execution;
pub mod metadata_queries;

use apt_batch::errors::{AptBatchError, Result};
use apt_batch::traits::{CommandOutput, QueryRunner};
use apt_batch::{Elevation, Settings};
use apt_batch::configuration::SettingsBuilder;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Mock query runner returning canned tool output
#[derive(Debug, Clone, Default)]
pub struct MockQueryRunner {
    responses: HashMap<String, CommandOutput>,
    pub calls: Arc<Mutex<Vec<String>>>,
    pub delay_ms: u64,
}

impl MockQueryRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, command: &str, stdout: &str) -> Self {
        self.responses.insert(
            command.to_string(),
            CommandOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
                success: true,
            },
        );
        self
    }

    pub fn with_error(mut self, command: &str, stderr: &str) -> Self {
        self.responses.insert(
            command.to_string(),
            CommandOutput {
                stdout: String::new(),
                stderr: stderr.to_string(),
                success: false,
            },
        );
        self
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl QueryRunner for MockQueryRunner {
    fn run(
        &self,
        program: &str,
        args: &[&str],
    ) -> impl std::future::Future<Output = Result<CommandOutput>> + Send {
        let key = format!("{} {}", program, args.join(" "));
        self.calls.lock().unwrap().push(key.clone());
        let response = self.responses.get(&key).cloned();
        let delay_ms = self.delay_ms;

        async move {
            if delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            }
            response.ok_or_else(|| AptBatchError::query(key, "command not mocked"))
        }
    }
}

/// Settings that run batches with the current privileges.
pub fn local_settings(tool: &str) -> Settings {
    SettingsBuilder::default()
        .tool(tool)
        .elevation(Elevation::None)
        .build()
        .unwrap()
}
