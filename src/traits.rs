use crate::errors::Result;

/// Captured output of a finished read-only query.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Whether the process exited with status zero.
    pub success: bool,
}

impl CommandOutput {
    /// True when the tool wrote something other than whitespace to its error stream.
    #[must_use]
    pub fn has_error_output(&self) -> bool {
        !self.stderr.trim().is_empty()
    }
}

/// Runs a package-manager program to completion and captures its output.
///
/// [`crate::metadata::PackageMetadataService`] talks to the system only through
/// this trait, so tests can substitute canned tool output for `apt-cache`,
/// `apt-get` and `dpkg-query`.
///
/// # Examples
///
/// ```rust,no_run
/// use apt_batch::traits::QueryRunner;
/// use apt_batch::metadata::TokioQueryRunner;
/// use std::time::Duration;
///
/// # async fn example() -> apt_batch::Result<()> {
/// let runner = TokioQueryRunner::new(Duration::from_secs(30));
/// let output = runner.run("apt-cache", &["show", "htop"]).await?;
/// println!("{}", output.stdout);
/// # Ok(())
/// # }
/// ```
///
/// # Error Conditions
///
/// Implementations return an error only when the program could not be run
/// or did not finish in time. A non-zero exit or error-stream output is
/// reported through [`CommandOutput`] and judged by the caller.
pub trait QueryRunner {
    fn run(
        &self,
        program: &str,
        args: &[&str],
    ) -> impl std::future::Future<Output = Result<CommandOutput>> + Send;
}
