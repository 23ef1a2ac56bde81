//! Runtime settings for apt-batch.
//!
//! Settings are layered with the `config` crate: built-in defaults, then an
//! optional TOML file, then `APT_BATCH_*` environment variables. The merged
//! result is validated before it is handed to the metadata service or the
//! execution engine.

use std::path::{Path, PathBuf};

use anyhow::Context;
use config::{Config, Environment, File, FileFormat};
use derive_builder::Builder;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use serde_enum_str::{Deserialize_enum_str, Serialize_enum_str};
use tracing::{debug, trace};
use validator::{Validate, ValidationError};

use crate::errors::Result;

/// Config file location, relative to the user's home directory.
pub static DEFAULT_CONFIG_FILE_PATH: &str = ".config/apt-batch/config.toml";

/// Prefix for environment variable overrides, e.g. `APT_BATCH_ELEVATION=sudo`.
pub static ENV_PREFIX: &str = "APT_BATCH";

/// Completion marker echoed after every operation of a batch.
pub static DEFAULT_SENTINEL: &str = "__BATCH_OP_DONE";

/// How the batch script obtains administrative rights.
#[derive(Serialize_enum_str, Deserialize_enum_str, Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Elevation {
    /// polkit prompt, one per batch
    Pkexec,
    /// sudo password prompt on the controlling terminal
    Sudo,
    /// Run the script with the current privileges
    None,
}

impl Elevation {
    /// The program and arguments that run `script` under this elevation mode.
    #[must_use]
    pub fn command(&self, script: &str) -> (&'static str, Vec<String>) {
        let shell_args = vec!["-c".to_string(), script.to_string()];
        match self {
            Elevation::Pkexec => ("pkexec", prepend("sh", shell_args)),
            Elevation::Sudo => ("sudo", prepend("sh", shell_args)),
            Elevation::None => ("sh", shell_args),
        }
    }
}

fn prepend(first: &str, rest: Vec<String>) -> Vec<String> {
    let mut args = Vec::with_capacity(rest.len() + 1);
    args.push(first.to_string());
    args.extend(rest);
    args
}

/// Settings shared by the metadata service and the execution engine.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Builder, Validate)]
#[builder(setter(into), default)]
#[serde(default)]
pub struct Settings {
    /// Package tool run for every queued operation.
    #[validate(length(min = 1, message = "tool must not be empty"))]
    pub tool: String,
    /// Tool used for search and show queries.
    #[validate(length(min = 1, message = "cache_tool must not be empty"))]
    pub cache_tool: String,
    /// Tool used for install-state queries.
    #[validate(length(min = 1, message = "status_tool must not be empty"))]
    pub status_tool: String,
    pub elevation: Elevation,
    #[validate(custom(function = "validate_sentinel"))]
    pub sentinel: String,
    /// Echo the package name after the sentinel so completions can be matched by name.
    pub tag_markers: bool,
    /// Applies to metadata queries only. A batch runs until the process exits.
    #[validate(range(min = 1, max = 3600))]
    pub query_timeout_secs: u64,
    pub status_cache_ttl_secs: u64,
    #[validate(range(min = 1, max = 100000))]
    pub status_cache_size: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            tool: "apt-get".to_string(),
            cache_tool: "apt-cache".to_string(),
            status_tool: "dpkg-query".to_string(),
            elevation: Elevation::Pkexec,
            sentinel: DEFAULT_SENTINEL.to_string(),
            tag_markers: false,
            query_timeout_secs: 30,
            status_cache_ttl_secs: 60,
            status_cache_size: 1000,
        }
    }
}

fn validate_sentinel(sentinel: &str) -> std::result::Result<(), ValidationError> {
    if sentinel.is_empty() || sentinel.chars().any(char::is_whitespace) {
        let mut err = ValidationError::new("sentinel");
        err.message = Some("sentinel must be a single non-empty token".into());
        return Err(err);
    }
    if !sentinel
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        let mut err = ValidationError::new("sentinel");
        err.message = Some("sentinel may only contain letters, digits, '_' and '-'".into());
        return Err(err);
    }
    Ok(())
}

impl Settings {
    /// Loads settings from `path`, or from the default location when `path` is `None`.
    ///
    /// An explicitly given file must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_layers(Some((path, true)), None),
            None => {
                let default = Self::default_config_path();
                Self::load_layers(default.as_deref().map(|p| (p, false)), None)
            }
        }
    }

    /// Loads settings from a file, with environment overrides taken from `env`
    /// instead of the process environment.
    pub fn load_from(path: &Path, env: Option<config::Map<String, String>>) -> Result<Self> {
        Self::load_layers(Some((path, true)), env)
    }

    /// Absolute path of the default config file, if a home directory exists.
    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        BaseDirs::new().map(|dirs| dirs.home_dir().join(DEFAULT_CONFIG_FILE_PATH))
    }

    fn load_layers(
        file: Option<(&Path, bool)>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self> {
        let mut builder = Config::builder().add_source(
            Config::try_from(&Settings::default()).context("Failed to encode default settings")?,
        );

        if let Some((path, required)) = file {
            debug!("Loading settings from: {}", path.display());
            builder = builder.add_source(
                File::from(path)
                    .format(FileFormat::Toml)
                    .required(required),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .source(env),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        trace!("{:?}", settings);
        Ok(settings)
    }
}
