//! Error types for configuration sync and plugin chain execution

use std::path::PathBuf;
use thiserror::Error;

use crate::types::PluginError;

/// Errors produced by the library
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to fetch metadata: {0}")]
    Metadata(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize config for {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid config file name '{0}'")]
    InvalidFileName(String),

    #[error("Invalid network name '{0}'")]
    InvalidNetworkName(String),

    #[error("Failed to load plugin config {path}: {reason}")]
    PluginLoad { path: PathBuf, reason: String },

    #[error("Plugin binary '{0}' not found in CNI path")]
    PluginNotFound(String),

    #[error("Failed to execute plugin '{plugin}': {source}")]
    PluginExec {
        plugin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Plugin '{plugin}' failed: {error}")]
    Plugin { plugin: String, error: PluginError },

    #[error(
        "Failed to apply network '{network}' ({} failure(s)), last: {}",
        .failures.len(),
        .failures.last().map(ToString::to_string).unwrap_or_default()
    )]
    Apply { network: String, failures: Vec<Error> },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// For an apply failure, the last per-step error; otherwise `self`.
    pub fn last(&self) -> &Error {
        match self {
            Error::Apply { failures, .. } => failures.last().unwrap_or(self),
            _ => self,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
