//! Composition errors.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::layer::LayerError;

/// Failure to assemble the pipeline. Always fatal at startup.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Invalid function: {directive}: {reason}")]
    InvalidFunction { directive: String, reason: String },

    #[error("Invalid middleware: {directive}: {reason}")]
    InvalidMiddleware { directive: String, reason: String },

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error(transparent)]
    InvalidMount(#[from] LayerError),

    #[error("Invalid upstream `{url}`: {source}")]
    InvalidUpstream {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("No content source applied")]
    NoContentSource,

    #[error("failed to build upstream client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("failed to open log file {path:?}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}
