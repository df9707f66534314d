//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, pool sizes)
//! - Check names the server only knows a fixed set of (log formats, encodings)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: OverlayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::OverlayConfig;
use crate::http::middleware::LogFormat;

/// Encodings accepted by the `compress` option.
pub const COMPRESS_TOKENS: [&str; 5] = ["gzip", "br", "deflate", "zstd", "identity"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid bind address `{0}`")]
    BindAddress(String),

    #[error("request timeout must be greater than zero")]
    ZeroTimeout,

    #[error("unknown log format `{0}`")]
    LogFormat(String),

    #[error("unknown compression `{0}`")]
    Compression(String),

    #[error("upstream {0} must be greater than zero")]
    Upstream(&'static str),
}

pub fn validate_config(config: &OverlayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }
    if config.listener.request_timeout_secs == 0 {
        errors.push(ValidationError::ZeroTimeout);
    }

    if let Some(log) = &config.log {
        if log.parse::<LogFormat>().is_err() {
            errors.push(ValidationError::LogFormat(log.clone()));
        }
    }

    if let Some(compress) = &config.compress {
        if !COMPRESS_TOKENS.contains(&compress.as_str()) {
            errors.push(ValidationError::Compression(compress.clone()));
        }
    }

    if config.upstream.max_idle_per_host == 0 {
        errors.push(ValidationError::Upstream("max_idle_per_host"));
    }
    if config.upstream.keep_alive_secs == 0 {
        errors.push(ValidationError::Upstream("keep_alive_secs"));
    }
    if config.upstream.connect_timeout_secs == 0 {
        errors.push(ValidationError::Upstream("connect_timeout_secs"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
