//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the overlay
//! server. All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::transform::JsonIndent;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct OverlayConfig {
    /// Listener configuration (bind address, request timeout).
    pub listener: ListenerConfig,

    /// Layer directives, in declaration order.
    pub layers: Vec<String>,

    /// Basic authentication credentials (`user:password` or base64).
    pub basic: Credentials,

    /// Cache directory for upstream responses.
    pub cache: Option<String>,

    /// Forced `Accept-Encoding` token (e.g. `gzip`, `br`, `identity`).
    pub compress: Option<String>,

    /// JSON pretty printing: width in spaces or an indent string.
    pub json: Option<JsonIndent>,

    /// Access log format name (`tiny` when unset).
    pub log: Option<String>,

    /// Append the log to this file instead of stderr.
    pub logfile: Option<PathBuf>,

    /// Directory listings for local layers.
    pub index: bool,

    /// Upstream connection pool.
    pub upstream: UpstreamConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:3000").
    pub bind_address: String,

    /// Per-request timeout.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:3000".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// One credential or a list of them.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Credentials {
    One(String),
    Many(Vec<String>),
}

impl Default for Credentials {
    fn default() -> Self {
        Credentials::Many(Vec::new())
    }
}

impl Credentials {
    pub fn as_slice(&self) -> &[String] {
        match self {
            Credentials::One(one) => std::slice::from_ref(one),
            Credentials::Many(many) => many,
        }
    }

    /// True when no non-empty credential is configured.
    pub fn is_empty(&self) -> bool {
        self.as_slice().iter().all(String::is_empty)
    }
}

impl From<Vec<String>> for Credentials {
    fn from(list: Vec<String>) -> Self {
        Credentials::Many(list)
    }
}

/// Shared upstream client settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Idle keep-alive per connection.
    pub keep_alive_secs: u64,

    /// Idle connections kept per upstream host.
    pub max_idle_per_host: usize,

    /// TCP connect timeout.
    pub connect_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            keep_alive_secs: 10,
            max_idle_per_host: 10,
            connect_timeout_secs: 10,
        }
    }
}
