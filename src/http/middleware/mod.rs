//! Cross-cutting request stages.
//!
//! `access_log` is an axum middleware around the whole service; the others
//! are pipeline stages placed ahead of the content sources.

pub mod access_log;
pub mod auth;
pub mod decompress;
pub mod etag;
pub mod head;

pub use access_log::{access_log, AccessLog, LogFormat, UnknownLogFormat};
pub use auth::BasicAuth;
pub use decompress::Decompress;
pub use etag::{normalize, weak_etag, EtagRevalidation};
pub use head::HeadAsGet;
