//! Content sources.
//!
//! # Data Flow
//! ```text
//! Request (mount prefix already stripped)
//!     → local.rs    (files under a directory, optional listing)
//!     → upstream.rs (proxy, 404 falls through)
//!     → git.rs      (blobs from a repository)
//!     → status.rs   (fixed status)
//!     → inline.rs   (compiled inline middleware)
//!     → next source on a miss
//! ```
//!
//! `cache.rs` holds the on-disk cache placed ahead of the first upstream.

pub mod cache;
pub mod git;
pub mod inline;
pub mod local;
pub mod status;
pub mod upstream;

pub use cache::{normalize_cache_dir, CacheTee};
pub use git::GitSource;
pub use inline::{InlineMiddleware, MiddlewareError, NamedMiddleware};
pub use local::Local;
pub use status::StatusStub;
pub use upstream::{build_client, Upstream};
