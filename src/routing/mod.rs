//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Layer alias (at startup):
//!     //host/path/ | /path/ | ^regex
//!     → matcher.rs (compile host pattern, prefix, regex)
//!     → MountScope
//!
//! Incoming Request (host, path):
//!     → mount.rs (evaluate scope, strip prefix)
//!     → mounted stage, or fall through to the next one
//! ```
//!
//! # Design Decisions
//! - Scopes are compiled at startup, immutable at runtime
//! - Host and path conditions combine with AND
//! - Deterministic: the first stage in declared order that answers wins

pub mod matcher;
pub mod mount;

pub use matcher::{HostPattern, Matcher, PathPrefixMatcher, PathRegexMatcher, WildcardHost};
pub use mount::{MountPrefix, MountScope, Mounted, PathScope};
