//! Response body transforms.
//!
//! # Data Flow
//! ```text
//! Response from content sources
//!     → stage.rs (select scoped transforms, buffer body)
//!     → charset.rs (decode to UTF-8)
//!     → sed.rs / function.rs (front-to-back, declaration order)
//!     → charset.rs (encode back)
//!     → json.rs (pretty printer, outermost)
//!     → client
//! ```
//!
//! # Design Decisions
//! - Transforms are an ordered list applied front-to-back, not nested wrappers
//! - Every expression is compiled at startup; nothing is evaluated per request
//! - A failing transform turns into a 500 for that request only

pub mod charset;
pub mod function;
pub mod json;
pub mod sed;
pub mod stage;

use std::sync::Arc;

use thiserror::Error;

pub use function::{FunctionError, FunctionTransform};
pub use json::{JsonIndent, PrettyJson};
pub use sed::{SedError, SedTransform};
pub use stage::{ScopedTransform, TransformStage};

/// Request-time failure while rewriting a body.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("failed to read response body: {0}")]
    Body(#[source] axum::Error),

    #[error("function `{name}` failed: {message}")]
    Function { name: String, message: String },
}

/// A registered text function, looked up by name from `<type>(<name>)`.
pub type TransformFn = Arc<dyn Fn(&str) -> Result<String, TransformError> + Send + Sync>;

/// A compiled body rewrite.
pub trait Transform: Send + Sync {
    /// Whether responses of this content type are rewritten.
    fn accepts(&self, content_type: &str) -> bool;

    /// Rewrite the decoded body.
    fn apply(&self, text: &str) -> Result<String, TransformError>;
}

/// Content types that carry text: `text/*`, JSON, JavaScript, XML and their
/// structured-suffix variants.
pub fn is_textual(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if essence.starts_with("text/") || essence.ends_with("+json") || essence.ends_with("+xml") {
        return true;
    }
    matches!(
        essence.as_str(),
        "application/json"
            | "application/javascript"
            | "application/ecmascript"
            | "application/xml"
            | "application/xhtml+xml"
            | "application/x-javascript"
            | "application/manifest+json"
    )
}
