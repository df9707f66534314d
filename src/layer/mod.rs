//! Layer directive language.
//!
//! # Data Flow
//! ```text
//! "//example.net/sample/ = s/Hello/Hi/g"
//!     → parser.rs (split alias, classify payload)
//!     → Layer { mount scope, ActionKind, raw payload }
//!     → pipeline::composer (one stage per layer)
//!
//! Function and middleware payloads:
//!     → script.rs (tokenize, parse arrow expression)
//!     → transform::function / sources::inline (compile to native code)
//! ```
//!
//! # Design Decisions
//! - A `Layer` is immutable once parsed
//! - Directive bodies are parsed, never evaluated

pub mod parser;
pub mod script;

pub use parser::{ActionKind, Layer, LayerError};
