//! Request pipeline subsystem.
//!
//! # Data Flow
//! ```text
//! layer directives
//!     → layer::Layer::parse (one descriptor per directive)
//!     → composer.rs (fold into CompositionState)
//!     → handler.rs (Pipeline: immutable, ordered stages)
//!     → served per request, first stage to answer wins
//! ```
//!
//! # Design Decisions
//! - Composition is synchronous and finishes before the first request
//! - Content sources keep declaration order; transforms are gathered into a
//!   single stage ahead of them
//! - Cache and decompression setup is latched to the first upstream

pub mod composer;
pub mod error;
pub mod handler;

pub use composer::{Composer, CompositionState};
pub use error::BuildError;
pub use handler::{handler_fn, not_found, BoxedHandler, FnHandler, Handler, Next, Pipeline};
