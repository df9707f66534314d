//! Layered HTTP overlay server.
//!
//! An overlay stacks content sources (local directories, upstream servers,
//! git repositories, fixed status codes, inline middleware) and response
//! transforms (substitutions, functions, JSON pretty printing) into one
//! request pipeline, described by a list of layer directives.

pub mod config;
pub mod http;
pub mod layer;
pub mod lifecycle;
pub mod observability;
pub mod overlay;
pub mod pipeline;
pub mod routing;
pub mod sources;
pub mod transform;

pub use config::OverlayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use overlay::{build, Overlay, OverlayBuilder};
pub use pipeline::{BuildError, Pipeline};
