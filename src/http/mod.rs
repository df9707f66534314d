//! HTTP serving subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (axum setup, tracing, timeout)
//!     → middleware/access_log.rs (one line per request)
//!     → forced Accept-Encoding, response compression
//!     → pipeline (auth, etag, head, json, transforms, content sources)
//!     → Send to client
//! ```

pub mod middleware;
pub mod server;

pub use server::HttpServer;
