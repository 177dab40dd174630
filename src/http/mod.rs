//! HTTP server module.
//!
//! Serves large boot artifacts from a static root.

mod server;

pub use server::HttpServer;
