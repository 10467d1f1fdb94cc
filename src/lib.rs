#![forbid(unsafe_code)]

//! JSON-RPC 2.0 MCP capability server.
//!
//! Exposes a registry of tools, resources and prompts over newline-delimited
//! stdio or WebSocket, with bounded concurrency, per-method rate limiting,
//! cooperative cancellation, timeouts and a composable middleware pipeline.

pub mod builtin;
pub mod concurrency;
pub mod config;
pub mod errors;
pub mod middleware;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod server;
pub mod transport;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
pub use router::{Router, RouterBuilder};
pub use server::Server;
