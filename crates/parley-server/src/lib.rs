//! # parley-server
//!
//! HTTP and WebSocket front end for the Parley presence and routing hub.
//!
//! - [`config`] - TOML and environment configuration
//! - [`handlers`] - Router, connection lifecycle, event dispatch
//! - [`metrics`] - Prometheus instrumentation

pub mod config;
pub mod handlers;
pub mod metrics;

pub use config::Config;
pub use handlers::{app, run_server, serve, AppState};
