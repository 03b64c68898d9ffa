//! # parley-core
//!
//! Presence tracking and message routing for the Parley server.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **ConnectionId** - Opaque identifier of an open connection
//! - **Registry** - Display name to connection mapping ("who is online")
//! - **Hub** - Serializing coordinator that owns the registry and routes events
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│     Hub     │────▶│   Outbox    │ (one per connection)
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐
//!                     │  Registry   │
//!                     └─────────────┘
//! ```

pub mod connection;
pub mod hub;
pub mod registry;

pub use connection::ConnectionId;
pub use hub::{Hub, HubConfig, HubStats, Login, Outbox, RoutingError};
pub use registry::{Registered, Registry};
