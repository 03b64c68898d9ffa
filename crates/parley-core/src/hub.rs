//! Presence and message routing hub.
//!
//! The hub owns the identity registry and the table of open connections.
//! Every registry read or write happens under a single lock, and presence
//! broadcasts are queued while that lock is held, so all clients observe
//! membership changes in the same order.

use crate::connection::ConnectionId;
use crate::registry::Registry;
use dashmap::DashMap;
use parking_lot::Mutex;
use parley_protocol::{GroupMessage, PrivateMessage, ServerEvent};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

/// Receiving half of a connection's outbound queue.
pub type Outbox = mpsc::UnboundedReceiver<Arc<ServerEvent>>;

type OutboxSender = mpsc::UnboundedSender<Arc<ServerEvent>>;

/// Reasons an event was not routed.
///
/// None of these are reported to clients; the server logs and counts them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// The connection is not open.
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// A connection with the same ID is already open.
    #[error("Connection already open: {0}")]
    AlreadyConnected(ConnectionId),

    /// The connection limit has been reached.
    #[error("Maximum connections reached")]
    CapacityReached,

    /// The sending connection has no registered identity.
    #[error("Connection {0} has not logged in")]
    Unidentified(ConnectionId),

    /// No connection holds the target display name.
    #[error("No one is online as {0:?}")]
    UnknownRecipient(String),

    /// The recipient's connection went away before delivery.
    #[error("Recipient {0:?} is no longer reachable")]
    Undeliverable(String),
}

impl RoutingError {
    /// Short label for metrics.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            RoutingError::UnknownConnection(_) => "unknown_connection",
            RoutingError::AlreadyConnected(_) => "already_connected",
            RoutingError::CapacityReached => "capacity",
            RoutingError::Unidentified(_) => "unidentified",
            RoutingError::UnknownRecipient(_) => "unknown_recipient",
            RoutingError::Undeliverable(_) => "undeliverable",
        }
    }
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum number of open connections.
    pub max_connections: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_connections: 100_000,
        }
    }
}

/// Outcome of a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Login {
    /// Connection that held the name before this login took it over.
    pub displaced: Option<ConnectionId>,
    /// Name this connection held before, if it logged in under a new one.
    pub renamed_from: Option<String>,
    /// Number of connections the presence list was queued for.
    pub recipients: usize,
}

/// The presence and routing coordinator.
pub struct Hub {
    /// Who is online. Guards every presence decision.
    registry: Mutex<Registry>,
    /// Open connections and their outbound queues.
    connections: DashMap<ConnectionId, OutboxSender>,
    /// Configuration.
    config: HubConfig,
}

impl Hub {
    /// Create a new hub with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create a new hub with custom configuration.
    #[must_use]
    pub fn with_config(config: HubConfig) -> Self {
        info!("Creating hub with config: {:?}", config);
        Self {
            registry: Mutex::new(Registry::new()),
            connections: DashMap::new(),
            config,
        }
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        let online = self.registry.lock().len();
        HubStats {
            connections: self.connections.len(),
            online,
        }
    }

    /// Check whether another connection would be accepted.
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.connections.len() < self.config.max_connections
    }

    /// Check if a connection is open.
    #[must_use]
    pub fn is_connected(&self, connection: &ConnectionId) -> bool {
        self.connections.contains_key(connection)
    }

    /// Get the current presence list.
    #[must_use]
    pub fn online(&self) -> Vec<String> {
        self.registry.lock().names()
    }

    /// Open a connection.
    ///
    /// Returns the queue of events addressed to it. The connection starts
    /// out anonymous and nothing is broadcast.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID is already open or the limit is reached.
    pub fn connect(&self, connection: ConnectionId) -> Result<Outbox, RoutingError> {
        // Held across the count and the insert so concurrent connects cannot
        // overshoot the limit. Disconnects remove under the same lock.
        let _registry = self.registry.lock();

        if !self.has_capacity() {
            return Err(RoutingError::CapacityReached);
        }

        match self.connections.entry(connection) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                Err(RoutingError::AlreadyConnected(entry.key().clone()))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let (tx, rx) = mpsc::unbounded_channel();
                debug!(connection = %entry.key(), "Connection opened");
                entry.insert(tx);
                Ok(rx)
            }
        }
    }

    /// Queue an event for a single connection.
    ///
    /// Returns `false` if the connection is not open.
    pub fn send_to(&self, connection: &ConnectionId, event: ServerEvent) -> bool {
        self.connections
            .get(connection)
            .is_some_and(|tx| tx.send(Arc::new(event)).is_ok())
    }

    /// Bind a display name to a connection and broadcast the presence list.
    ///
    /// The name is taken as-is. If another connection holds it, that
    /// connection loses it and becomes anonymous.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not open.
    pub fn register_identity(
        &self,
        connection: &ConnectionId,
        name: impl Into<String>,
    ) -> Result<Login, RoutingError> {
        let mut registry = self.registry.lock();

        if !self.connections.contains_key(connection) {
            return Err(RoutingError::UnknownConnection(connection.clone()));
        }

        let registered = registry.register(name, connection.clone());
        let recipients = self.broadcast(ServerEvent::LoginAcknowledge(registry.names()));

        Ok(Login {
            displaced: registered.displaced,
            renamed_from: registered.renamed_from,
            recipients,
        })
    }

    /// Close a connection.
    ///
    /// If it held a display name, the name is released and the presence
    /// list is broadcast to the remaining connections. Returns the released
    /// name. Calling this again for the same connection does nothing.
    pub fn handle_disconnect(&self, connection: &ConnectionId) -> Option<String> {
        let mut registry = self.registry.lock();

        if self.connections.remove(connection).is_some() {
            debug!(connection = %connection, "Connection closed");
        }

        let name = registry.remove_connection(connection)?;
        let recipients = self.broadcast(ServerEvent::LoginAcknowledge(registry.names()));
        debug!(
            connection = %connection,
            name = %name,
            recipients = recipients,
            "Identity left"
        );

        Some(name)
    }

    /// Broadcast a group message to every open connection, sender included.
    ///
    /// The sender is identified by its connection, not by `payload.from`.
    /// Returns the number of connections the message was queued for.
    ///
    /// # Errors
    ///
    /// Returns an error if the sender has not logged in.
    pub fn route_group_message(
        &self,
        connection: &ConnectionId,
        payload: GroupMessage,
    ) -> Result<usize, RoutingError> {
        let registry = self.registry.lock();

        if !registry.is_registered(connection) {
            return Err(RoutingError::Unidentified(connection.clone()));
        }

        let recipients = self.broadcast(payload.into());
        trace!(connection = %connection, recipients = recipients, "Group message routed");
        Ok(recipients)
    }

    /// Deliver a private message to the connection holding `payload.to`.
    ///
    /// The sender gets no copy.
    ///
    /// # Errors
    ///
    /// Returns an error if the sender has not logged in or nobody holds the
    /// target name.
    pub fn route_private_message(
        &self,
        connection: &ConnectionId,
        payload: PrivateMessage,
    ) -> Result<(), RoutingError> {
        let registry = self.registry.lock();

        if !registry.is_registered(connection) {
            return Err(RoutingError::Unidentified(connection.clone()));
        }

        let target = registry
            .lookup(&payload.to)
            .ok_or_else(|| RoutingError::UnknownRecipient(payload.to.clone()))?;

        let to = payload.to.clone();
        if !self.send_to(target, payload.into()) {
            return Err(RoutingError::Undeliverable(to));
        }

        trace!(connection = %connection, to = %to, "Private message routed");
        Ok(())
    }

    /// Queue an event for every open connection.
    ///
    /// Connections whose queue is gone are skipped.
    fn broadcast(&self, event: ServerEvent) -> usize {
        let event = Arc::new(event);
        let mut recipients = 0;

        for entry in self.connections.iter() {
            if entry.value().send(Arc::clone(&event)).is_ok() {
                recipients += 1;
            } else {
                trace!(connection = %entry.key(), "Skipping closed outbox");
            }
        }

        recipients
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

/// Hub statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStats {
    /// Number of open connections.
    pub connections: usize,
    /// Number of registered display names.
    pub online: usize,
}
