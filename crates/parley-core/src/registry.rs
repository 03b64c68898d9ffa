//! Identity registry for Parley.
//!
//! The registry maps display names to the connection currently using them,
//! and is the single source of truth for who is online. Names keep their
//! insertion order, which is the order the presence list is broadcast in.

use crate::connection::ConnectionId;
use indexmap::IndexMap;
use std::collections::HashMap;
use tracing::debug;

/// Outcome of registering a display name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registered {
    /// Another connection that held the name and lost it.
    pub displaced: Option<ConnectionId>,
    /// Name the registering connection held before, if it was different.
    pub renamed_from: Option<String>,
}

/// Display name to connection mapping with a reverse index.
///
/// Both indices are updated together, so every name maps to exactly one
/// connection and every connection owns at most one name.
#[derive(Debug, Default)]
pub struct Registry {
    /// Display name -> connection, in insertion order.
    names: IndexMap<String, ConnectionId>,
    /// Connection -> display name.
    connections: HashMap<ConnectionId, String>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of registered names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check if nobody is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Bind `name` to `connection`.
    ///
    /// A name already held by another connection is taken over and keeps its
    /// position in the presence order. If `connection` was registered under a
    /// different name, that name is released first.
    pub fn register(&mut self, name: impl Into<String>, connection: ConnectionId) -> Registered {
        let name = name.into();

        let renamed_from = match self.connections.get(&connection) {
            Some(previous) if *previous != name => {
                let previous = previous.clone();
                self.names.shift_remove(&previous);
                Some(previous)
            }
            _ => None,
        };

        let displaced = self
            .names
            .insert(name.clone(), connection.clone())
            .filter(|previous| *previous != connection);

        if let Some(previous) = &displaced {
            self.connections.remove(previous);
            debug!(name = %name, from = %previous, to = %connection, "Registry: name taken over");
        } else {
            debug!(name = %name, connection = %connection, "Registry: name registered");
        }

        self.connections.insert(connection, name);

        Registered {
            displaced,
            renamed_from,
        }
    }

    /// Remove whatever name `connection` holds.
    ///
    /// Returns the released name, if any.
    pub fn remove_connection(&mut self, connection: &ConnectionId) -> Option<String> {
        let name = self.connections.remove(connection)?;
        self.names.shift_remove(&name);
        debug!(name = %name, connection = %connection, "Registry: name released");
        Some(name)
    }

    /// Look up the connection holding a display name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&ConnectionId> {
        self.names.get(name)
    }

    /// Look up the display name held by a connection.
    #[must_use]
    pub fn name_of(&self, connection: &ConnectionId) -> Option<&str> {
        self.connections.get(connection).map(String::as_str)
    }

    /// Check if a connection holds a name.
    #[must_use]
    pub fn is_registered(&self, connection: &ConnectionId) -> bool {
        self.connections.contains_key(connection)
    }

    /// Get every registered name in presence order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.names.keys().cloned().collect()
    }
}
