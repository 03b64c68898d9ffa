//! Event types for the Parley protocol.
//!
//! Events are the fundamental unit of communication in Parley. Each event is
//! an envelope holding the event name under `event` and its payload under
//! `data`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::version::Version;

/// Payload of a `login` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Login {
    /// Display name claimed by the connection.
    pub username: String,
}

/// Payload of a `group-message` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMessage {
    /// Message body.
    pub message: String,
    /// Sender display name as claimed by the client.
    pub from: String,
    /// Any other fields the client attached. Relayed untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GroupMessage {
    /// Create a group message with no extra fields.
    #[must_use]
    pub fn new(message: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            from: from.into(),
            extra: Map::new(),
        }
    }
}

/// Payload of a `private-message` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateMessage {
    /// Message body.
    pub message: String,
    /// Sender display name as claimed by the client.
    pub from: String,
    /// Display name of the recipient.
    pub to: String,
    /// Any other fields the client attached. Relayed untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PrivateMessage {
    /// Create a private message with no extra fields.
    #[must_use]
    pub fn new(message: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            from: from.into(),
            to: to.into(),
            extra: Map::new(),
        }
    }
}

/// Payload of the `connected` handshake event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    /// Identifier assigned to the connection.
    pub connection_id: String,
    /// Protocol version spoken by the server.
    pub version: Version,
}

/// Events sent by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Claim a display name.
    #[serde(rename = "login")]
    Login(Login),

    /// Send a message to every connected client.
    #[serde(rename = "group-message")]
    GroupMessage(GroupMessage),

    /// Send a message to a single display name.
    #[serde(rename = "private-message")]
    PrivateMessage(PrivateMessage),
}

impl ClientEvent {
    /// Get the wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Login(_) => "login",
            ClientEvent::GroupMessage(_) => "group-message",
            ClientEvent::PrivateMessage(_) => "private-message",
        }
    }

    /// Create a new `login` event.
    #[must_use]
    pub fn login(username: impl Into<String>) -> Self {
        ClientEvent::Login(Login {
            username: username.into(),
        })
    }

    /// Create a new `group-message` event.
    #[must_use]
    pub fn group_message(message: impl Into<String>, from: impl Into<String>) -> Self {
        ClientEvent::GroupMessage(GroupMessage::new(message, from))
    }

    /// Create a new `private-message` event.
    #[must_use]
    pub fn private_message(
        message: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        ClientEvent::PrivateMessage(PrivateMessage::new(message, from, to))
    }
}

/// Events sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Sent once to a freshly opened connection.
    #[serde(rename = "connected")]
    Connected(Handshake),

    /// Ordered list of every display name currently online.
    #[serde(rename = "login-acknowledge")]
    LoginAcknowledge(Vec<String>),

    /// A group message, relayed unchanged.
    #[serde(rename = "group-message")]
    GroupMessage(GroupMessage),

    /// A private message, relayed unchanged to its recipient.
    #[serde(rename = "private-message")]
    PrivateMessage(PrivateMessage),
}

impl ServerEvent {
    /// Get the wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected(_) => "connected",
            ServerEvent::LoginAcknowledge(_) => "login-acknowledge",
            ServerEvent::GroupMessage(_) => "group-message",
            ServerEvent::PrivateMessage(_) => "private-message",
        }
    }

    /// Create a new `connected` event.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, version: Version) -> Self {
        ServerEvent::Connected(Handshake {
            connection_id: connection_id.into(),
            version,
        })
    }
}

impl From<GroupMessage> for ServerEvent {
    fn from(message: GroupMessage) -> Self {
        ServerEvent::GroupMessage(message)
    }
}

impl From<PrivateMessage> for ServerEvent {
    fn from(message: PrivateMessage) -> Self {
        ServerEvent::PrivateMessage(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_event_names() {
        assert_eq!(ClientEvent::login("alice").name(), "login");
        assert_eq!(
            ClientEvent::group_message("hi", "alice").name(),
            "group-message"
        );
        assert_eq!(
            ClientEvent::private_message("hey", "alice", "bob").name(),
            "private-message"
        );
    }

    #[test]
    fn test_client_event_from_json() {
        let value = json!({
            "event": "private-message",
            "data": {"message": "hey", "from": "alice", "to": "bob"}
        });

        let event: ClientEvent = serde_json::from_value(value).unwrap();
        assert_eq!(event, ClientEvent::private_message("hey", "alice", "bob"));
    }

    #[test]
    fn test_login_acknowledge_shape() {
        let event = ServerEvent::LoginAcknowledge(vec!["alice".into(), "bob".into()]);
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(
            value,
            json!({"event": "login-acknowledge", "data": ["alice", "bob"]})
        );
    }

    #[test]
    fn test_connected_shape() {
        let event = ServerEvent::connected("conn_1", Version::new(1, 0));
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(
            value,
            json!({
                "event": "connected",
                "data": {"connection_id": "conn_1", "version": "1.0"}
            })
        );
    }

    #[test]
    fn test_extra_fields_relayed() {
        let data = json!({"message": "hi", "from": "alice", "timestamp": 123, "meta": {"color": "red"}});
        let event: ClientEvent =
            serde_json::from_value(json!({"event": "group-message", "data": data.clone()})).unwrap();

        let ClientEvent::GroupMessage(payload) = event else {
            panic!("Expected group message");
        };
        assert_eq!(payload.extra["timestamp"], 123);

        let relayed = serde_json::to_value(ServerEvent::from(payload)).unwrap();
        assert_eq!(relayed, json!({"event": "group-message", "data": data}));
    }

    #[test]
    fn test_extra_fields_survive_msgpack() {
        let value = json!({
            "event": "private-message",
            "data": {"message": "hey", "from": "alice", "to": "bob", "id": "m-1"}
        });
        let event: ClientEvent = serde_json::from_value(value).unwrap();

        let frame = crate::codec::encode(&event).unwrap();
        let decoded: ClientEvent = crate::codec::decode(&frame).unwrap();

        assert_eq!(decoded, event);
        let ClientEvent::PrivateMessage(payload) = decoded else {
            panic!("Expected private message");
        };
        assert_eq!(payload.extra["id"], "m-1");
    }

    #[test]
    fn test_unknown_event_rejected() {
        let value = json!({"event": "logout", "data": {}});
        assert!(serde_json::from_value::<ClientEvent>(value).is_err());
    }

    #[test]
    fn test_missing_field_rejected() {
        let value = json!({"event": "group-message", "data": {"message": "hi"}});
        assert!(serde_json::from_value::<ClientEvent>(value).is_err());
    }
}
