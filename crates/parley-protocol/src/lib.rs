//! # parley-protocol
//!
//! Wire protocol definitions for the Parley presence and routing server.
//!
//! Every message on the wire is an event envelope: an event name plus the
//! data belonging to it.
//!
//! ```text
//! {"event": "login", "data": {"username": "alice"}}
//! ```
//!
//! ## Events
//!
//! - `login` - Claim a display name
//! - `login-acknowledge` - Full list of online display names
//! - `group-message` - Message for everyone
//! - `private-message` - Message for one display name
//!
//! ## Example
//!
//! ```rust
//! use parley_protocol::{codec, ClientEvent};
//!
//! let event = ClientEvent::login("alice");
//!
//! // Length-prefixed MessagePack
//! let encoded = codec::encode(&event).unwrap();
//! let decoded: ClientEvent = codec::decode(&encoded).unwrap();
//! assert_eq!(event, decoded);
//!
//! // JSON text
//! let text = codec::encode_json(&event).unwrap();
//! assert_eq!(text, r#"{"event":"login","data":{"username":"alice"}}"#);
//! ```

pub mod codec;
pub mod events;
pub mod version;

pub use codec::{decode, encode, Encoded, ProtocolError, WireFormat};
pub use events::{ClientEvent, GroupMessage, Handshake, Login, PrivateMessage, ServerEvent};
pub use version::{Version, PROTOCOL_VERSION};
