#![cfg_attr(not(test), forbid(unsafe_code))]
#![deny(warnings, clippy::pedantic)]
#![allow(clippy::multiple_crate_versions)]

//! Client-side chat session management for managed live-chat rooms.
//!
//! [`session::SessionManager`] owns one realtime connection at a time,
//! authenticates it with a token obtained from the chat proxy, renews the
//! token before it expires, classifies inbound frames into
//! [`events::SessionEvent`]s and reconciles the [`store::MessageStore`]
//! against deletion and disconnection events.

pub mod api;
pub mod error;
pub mod events;
pub mod ids;
pub mod renewal;
pub mod session;
pub mod store;
pub mod text;
pub mod token;
pub mod transport;

pub use api::ChatApiClient;
pub use error::{ChatError, ChatResult};
pub use events::{EventKind, SessionEvent, Subscription};
pub use session::{ConnectionState, OutboundCommand, SessionCommand, SessionHandle, SessionManager};
pub use store::{ChatItem, ChatItemKind, MessageStore};
pub use token::{Credential, EventRelay, Profile, TokenProvider};
pub use transport::{Connector, TransportEvent, WebSocketConnector};
