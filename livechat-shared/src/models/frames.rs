//! Realtime frames. Inbound frames are discriminated by `Type`, outbound
//! frames by `Action`; both use `PascalCase` field names on the wire.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message attribute that carries the message kind marker.
pub const MESSAGE_TYPE_ATTRIBUTE: &str = "message_type";
/// Marker value identifying a sticker message.
pub const MESSAGE_TYPE_STICKER: &str = "STICKER";
/// Message attribute that carries the sticker asset reference.
pub const STICKER_SRC_ATTRIBUTE: &str = "sticker_src";

/// String key/value attributes attached to messages and events.
pub type Attributes = BTreeMap<String, String>;

/// Author of an inbound message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Sender {
    /// Room-scoped user id the sender's token was issued for
    pub user_id: String,
    /// Attributes from the sender's token (`username`, `avatar`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
}

impl Sender {
    fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .as_ref()
            .and_then(|attributes| attributes.get(key))
            .map(String::as_str)
    }

    /// Display name announced by the sender, falling back to the user id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.attribute("username").unwrap_or(&self.user_id)
    }

    /// Avatar reference announced by the sender.
    #[must_use]
    pub fn avatar(&self) -> Option<&str> {
        self.attribute("avatar")
    }
}

/// Frame received from the chat endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "Type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundFrame {
    /// A chat message; stickers are messages with a `message_type` attribute
    #[serde(rename_all = "PascalCase")]
    Message {
        /// Server-assigned message id
        #[serde(default)]
        id: String,
        /// Echo of the sender's request id
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        /// Raw message text
        #[serde(default)]
        content: String,
        /// Sender-supplied attributes
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attributes: Option<Attributes>,
        /// Time the service accepted the message
        #[serde(default, skip_serializing_if = "Option::is_none")]
        send_time: Option<DateTime<Utc>>,
        /// Author of the message
        sender: Sender,
    },
    /// A system or application event
    #[serde(rename_all = "PascalCase")]
    Event {
        /// Server-assigned event id
        #[serde(default)]
        id: String,
        /// Event name, e.g. `aws:DELETE_MESSAGE`
        event_name: String,
        /// Event attributes
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attributes: Option<Attributes>,
        /// Time the service emitted the event
        #[serde(default, skip_serializing_if = "Option::is_none")]
        send_time: Option<DateTime<Utc>>,
    },
    /// A rejected request or service failure
    #[serde(rename_all = "PascalCase")]
    Error {
        /// Server-assigned frame id
        #[serde(default)]
        id: String,
        /// Id of the request that failed
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        /// Service error code
        #[serde(default)]
        error_code: i64,
        /// Human-readable failure reason
        #[serde(default)]
        error_message: String,
    },
    /// Any other `Type`
    #[serde(other)]
    Unknown,
}

impl InboundFrame {
    /// Decodes one text frame.
    ///
    /// # Errors
    /// Returns the decoder error when the payload is not a JSON object with a
    /// `Type` discriminant.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Request sent to the chat endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "Action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundFrame {
    /// Post a message
    #[serde(rename_all = "PascalCase")]
    SendMessage {
        /// Client-generated request id
        request_id: String,
        /// Message text
        content: String,
        /// Message attributes
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        attributes: Attributes,
    },
    /// Remove a message for every participant
    #[serde(rename_all = "PascalCase")]
    DeleteMessage {
        /// Client-generated request id
        request_id: String,
        /// Id of the message to remove
        id: String,
        /// Reason shown to participants
        reason: String,
    },
    /// Disconnect a participant
    #[serde(rename_all = "PascalCase")]
    DisconnectUser {
        /// Client-generated request id
        request_id: String,
        /// Id of the user to disconnect
        user_id: String,
        /// Reason shown to the user
        reason: String,
    },
}

impl OutboundFrame {
    /// Client-generated id echoed back in any `ERROR` frame for this request.
    #[must_use]
    pub fn request_id(&self) -> &str {
        match self {
            Self::SendMessage { request_id, .. }
            | Self::DeleteMessage { request_id, .. }
            | Self::DisconnectUser { request_id, .. } => request_id,
        }
    }
}
