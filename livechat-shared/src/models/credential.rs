//! Token request and response models for `POST <api>/auth`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Permission requested for a chat token. Reading the room is implicit and
/// never requested.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Capability {
    /// Post text and stickers
    SendMessage,
    /// Remove any participant's message
    DeleteMessage,
    /// Disconnect another participant
    DisconnectUser,
}

impl Capability {
    /// Capability set granted to a participant.
    #[must_use]
    pub fn for_role(is_moderator: bool) -> Vec<Self> {
        if is_moderator {
            vec![Self::SendMessage, Self::DeleteMessage, Self::DisconnectUser]
        } else {
            vec![Self::SendMessage]
        }
    }
}

/// Identity attributes peers use to render a sender without a second lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserAttributes {
    /// Display name
    pub username: String,
    /// Avatar image reference
    pub avatar: String,
}

/// Body of `POST <api>/auth`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateTokenRequest {
    /// ARN of the chat room
    pub arn: String,
    /// Room-scoped user id, `<username>.<uuid>`
    pub user_id: String,
    /// Identity shown to other participants
    pub attributes: UserAttributes,
    /// Requested permissions
    pub capabilities: Vec<Capability>,
    /// Session length, 1 to 180 minutes
    pub duration_in_minutes: u32,
}

/// Successful response of `POST <api>/auth`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateTokenResponse {
    /// Opaque token presented when opening the realtime connection
    pub token: String,
    /// End of the chat session the token belongs to
    pub session_expiration_time: DateTime<Utc>,
    /// Instant after which the token can no longer open a connection
    pub token_expiration_time: DateTime<Utc>,
}
