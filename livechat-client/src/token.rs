//! Credentials and the two proxy-facing seams of the session manager.

use std::{collections::BTreeMap, fmt, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use shared::models::{Capability, DELETE_BY_USER_EVENT, SendEventResponse};

use crate::error::{ChatError, ChatResult};

/// Who is signing in: display name, role and avatar reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    /// Display name, trimmed
    pub username: String,
    /// Requests moderator capabilities when set
    pub is_moderator: bool,
    /// Avatar catalog name
    pub avatar: String,
}

impl Profile {
    /// Builds a profile from user input.
    ///
    /// # Errors
    /// Returns [`ChatError::InvalidInput`] for a blank username.
    pub fn new(
        username: impl Into<String>,
        is_moderator: bool,
        avatar: impl Into<String>,
    ) -> ChatResult<Self> {
        let username = username.into().trim().to_string();
        if username.is_empty() {
            return Err(ChatError::invalid_input("username must not be empty"));
        }
        Ok(Self {
            username,
            is_moderator,
            avatar: avatar.into(),
        })
    }
}

/// A time-bounded session credential issued by the token service.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Opaque bearer token for the chat endpoint
    pub token: String,
    /// Room-scoped user id the token was issued for
    pub user_id: String,
    /// Capabilities granted with the token
    pub capabilities: Vec<Capability>,
    /// End of the chat session
    pub session_expires_at: DateTime<Utc>,
    /// Expiry of the token itself
    pub token_expires_at: DateTime<Utc>,
}

impl Credential {
    /// Instant at which the credential must be replaced: token expiry minus `margin`.
    #[must_use]
    pub fn renewal_deadline(&self, margin: Duration) -> DateTime<Utc> {
        let margin = TimeDelta::from_std(margin).unwrap_or(TimeDelta::zero());
        self.token_expires_at - margin
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("capabilities", &self.capabilities)
            .field("session_expires_at", &self.session_expires_at)
            .field("token_expires_at", &self.token_expires_at)
            .finish()
    }
}

/// Issues credentials for a profile.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Requests a fresh credential for `profile`.
    ///
    /// # Errors
    /// Returns [`ChatError::Auth`] when no credential could be issued; the
    /// caller must not open a connection in that case.
    async fn request_token(&self, profile: &Profile) -> ChatResult<Credential>;
}

/// Broadcasts application-level events the realtime transport cannot express.
#[async_trait]
pub trait EventRelay: Send + Sync {
    /// Broadcasts `event_name` with `attributes` to the room.
    ///
    /// # Errors
    /// Returns [`ChatError::Relay`] when the broadcast was not accepted.
    async fn send_event(
        &self,
        event_name: &str,
        attributes: BTreeMap<String, String>,
    ) -> ChatResult<SendEventResponse>;

    /// Asks every participant to purge the messages authored by `user_id`.
    ///
    /// # Errors
    /// See [`EventRelay::send_event`].
    async fn delete_messages_by_user(&self, user_id: &str) -> ChatResult<SendEventResponse> {
        let mut attributes = BTreeMap::new();
        attributes.insert("userId".to_string(), user_id.to_string());
        self.send_event(DELETE_BY_USER_EVENT, attributes).await
    }
}
