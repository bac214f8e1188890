//! Event relay models for `POST <api>/event`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// System event broadcast when a moderator deletes a message.
pub const DELETE_MESSAGE_EVENT: &str = "aws:DELETE_MESSAGE";
/// System event delivered when a moderator disconnects a participant.
pub const DISCONNECT_USER_EVENT: &str = "aws:DISCONNECT_USER";
/// Application event asking every participant to purge one user's history.
pub const DELETE_BY_USER_EVENT: &str = "app:DELETE_BY_USER";

/// Body of `POST <api>/event`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendEventRequest {
    /// ARN of the chat room
    pub arn: String,
    /// Event name delivered to every participant
    pub event_name: String,
    /// String attributes delivered with the event
    #[serde(default)]
    pub event_attributes: BTreeMap<String, String>,
}

/// Successful response of `POST <api>/event`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendEventResponse {
    /// ARN of the chat room the event was sent to
    pub arn: String,
    /// `success` when the event was accepted
    pub status: String,
}
