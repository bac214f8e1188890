//! Room listing models for `GET <api>/rooms`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One room as reported by `GET <api>/rooms`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    /// Room ARN, used as the token request's `arn`
    pub arn: String,
    /// Short room id
    #[serde(default)]
    pub id: String,
    /// Optional room name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Creation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
    /// Last update time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
    /// Resource tags
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Response of `GET <api>/rooms`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ListRoomsResponse {
    /// Rooms on this page
    #[serde(default)]
    pub rooms: Vec<RoomSummary>,
    /// Pagination token for the next page, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}
