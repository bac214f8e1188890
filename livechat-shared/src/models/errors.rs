//! Error bodies returned by the chat proxy.

use serde::{Deserialize, Serialize};

const MAX_RAW_BODY: usize = 256;

/// Error body returned by the chat proxy (`{"error": "..."}`).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ApiErrorBody {
    /// Human-readable failure description
    pub error: String,
}

impl ApiErrorBody {
    /// Extracts a human-readable message from an error response body.
    ///
    /// Returns the `error` field when the body has the documented shape, and a
    /// truncated copy of the raw body otherwise, so upstream stack traces are
    /// never echoed in full.
    #[must_use]
    pub fn describe(body: &str) -> String {
        if let Ok(parsed) = serde_json::from_str::<Self>(body) {
            return parsed.error;
        }

        let trimmed = body.trim();
        if trimmed.chars().count() > MAX_RAW_BODY {
            let truncated: String = trimmed.chars().take(MAX_RAW_BODY).collect();
            format!("{truncated}…")
        } else {
            trimmed.to_string()
        }
    }
}
