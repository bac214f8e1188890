//! # Chat Error Types
//!
//! Failures of the session manager and its collaborators. None of them is
//! fatal to the process: the session manager turns each one into a stored
//! notice or a log line.

use thiserror::Error;

/// Result type alias for chat operations
pub type ChatResult<T> = Result<T, ChatError>;

/// Errors raised by the chat client.
#[derive(Error, Debug)]
pub enum ChatError {
    /// The token service refused or failed to issue a credential
    #[error("Unable to obtain chat token: {message}")]
    Auth {
        /// HTTP status, when the proxy answered
        status: Option<u16>,
        /// Failure detail
        message: String,
    },

    /// The realtime connection could not be opened or written to
    #[error("Transport error: {message}")]
    Transport {
        /// Failure detail
        message: String,
    },

    /// A frame or payload could not be decoded
    #[error("Decode error: {message}")]
    Decode {
        /// Failure detail
        message: String,
    },

    /// The event relay rejected or failed to forward an application event
    #[error("Event relay failed: {message}")]
    Relay {
        /// HTTP status, when the proxy answered
        status: Option<u16>,
        /// Failure detail
        message: String,
    },

    /// Any other proxy call failed
    #[error("Chat API request failed: {message}")]
    Api {
        /// HTTP status, when the proxy answered
        status: Option<u16>,
        /// Failure detail
        message: String,
    },

    /// A command was issued while no connection is open
    #[error("Not connected to the chat room")]
    NotConnected,

    /// Caller supplied an unusable argument
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// Failure detail
        message: String,
    },
}

impl ChatError {
    /// Token service failure.
    #[must_use]
    pub fn auth<T: Into<String>>(status: Option<u16>, message: T) -> Self {
        Self::Auth {
            status,
            message: message.into(),
        }
    }

    /// Realtime connection failure.
    #[must_use]
    pub fn transport<T: Into<String>>(message: T) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Event relay failure.
    #[must_use]
    pub fn relay<T: Into<String>>(status: Option<u16>, message: T) -> Self {
        Self::Relay {
            status,
            message: message.into(),
        }
    }

    /// Failure of any other proxy call.
    #[must_use]
    pub fn api<T: Into<String>>(status: Option<u16>, message: T) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Rejected caller argument.
    #[must_use]
    pub fn invalid_input<T: Into<String>>(message: T) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// HTTP status reported by the proxy, when the failure came from one.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Auth { status, .. } | Self::Relay { status, .. } | Self::Api { status, .. } => {
                *status
            }
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(error: serde_json::Error) -> Self {
        Self::Decode {
            message: error.to_string(),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ChatError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport {
            message: error.to_string(),
        }
    }
}
