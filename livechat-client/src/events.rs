//! Typed session events and the dispatch table that delivers them.

use std::{collections::HashMap, fmt};

use chrono::{DateTime, Utc};

use crate::{session::ConnectionState, store::ChatItem};

/// Everything the session manager reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum SessionEvent {
    /// The connection state moved
    StateChanged(ConnectionState),
    /// The transport opened
    Connected,
    /// The transport closed
    Disconnected {
        reason: String,
    },
    /// A text message was stored
    MessageReceived(ChatItem),
    /// A sticker was stored
    StickerReceived(ChatItem),
    /// `DELETE_MESSAGE` event applied to the store
    MessageDeleted {
        id: String,
        removed: usize,
    },
    /// `DISCONNECT_USER` event applied to the store
    UserMessagesPurged {
        user_id: String,
        removed: usize,
    },
    /// A user was disconnected by a moderator
    UserDisconnected {
        user_id: String,
        reason: String,
    },
    /// `ERROR` frame from the chat service
    ServiceError {
        code: i64,
        message: String,
    },
    /// A command could not be carried out; already recorded as an error notice
    CommandFailed {
        message: String,
    },
    /// A fresh credential was obtained from the proxy
    CredentialIssued {
        user_id: String,
        token_expires_at: DateTime<Utc>,
    },
}

/// Discriminant of [`SessionEvent`], used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum EventKind {
    StateChanged,
    Connected,
    Disconnected,
    MessageReceived,
    StickerReceived,
    MessageDeleted,
    UserMessagesPurged,
    UserDisconnected,
    ServiceError,
    CommandFailed,
    CredentialIssued,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 11] = [
        Self::StateChanged,
        Self::Connected,
        Self::Disconnected,
        Self::MessageReceived,
        Self::StickerReceived,
        Self::MessageDeleted,
        Self::UserMessagesPurged,
        Self::UserDisconnected,
        Self::ServiceError,
        Self::CommandFailed,
        Self::CredentialIssued,
    ];
}

impl SessionEvent {
    /// The kind listeners subscribe to for this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::StateChanged(_) => EventKind::StateChanged,
            Self::Connected => EventKind::Connected,
            Self::Disconnected { .. } => EventKind::Disconnected,
            Self::MessageReceived(_) => EventKind::MessageReceived,
            Self::StickerReceived(_) => EventKind::StickerReceived,
            Self::MessageDeleted { .. } => EventKind::MessageDeleted,
            Self::UserMessagesPurged { .. } => EventKind::UserMessagesPurged,
            Self::UserDisconnected { .. } => EventKind::UserDisconnected,
            Self::ServiceError { .. } => EventKind::ServiceError,
            Self::CommandFailed { .. } => EventKind::CommandFailed,
            Self::CredentialIssued { .. } => EventKind::CredentialIssued,
        }
    }
}

/// Opaque handle returned by [`Dispatcher::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    kind: EventKind,
    id: u64,
}

impl Subscription {
    /// Event kind this subscription listens to.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.kind
    }
}

type Listener = Box<dyn Fn(&SessionEvent) + Send + Sync>;

/// Listeners keyed by event kind, each removable through its [`Subscription`].
#[derive(Default)]
pub struct Dispatcher {
    listeners: HashMap<EventKind, Vec<(u64, Listener)>>,
    next_id: u64,
}

impl Dispatcher {
    /// An empty dispatch table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` for events of `kind`.
    pub fn subscribe<F>(&mut self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.next_id += 1;
        let id = self.next_id;
        self.listeners
            .entry(kind)
            .or_default()
            .push((id, Box::new(listener)));
        Subscription { kind, id }
    }

    /// Removes the listener behind `subscription`. Returns `false` if it was
    /// already removed.
    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        let Some(entries) = self.listeners.get_mut(&subscription.kind) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(id, _)| *id != subscription.id);
        before != entries.len()
    }

    /// Calls every listener registered for the event's kind, in subscription order.
    pub fn emit(&self, event: &SessionEvent) {
        if let Some(entries) = self.listeners.get(&event.kind()) {
            for (_, listener) in entries {
                listener(event);
            }
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<_, _> = self
            .listeners
            .iter()
            .map(|(kind, entries)| (*kind, entries.len()))
            .collect();
        f.debug_struct("Dispatcher")
            .field("listeners", &counts)
            .finish_non_exhaustive()
    }
}
