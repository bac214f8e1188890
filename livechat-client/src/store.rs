//! Ordered log of chat items shown to the user.

use chrono::{DateTime, Utc};

use crate::{ids, text};

/// Notice text appended when the transport opens.
pub const CONNECTED_NOTICE: &str = "Connected to the chat room.";

/// What a [`ChatItem`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatItemKind {
    /// A text message from a chat user
    Text,
    /// A sticker message from a chat user
    Sticker,
    /// Local informational notice
    SystemNotice,
    /// Local error notice
    ErrorNotice,
}

impl ChatItemKind {
    /// Text and sticker items carry server-assigned ids; notices do not.
    #[must_use]
    pub const fn is_message(self) -> bool {
        matches!(self, Self::Text | Self::Sticker)
    }
}

/// One rendered unit of the transcript. Never updated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatItem {
    /// Item kind
    pub kind: ChatItemKind,
    /// Server message id, or a local request id for notices
    pub id: String,
    /// Sender's user id; empty for notices
    pub author_user_id: String,
    /// Sender's display name; empty for notices
    pub author_display_name: String,
    /// Sender's avatar asset, if any
    pub author_avatar: Option<String>,
    /// Sanitized text for messages, human-readable text for notices
    pub body: String,
    /// Asset reference, present on stickers only
    pub sticker_src: Option<String>,
    /// Send time reported by the service, or local time for notices
    pub created_at: DateTime<Utc>,
}

impl ChatItem {
    fn notice(kind: ChatItemKind, body: String) -> Self {
        Self {
            kind,
            id: ids::new_request_id(),
            author_user_id: String::new(),
            author_display_name: String::new(),
            author_avatar: None,
            body,
            sticker_src: None,
            created_at: Utc::now(),
        }
    }

    /// Informational notice with `body` as its text.
    #[must_use]
    pub fn system_notice(body: impl Into<String>) -> Self {
        Self::notice(ChatItemKind::SystemNotice, body.into())
    }

    /// Error notice with `body` as its text.
    #[must_use]
    pub fn error_notice(body: impl Into<String>) -> Self {
        Self::notice(ChatItemKind::ErrorNotice, body.into())
    }

    /// Notice appended when the transport opens.
    #[must_use]
    pub fn connected() -> Self {
        Self::system_notice(CONNECTED_NOTICE)
    }

    /// Error notice appended when the transport closes.
    #[must_use]
    pub fn disconnected(reason: &str) -> Self {
        Self::error_notice(format!("Connection closed. Reason: {reason}"))
    }

    /// Notice for an `ERROR` frame reported by the chat service.
    #[must_use]
    pub fn service_error(code: i64, message: &str) -> Self {
        Self::error_notice(format!("Error {code}: {message}"))
    }

    /// Markup for display. Text bodies are linkified here, at render time.
    #[must_use]
    pub fn render(&self) -> String {
        match self.kind {
            ChatItemKind::Text => text::linkify(&self.body),
            _ => self.body.clone(),
        }
    }
}

/// Insertion-ordered store; the only mutations are append and the two removals.
#[derive(Debug, Default, Clone)]
pub struct MessageStore {
    items: Vec<ChatItem>,
}

impl MessageStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `item`, returning `false` when a text or sticker item with the
    /// same id is already stored. Messages without an id are always kept.
    pub fn append(&mut self, item: ChatItem) -> bool {
        if item.kind.is_message()
            && !item.id.is_empty()
            && self
                .items
                .iter()
                .any(|stored| stored.kind.is_message() && stored.id == item.id)
        {
            return false;
        }
        self.items.push(item);
        true
    }

    /// Removes the message with `id`. Notices are never matched.
    pub fn remove_by_id(&mut self, id: &str) -> usize {
        let before = self.items.len();
        self.items
            .retain(|item| !(item.kind.is_message() && item.id == id));
        before - self.items.len()
    }

    /// Removes every message authored by `user_id`.
    pub fn remove_by_author(&mut self, user_id: &str) -> usize {
        let before = self.items.len();
        self.items
            .retain(|item| !(item.kind.is_message() && item.author_user_id == user_id));
        before - self.items.len()
    }

    /// Items in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &ChatItem> {
        self.items.iter()
    }

    /// Most recently appended item.
    #[must_use]
    pub fn last(&self) -> Option<&ChatItem> {
        self.items.last()
    }

    /// Number of stored items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing has been stored yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<'a> IntoIterator for &'a MessageStore {
    type Item = &'a ChatItem;
    type IntoIter = std::slice::Iter<'a, ChatItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
