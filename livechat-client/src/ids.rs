//! Client-side identifiers.

use uuid::Uuid;

/// Fresh identifier for one outbound request or locally synthesized item.
#[must_use]
pub fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Room-scoped user id `<username>.<uuid>`.
///
/// The random suffix keeps two tabs or terminals that share a display name
/// from colliding in the room.
#[must_use]
pub fn room_user_id(username: &str) -> String {
    format!("{username}.{}", Uuid::new_v4())
}
