//! Wire and HTTP models exchanged with the chat proxy and the realtime endpoint.

pub mod catalog;
pub mod credential;
pub mod errors;
pub mod events;
pub mod frames;
pub mod rooms;

pub use catalog::{AVATARS, Asset, STICKERS, find_avatar, find_sticker};
pub use credential::{Capability, CreateTokenRequest, CreateTokenResponse, UserAttributes};
pub use errors::ApiErrorBody;
pub use events::{
    DELETE_BY_USER_EVENT, DELETE_MESSAGE_EVENT, DISCONNECT_USER_EVENT, SendEventRequest,
    SendEventResponse,
};
pub use frames::{
    Attributes, InboundFrame, MESSAGE_TYPE_ATTRIBUTE, MESSAGE_TYPE_STICKER, OutboundFrame,
    STICKER_SRC_ATTRIBUTE, Sender,
};
pub use rooms::{ListRoomsResponse, RoomSummary};
