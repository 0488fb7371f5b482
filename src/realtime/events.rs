//! Event names and wire frames for the realtime channel.
//!
//! Frames are JSON text messages of the form `{"event": ..., "data": ...}`.
//! The first frame on a fresh connection is always `auth` carrying the
//! bearer token.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Connection-time auth frame name.
pub const AUTH: &str = "auth";

/// Events pushed by the server.
pub mod inbound {
    pub const NOTIFICATION: &str = "notification";
    pub const FRIEND_REQUEST: &str = "friend_request";
    pub const SESSION_LOGIN: &str = "session_login";
    pub const CHAT_MESSAGE: &str = "chat_message";
    pub const TYPING: &str = "typing";
    pub const STOP_TYPING: &str = "stopTyping";
    pub const MESSAGE_READ: &str = "messageRead";
    pub const AUTH_UPDATE_USER: &str = "auth:update-user";
}

/// Events the client emits.
pub mod outbound {
    pub const JOIN_ROOM: &str = "joinRoom";
    pub const LEAVE_ROOM: &str = "leaveRoom";
    pub const TYPING: &str = "typing";
    pub const STOP_TYPING: &str = "stopTyping";
    pub const PING: &str = "ping";
    pub const MESSAGE_READ: &str = "messageRead";
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    #[must_use]
    pub fn new(event: &str, data: Value) -> Self {
        Self {
            event: event.to_string(),
            data,
        }
    }
}

/// Discriminator carried in `friend_request` events.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FriendRequestKind {
    FriendRequest,
    FriendRequestAccepted,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FriendRequestEvent {
    #[serde(rename = "type")]
    pub kind: FriendRequestKind,
    #[serde(rename = "senderName", default)]
    pub sender_name: Option<String>,
}
