//! Packet definitions for both sides of the bridge.
//!
//! Java packets are grouped by the direction they travel (`client` =
//! serverbound, `server` = clientbound) and the connection state they
//! belong to. `raknet` holds the PE offline handshake messages.

use serde::Serialize;

pub mod raknet;

pub mod client {
    pub mod handshake;
    pub mod login;
    pub mod status;
}

pub mod server {
    pub mod login;
    pub mod play;
    pub mod status;
}

/// The minimal JSON chat component, `{"text": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub text: String,
}

impl ChatMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn to_json(&self) -> String {
        // a struct with a single string field always serializes
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{\"text\":\"\"}"))
    }
}
