#![forbid(unsafe_code)]

// Signaling protocol - JSON messages exchanged with the server under test

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Client-to-Server messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Connection metadata, sent immediately after the socket opens
    #[serde(rename_all = "camelCase")]
    Connect {
        client_id: Uuid,
        timezone: String,
    },
    /// A chat message that the server acknowledges by `request_id`
    #[serde(rename_all = "camelCase")]
    Message {
        kind: String,
        content: String,
        request_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_url: Option<String>,
    },
}

impl ClientMessage {
    pub fn request_id(&self) -> Option<Uuid> {
        match self {
            ClientMessage::Message { request_id, .. } => Some(*request_id),
            ClientMessage::Connect { .. } => None,
        }
    }
}

/// Server-to-Client messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Connection accepted
    Connected,
    /// Acknowledgment of a previously sent message
    #[serde(rename_all = "camelCase")]
    Ack {
        request_id: Uuid,
    },
    /// Error response
    Error {
        message: String,
    },
    /// Anything else the server broadcasts; ignored by the harness
    #[serde(other)]
    Unknown,
}
