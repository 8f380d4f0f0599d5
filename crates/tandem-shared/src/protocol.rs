use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProtocolError;
use crate::types::{ChatId, FileFlag, MessageId, UserId};

/// Frames a client sends over the realtime connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ClientFrame {
    SendMessage(SendMessage),
}

/// Frames the server pushes to a realtime connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ServerFrame {
    /// A message was persisted in the connection's chat
    NewMessage(MessageView),

    /// A message of the connection's chat was deleted
    MessageDeleted(MessageDeleted),

    /// The last submission from this connection failed
    Error(ErrorFrame),
}

/// Inbound send request. Client timestamps are not accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub chat_id: ChatId,
    pub receiver_id: UserId,
    #[serde(default)]
    pub message_text: Option<String>,
    #[serde(default)]
    pub file_flag: FileFlag,
    #[serde(default)]
    pub file_id: Option<Uuid>,
    #[serde(default)]
    pub file_extension: Option<String>,
}

/// A persisted message as seen by clients, with its file reference resolved
/// to a signed URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub message_id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub message_text: Option<String>,
    pub file_flag: FileFlag,
    pub file_id: Option<Uuid>,
    pub file_extension: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub file_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeleted {
    pub message_id: MessageId,
    pub chat_id: ChatId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorFrame {
    pub kind: String,
    pub message: String,
}

impl ClientFrame {
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl ServerFrame {
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}
