//! Domain model structs persisted in the SQLite database.
//!
//! Entities reference each other by identifier only; reverse lookups such as
//! "all messages of a chat" are queries, never in-memory back-pointers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tandem_shared::types::{
    AccessLevel, BlockState, ChatId, FileFlag, MessageId, Participant, UserId,
};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered user. Only the refresh token columns are written by the
/// chat core; everything else belongs to the identity store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub user_name: String,
    pub email: String,
    /// Identifier of `avatars/<id>.png`, if the user uploaded one.
    pub avatar_id: Option<Uuid>,
    /// Single active refresh token; `None` after revocation.
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub refresh_token_expiry: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(user_name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            user_name: user_name.into(),
            email: email.into(),
            avatar_id: None,
            refresh_token: None,
            refresh_token_expiry: None,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// A two-participant conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chat {
    pub id: ChatId,
    pub user1_id: UserId,
    pub user2_id: UserId,
    pub block_state: BlockState,
    pub last_message_id: Option<MessageId>,
    pub last_message_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Chat {
    pub fn new(user1_id: UserId, user2_id: UserId) -> Self {
        Self {
            id: ChatId::new(),
            user1_id,
            user2_id,
            block_state: BlockState::None,
            last_message_id: None,
            last_message_time: None,
            created_at: Utc::now(),
        }
    }

    /// Which side `user` is on, if any.
    pub fn participant(&self, user: UserId) -> Option<Participant> {
        if user == self.user1_id {
            Some(Participant::First)
        } else if user == self.user2_id {
            Some(Participant::Second)
        } else {
            None
        }
    }

    pub fn has_participant(&self, user: UserId) -> bool {
        self.participant(user).is_some()
    }

    /// The participant that is not `user`; `None` if `user` is not in the chat.
    pub fn other_participant(&self, user: UserId) -> Option<UserId> {
        match self.participant(user)? {
            Participant::First => Some(self.user2_id),
            Participant::Second => Some(self.user1_id),
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message. Immutable once stored, except for deletion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub message_text: Option<String>,
    pub file_flag: FileFlag,
    pub file_id: Option<Uuid>,
    /// Extension without the leading dot.
    pub file_extension: Option<String>,
    /// Server-assigned creation time.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Folder and `<file_id>.<ext>` name of the attached file, if any.
    pub fn file_location(&self) -> Option<(&'static str, String)> {
        let folder = self.file_flag.folder()?;
        let file_id = self.file_id?;
        let ext = self.file_extension.as_deref()?;
        Some((folder, format!("{file_id}.{ext}")))
    }
}

// ---------------------------------------------------------------------------
// File access control entry
// ---------------------------------------------------------------------------

/// Grants `user_id` an access level on one stored file produced in `chat_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileAccessEntry {
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub file_id: Uuid,
    pub folder_name: String,
    /// Extension without the leading dot.
    pub file_extension: String,
    pub access_level: AccessLevel,
    pub updated_at: DateTime<Utc>,
}

impl FileAccessEntry {
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.file_id, self.file_extension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_participants() {
        let a = UserId::new();
        let b = UserId::new();
        let chat = Chat::new(a, b);

        assert_eq!(chat.participant(a), Some(Participant::First));
        assert_eq!(chat.participant(b), Some(Participant::Second));
        assert_eq!(chat.other_participant(a), Some(b));
        assert_eq!(chat.other_participant(b), Some(a));
        assert!(!chat.has_participant(UserId::new()));
    }

    #[test]
    fn test_message_file_location() {
        let file_id = Uuid::new_v4();
        let mut message = Message {
            id: MessageId::new(),
            chat_id: ChatId::new(),
            sender_id: UserId::new(),
            receiver_id: UserId::new(),
            message_text: None,
            file_flag: FileFlag::Audio,
            file_id: Some(file_id),
            file_extension: Some("mp3".into()),
            timestamp: Utc::now(),
        };
        assert_eq!(
            message.file_location(),
            Some(("sounds", format!("{file_id}.mp3")))
        );

        message.file_flag = FileFlag::None;
        assert_eq!(message.file_location(), None);
    }
}
