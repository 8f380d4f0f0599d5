//! CRUD operations for [`Chat`] records.

use rusqlite::{params, OptionalExtension};

use tandem_shared::types::{BlockState, ChatId, MessageId, UserId};

use crate::convert::{decode_byte, decode_time, decode_uuid, encode_time};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Chat;

const CHAT_COLUMNS: &str =
    "id, user1_id, user2_id, block_flag, last_message_id, last_message_time, created_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new chat.
    ///
    /// Fails with [`StoreError::Conflict`] if a chat already exists for the
    /// same unordered participant pair.
    pub fn insert_chat(&self, chat: &Chat) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO chats (id, user1_id, user2_id, block_flag, last_message_id, last_message_time, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    chat.id.to_string(),
                    chat.user1_id.to_string(),
                    chat.user2_id.to_string(),
                    u8::from(chat.block_state),
                    chat.last_message_id.map(|id| id.to_string()),
                    chat.last_message_time.as_ref().map(encode_time),
                    encode_time(&chat.created_at),
                ],
            )
            .map_err(StoreError::from_insert)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_chat(&self, id: ChatId) -> Result<Chat> {
        self.conn()
            .query_row(
                &format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?1"),
                params![id.to_string()],
                row_to_chat,
            )
            .map_err(StoreError::from_query)
    }

    /// The chat between two users, in either participant order.
    pub fn find_chat_between(&self, a: UserId, b: UserId) -> Result<Option<Chat>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {CHAT_COLUMNS} FROM chats
                     WHERE (user1_id = ?1 AND user2_id = ?2) OR (user1_id = ?2 AND user2_id = ?1)"
                ),
                params![a.to_string(), b.to_string()],
                row_to_chat,
            )
            .optional()?)
    }

    /// `true` iff the chat exists and `user` is one of its participants.
    pub fn is_chat_participant(&self, chat_id: ChatId, user: UserId) -> Result<bool> {
        Ok(self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM chats WHERE id = ?1 AND (user1_id = ?2 OR user2_id = ?2))",
            params![chat_id.to_string(), user.to_string()],
            |row| row.get(0),
        )?)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    pub fn set_block_state(&self, chat_id: ChatId, state: BlockState) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE chats SET block_flag = ?2 WHERE id = ?1",
            params![chat_id.to_string(), u8::from(state)],
        )?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chat> {
    let id_str: String = row.get(0)?;
    let user1_str: String = row.get(1)?;
    let user2_str: String = row.get(2)?;
    let block_flag: i64 = row.get(3)?;
    let last_id_str: Option<String> = row.get(4)?;
    let last_time_str: Option<String> = row.get(5)?;
    let created_str: String = row.get(6)?;

    Ok(Chat {
        id: ChatId(decode_uuid(0, &id_str)?),
        user1_id: UserId(decode_uuid(1, &user1_str)?),
        user2_id: UserId(decode_uuid(2, &user2_str)?),
        block_state: decode_byte(3, block_flag, BlockState::from_byte)?,
        last_message_id: last_id_str
            .map(|s| decode_uuid(4, &s).map(MessageId))
            .transpose()?,
        last_message_time: last_time_str.map(|s| decode_time(5, &s)).transpose()?,
        created_at: decode_time(6, &created_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;

    fn two_users(db: &Database) -> (UserId, UserId) {
        let a = User::new("alice", "a@example.test");
        let b = User::new("bob", "b@example.test");
        db.insert_user(&a).unwrap();
        db.insert_user(&b).unwrap();
        (a.id, b.id)
    }

    #[test]
    fn test_pair_is_unique_in_either_order() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = two_users(&db);

        db.insert_chat(&Chat::new(a, b)).unwrap();
        let err = db.insert_chat(&Chat::new(b, a)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
    }

    #[test]
    fn test_find_between_either_order() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = two_users(&db);
        let chat = Chat::new(a, b);
        db.insert_chat(&chat).unwrap();

        assert_eq!(db.find_chat_between(b, a).unwrap().unwrap().id, chat.id);
        assert_eq!(db.find_chat_between(a, b).unwrap().unwrap().id, chat.id);
    }

    #[test]
    fn test_participant_check() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = two_users(&db);
        let chat = Chat::new(a, b);
        db.insert_chat(&chat).unwrap();

        assert!(db.is_chat_participant(chat.id, a).unwrap());
        assert!(db.is_chat_participant(chat.id, b).unwrap());
        assert!(!db.is_chat_participant(chat.id, UserId::new()).unwrap());
        assert!(!db.is_chat_participant(ChatId::new(), a).unwrap());
    }

    #[test]
    fn test_block_state_persisted() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = two_users(&db);
        let chat = Chat::new(a, b);
        db.insert_chat(&chat).unwrap();

        assert!(db.set_block_state(chat.id, BlockState::Both).unwrap());
        assert_eq!(db.get_chat(chat.id).unwrap().block_state, BlockState::Both);
    }

    #[test]
    fn test_self_chat_rejected() {
        let db = Database::open_in_memory().unwrap();
        let (a, _) = two_users(&db);
        assert!(db.insert_chat(&Chat::new(a, a)).is_err());
    }
}
