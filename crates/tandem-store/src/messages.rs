use rusqlite::{params, OptionalExtension};

use tandem_shared::types::{ChatId, FileFlag, MessageId, UserId};

use crate::convert::{decode_byte, decode_time, decode_uuid, encode_time};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Message;

const MESSAGE_COLUMNS: &str = "id, chat_id, sender_id, receiver_id, message_text, file_flag, \
     file_id, file_extension, timestamp";

impl Database {
    /// Persist a message and make it the chat's last message, atomically.
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        let tx = self.conn().unchecked_transaction()?;

        tx.execute(
            "INSERT INTO messages (id, chat_id, sender_id, receiver_id, message_text, file_flag, file_id, file_extension, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                message.id.to_string(),
                message.chat_id.to_string(),
                message.sender_id.to_string(),
                message.receiver_id.to_string(),
                message.message_text,
                u8::from(message.file_flag),
                message.file_id.map(|id| id.to_string()),
                message.file_extension,
                encode_time(&message.timestamp),
            ],
        )
        .map_err(StoreError::from_insert)?;

        let affected = tx.execute(
            "UPDATE chats SET last_message_id = ?2, last_message_time = ?3 WHERE id = ?1",
            params![
                message.chat_id.to_string(),
                message.id.to_string(),
                encode_time(&message.timestamp),
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }

        tx.commit()?;
        Ok(())
    }

    /// Newest-first page of a chat's messages.
    pub fn get_messages_for_chat(
        &self,
        chat_id: ChatId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE chat_id = ?1
             ORDER BY timestamp DESC, rowid DESC
             LIMIT ?2 OFFSET ?3"
        ))?;

        let rows = stmt.query_map(params![chat_id.to_string(), limit, offset], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn get_message_by_id(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(StoreError::from_query)
    }

    /// Delete a message together with the access entries of its file.
    ///
    /// If the message was the chat's last message, the chat is re-pointed at
    /// the newest remaining one. Returns the deleted row so the caller can
    /// remove the stored file, or `None` if no such message exists.
    pub fn delete_message(&self, id: MessageId) -> Result<Option<Message>> {
        let tx = self.conn().unchecked_transaction()?;

        let message = tx
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .optional()?;
        let Some(message) = message else {
            return Ok(None);
        };

        tx.execute("DELETE FROM messages WHERE id = ?1", params![id.to_string()])?;

        if let Some(file_id) = message.file_id {
            tx.execute(
                "DELETE FROM file_access WHERE file_id = ?1 AND chat_id = ?2",
                params![file_id.to_string(), message.chat_id.to_string()],
            )?;
        }

        tx.execute(
            "UPDATE chats SET
                 last_message_id = (SELECT id FROM messages WHERE chat_id = ?1
                                    ORDER BY timestamp DESC, rowid DESC LIMIT 1),
                 last_message_time = (SELECT timestamp FROM messages WHERE chat_id = ?1
                                      ORDER BY timestamp DESC, rowid DESC LIMIT 1)
             WHERE id = ?1 AND last_message_id = ?2",
            params![message.chat_id.to_string(), id.to_string()],
        )?;

        tx.commit()?;
        Ok(Some(message))
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let chat_str: String = row.get(1)?;
    let sender_str: String = row.get(2)?;
    let receiver_str: String = row.get(3)?;
    let file_flag: i64 = row.get(5)?;
    let file_id_str: Option<String> = row.get(6)?;
    let ts_str: String = row.get(8)?;

    Ok(Message {
        id: MessageId(decode_uuid(0, &id_str)?),
        chat_id: ChatId(decode_uuid(1, &chat_str)?),
        sender_id: UserId(decode_uuid(2, &sender_str)?),
        receiver_id: UserId(decode_uuid(3, &receiver_str)?),
        message_text: row.get(4)?,
        file_flag: decode_byte(5, file_flag, FileFlag::from_byte)?,
        file_id: file_id_str.map(|s| decode_uuid(6, &s)).transpose()?,
        file_extension: row.get(7)?,
        timestamp: decode_time(8, &ts_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chat, User};
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn setup() -> (Database, Chat) {
        let db = Database::open_in_memory().unwrap();
        let a = User::new("alice", "a@example.test");
        let b = User::new("bob", "b@example.test");
        db.insert_user(&a).unwrap();
        db.insert_user(&b).unwrap();
        let chat = Chat::new(a.id, b.id);
        db.insert_chat(&chat).unwrap();
        (db, chat)
    }

    fn text_message(chat: &Chat, text: &str) -> Message {
        Message {
            id: MessageId::new(),
            chat_id: chat.id,
            sender_id: chat.user1_id,
            receiver_id: chat.user2_id,
            message_text: Some(text.into()),
            file_flag: FileFlag::None,
            file_id: None,
            file_extension: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_insert_updates_last_message() {
        let (db, chat) = setup();
        let msg = text_message(&chat, "hi");
        db.insert_message(&msg).unwrap();

        let loaded = db.get_chat(chat.id).unwrap();
        assert_eq!(loaded.last_message_id, Some(msg.id));
        assert_eq!(db.get_message_by_id(msg.id).unwrap(), msg_with_micros(&msg));
    }

    #[test]
    fn test_insert_into_unknown_chat_fails() {
        let (db, chat) = setup();
        let mut msg = text_message(&chat, "hi");
        msg.chat_id = ChatId::new();
        assert!(db.insert_message(&msg).is_err());
        assert!(matches!(
            db.get_message_by_id(msg.id).unwrap_err(),
            StoreError::NotFound
        ));
    }

    #[test]
    fn test_history_newest_first() {
        let (db, chat) = setup();
        let base = Utc::now();
        for i in 0..5 {
            let mut msg = text_message(&chat, &format!("m{i}"));
            msg.timestamp = base + Duration::seconds(i);
            db.insert_message(&msg).unwrap();
        }

        let page = db.get_messages_for_chat(chat.id, 2, 0).unwrap();
        let texts: Vec<_> = page.iter().filter_map(|m| m.message_text.clone()).collect();
        assert_eq!(texts, vec!["m4", "m3"]);

        let page = db.get_messages_for_chat(chat.id, 2, 4).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].message_text.as_deref(), Some("m0"));
    }

    #[test]
    fn test_delete_repoints_last_message_and_acl() {
        let (db, chat) = setup();
        let first = text_message(&chat, "first");
        db.insert_message(&first).unwrap();

        let mut second = text_message(&chat, "with file");
        second.timestamp = first.timestamp + Duration::seconds(1);
        second.file_flag = FileFlag::Image;
        second.file_id = Some(Uuid::new_v4());
        second.file_extension = Some("png".into());
        db.insert_message(&second).unwrap();
        db.grant_upload_access(chat.user1_id, chat.user2_id, chat.id, "images", second.file_id.unwrap(), "png")
            .unwrap();

        let deleted = db.delete_message(second.id).unwrap().unwrap();
        assert_eq!(deleted.id, second.id);
        assert_eq!(db.get_chat(chat.id).unwrap().last_message_id, Some(first.id));
        assert!(db
            .list_chat_files(chat.user2_id, chat.id, "images", 10, 0)
            .unwrap()
            .is_empty());

        assert!(db.delete_message(second.id).unwrap().is_none());
    }

    fn msg_with_micros(msg: &Message) -> Message {
        let mut m = msg.clone();
        let text = encode_time(&m.timestamp);
        m.timestamp = decode_time(0, &text).unwrap();
        m
    }
}
