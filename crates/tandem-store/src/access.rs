//! File access control entries.

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use tandem_shared::types::{AccessLevel, ChatId, UserId};

use crate::convert::{decode_byte, decode_time, decode_uuid, encode_time};
use crate::database::Database;
use crate::error::Result;
use crate::models::FileAccessEntry;

impl Database {
    /// Insert every entry in one transaction; either all are stored or none.
    pub fn grant_file_access_all(&self, entries: &[FileAccessEntry]) -> Result<()> {
        let tx = self.conn().unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO file_access (user_id, chat_id, file_id, folder_name, file_extension, access_level, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for entry in entries {
                stmt.execute(params![
                    entry.user_id.to_string(),
                    entry.chat_id.to_string(),
                    entry.file_id.to_string(),
                    entry.folder_name,
                    entry.file_extension,
                    u8::from(entry.access_level),
                    encode_time(&entry.updated_at),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Grants for a freshly uploaded file: read for both participants and
    /// full for the uploader.
    pub fn grant_upload_access(
        &self,
        uploader: UserId,
        other: UserId,
        chat_id: ChatId,
        folder: &str,
        file_id: Uuid,
        extension: &str,
    ) -> Result<()> {
        let now = Utc::now();
        let entry = |user_id, access_level| FileAccessEntry {
            user_id,
            chat_id,
            file_id,
            folder_name: folder.to_string(),
            file_extension: extension.to_string(),
            access_level,
            updated_at: now,
        };
        self.grant_file_access_all(&[
            entry(uploader, AccessLevel::Read),
            entry(other, AccessLevel::Read),
            entry(uploader, AccessLevel::Full),
        ])
    }

    /// `true` iff an entry with exactly this level exists.
    pub fn has_file_access(
        &self,
        user: UserId,
        folder: &str,
        file_id: Uuid,
        level: AccessLevel,
    ) -> Result<bool> {
        Ok(self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM file_access
                 WHERE file_id = ?1 AND folder_name = ?2 AND user_id = ?3 AND access_level = ?4)",
            params![
                file_id.to_string(),
                folder,
                user.to_string(),
                u8::from(level)
            ],
            |row| row.get(0),
        )?)
    }

    /// Distinct files in `folder` of a chat that `user` can read or fully
    /// control, newest first.
    pub fn list_chat_files(
        &self,
        user: UserId,
        chat_id: ChatId,
        folder: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<FileAccessEntry>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id, chat_id, file_id, folder_name, file_extension, MIN(access_level), MAX(updated_at)
             FROM file_access
             WHERE user_id = ?1 AND chat_id = ?2 AND folder_name = ?3 AND access_level IN (?4, ?5)
             GROUP BY file_id
             ORDER BY MAX(updated_at) DESC, MAX(id) DESC
             LIMIT ?6 OFFSET ?7",
        )?;

        let rows = stmt.query_map(
            params![
                user.to_string(),
                chat_id.to_string(),
                folder,
                u8::from(AccessLevel::Read),
                u8::from(AccessLevel::Full),
                limit,
                offset
            ],
            row_to_entry,
        )?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileAccessEntry> {
    let user_str: String = row.get(0)?;
    let chat_str: String = row.get(1)?;
    let file_str: String = row.get(2)?;
    let level: i64 = row.get(5)?;
    let updated_str: String = row.get(6)?;

    Ok(FileAccessEntry {
        user_id: UserId(decode_uuid(0, &user_str)?),
        chat_id: ChatId(decode_uuid(1, &chat_str)?),
        file_id: decode_uuid(2, &file_str)?,
        folder_name: row.get(3)?,
        file_extension: row.get(4)?,
        access_level: decode_byte(5, level, AccessLevel::from_byte)?,
        updated_at: decode_time(6, &updated_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chat, User};

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

    #[test]
    fn test_upload_grants() {
        let (db, chat) = setup();
        let file = Uuid::new_v4();
        db.grant_upload_access(chat.user1_id, chat.user2_id, chat.id, "images", file, "png")
            .unwrap();

        assert!(db.has_file_access(chat.user1_id, "images", file, AccessLevel::Read).unwrap());
        assert!(db.has_file_access(chat.user1_id, "images", file, AccessLevel::Full).unwrap());
        assert!(db.has_file_access(chat.user2_id, "images", file, AccessLevel::Read).unwrap());
        assert!(!db.has_file_access(chat.user2_id, "images", file, AccessLevel::Full).unwrap());
        assert!(!db.has_file_access(chat.user2_id, "images", file, AccessLevel::Write).unwrap());
    }

    #[test]
    fn test_level_and_folder_must_match() {
        let (db, chat) = setup();
        let file = Uuid::new_v4();
        db.grant_upload_access(chat.user1_id, chat.user2_id, chat.id, "sounds", file, "mp3")
            .unwrap();

        assert!(!db.has_file_access(chat.user1_id, "images", file, AccessLevel::Read).unwrap());
        assert!(!db.has_file_access(UserId::new(), "sounds", file, AccessLevel::Read).unwrap());
    }

    #[test]
    fn test_grant_all_is_atomic() {
        let (db, chat) = setup();
        let file = Uuid::new_v4();
        let good = FileAccessEntry {
            user_id: chat.user1_id,
            chat_id: chat.id,
            file_id: file,
            folder_name: "rest".into(),
            file_extension: "txt".into(),
            access_level: AccessLevel::Read,
            updated_at: Utc::now(),
        };
        // Unknown user violates the foreign key.
        let bad = FileAccessEntry {
            user_id: UserId::new(),
            ..good.clone()
        };

        assert!(db.grant_file_access_all(&[good, bad]).is_err());
        assert!(!db.has_file_access(chat.user1_id, "rest", file, AccessLevel::Read).unwrap());
    }

    #[test]
    fn test_list_chat_files_distinct_newest_first() {
        let (db, chat) = setup();
        let older = Uuid::new_v4();
        let newer = Uuid::new_v4();
        db.grant_upload_access(chat.user1_id, chat.user2_id, chat.id, "images", older, "png")
            .unwrap();
        db.grant_upload_access(chat.user2_id, chat.user1_id, chat.id, "images", newer, "jpg")
            .unwrap();

        let files = db.list_chat_files(chat.user1_id, chat.id, "images", 10, 0).unwrap();
        let ids: Vec<_> = files.iter().map(|e| e.file_id).collect();
        assert_eq!(ids, vec![newer, older]);
        assert_eq!(files[0].file_name(), format!("{newer}.jpg"));

        let page = db.list_chat_files(chat.user1_id, chat.id, "images", 1, 1).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].file_id, older);
    }
}
