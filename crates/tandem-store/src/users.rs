//! CRUD operations for [`User`] records.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use tandem_shared::types::UserId;

use crate::convert::{decode_time, decode_uuid, encode_time};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::User;

const USER_COLUMNS: &str =
    "id, user_name, email, avatar_id, refresh_token, refresh_token_expiry, created_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new user. Fails with [`StoreError::Conflict`] on a taken name.
    pub fn insert_user(&self, user: &User) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO users (id, user_name, email, avatar_id, refresh_token, refresh_token_expiry, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    user.id.to_string(),
                    user.user_name,
                    user.email,
                    user.avatar_id.map(|id| id.to_string()),
                    user.refresh_token,
                    user.refresh_token_expiry.as_ref().map(encode_time),
                    encode_time(&user.created_at),
                ],
            )
            .map_err(StoreError::from_insert)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.to_string()],
                row_to_user,
            )
            .map_err(StoreError::from_query)
    }

    /// Case-insensitive lookup by user name.
    pub fn find_user_by_name(&self, user_name: &str) -> Result<Option<User>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE user_name = ?1 COLLATE NOCASE"),
                params![user_name],
                row_to_user,
            )
            .optional()?)
    }

    pub fn find_user_by_refresh_token(&self, token: &str) -> Result<Option<User>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE refresh_token = ?1"),
                params![token],
                row_to_user,
            )
            .optional()?)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Overwrite the user's refresh token. Returns `false` if the user is unknown.
    pub fn set_refresh_token(
        &self,
        id: UserId,
        token: &str,
        expiry: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE users SET refresh_token = ?2, refresh_token_expiry = ?3 WHERE id = ?1",
            params![id.to_string(), token, encode_time(&expiry)],
        )?;
        Ok(affected > 0)
    }

    /// Replace `old` with `new` only if `old` is still the stored value.
    ///
    /// Returns `false` when another rotation or a revocation got there first.
    pub fn rotate_refresh_token(
        &self,
        id: UserId,
        old: &str,
        new: &str,
        expiry: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE users SET refresh_token = ?3, refresh_token_expiry = ?4
             WHERE id = ?1 AND refresh_token = ?2",
            params![id.to_string(), old, new, encode_time(&expiry)],
        )?;
        Ok(affected > 0)
    }

    /// Clear the refresh token matching `token` and expire it at `now`.
    /// Returns `false` if no user holds that token.
    pub fn clear_refresh_token(&self, token: &str, now: DateTime<Utc>) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE users SET refresh_token = NULL, refresh_token_expiry = ?2
             WHERE refresh_token = ?1",
            params![token, encode_time(&now)],
        )?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    let avatar_str: Option<String> = row.get(3)?;
    let expiry_str: Option<String> = row.get(5)?;
    let created_str: String = row.get(6)?;

    Ok(User {
        id: UserId(decode_uuid(0, &id_str)?),
        user_name: row.get(1)?,
        email: row.get(2)?,
        avatar_id: avatar_str.map(|s| decode_uuid(3, &s)).transpose()?,
        refresh_token: row.get(4)?,
        refresh_token_expiry: expiry_str.map(|s| decode_time(5, &s)).transpose()?,
        created_at: decode_time(6, &created_str)?,
    })
}
