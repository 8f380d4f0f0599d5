//! Authorization checks and signed URL generation.
//!
//! Every check reads from the store. Storage failures surface as
//! [`ChatError::Persistence`] so callers fail closed.

use std::path::Path;

use tracing::debug;
use uuid::Uuid;

use tandem_shared::constants::{AVATAR_EXTENSION, AVATAR_FOLDER};
use tandem_shared::types::{AccessLevel, ChatId, MessageId, UserId};
use tandem_store::{Message, StoreError, StoreHandle};

use crate::error::ChatError;
use crate::signing::UrlSigner;

pub struct AuthorizationService {
    store: StoreHandle,
    signer: UrlSigner,
    file_url_expiry_hours: i64,
}

impl AuthorizationService {
    pub fn new(store: StoreHandle, signer: UrlSigner, file_url_expiry_hours: i64) -> Self {
        Self {
            store,
            signer,
            file_url_expiry_hours,
        }
    }

    pub async fn is_authorized_for_chat(
        &self,
        user: UserId,
        chat_id: ChatId,
    ) -> Result<bool, ChatError> {
        Ok(self
            .store
            .call(move |db| db.is_chat_participant(chat_id, user))
            .await?)
    }

    /// `true` iff `user` sent or received the message.
    pub async fn is_authorized_for_message(
        &self,
        user: UserId,
        message_id: MessageId,
    ) -> Result<bool, ChatError> {
        match self
            .store
            .call(move |db| db.get_message_by_id(message_id))
            .await
        {
            Ok(message) => Ok(message.sender_id == user || message.receiver_id == user),
            Err(StoreError::NotFound) => Ok(false),
            Err(e) => Err(ChatError::Persistence(e)),
        }
    }

    /// Exact-level ACL lookup. The file id is the file name without its
    /// extension; a name that does not carry a UUID is never authorized.
    pub async fn is_authorized_for_file(
        &self,
        user: UserId,
        folder: &str,
        file_name: &str,
        level: AccessLevel,
    ) -> Result<bool, ChatError> {
        let stem = Path::new(file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let Ok(file_id) = Uuid::parse_str(stem) else {
            debug!(file = file_name, "File name carries no file id");
            return Ok(false);
        };

        let folder = folder.to_string();
        Ok(self
            .store
            .call(move |db| db.has_file_access(user, &folder, file_id, level))
            .await?)
    }

    /// `true` iff a chat between the two users has any block in place.
    pub async fn is_blocked(&self, a: UserId, b: UserId) -> Result<bool, ChatError> {
        let chat = self.store.call(move |db| db.find_chat_between(a, b)).await?;
        Ok(chat.is_some_and(|c| c.block_state.is_blocked()))
    }

    pub fn generate_signed_file_url(
        &self,
        folder: &str,
        file_name: &str,
        expiration_hours: i64,
    ) -> Result<String, ChatError> {
        self.signer.url_for(folder, file_name, expiration_hours)
    }

    /// `None` when the user has no avatar.
    pub fn generate_signed_avatar_url(
        &self,
        avatar_id: Option<Uuid>,
        expiration_hours: i64,
    ) -> Result<Option<String>, ChatError> {
        let Some(avatar_id) = avatar_id.filter(|id| !id.is_nil()) else {
            return Ok(None);
        };
        let file_name = format!("{avatar_id}.{AVATAR_EXTENSION}");
        self.signer
            .url_for(AVATAR_FOLDER, &file_name, expiration_hours)
            .map(Some)
    }

    /// Signed URL of a message's attachment with the default lifetime.
    pub fn message_file_url(&self, message: &Message) -> Result<Option<String>, ChatError> {
        match message.file_location() {
            Some((folder, file_name)) => self
                .generate_signed_file_url(folder, &file_name, self.file_url_expiry_hours)
                .map(Some),
            None => Ok(None),
        }
    }

    pub fn validate_signature(&self, folder: &str, file_name: &str, expires: i64, hash: &str) -> bool {
        self.signer.verify(folder, file_name, expires, hash)
    }

    pub fn file_url_expiry_hours(&self) -> i64 {
        self.file_url_expiry_hours
    }
}
