//! File access gateway: signed-URL downloads, uploads and removal.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use tandem_shared::constants::MAX_FILE_EXTENSION_LEN;
use tandem_shared::ticks::to_ticks;
use tandem_shared::types::{AccessLevel, ChatId, FileFlag, UserId};
use tandem_store::StoreHandle;

use crate::authz::AuthorizationService;
use crate::error::ChatError;
use crate::file_store::{validate_segment, FileStore};

/// Bytes of a served file and the MIME type derived from its extension.
#[derive(Debug)]
pub struct FileContent {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

/// Reference to a freshly stored upload.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub file_id: Uuid,
    pub file_extension: String,
    pub file_flag: FileFlag,
}

pub fn content_type_for(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Normalize a client-supplied extension: optional leading dot stripped,
/// 1..=10 ASCII alphanumerics, lower-cased.
pub fn normalize_extension(raw: &str) -> Result<String, ChatError> {
    let ext = raw.trim().trim_start_matches('.');
    if ext.is_empty()
        || ext.len() > MAX_FILE_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(ChatError::Validation(format!("Invalid file extension: {raw:?}")));
    }
    Ok(ext.to_ascii_lowercase())
}

pub struct FileGateway {
    files: FileStore,
    authz: Arc<AuthorizationService>,
    store: StoreHandle,
}

impl FileGateway {
    pub fn new(files: FileStore, authz: Arc<AuthorizationService>, store: StoreHandle) -> Self {
        Self {
            files,
            authz,
            store,
        }
    }

    pub fn max_upload_size(&self) -> usize {
        self.files.max_size()
    }

    /// Serve a file behind a signed URL.
    ///
    /// Checks run in a fixed order: name shape, existence, signature,
    /// expiry, then the caller's read grant. Nothing is written on failure.
    pub async fn fetch(
        &self,
        user: UserId,
        folder: &str,
        file_name: &str,
        expires: i64,
        hash: &str,
    ) -> Result<FileContent, ChatError> {
        validate_segment(folder)?;
        validate_segment(file_name)?;

        if !self.files.exists(folder, file_name).await? {
            return Err(ChatError::NotFound(format!("File {folder}/{file_name}")));
        }

        if !self.authz.validate_signature(folder, file_name, expires, hash) {
            warn!(user = %user, folder, file = file_name, "File URL signature mismatch");
            return Err(ChatError::Tamper);
        }

        if to_ticks(Utc::now()) > expires {
            return Err(ChatError::ExpiredUrl);
        }

        if !self
            .authz
            .is_authorized_for_file(user, folder, file_name, AccessLevel::Read)
            .await?
        {
            return Err(ChatError::Authorization("No access to this file".to_string()));
        }

        let bytes = self.files.read(folder, file_name).await?;
        Ok(FileContent {
            bytes,
            content_type: content_type_for(file_name),
        })
    }

    /// Store an upload for a chat and grant access to both participants.
    pub async fn store(
        &self,
        uploader: UserId,
        chat_id: ChatId,
        flag: FileFlag,
        extension: &str,
        bytes: &[u8],
    ) -> Result<StoredFile, ChatError> {
        let Some(folder) = flag.folder() else {
            return Err(ChatError::Validation("File flag must not be none".to_string()));
        };
        let extension = normalize_extension(extension)?;

        let chat = match self.store.call(move |db| db.get_chat(chat_id)).await {
            Ok(chat) => chat,
            Err(tandem_store::StoreError::NotFound) => {
                return Err(ChatError::Authorization("Not a participant of this chat".to_string()))
            }
            Err(e) => return Err(ChatError::Persistence(e)),
        };
        let Some(other) = chat.other_participant(uploader) else {
            return Err(ChatError::Authorization("Not a participant of this chat".to_string()));
        };

        let file_id = Uuid::new_v4();
        let file_name = format!("{file_id}.{extension}");
        self.files.write(folder, &file_name, bytes).await?;

        let ext = extension.clone();
        let granted = self
            .store
            .call(move |db| db.grant_upload_access(uploader, other, chat_id, folder, file_id, &ext))
            .await;
        if let Err(e) = granted {
            // Without grants the file is unreachable; drop it.
            if let Err(rm) = self.files.remove(folder, &file_name).await {
                warn!(folder, file = %file_name, error = %rm, "Failed to remove orphaned upload");
            }
            return Err(e.into());
        }

        info!(
            user = %uploader,
            chat = %chat_id,
            folder,
            file = %file_name,
            size = bytes.len(),
            "File uploaded"
        );

        Ok(StoredFile {
            file_id,
            file_extension: extension,
            file_flag: flag,
        })
    }

    pub async fn delete(&self, folder: &str, file_name: &str) -> Result<(), ChatError> {
        self.files.remove(folder, file_name).await
    }
}
