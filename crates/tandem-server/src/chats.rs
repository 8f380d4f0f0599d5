use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use tandem_shared::constants::MAX_PAGE_SIZE;
use tandem_shared::types::{BlockState, ChatId, FileFlag, UserId};
use tandem_store::{Chat, StoreError, StoreHandle, User};

use crate::authz::AuthorizationService;
use crate::error::ChatError;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatCreated {
    pub chat_id: ChatId,
    pub user1_id: UserId,
    pub user2_id: UserId,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PhotoView {
    pub file_id: Uuid,
    pub file_name: String,
    pub url: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: UserId,
    pub user_name: String,
    pub email: String,
    pub avatar: Option<String>,
}

pub struct ChatService {
    store: StoreHandle,
    authz: Arc<AuthorizationService>,
    avatar_url_expiry_hours: i64,
}

impl ChatService {
    pub fn new(store: StoreHandle, authz: Arc<AuthorizationService>, avatar_url_expiry_hours: i64) -> Self {
        Self {
            store,
            authz,
            avatar_url_expiry_hours,
        }
    }

    /// Open a chat between two existing, distinct users. An existing pair,
    /// in either order, is a conflict carrying the existing chat id.
    pub async fn create_chat(&self, user1: UserId, user2: UserId) -> Result<ChatCreated, ChatError> {
        if user1 == user2 {
            return Err(ChatError::Validation("Cannot open a chat with yourself".to_string()));
        }

        let chat = Chat::new(user1, user2);
        let candidate = chat.clone();
        let outcome = self
            .store
            .call(move |db| {
                db.get_user(user1)?;
                db.get_user(user2)?;
                if let Some(existing) = db.find_chat_between(user1, user2)? {
                    return Ok(Err(existing.id));
                }
                match db.insert_chat(&candidate) {
                    Ok(()) => Ok(Ok(())),
                    // Lost a race with a concurrent create of the same pair.
                    Err(StoreError::Conflict) => match db.find_chat_between(user1, user2)? {
                        Some(existing) => Ok(Err(existing.id)),
                        None => Err(StoreError::Conflict),
                    },
                    Err(e) => Err(e),
                }
            })
            .await
            .map_err(|e| match e {
                StoreError::NotFound => ChatError::NotFound("User not found".to_string()),
                other => ChatError::Persistence(other),
            })?;

        if let Err(chat_id) = outcome {
            return Err(ChatError::Conflict { chat_id });
        }

        info!(chat = %chat.id, user1 = %user1, user2 = %user2, "Chat created");
        Ok(ChatCreated {
            chat_id: chat.id,
            user1_id: user1,
            user2_id: user2,
        })
    }

    /// `actor` blocks the user named `target_user_name` in their shared chat.
    pub async fn block_user(&self, actor: UserId, target_user_name: &str) -> Result<BlockState, ChatError> {
        let name = target_user_name.to_string();
        let target = self
            .store
            .call(move |db| db.find_user_by_name(&name))
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("User {target_user_name}")))?;

        let target_id = target.id;
        let chat = self
            .store
            .call(move |db| db.find_chat_between(actor, target_id))
            .await?
            .ok_or_else(|| ChatError::NotFound("No chat with this user".to_string()))?;

        let side = chat
            .participant(actor)
            .ok_or_else(|| ChatError::Authorization("Not a participant of this chat".to_string()))?;
        let next = chat.block_state.block_by(side);

        if next != chat.block_state {
            let chat_id = chat.id;
            self.store
                .call(move |db| db.set_block_state(chat_id, next))
                .await?;
            info!(chat = %chat.id, actor = %actor, state = ?next, "Block state changed");
        }
        Ok(next)
    }

    /// Images of a chat the caller can open, newest first.
    pub async fn chat_photos(
        &self,
        user: UserId,
        chat_id: ChatId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<PhotoView>, ChatError> {
        if !self.authz.is_authorized_for_chat(user, chat_id).await? {
            return Err(ChatError::Authorization(
                "Not a participant of this chat".to_string(),
            ));
        }

        let Some(folder) = FileFlag::Image.folder() else {
            return Ok(Vec::new());
        };
        let limit = limit.min(MAX_PAGE_SIZE);
        let entries = self
            .store
            .call(move |db| db.list_chat_files(user, chat_id, folder, limit, offset))
            .await?;

        let hours = self.authz.file_url_expiry_hours();
        entries
            .into_iter()
            .map(|entry| {
                let file_name = entry.file_name();
                let url = self.authz.generate_signed_file_url(folder, &file_name, hours)?;
                Ok(PhotoView {
                    file_id: entry.file_id,
                    file_name,
                    url,
                    uploaded_at: entry.updated_at,
                })
            })
            .collect()
    }

    /// Case-insensitive lookup by user name.
    pub async fn search_user(&self, user_name: &str) -> Result<UserView, ChatError> {
        let name = user_name.trim().to_string();
        if name.is_empty() {
            return Err(ChatError::Validation("User name required".to_string()));
        }
        let user = self
            .store
            .call(move |db| db.find_user_by_name(&name))
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("User {user_name}")))?;
        self.user_view(&user)
    }

    pub async fn profile(&self, user: UserId) -> Result<UserView, ChatError> {
        let user = self.store.call(move |db| db.get_user(user)).await?;
        self.user_view(&user)
    }

    fn user_view(&self, user: &User) -> Result<UserView, ChatError> {
        Ok(UserView {
            id: user.id,
            user_name: user.user_name.clone(),
            email: user.email.clone(),
            avatar: self
                .authz
                .generate_signed_avatar_url(user.avatar_id, self.avatar_url_expiry_hours)?,
        })
    }
}
