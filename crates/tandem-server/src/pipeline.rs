//! Message ingestion: validate, persist, then fan out to the chat's group.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use tandem_shared::constants::{MAX_MESSAGE_TEXT_CHARS, MAX_PAGE_SIZE};
use tandem_shared::protocol::{MessageDeleted, MessageView, SendMessage, ServerFrame};
use tandem_shared::types::{ChatId, FileFlag, MessageId, UserId};
use tandem_store::{Message, StoreError, StoreHandle};

use crate::authz::AuthorizationService;
use crate::error::ChatError;
use crate::gateway::{normalize_extension, FileGateway};
use crate::registry::GroupRegistry;

pub struct MessagePipeline {
    store: StoreHandle,
    authz: Arc<AuthorizationService>,
    gateway: Arc<FileGateway>,
    registry: GroupRegistry,
}

impl MessagePipeline {
    pub fn new(
        store: StoreHandle,
        authz: Arc<AuthorizationService>,
        gateway: Arc<FileGateway>,
        registry: GroupRegistry,
    ) -> Self {
        Self {
            store,
            authz,
            gateway,
            registry,
        }
    }

    /// Accept a message from `sender`. Nothing is broadcast unless the
    /// message was persisted.
    pub async fn submit(&self, sender: UserId, request: SendMessage) -> Result<MessageView, ChatError> {
        let chat_id = request.chat_id;
        let chat = match self.store.call(move |db| db.get_chat(chat_id)).await {
            Ok(chat) if chat.has_participant(sender) => chat,
            Ok(_) | Err(StoreError::NotFound) => {
                return Err(ChatError::Authorization(
                    "Not a participant of this chat".to_string(),
                ))
            }
            Err(e) => return Err(ChatError::Persistence(e)),
        };

        if chat.other_participant(sender) != Some(request.receiver_id) {
            return Err(ChatError::Validation(
                "Receiver must be the other participant".to_string(),
            ));
        }
        if self.authz.is_blocked(sender, request.receiver_id).await? {
            return Err(ChatError::Authorization("Chat is blocked".to_string()));
        }

        let message = build_message(sender, request)?;

        let stored = message.clone();
        if let Err(e) = self.store.call(move |db| db.insert_message(&stored)).await {
            error!(chat = %chat_id, sender = %sender, error = %e, "Failed to persist message");
            return Err(ChatError::Persistence(e));
        }

        let view = self.view(&message)?;
        let delivered = self
            .registry
            .broadcast(chat_id, &ServerFrame::NewMessage(view.clone()))
            .await;

        info!(
            message = %message.id,
            chat = %chat_id,
            sender = %sender,
            delivered,
            "Message submitted"
        );
        Ok(view)
    }

    /// Newest-first page of a chat's history, at most [`MAX_PAGE_SIZE`] long.
    pub async fn history(
        &self,
        user: UserId,
        chat_id: ChatId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<MessageView>, ChatError> {
        if !self.authz.is_authorized_for_chat(user, chat_id).await? {
            return Err(ChatError::Authorization(
                "Not a participant of this chat".to_string(),
            ));
        }

        let limit = limit.min(MAX_PAGE_SIZE);
        let messages = self
            .store
            .call(move |db| db.get_messages_for_chat(chat_id, limit, offset))
            .await?;
        messages.iter().map(|m| self.view(m)).collect()
    }

    pub async fn get(&self, user: UserId, message_id: MessageId) -> Result<MessageView, ChatError> {
        if !self.authz.is_authorized_for_message(user, message_id).await? {
            return Err(ChatError::Authorization("No access to this message".to_string()));
        }
        let message = self
            .store
            .call(move |db| db.get_message_by_id(message_id))
            .await?;
        self.view(&message)
    }

    /// Delete a message. Only its sender may do this.
    pub async fn delete(&self, user: UserId, message_id: MessageId) -> Result<MessageDeleted, ChatError> {
        let message = self
            .store
            .call(move |db| db.get_message_by_id(message_id))
            .await?;
        if message.sender_id != user {
            return Err(ChatError::Authorization(
                "Only the sender can delete a message".to_string(),
            ));
        }

        let Some(deleted) = self.store.call(move |db| db.delete_message(message_id)).await? else {
            return Err(ChatError::NotFound(format!("Message {message_id}")));
        };

        if let Some((folder, file_name)) = deleted.file_location() {
            if let Err(e) = self.gateway.delete(folder, &file_name).await {
                warn!(folder, file = %file_name, error = %e, "Failed to delete message file");
            }
        }

        let event = MessageDeleted {
            message_id,
            chat_id: deleted.chat_id,
        };
        self.registry
            .broadcast(deleted.chat_id, &ServerFrame::MessageDeleted(event.clone()))
            .await;

        info!(message = %message_id, chat = %deleted.chat_id, "Message deleted");
        Ok(event)
    }

    fn view(&self, message: &Message) -> Result<MessageView, ChatError> {
        Ok(MessageView {
            message_id: message.id,
            chat_id: message.chat_id,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            message_text: message.message_text.clone(),
            file_flag: message.file_flag,
            file_id: message.file_id,
            file_extension: message.file_extension.clone(),
            timestamp: message.timestamp,
            file_url: self.authz.message_file_url(message)?,
        })
    }
}

/// Validate a send request and stamp it with a fresh id and server time.
fn build_message(sender: UserId, request: SendMessage) -> Result<Message, ChatError> {
    let text = request.message_text.filter(|t| !t.trim().is_empty());
    if let Some(text) = &text {
        if text.chars().count() > MAX_MESSAGE_TEXT_CHARS {
            return Err(ChatError::Validation(format!(
                "Message text exceeds {MAX_MESSAGE_TEXT_CHARS} characters"
            )));
        }
    }

    let (file_id, file_extension) = match request.file_flag {
        FileFlag::None => (None, None),
        _ => {
            let file_id = request
                .file_id
                .filter(|id| !id.is_nil())
                .ok_or_else(|| ChatError::Validation("File id required".to_string()))?;
            let ext = request
                .file_extension
                .as_deref()
                .ok_or_else(|| ChatError::Validation("File extension required".to_string()))?;
            (Some(file_id), Some(normalize_extension(ext)?))
        }
    };

    if text.is_none() && file_id.is_none() {
        return Err(ChatError::Validation(
            "Message needs text or a file".to_string(),
        ));
    }

    Ok(Message {
        id: MessageId::new(),
        chat_id: request.chat_id,
        sender_id: sender,
        receiver_id: request.receiver_id,
        message_text: text,
        file_flag: request.file_flag,
        file_id,
        file_extension,
        timestamp: Utc::now(),
    })
}
