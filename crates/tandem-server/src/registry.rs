//! Per-chat broadcast groups of live connections.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use tandem_shared::constants::CONNECTION_QUEUE_CAPACITY;
use tandem_shared::protocol::ServerFrame;
use tandem_shared::types::{ChatId, ConnectionId};

/// Serialized frame queued for one connection.
pub type Outbound = Arc<str>;

/// Create the bounded outbound queue owned by a connection.
pub fn outbound_channel() -> (mpsc::Sender<Outbound>, mpsc::Receiver<Outbound>) {
    mpsc::channel(CONNECTION_QUEUE_CAPACITY)
}

/// Live connections of one chat.
pub struct ChatGroup {
    pub chat_id: ChatId,
    senders: HashMap<ConnectionId, mpsc::Sender<Outbound>>,
}

impl ChatGroup {
    pub fn new(chat_id: ChatId) -> Self {
        Self {
            chat_id,
            senders: HashMap::new(),
        }
    }

    pub fn join(&mut self, connection: ConnectionId, tx: mpsc::Sender<Outbound>) {
        self.senders.insert(connection, tx);

        info!(
            chat = %self.chat_id,
            connection = %connection,
            members = self.senders.len(),
            "Connection joined chat group"
        );
    }

    pub fn leave(&mut self, connection: &ConnectionId) -> bool {
        let removed = self.senders.remove(connection).is_some();
        if removed {
            info!(
                chat = %self.chat_id,
                connection = %connection,
                members = self.senders.len(),
                "Connection left chat group"
            );
        }
        removed
    }

    /// Enqueue `payload` on every member without waiting. Full or closed
    /// queues are skipped. Returns how many members accepted it.
    pub fn broadcast(&self, payload: &Outbound) -> usize {
        let mut delivered = 0;
        for (connection, tx) in &self.senders {
            match tx.try_send(Arc::clone(payload)) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        chat = %self.chat_id,
                        connection = %connection,
                        "Dropping frame for slow connection"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(
                        chat = %self.chat_id,
                        connection = %connection,
                        "Skipping closed connection"
                    );
                }
            }
        }
        delivered
    }

    pub fn contains(&self, connection: &ConnectionId) -> bool {
        self.senders.contains_key(connection)
    }

    pub fn member_count(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

/// Chat id → live connections, shared by every connection task.
#[derive(Clone, Default)]
pub struct GroupRegistry {
    groups: Arc<RwLock<HashMap<ChatId, ChatGroup>>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a chat's group, creating the group if missing.
    pub async fn join(&self, chat_id: ChatId, connection: ConnectionId, tx: mpsc::Sender<Outbound>) {
        let mut groups = self.groups.write().await;
        groups
            .entry(chat_id)
            .or_insert_with(|| ChatGroup::new(chat_id))
            .join(connection, tx);
    }

    /// Remove a connection. Idempotent; empty groups are dropped.
    pub async fn leave(&self, chat_id: ChatId, connection: ConnectionId) -> bool {
        let mut groups = self.groups.write().await;
        let (removed, should_remove) = match groups.get_mut(&chat_id) {
            Some(group) => (group.leave(&connection), group.is_empty()),
            None => (false, false),
        };

        if should_remove {
            groups.remove(&chat_id);
            debug!(chat = %chat_id, "Removed empty chat group");
        }
        removed
    }

    /// Serialize `frame` once and enqueue it on every connection of the chat.
    pub async fn broadcast(&self, chat_id: ChatId, frame: &ServerFrame) -> usize {
        let payload: Outbound = match frame.to_json() {
            Ok(text) => text.into(),
            Err(e) => {
                warn!(chat = %chat_id, error = %e, "Failed to encode broadcast frame");
                return 0;
            }
        };

        let groups = self.groups.read().await;
        let delivered = groups
            .get(&chat_id)
            .map(|group| group.broadcast(&payload))
            .unwrap_or(0);

        debug!(chat = %chat_id, delivered, "Broadcast frame");
        delivered
    }

    pub async fn contains(&self, chat_id: ChatId, connection: ConnectionId) -> bool {
        self.groups
            .read()
            .await
            .get(&chat_id)
            .is_some_and(|g| g.contains(&connection))
    }

    pub async fn member_count(&self, chat_id: ChatId) -> usize {
        self.groups
            .read()
            .await
            .get(&chat_id)
            .map(|g| g.member_count())
            .unwrap_or(0)
    }

    pub async fn group_count(&self) -> usize {
        self.groups.read().await.len()
    }
}
