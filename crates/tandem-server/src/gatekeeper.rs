//! Admission of realtime connections.
//!
//! Each attempt walks `Pending → Authenticating → Authorizing → Admitted`,
//! or stops in `Rejected`. Only an admitted connection is ever visible to the
//! group registry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use tandem_shared::types::{ChatId, ConnectionId, UserId};

use crate::authz::AuthorizationService;
use crate::error::ChatError;
use crate::registry::{GroupRegistry, Outbound};
use crate::tokens::{Claims, TokenService};

pub const CLOSE_TOKEN_EXPIRED: u16 = 4001;
pub const CLOSE_TOKEN_INVALID: u16 = 4002;
pub const CLOSE_FORBIDDEN: u16 = 4003;
pub const CLOSE_INVALID_CHAT: u16 = 4004;
/// RFC 6455 "internal error".
pub const CLOSE_UNAVAILABLE: u16 = 1011;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    MissingToken,
    InvalidToken,
    ExpiredToken,
    InvalidChatId,
    Forbidden,
    /// The membership check could not be completed.
    Unavailable,
}

impl Rejection {
    pub fn close_code(self) -> u16 {
        match self {
            Rejection::ExpiredToken => CLOSE_TOKEN_EXPIRED,
            Rejection::MissingToken | Rejection::InvalidToken => CLOSE_TOKEN_INVALID,
            Rejection::Forbidden => CLOSE_FORBIDDEN,
            Rejection::InvalidChatId => CLOSE_INVALID_CHAT,
            Rejection::Unavailable => CLOSE_UNAVAILABLE,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Rejection::MissingToken => "Token missing",
            Rejection::InvalidToken => "Token invalid",
            Rejection::ExpiredToken => "Token expired",
            Rejection::InvalidChatId => "Invalid chat id",
            Rejection::Forbidden => "Not a participant of this chat",
            Rejection::Unavailable => "Service unavailable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionState {
    Pending,
    Authenticating,
    Authorizing,
    Admitted,
    Rejected(Rejection),
}

/// Connection metadata available at upgrade time.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConnectRequest<'a> {
    /// Raw `Authorization` header value.
    pub authorization: Option<&'a str>,
    /// `access_token` query parameter.
    pub access_token: Option<&'a str>,
    /// `chatId` query parameter.
    pub chat_id: Option<&'a str>,
}

impl<'a> ConnectRequest<'a> {
    /// Bearer header first, then the query parameter.
    pub fn bearer_token(&self) -> Option<&'a str> {
        let non_empty = |t: &'a str| Some(t.trim()).filter(|t| !t.is_empty());
        self.authorization
            .and_then(|h| h.strip_prefix("Bearer "))
            .and_then(non_empty)
            .or_else(|| self.access_token.and_then(non_empty))
    }
}

/// An admitted connection's identity. Hand it back to
/// [`Gatekeeper::disconnect`] when the connection ends.
#[derive(Debug, Clone)]
pub struct Admission {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub claims: Claims,
}

impl Admission {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.claims.expires_at()
    }
}

#[derive(Clone)]
pub struct Gatekeeper {
    tokens: Arc<TokenService>,
    authz: Arc<AuthorizationService>,
    registry: GroupRegistry,
}

impl Gatekeeper {
    pub fn new(
        tokens: Arc<TokenService>,
        authz: Arc<AuthorizationService>,
        registry: GroupRegistry,
    ) -> Self {
        Self {
            tokens,
            authz,
            registry,
        }
    }

    /// Run the admission state machine. On success the connection's queue
    /// is registered under the chat's group.
    pub async fn admit(
        &self,
        request: ConnectRequest<'_>,
        tx: mpsc::Sender<Outbound>,
    ) -> Result<Admission, Rejection> {
        let connection_id = ConnectionId::new();
        let mut state = AdmissionState::Pending;

        match self.evaluate(connection_id, request, &mut state).await {
            Ok((claims, chat_id)) => {
                self.registry.join(chat_id, connection_id, tx).await;
                transition(connection_id, &mut state, AdmissionState::Admitted);
                info!(
                    connection = %connection_id,
                    user = %claims.sub,
                    chat = %chat_id,
                    "Connection admitted"
                );
                Ok(Admission {
                    connection_id,
                    user_id: claims.sub,
                    chat_id,
                    claims,
                })
            }
            Err(rejection) => {
                transition(connection_id, &mut state, AdmissionState::Rejected(rejection));
                warn!(
                    connection = %connection_id,
                    code = rejection.close_code(),
                    reason = rejection.reason(),
                    "Connection rejected"
                );
                Err(rejection)
            }
        }
    }

    async fn evaluate(
        &self,
        connection_id: ConnectionId,
        request: ConnectRequest<'_>,
        state: &mut AdmissionState,
    ) -> Result<(Claims, ChatId), Rejection> {
        transition(connection_id, state, AdmissionState::Authenticating);
        let token = request.bearer_token().ok_or(Rejection::MissingToken)?;
        let claims = self.tokens.validate_access_token(token).map_err(|e| match e {
            ChatError::ExpiredToken => Rejection::ExpiredToken,
            _ => Rejection::InvalidToken,
        })?;

        transition(connection_id, state, AdmissionState::Authorizing);
        let chat_id: ChatId = request
            .chat_id
            .ok_or(Rejection::InvalidChatId)?
            .parse()
            .map_err(|_| Rejection::InvalidChatId)?;

        match self.authz.is_authorized_for_chat(claims.sub, chat_id).await {
            Ok(true) => Ok((claims, chat_id)),
            Ok(false) => Err(Rejection::Forbidden),
            Err(e) => {
                warn!(connection = %connection_id, error = %e, "Membership check failed");
                Err(Rejection::Unavailable)
            }
        }
    }

    /// Remove an admitted connection from its group. Safe to call twice.
    pub async fn disconnect(&self, admission: &Admission) {
        if self
            .registry
            .leave(admission.chat_id, admission.connection_id)
            .await
        {
            info!(
                connection = %admission.connection_id,
                user = %admission.user_id,
                chat = %admission.chat_id,
                "Connection closed"
            );
        }
    }
}

fn transition(connection: ConnectionId, state: &mut AdmissionState, next: AdmissionState) {
    debug!(connection = %connection, from = ?state, to = ?next, "Admission state");
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::outbound_channel;
    use crate::signing::UrlSigner;
    use chrono::Duration;
    use jsonwebtoken::Algorithm;
    use tandem_store::{Chat, StoreHandle, User};

    struct Fixture {
        gatekeeper: Gatekeeper,
        tokens: Arc<TokenService>,
        registry: GroupRegistry,
        alice: User,
        mallory: User,
        chat: Chat,
    }

    async fn fixture() -> Fixture {
        let store = StoreHandle::open_in_memory().unwrap();
        let alice = User::new("alice", "a@example.test");
        let bob = User::new("bob", "b@example.test");
        let mallory = User::new("mallory", "m@example.test");
        let chat = Chat::new(alice.id, bob.id);
        let (a, b, m, c) = (alice.clone(), bob, mallory.clone(), chat.clone());
        store
            .call(move |db| {
                db.insert_user(&a)?;
                db.insert_user(&b)?;
                db.insert_user(&m)?;
                db.insert_chat(&c)
            })
            .await
            .unwrap();

        let tokens = Arc::new(TokenService::new(
            b"jwt-secret",
            Algorithm::HS512,
            "tandem",
            "clients",
            store.clone(),
        ));
        let signer = UrlSigner::new(b"url-secret", "http://localhost").unwrap();
        let authz = Arc::new(AuthorizationService::new(store, signer, 1));
        let registry = GroupRegistry::new();
        Fixture {
            gatekeeper: Gatekeeper::new(tokens.clone(), authz, registry.clone()),
            tokens,
            registry,
            alice,
            mallory,
            chat,
        }
    }

    #[test]
    fn test_bearer_token_precedence() {
        let req = ConnectRequest {
            authorization: Some("Bearer from-header"),
            access_token: Some("from-query"),
            chat_id: None,
        };
        assert_eq!(req.bearer_token(), Some("from-header"));

        let req = ConnectRequest {
            authorization: Some("Basic abc"),
            access_token: Some("from-query"),
            chat_id: None,
        };
        assert_eq!(req.bearer_token(), Some("from-query"));
        assert_eq!(ConnectRequest::default().bearer_token(), None);

        let req = ConnectRequest {
            authorization: Some("Bearer  "),
            access_token: Some("from-query"),
            chat_id: None,
        };
        assert_eq!(req.bearer_token(), Some("from-query"));

        let req = ConnectRequest {
            authorization: Some("Bearer "),
            access_token: Some(""),
            chat_id: None,
        };
        assert_eq!(req.bearer_token(), None);
    }

    #[tokio::test]
    async fn test_participant_admitted() {
        let f = fixture().await;
        let token = f.tokens.issue_access_token(&f.alice).unwrap();
        let chat_id = f.chat.id.to_string();
        let (tx, _rx) = outbound_channel();

        let admission = f
            .gatekeeper
            .admit(
                ConnectRequest {
                    access_token: Some(&token),
                    chat_id: Some(&chat_id),
                    ..Default::default()
                },
                tx,
            )
            .await
            .unwrap();

        assert_eq!(admission.user_id, f.alice.id);
        assert!(f.registry.contains(f.chat.id, admission.connection_id).await);

        f.gatekeeper.disconnect(&admission).await;
        f.gatekeeper.disconnect(&admission).await;
        assert_eq!(f.registry.member_count(f.chat.id).await, 0);
    }

    #[tokio::test]
    async fn test_non_member_never_joins() {
        let f = fixture().await;
        let token = f.tokens.issue_access_token(&f.mallory).unwrap();
        let chat_id = f.chat.id.to_string();
        let (tx, _rx) = outbound_channel();

        let rejection = f
            .gatekeeper
            .admit(
                ConnectRequest {
                    authorization: Some(&format!("Bearer {token}")),
                    chat_id: Some(&chat_id),
                    ..Default::default()
                },
                tx,
            )
            .await
            .unwrap_err();

        assert_eq!(rejection, Rejection::Forbidden);
        assert_eq!(rejection.close_code(), 4003);
        assert_eq!(f.registry.group_count().await, 0);
    }

    #[tokio::test]
    async fn test_rejection_codes() {
        let f = fixture().await;
        let chat_id = f.chat.id.to_string();
        let token = f.tokens.issue_access_token(&f.alice).unwrap();

        let (tx, _rx) = outbound_channel();
        let missing = f
            .gatekeeper
            .admit(
                ConnectRequest {
                    chat_id: Some(&chat_id),
                    ..Default::default()
                },
                tx.clone(),
            )
            .await
            .unwrap_err();
        assert_eq!(missing.close_code(), CLOSE_TOKEN_INVALID);

        let invalid = f
            .gatekeeper
            .admit(
                ConnectRequest {
                    access_token: Some("not-a-jwt"),
                    chat_id: Some(&chat_id),
                    ..Default::default()
                },
                tx.clone(),
            )
            .await
            .unwrap_err();
        assert_eq!(invalid, Rejection::InvalidToken);

        let bad_chat = f
            .gatekeeper
            .admit(
                ConnectRequest {
                    access_token: Some(&token),
                    chat_id: Some("not-a-uuid"),
                    ..Default::default()
                },
                tx.clone(),
            )
            .await
            .unwrap_err();
        assert_eq!(bad_chat.close_code(), CLOSE_INVALID_CHAT);

        let unknown_chat = ChatId::new().to_string();
        let forbidden = f
            .gatekeeper
            .admit(
                ConnectRequest {
                    access_token: Some(&token),
                    chat_id: Some(&unknown_chat),
                    ..Default::default()
                },
                tx,
            )
            .await
            .unwrap_err();
        assert_eq!(forbidden, Rejection::Forbidden);
        assert_eq!(f.registry.group_count().await, 0);
    }

    #[tokio::test]
    async fn test_expired_token_code() {
        let f = fixture().await;
        let expired_service = TokenService::new(
            b"jwt-secret",
            Algorithm::HS512,
            "tandem",
            "clients",
            StoreHandle::open_in_memory().unwrap(),
        )
        .with_access_ttl(Duration::seconds(-60));
        let token = expired_service.issue_access_token(&f.alice).unwrap();
        let chat_id = f.chat.id.to_string();
        let (tx, _rx) = outbound_channel();

        let rejection = f
            .gatekeeper
            .admit(
                ConnectRequest {
                    access_token: Some(&token),
                    chat_id: Some(&chat_id),
                    ..Default::default()
                },
                tx,
            )
            .await
            .unwrap_err();
        assert_eq!(rejection.close_code(), CLOSE_TOKEN_EXPIRED);
    }
}
