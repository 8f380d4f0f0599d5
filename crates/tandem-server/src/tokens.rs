//! Access and refresh token issuance.
//!
//! Access tokens are short-lived JWTs signed with a symmetric key. Refresh
//! tokens are opaque random strings stored against the user, one active
//! token per user, rotated on every use.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use tandem_shared::constants::{ACCESS_TOKEN_TTL_SECS, REFRESH_TOKEN_BYTES, REFRESH_TOKEN_TTL_DAYS};
use tandem_shared::types::UserId;
use tandem_store::{StoreHandle, User};

use crate::config::ServerConfig;
use crate::error::ChatError;

/// Claims carried by an access token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: UserId,
    pub email: String,
    pub name: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

/// Access token plus the refresh token that can renew it.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub refresh_token: String,
}

pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    store: StoreHandle,
}

impl TokenService {
    pub fn new(
        secret: &[u8],
        algorithm: Algorithm,
        issuer: impl Into<String>,
        audience: impl Into<String>,
        store: StoreHandle,
    ) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            algorithm,
            issuer: issuer.into(),
            audience: audience.into(),
            access_ttl: Duration::seconds(ACCESS_TOKEN_TTL_SECS),
            refresh_ttl: Duration::days(REFRESH_TOKEN_TTL_DAYS),
            store,
        }
    }

    /// HS512 service keyed from the server configuration.
    pub fn from_config(config: &ServerConfig, store: StoreHandle) -> Self {
        Self::new(
            &config.jwt_signing_key,
            Algorithm::HS512,
            config.jwt_issuer.clone(),
            config.jwt_audience.clone(),
            store,
        )
    }

    pub fn with_access_ttl(mut self, ttl: Duration) -> Self {
        self.access_ttl = ttl;
        self
    }

    pub fn issue_access_token(&self, user: &User) -> Result<String, ChatError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user.id,
            email: user.email.clone(),
            name: user.user_name.clone(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now,
            exp: now + self.access_ttl.num_seconds(),
        };

        encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|e| ChatError::Internal(format!("Failed to sign token: {e}")))
    }

    /// 64 random bytes, base64-encoded. The caller persists it.
    pub fn issue_refresh_token(&self) -> String {
        let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        BASE64.encode(bytes)
    }

    /// Issue both tokens after a successful login and persist the refresh
    /// token, replacing any previous one.
    pub async fn issue_session(&self, user: &User) -> Result<Session, ChatError> {
        let token = self.issue_access_token(user)?;
        let refresh_token = self.issue_refresh_token();
        let expiry = Utc::now() + self.refresh_ttl;

        let user_id = user.id;
        let stored = refresh_token.clone();
        let found = self
            .store
            .call(move |db| db.set_refresh_token(user_id, &stored, expiry))
            .await?;
        if !found {
            return Err(ChatError::NotFound(format!("User {user_id}")));
        }

        info!(user = %user_id, "Session issued");
        Ok(Session {
            token,
            refresh_token,
        })
    }

    pub fn validate_access_token(&self, token: &str) -> Result<Claims, ChatError> {
        let mut validation = Validation::new(self.algorithm);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.leeway = 0;

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => ChatError::ExpiredToken,
                _ => {
                    debug!(error = %e, "Access token rejected");
                    ChatError::Authentication("Invalid token".to_string())
                }
            })
    }

    /// Exchange a refresh token for a new session.
    ///
    /// Returns `None` if the token is unknown, expired, or was rotated by a
    /// concurrent refresh. On success the presented token is dead.
    pub async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<Session>, ChatError> {
        let presented = refresh_token.to_string();
        let Some(user) = self
            .store
            .call(move |db| db.find_user_by_refresh_token(&presented))
            .await?
        else {
            return Ok(None);
        };

        let now = Utc::now();
        if user.refresh_token_expiry.map_or(true, |expiry| expiry <= now) {
            debug!(user = %user.id, "Refresh token expired");
            return Ok(None);
        }

        let rotated = self.issue_refresh_token();
        let expiry = now + self.refresh_ttl;
        let (user_id, old, new) = (user.id, refresh_token.to_string(), rotated.clone());
        let swapped = self
            .store
            .call(move |db| db.rotate_refresh_token(user_id, &old, &new, expiry))
            .await?;
        if !swapped {
            debug!(user = %user.id, "Refresh token already rotated");
            return Ok(None);
        }

        let token = self.issue_access_token(&user)?;
        info!(user = %user.id, "Access token refreshed");
        Ok(Some(Session {
            token,
            refresh_token: rotated,
        }))
    }

    /// Clear the stored refresh token. Unknown tokens are ignored.
    pub async fn revoke_refresh_token(&self, refresh_token: &str) -> Result<(), ChatError> {
        let token = refresh_token.to_string();
        let revoked = self
            .store
            .call(move |db| db.clear_refresh_token(&token, Utc::now()))
            .await?;
        if revoked {
            info!("Refresh token revoked");
        }
        Ok(())
    }

    /// Revoke whatever refresh token `user` currently holds.
    pub async fn revoke_for_user(&self, user: UserId) -> Result<(), ChatError> {
        let current = self.store.call(move |db| db.get_user(user)).await?;
        match current.refresh_token {
            Some(token) => self.revoke_refresh_token(&token).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-signing-secret-test-signing-secret";

    async fn service_with_user() -> (TokenService, User) {
        let store = StoreHandle::open_in_memory().unwrap();
        let user = User::new("alice", "alice@example.test");
        let stored = user.clone();
        store.call(move |db| db.insert_user(&stored)).await.unwrap();
        let service = TokenService::new(SECRET, Algorithm::HS512, "tandem", "clients", store);
        (service, user)
    }

    #[tokio::test]
    async fn test_issue_and_validate() {
        let (service, user) = service_with_user().await;
        let token = service.issue_access_token(&user).unwrap();

        let claims = service.validate_access_token(&token).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.email, "alice@example.test");
        assert_eq!(claims.name, "alice");
        assert_eq!(claims.exp - claims.iat, ACCESS_TOKEN_TTL_SECS);
    }

    #[tokio::test]
    async fn test_expired_token() {
        let (service, user) = service_with_user().await;
        let service = service.with_access_ttl(Duration::seconds(-30));
        let token = service.issue_access_token(&user).unwrap();

        assert!(matches!(
            service.validate_access_token(&token),
            Err(ChatError::ExpiredToken)
        ));
    }

    #[tokio::test]
    async fn test_wrong_audience_or_key_rejected() {
        let (service, user) = service_with_user().await;
        let token = service.issue_access_token(&user).unwrap();

        let other_aud = TokenService::new(
            SECRET,
            Algorithm::HS512,
            "tandem",
            "someone-else",
            StoreHandle::open_in_memory().unwrap(),
        );
        assert!(matches!(
            other_aud.validate_access_token(&token),
            Err(ChatError::Authentication(_))
        ));

        let other_key = TokenService::new(
            b"another-secret",
            Algorithm::HS512,
            "tandem",
            "clients",
            StoreHandle::open_in_memory().unwrap(),
        );
        assert!(other_key.validate_access_token(&token).is_err());
        assert!(service.validate_access_token("garbage").is_err());
    }

    #[tokio::test]
    async fn test_refresh_token_shape() {
        let (service, _) = service_with_user().await;
        let a = service.issue_refresh_token();
        let b = service.issue_refresh_token();
        assert_ne!(a, b);
        assert_eq!(BASE64.decode(&a).unwrap().len(), REFRESH_TOKEN_BYTES);
    }

    #[tokio::test]
    async fn test_refresh_rotates_once() {
        let (service, user) = service_with_user().await;
        let session = service.issue_session(&user).await.unwrap();

        let refreshed = service
            .refresh_access_token(&session.refresh_token)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(refreshed.refresh_token, session.refresh_token);
        assert!(service.validate_access_token(&refreshed.token).is_ok());

        // The old token is dead, the rotated one works.
        assert!(service
            .refresh_access_token(&session.refresh_token)
            .await
            .unwrap()
            .is_none());
        assert!(service
            .refresh_access_token(&refreshed.refresh_token)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_expired_refresh_token() {
        let (service, user) = service_with_user().await;
        let id = user.id;
        service
            .store
            .call(move |db| db.set_refresh_token(id, "stale", Utc::now() - Duration::minutes(1)))
            .await
            .unwrap();

        assert!(service.refresh_access_token("stale").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoke() {
        let (service, user) = service_with_user().await;
        let session = service.issue_session(&user).await.unwrap();

        service.revoke_refresh_token(&session.refresh_token).await.unwrap();
        service.revoke_refresh_token("unknown").await.unwrap();
        assert!(service
            .refresh_access_token(&session.refresh_token)
            .await
            .unwrap()
            .is_none());
    }
}
