use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tandem_shared::types::ChatId;
use tandem_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Token expired")]
    ExpiredToken,

    #[error("URL expired")]
    ExpiredUrl,

    #[error("Forbidden: {0}")]
    Authorization(String),

    #[error("Signature mismatch")]
    Tamper,

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Chat already exists")]
    Conflict { chat_id: ChatId },

    #[error("Payload exceeds {max} bytes")]
    PayloadTooLarge { max: usize },

    #[error("Storage error: {0}")]
    Persistence(StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// Stable class name sent to clients next to the message.
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::Authentication(_) => "authentication",
            ChatError::ExpiredToken => "expiredToken",
            ChatError::ExpiredUrl => "expiredUrl",
            ChatError::Authorization(_) => "authorization",
            ChatError::Tamper => "tamper",
            ChatError::Validation(_) => "validation",
            ChatError::NotFound(_) => "notFound",
            ChatError::Conflict { .. } => "conflict",
            ChatError::PayloadTooLarge { .. } => "payloadTooLarge",
            ChatError::Persistence(_) => "persistence",
            ChatError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::Authentication(_) | ChatError::ExpiredToken => StatusCode::UNAUTHORIZED,
            ChatError::ExpiredUrl => StatusCode::GONE,
            ChatError::Authorization(_) | ChatError::Tamper => StatusCode::FORBIDDEN,
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Conflict { .. } => StatusCode::CONFLICT,
            ChatError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ChatError::Persistence(_) | ChatError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to show a client. Storage and internal details stay in
    /// the logs.
    pub fn public_message(&self) -> String {
        match self {
            ChatError::Persistence(_) => "Storage error".to_string(),
            ChatError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<StoreError> for ChatError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ChatError::NotFound("Record not found".to_string()),
            other => ChatError::Persistence(other),
        }
    }
}

impl From<JsonRejection> for ChatError {
    fn from(e: JsonRejection) -> Self {
        ChatError::Validation(format!("Invalid JSON body: {}", e.body_text()))
    }
}

impl From<PathRejection> for ChatError {
    fn from(e: PathRejection) -> Self {
        ChatError::Validation(format!("Invalid path parameter: {}", e.body_text()))
    }
}

impl From<QueryRejection> for ChatError {
    fn from(e: QueryRejection) -> Self {
        ChatError::Validation(format!("Invalid query string: {}", e.body_text()))
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        match &self {
            ChatError::Persistence(e) => tracing::error!(error = %e, "Storage failure"),
            ChatError::Internal(e) => tracing::error!(error = %e, "Internal failure"),
            _ => {}
        }

        let mut body = serde_json::json!({
            "error": self.public_message(),
            "kind": self.kind(),
        });
        if let ChatError::Conflict { chat_id } = &self {
            body["chatId"] = serde_json::json!(chat_id);
        }

        (self.status(), axum::Json(body)).into_response()
    }
}
