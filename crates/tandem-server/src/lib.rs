//! # tandem-server
//!
//! Delivery core of the Tandem two-party chat service.
//!
//! - **Token service**: HS512 access tokens and rotating refresh tokens
//! - **Authorization**: chat/message/file checks and HMAC-signed file URLs
//! - **File gateway**: signed, ACL-checked reads and uploads on local disk
//! - **Chat hub**: WebSocket admission, per-chat broadcast groups and the
//!   message ingestion pipeline
//! - **REST API** (axum) for history, chat management and session upkeep

pub mod api;
pub mod authz;
pub mod chats;
pub mod config;
pub mod error;
pub mod file_store;
pub mod gatekeeper;
pub mod gateway;
pub mod pipeline;
pub mod registry;
pub mod signing;
pub mod tokens;
pub mod ws;

pub use api::{build_router, AppState};
pub use config::ServerConfig;
pub use error::ChatError;
