//! Server configuration loaded from environment variables.
//!
//! Every setting has a default so the server can start with zero
//! configuration for local development. Missing secrets are replaced by
//! random per-process keys, which invalidates tokens and URLs on restart.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use rand::rngs::OsRng;
use rand::RngCore;

use tandem_shared::constants::{
    DEFAULT_AVATAR_URL_EXPIRY_HOURS, DEFAULT_FILE_URL_EXPIRY_HOURS, DEFAULT_HTTP_PORT,
    MAX_UPLOAD_SIZE,
};

const GENERATED_KEY_BYTES: usize = 64;

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP and WebSocket listener.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./data/tandem.db`
    pub database_path: PathBuf,

    /// Root directory of uploaded files (`<root>/<folder>/<file>`).
    /// Env: `FILE_STORAGE_PATH`
    /// Default: `./files`
    pub file_storage_path: PathBuf,

    /// Externally visible base URL used when building signed file URLs.
    /// Env: `PUBLIC_BASE_URL`
    /// Default: `http://localhost:8080`
    pub public_base_url: String,

    /// Env: `JWT_SIGNING_KEY`
    pub jwt_signing_key: Vec<u8>,

    /// Env: `JWT_ISSUER`
    pub jwt_issuer: String,

    /// Env: `JWT_AUDIENCE`
    pub jwt_audience: String,

    /// HMAC key for signed file URLs.
    /// Env: `URL_SIGNING_KEY`
    pub url_signing_key: Vec<u8>,

    /// Maximum accepted upload in bytes.
    /// Env: `MAX_UPLOAD_SIZE`
    pub max_upload_size: usize,

    /// Env: `FILE_URL_EXPIRY_HOURS`
    pub file_url_expiry_hours: i64,

    /// Env: `AVATAR_URL_EXPIRY_HOURS`
    pub avatar_url_expiry_hours: i64,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("file_storage_path", &self.file_storage_path)
            .field("public_base_url", &self.public_base_url)
            .field("jwt_signing_key", &"<redacted>")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("jwt_audience", &self.jwt_audience)
            .field("url_signing_key", &"<redacted>")
            .field("max_upload_size", &self.max_upload_size)
            .field("file_url_expiry_hours", &self.file_url_expiry_hours)
            .field("avatar_url_expiry_hours", &self.avatar_url_expiry_hours)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./data/tandem.db"),
            file_storage_path: PathBuf::from("./files"),
            public_base_url: format!("http://localhost:{DEFAULT_HTTP_PORT}"),
            jwt_signing_key: random_key(),
            jwt_issuer: "tandem".to_string(),
            jwt_audience: "tandem-clients".to_string(),
            url_signing_key: random_key(),
            max_upload_size: MAX_UPLOAD_SIZE,
            file_url_expiry_hours: DEFAULT_FILE_URL_EXPIRY_HOURS,
            avatar_url_expiry_hours: DEFAULT_AVATAR_URL_EXPIRY_HOURS,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(path) = lookup("FILE_STORAGE_PATH") {
            config.file_storage_path = PathBuf::from(path);
        }

        if let Some(url) = lookup("PUBLIC_BASE_URL") {
            config.public_base_url = url.trim_end_matches('/').to_string();
        }

        match lookup("JWT_SIGNING_KEY").filter(|k| !k.is_empty()) {
            Some(key) => config.jwt_signing_key = key.into_bytes(),
            None => tracing::warn!("JWT_SIGNING_KEY not set, using a random key (dev-only)"),
        }

        if let Some(issuer) = lookup("JWT_ISSUER") {
            config.jwt_issuer = issuer;
        }

        if let Some(audience) = lookup("JWT_AUDIENCE") {
            config.jwt_audience = audience;
        }

        match lookup("URL_SIGNING_KEY").filter(|k| !k.is_empty()) {
            Some(key) => config.url_signing_key = key.into_bytes(),
            None => tracing::warn!("URL_SIGNING_KEY not set, using a random key (dev-only)"),
        }

        if let Some(val) = lookup("MAX_UPLOAD_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_upload_size = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_UPLOAD_SIZE, using default"),
            }
        }

        if let Some(val) = lookup("FILE_URL_EXPIRY_HOURS") {
            match val.parse::<i64>() {
                Ok(n) if n > 0 => config.file_url_expiry_hours = n,
                _ => tracing::warn!(value = %val, "Invalid FILE_URL_EXPIRY_HOURS, using default"),
            }
        }

        if let Some(val) = lookup("AVATAR_URL_EXPIRY_HOURS") {
            match val.parse::<i64>() {
                Ok(n) if n > 0 => config.avatar_url_expiry_hours = n,
                _ => tracing::warn!(value = %val, "Invalid AVATAR_URL_EXPIRY_HOURS, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn random_key() -> Vec<u8> {
    let mut key = vec![0u8; GENERATED_KEY_BYTES];
    OsRng.fill_bytes(&mut key);
    key
}
