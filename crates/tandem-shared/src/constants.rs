/// Application name
pub const APP_NAME: &str = "Tandem";

/// Path of the realtime endpoint
pub const CHAT_HUB_PATH: &str = "/chatHub";

/// Access token lifetime in seconds (1 hour)
pub const ACCESS_TOKEN_TTL_SECS: i64 = 3600;

/// Refresh token lifetime in days
pub const REFRESH_TOKEN_TTL_DAYS: i64 = 1;

/// Refresh token size in random bytes (before base64)
pub const REFRESH_TOKEN_BYTES: usize = 64;

/// Maximum message text length in characters
pub const MAX_MESSAGE_TEXT_CHARS: usize = 4000;

/// Maximum file extension length (without the dot)
pub const MAX_FILE_EXTENSION_LEN: usize = 10;

/// Folder holding user avatars
pub const AVATAR_FOLDER: &str = "avatars";

/// Extension every avatar is stored with
pub const AVATAR_EXTENSION: &str = "png";

/// Default lifetime of a signed message file URL, in hours
pub const DEFAULT_FILE_URL_EXPIRY_HOURS: i64 = 1;

/// Default lifetime of a signed avatar URL, in hours
pub const DEFAULT_AVATAR_URL_EXPIRY_HOURS: i64 = 24;

/// Default number of messages returned by a history read
pub const HISTORY_PAGE_SIZE: u32 = 50;

/// Default number of photos returned by a chat photo listing
pub const PHOTO_PAGE_SIZE: u32 = 10;

/// Largest page a history or photo listing will return
pub const MAX_PAGE_SIZE: u32 = 100;

/// Maximum upload size in bytes (50 MiB)
pub const MAX_UPLOAD_SIZE: usize = 50 * 1024 * 1024;

/// Outbound queue capacity per realtime connection
pub const CONNECTION_QUEUE_CAPACITY: usize = 256;

/// Default HTTP port
pub const DEFAULT_HTTP_PORT: u16 = 8080;
