use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unknown file flag: {0}")]
    UnknownFileFlag(u8),

    #[error("Unknown access level: {0}")]
    UnknownAccessLevel(u8),

    #[error("Unknown block state: {0}")]
    UnknownBlockState(u8),
}
