use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProtocolError;

// Identifiers are UUIDs on the wire and in the store.
macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }
    };
}

uuid_id!(UserId);
uuid_id!(ChatId);
uuid_id!(MessageId);
uuid_id!(ConnectionId);

// ---------------------------------------------------------------------------
// File category
// ---------------------------------------------------------------------------

/// Category of the file attached to a message.
///
/// The numeric values are part of the wire format and of the stored rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum FileFlag {
    #[default]
    None = 0,
    Audio = 1,
    Image = 2,
    Other = 3,
}

impl FileFlag {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::None),
            1 => Some(Self::Audio),
            2 => Some(Self::Image),
            3 => Some(Self::Other),
            _ => None,
        }
    }

    /// Storage folder for this category; `None` carries no file.
    pub fn folder(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Audio => Some("sounds"),
            Self::Image => Some("images"),
            Self::Other => Some("rest"),
        }
    }
}

impl TryFrom<u8> for FileFlag {
    type Error = ProtocolError;

    fn try_from(b: u8) -> Result<Self, Self::Error> {
        Self::from_byte(b).ok_or(ProtocolError::UnknownFileFlag(b))
    }
}

impl From<FileFlag> for u8 {
    fn from(flag: FileFlag) -> u8 {
        flag as u8
    }
}

// ---------------------------------------------------------------------------
// Access level
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum AccessLevel {
    Read = 0,
    Write = 1,
    Full = 2,
}

impl AccessLevel {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Read),
            1 => Some(Self::Write),
            2 => Some(Self::Full),
            _ => None,
        }
    }
}

impl TryFrom<u8> for AccessLevel {
    type Error = ProtocolError;

    fn try_from(b: u8) -> Result<Self, Self::Error> {
        Self::from_byte(b).ok_or(ProtocolError::UnknownAccessLevel(b))
    }
}

impl From<AccessLevel> for u8 {
    fn from(level: AccessLevel) -> u8 {
        level as u8
    }
}

// ---------------------------------------------------------------------------
// Block state
// ---------------------------------------------------------------------------

/// Which side of a chat an action comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Participant {
    First,
    Second,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum BlockState {
    #[default]
    None = 0,
    FirstBlockedSecond = 1,
    SecondBlockedFirst = 2,
    Both = 3,
}

impl BlockState {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::None),
            1 => Some(Self::FirstBlockedSecond),
            2 => Some(Self::SecondBlockedFirst),
            3 => Some(Self::Both),
            _ => None,
        }
    }

    /// State after `by` blocks the other participant. Re-blocking is a no-op.
    pub fn block_by(self, by: Participant) -> Self {
        match (self, by) {
            (Self::None, Participant::First) => Self::FirstBlockedSecond,
            (Self::None, Participant::Second) => Self::SecondBlockedFirst,
            (Self::SecondBlockedFirst, Participant::First) => Self::Both,
            (Self::FirstBlockedSecond, Participant::Second) => Self::Both,
            (state, _) => state,
        }
    }

    pub fn is_blocked(self) -> bool {
        self != Self::None
    }
}

impl TryFrom<u8> for BlockState {
    type Error = ProtocolError;

    fn try_from(b: u8) -> Result<Self, Self::Error> {
        Self::from_byte(b).ok_or(ProtocolError::UnknownBlockState(b))
    }
}

impl From<BlockState> for u8 {
    fn from(state: BlockState) -> u8 {
        state as u8
    }
}
