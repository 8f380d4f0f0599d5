//! # tandem-shared
//!
//! Types shared between the Tandem store and server crates: identifier
//! newtypes, the fixed file/access/block enumerations, the realtime wire
//! protocol, and the tick-based timestamps used by signed file URLs.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod ticks;
pub mod types;

pub use error::ProtocolError;
