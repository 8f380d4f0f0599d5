//! # tandem-store
//!
//! Durable storage for Tandem, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for users, chats,
//! messages and file access entries. Async callers go through
//! [`StoreHandle`], which serializes access and runs every call on the
//! blocking thread pool.

pub mod access;
pub mod chats;
pub mod database;
pub mod handle;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

mod convert;
mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use handle::StoreHandle;
pub use models::*;
