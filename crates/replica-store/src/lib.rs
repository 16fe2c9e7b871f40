//! # replica-store
//!
//! Persistent replica of the chat state, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] that wraps a
//! `rusqlite::Connection` and provides typed upsert/query/delete helpers for
//! every domain model, plus [`StoreHandle`], which moves a `Database` onto a
//! dedicated worker thread and feeds it an ordered, fire-and-forget command
//! queue. Writes are grouped into short transactions (see [`batch`]) and
//! message bodies pass through a pluggable [`MessageEncryptor`].

pub mod batch;
pub mod chats;
pub mod contacts;
pub mod database;
pub mod dialogs;
pub mod encryptor;
pub mod media;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod replay;
pub mod settings;
pub mod users;
pub mod worker;

mod error;

pub use database::{Database, StoreOptions};
pub use encryptor::{MessageEncryptor, PlainEncryptor, SealingEncryptor};
pub use error::{Result, StoreError};
pub use models::*;
pub use replay::StoreEvent;
pub use worker::{StoreCommand, StoreHandle, StoreQuery};
