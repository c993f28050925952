//! # hearth-store
//!
//! Local persistence for the Hearth client.
//!
//! Records live in a SQLite database owned by [`Database`].  When SQLite
//! cannot be opened, or fails at runtime, the [`Storage`] façade switches to
//! the in-memory [`MemoryStore`] for the rest of the session so the
//! application keeps working without durability.
//!
//! Engines only see flat rows; the conversion to domain records happens in
//! [`codec`] at the façade boundary.

pub mod chats;
pub mod codec;
pub mod database;
pub mod documents;
pub mod files;
pub mod local_store;
pub mod memory_store;
pub mod messages;
pub mod migrations;
pub mod storage;
pub mod sync_meta;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use local_store::LocalStore;
pub use memory_store::MemoryStore;
pub use storage::{MergeOutcome, PendingChange, Storage, SyncRecord};
