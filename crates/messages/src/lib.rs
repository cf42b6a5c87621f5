//! Message persistence.
//!
//! The gateway only talks to [`MessageStore`]; two backends ship with it:
//! SQLite for real deployments and an in-memory store for tests and
//! throwaway servers.

pub mod memory;
pub mod sqlite;
pub mod store;

pub use {
    memory::InMemoryMessageStore,
    sqlite::SqliteMessageStore,
    store::{MessageStore, StoredMessage},
};
