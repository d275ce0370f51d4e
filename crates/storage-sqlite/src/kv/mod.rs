//! Namespaced key-value storage.

mod model;
mod repository;

pub use model::AppStorageEntryDB;
pub use repository::SqliteKeyValueStore;
