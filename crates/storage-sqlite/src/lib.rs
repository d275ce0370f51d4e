//! SQLite-backed persistence for the stylist client.

pub mod db;
pub mod errors;
pub mod kv;
pub mod schema;

pub use errors::StorageError;
pub use kv::SqliteKeyValueStore;
