//! SQLite implementation of the key-value storage port.

use chrono::Utc;
use diesel::prelude::*;
use log::debug;
use std::sync::Arc;

use stylist_core::storage::KeyValueStore;
use stylist_core::Result;

use crate::db::{self, get_connection, DbPool};
use crate::errors::StorageError;
use crate::schema::app_storage;

use super::model::AppStorageEntryDB;

/// Key-value store scoped to one namespace of the `app_storage` table.
#[derive(Clone)]
pub struct SqliteKeyValueStore {
    pool: Arc<DbPool>,
    namespace: String,
}

impl SqliteKeyValueStore {
    pub fn new(pool: Arc<DbPool>, namespace: impl Into<String>) -> Self {
        Self {
            pool,
            namespace: namespace.into(),
        }
    }

    /// Create the database under `app_data_dir`, migrate it and open a store.
    pub fn open(app_data_dir: &str, namespace: &str) -> std::result::Result<Self, StorageError> {
        let db_path = db::init(app_data_dir)?;
        db::run_migrations(&db_path)?;
        let pool = db::create_pool(&db_path)?;
        Ok(Self::new(pool, namespace))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

impl KeyValueStore for SqliteKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = get_connection(&self.pool)?;
        let value = app_storage::table
            .filter(app_storage::namespace.eq(&self.namespace))
            .filter(app_storage::key.eq(key))
            .select(app_storage::value)
            .first::<String>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = get_connection(&self.pool)?;
        let row = AppStorageEntryDB {
            namespace: self.namespace.clone(),
            key: key.to_string(),
            value: value.to_string(),
            updated_at: Utc::now().to_rfc3339(),
        };
        diesel::replace_into(app_storage::table)
            .values(&row)
            .execute(&mut conn)
            .map_err(StorageError::from)?;
        debug!("[Storage] Wrote {}/{}", self.namespace, key);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut conn = get_connection(&self.pool)?;
        diesel::delete(
            app_storage::table
                .filter(app_storage::namespace.eq(&self.namespace))
                .filter(app_storage::key.eq(key)),
        )
        .execute(&mut conn)
        .map_err(StorageError::from)?;
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = get_connection(&self.pool)?;
        // Filtered in Rust: LIKE would treat `_` in key names as a wildcard.
        let keys = app_storage::table
            .filter(app_storage::namespace.eq(&self.namespace))
            .select(app_storage::key)
            .order(app_storage::key.asc())
            .load::<String>(&mut conn)
            .map_err(StorageError::from)?;
        Ok(keys
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stylist_core::storage::{balance_key, BALANCE_KEY_PREFIX, DEVICE_FINGERPRINT_KEY};
    use tempfile::tempdir;

    fn open_store(namespace: &str) -> (tempfile::TempDir, SqliteKeyValueStore) {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().to_string_lossy().to_string();
        let store = SqliteKeyValueStore::open(&path, namespace).expect("open store");
        (dir, store)
    }

    #[test]
    fn set_get_and_overwrite() {
        let (_dir, store) = open_store("stylist");
        assert_eq!(store.get(DEVICE_FINGERPRINT_KEY).unwrap(), None);

        store.set(DEVICE_FINGERPRINT_KEY, "fp_one").unwrap();
        store.set(DEVICE_FINGERPRINT_KEY, "fp_two").unwrap();

        assert_eq!(
            store.get(DEVICE_FINGERPRINT_KEY).unwrap().as_deref(),
            Some("fp_two")
        );
    }

    #[test]
    fn namespaces_are_isolated() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().to_string_lossy().to_string();
        let first = SqliteKeyValueStore::open(&path, "first").expect("open first");
        let second = SqliteKeyValueStore::open(&path, "second").expect("open second");

        first.set("session", "a").unwrap();

        assert_eq!(first.get("session").unwrap().as_deref(), Some("a"));
        assert_eq!(second.get("session").unwrap(), None);
    }

    #[test]
    fn remove_and_prefix_listing() {
        let (_dir, store) = open_store("stylist");
        store.set(&balance_key(10), "{}").unwrap();
        store.set(&balance_key(11), "{}").unwrap();
        store.set("balance_history", "{}").unwrap();

        assert_eq!(
            store.keys_with_prefix(BALANCE_KEY_PREFIX).unwrap(),
            vec!["balance:10".to_string(), "balance:11".to_string()]
        );

        store.remove(&balance_key(10)).unwrap();
        assert_eq!(
            store.keys_with_prefix(BALANCE_KEY_PREFIX).unwrap(),
            vec!["balance:11".to_string()]
        );
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().to_string_lossy().to_string();
        {
            let store = SqliteKeyValueStore::open(&path, "stylist").expect("open");
            store.set("session", "persisted").unwrap();
        }
        let reopened = SqliteKeyValueStore::open(&path, "stylist").expect("reopen");
        assert_eq!(reopened.get("session").unwrap().as_deref(), Some("persisted"));
    }
}
