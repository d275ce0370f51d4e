//! In-memory and persisted balance cache, one record per identity.

use log::{debug, warn};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use stylist_core::balance::BalanceRecord;
use stylist_core::clock::Clock;
use stylist_core::storage::{balance_key, get_json, set_json, KeyValueStore, BALANCE_KEY_PREFIX};

pub struct BalanceCache {
    records: RwLock<HashMap<i64, BalanceRecord>>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl BalanceCache {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            store,
            clock,
        }
    }

    /// Cached record for `user_id`.
    ///
    /// A record restored from persistent storage is reported with
    /// `synced = false` until this process confirms it with the server.
    pub fn get(&self, user_id: i64) -> Option<BalanceRecord> {
        if let Ok(records) = self.records.read() {
            if let Some(record) = records.get(&user_id) {
                return Some(record.clone());
            }
        }

        let restored = match get_json::<BalanceRecord>(self.store.as_ref(), &balance_key(user_id)) {
            Ok(Some(record)) if record.user_id == user_id => record,
            Ok(Some(record)) => {
                warn!(
                    "[BalanceCache] Stored record for {} carries user {}; ignoring",
                    user_id, record.user_id
                );
                return None;
            }
            Ok(None) => return None,
            Err(err) => {
                warn!("[BalanceCache] Failed to read balance for {}: {}", user_id, err);
                return None;
            }
        };

        let restored = BalanceRecord {
            synced: false,
            ..restored
        };
        debug!(
            "[BalanceCache] Restored balance {} for user {}",
            restored.balance, user_id
        );
        if let Ok(mut records) = self.records.write() {
            records
                .entry(user_id)
                .or_insert_with(|| restored.clone());
        }
        Some(restored)
    }

    /// Store an authoritative balance stamped with the current time.
    pub fn put(&self, user_id: i64, balance: u64) -> BalanceRecord {
        let record = BalanceRecord {
            user_id,
            balance,
            timestamp: self.clock.now_millis(),
            synced: true,
        };

        if let Ok(mut records) = self.records.write() {
            records.insert(user_id, record.clone());
        }
        if let Err(err) = set_json(self.store.as_ref(), &balance_key(user_id), &record) {
            warn!(
                "[BalanceCache] Failed to persist balance for {}: {}",
                user_id, err
            );
        }
        record
    }

    pub fn is_fresh(&self, record: &BalanceRecord, max_age: Duration) -> bool {
        record.is_fresh_at(self.clock.now_millis(), max_age)
    }

    /// Drop one identity's record, or every record when `user_id` is `None`.
    pub fn clear(&self, user_id: Option<i64>) {
        let keys = match user_id {
            Some(id) => vec![balance_key(id)],
            None => match self.store.keys_with_prefix(BALANCE_KEY_PREFIX) {
                Ok(keys) => keys,
                Err(err) => {
                    warn!("[BalanceCache] Failed to list stored balances: {}", err);
                    Vec::new()
                }
            },
        };

        if let Ok(mut records) = self.records.write() {
            match user_id {
                Some(id) => {
                    records.remove(&id);
                }
                None => records.clear(),
            }
        }
        for key in keys {
            if let Err(err) = self.store.remove(&key) {
                warn!("[BalanceCache] Failed to remove {}: {}", key, err);
            }
        }
    }
}
