//! Persisted session record and device fingerprint.

use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

use stylist_core::clock::Clock;
use stylist_core::identity::SessionRecord;
use stylist_core::storage::{
    get_json, set_json, KeyValueStore, DEVICE_FINGERPRINT_KEY, SESSION_RECORD_KEY,
};

pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    max_age: Duration,
}

impl SessionStore {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, max_age: Duration) -> Self {
        Self {
            store,
            clock,
            max_age,
        }
    }

    /// Stored record, or `None` when missing, unreadable or corrupt.
    pub fn load(&self) -> Option<SessionRecord> {
        match get_json::<SessionRecord>(self.store.as_ref(), SESSION_RECORD_KEY) {
            Ok(record) => record,
            Err(err) => {
                warn!("[Session] Ignoring unreadable session record: {}", err);
                None
            }
        }
    }

    /// Stored record only if it passes [`Self::is_valid`].
    pub fn load_valid(&self) -> Option<SessionRecord> {
        let record = self.load()?;
        if self.is_valid(&record) {
            Some(record)
        } else {
            debug!(
                "[Session] Stored session for user {} is no longer valid",
                record.user_id
            );
            None
        }
    }

    pub fn is_valid(&self, record: &SessionRecord) -> bool {
        record.is_valid_at(self.clock.now_millis(), self.max_age)
    }

    /// Persist `record`. A fallback-sourced record never replaces a stored
    /// record from a stronger source. Returns whether the record was written.
    pub fn save(&self, record: &SessionRecord) -> bool {
        if record.source.is_fallback() {
            if let Some(existing) = self.load() {
                if !existing.source.is_fallback() {
                    debug!(
                        "[Session] Keeping {} session for user {} over fallback",
                        existing.source.as_str(),
                        existing.user_id
                    );
                    return false;
                }
            }
        }

        match set_json(self.store.as_ref(), SESSION_RECORD_KEY, record) {
            Ok(()) => {
                debug!(
                    "[Session] Saved session user={} source={}",
                    record.user_id,
                    record.source.as_str()
                );
                true
            }
            Err(err) => {
                warn!("[Session] Failed to save session record: {}", err);
                false
            }
        }
    }

    pub fn clear(&self) {
        if let Err(err) = self.store.remove(SESSION_RECORD_KEY) {
            warn!("[Session] Failed to clear session record: {}", err);
        }
    }

    pub fn load_fingerprint(&self) -> Option<String> {
        match self.store.get(DEVICE_FINGERPRINT_KEY) {
            Ok(value) => value.filter(|fp| !fp.trim().is_empty()),
            Err(err) => {
                warn!("[Session] Failed to read device fingerprint: {}", err);
                None
            }
        }
    }

    pub fn save_fingerprint(&self, fingerprint: &str) {
        if let Err(err) = self.store.set(DEVICE_FINGERPRINT_KEY, fingerprint) {
            warn!("[Session] Failed to persist device fingerprint: {}", err);
        }
    }
}
