//! Runtime configuration.

use log::warn;
use std::time::Duration;

use stylist_core::identity::DEFAULT_FALLBACK_USER_ID;
use stylist_core::sync::{
    RetryPolicy, BALANCE_FRESHNESS, BALANCE_POLL_INTERVAL_SECS, BALANCE_POLL_JITTER_SECS,
    REQUEST_TIMEOUT, SESSION_MAX_AGE, SYNC_WAIT_TIMEOUT,
};

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";
const DEFAULT_STORAGE_NAMESPACE: &str = "stylist";
const DEFAULT_DATA_DIR: &str = ".stylist";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub api_base_url: String,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub poll_jitter: Duration,
    pub balance_freshness: Duration,
    pub session_max_age: Duration,
    pub sync_wait_timeout: Duration,
    pub fallback_user_id: i64,
    pub retry: RetryPolicy,
    pub storage_namespace: String,
    pub data_dir: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout: REQUEST_TIMEOUT,
            poll_interval: Duration::from_secs(BALANCE_POLL_INTERVAL_SECS),
            poll_jitter: Duration::from_secs(BALANCE_POLL_JITTER_SECS),
            balance_freshness: BALANCE_FRESHNESS,
            session_max_age: SESSION_MAX_AGE,
            sync_wait_timeout: SYNC_WAIT_TIMEOUT,
            fallback_user_id: DEFAULT_FALLBACK_USER_ID,
            retry: RetryPolicy::default(),
            storage_namespace: DEFAULT_STORAGE_NAMESPACE.to_string(),
            data_dir: DEFAULT_DATA_DIR.to_string(),
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by `STYLIST_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = non_empty(lookup("STYLIST_API_URL")) {
            config.api_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(timeout) = parse_secs(&lookup, "STYLIST_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = timeout;
        }
        if let Some(interval) = parse_secs(&lookup, "STYLIST_POLL_INTERVAL_SECS") {
            config.poll_interval = interval;
        }
        if let Some(user_id) = parse_env::<i64>(&lookup, "STYLIST_FALLBACK_USER_ID") {
            if user_id > 0 {
                config.fallback_user_id = user_id;
            } else {
                warn!("[Config] Ignoring non-positive STYLIST_FALLBACK_USER_ID={}", user_id);
            }
        }
        if let Some(dir) = non_empty(lookup("STYLIST_DATA_DIR")) {
            config.data_dir = dir;
        }

        config
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Whole seconds; zero is rejected.
fn parse_secs(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    match parse_env::<u64>(lookup, key)? {
        0 => {
            warn!("[Config] Ignoring zero {}", key);
            None
        }
        secs => Some(Duration::from_secs(secs)),
    }
}

fn parse_env<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = non_empty(lookup(key))?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("[Config] Ignoring invalid {}={}", key, raw);
            None
        }
    }
}
