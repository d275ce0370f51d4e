//! STcoin balance records and change notifications.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cached balance for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceRecord {
    pub user_id: i64,
    pub balance: u64,
    /// Milliseconds since the Unix epoch when the record was written.
    pub timestamp: i64,
    pub synced: bool,
}

impl BalanceRecord {
    pub fn is_fresh_at(&self, now_millis: i64, max_age: Duration) -> bool {
        let age = now_millis.saturating_sub(self.timestamp);
        age >= 0 && (age as u128) <= max_age.as_millis()
    }
}

/// What caused a balance change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceSyncSource {
    Initial,
    Forced,
    Polling,
    Push,
    LegacyFallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceChange {
    pub user_id: i64,
    pub old_balance: Option<u64>,
    pub new_balance: u64,
    pub source: BalanceSyncSource,
    pub timestamp: i64,
}

/// Emitted when a sync gives up after exhausting retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncFailure {
    pub user_id: i64,
    pub source: BalanceSyncSource,
    pub error: String,
    pub attempts: u32,
    /// Last known good value, `None` when nothing is cached.
    pub cached_balance: Option<u64>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum BalanceEvent {
    BalanceChanged(BalanceChange),
    SyncFailed(SyncFailure),
}

/// Receiver for balance notifications (UI projection, logging, tests).
pub trait BalanceEventSink: Send + Sync {
    fn on_event(&self, event: &BalanceEvent);
}

/// Sink that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpBalanceEventSink;

impl BalanceEventSink for NoOpBalanceEventSink {
    fn on_event(&self, _event: &BalanceEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freshness_window_is_inclusive() {
        let record = BalanceRecord {
            user_id: 1,
            balance: 77,
            timestamp: 10_000,
            synced: true,
        };
        let window = Duration::from_secs(30);
        assert!(record.is_fresh_at(10_000, window));
        assert!(record.is_fresh_at(40_000, window));
        assert!(!record.is_fresh_at(40_001, window));
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let event = BalanceEvent::BalanceChanged(BalanceChange {
            user_id: 9,
            old_balance: None,
            new_balance: 40,
            source: BalanceSyncSource::Forced,
            timestamp: 5,
        });
        let value = serde_json::to_value(&event).expect("serialize event");
        assert_eq!(value["type"], "balance_changed");
        assert_eq!(value["data"]["newBalance"], 40);
        assert_eq!(value["data"]["source"], "forced");
    }
}
