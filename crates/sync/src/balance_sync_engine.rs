//! Balance synchronization engine.
//!
//! Owns the read path (`get_balance`), the manual refresh (`force_sync`),
//! periodic polling and push application. At most one remote sync per
//! identity is in flight: concurrent callers join it for up to
//! `sync_wait_timeout`, after which a new sync supersedes it. A completion
//! that was initiated before an already-applied one is discarded.

use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use stylist_core::balance::{
    BalanceChange, BalanceEvent, BalanceEventSink, BalanceSyncSource, SyncFailure,
};
use stylist_core::clock::Clock;
use stylist_core::sync::{RetryPolicy, SyncRetryClass};
use stylist_core::transport::{BalanceSyncRequest, BalanceTransport, TransportError};

use crate::balance_cache::BalanceCache;
use crate::config::SyncConfig;
use crate::conflict::{is_stale, offline_fallback, resolve_remote, SyncTicket};
use crate::identity_resolver::IdentityResolver;

pub type SubscriptionId = u64;

type SharedSync = Shared<BoxFuture<'static, Option<u64>>>;

/// Engine health snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub last_success_at: Option<i64>,
    pub last_source: Option<BalanceSyncSource>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub in_flight: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncMode {
    /// `GET` the stored balance.
    Fetch,
    /// Ask the server to recompute; falls back to `Fetch` on permanent errors.
    ForceRefresh,
}

struct InFlightSync {
    ticket: SyncTicket,
    future: SharedSync,
}

enum Slot {
    Join(SharedSync),
    Lead(SharedSync),
}

#[derive(Clone)]
pub struct BalanceSyncEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    identity: Arc<IdentityResolver>,
    cache: Arc<BalanceCache>,
    transport: Arc<dyn BalanceTransport>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    freshness: Duration,
    request_timeout: Duration,
    sync_wait_timeout: Duration,
    subscribers: RwLock<Vec<(SubscriptionId, Arc<dyn BalanceEventSink>)>>,
    next_subscription: AtomicU64,
    next_seq: AtomicU64,
    in_flight: Mutex<HashMap<i64, InFlightSync>>,
    last_applied: Mutex<HashMap<i64, SyncTicket>>,
    status: Mutex<SyncStatus>,
}

impl BalanceSyncEngine {
    pub fn new(
        config: &SyncConfig,
        identity: Arc<IdentityResolver>,
        cache: Arc<BalanceCache>,
        transport: Arc<dyn BalanceTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                identity,
                cache,
                transport,
                clock,
                retry: config.retry,
                freshness: config.balance_freshness,
                request_timeout: config.request_timeout,
                sync_wait_timeout: config.sync_wait_timeout,
                subscribers: RwLock::new(Vec::new()),
                next_subscription: AtomicU64::new(1),
                next_seq: AtomicU64::new(1),
                in_flight: Mutex::new(HashMap::new()),
                last_applied: Mutex::new(HashMap::new()),
                status: Mutex::new(SyncStatus::default()),
            }),
        }
    }

    /// Balance for the current identity.
    ///
    /// A fresh cached value is returned without network access unless
    /// `force_refresh` is set. When the server cannot be reached the last
    /// cached value is returned, or `None` when nothing was ever cached.
    pub async fn get_balance(&self, force_refresh: bool) -> Option<u64> {
        let identity = self.inner.identity.resolve().await;
        let cached = self.inner.cache.get(identity.user_id);

        if !force_refresh {
            if let Some(record) = cached.as_ref() {
                if record.synced && self.inner.cache.is_fresh(record, self.inner.freshness) {
                    debug!(
                        "[BalanceSync] Serving fresh cached balance for user {}",
                        identity.user_id
                    );
                    return Some(record.balance);
                }
            }
        }

        let source = if cached.is_none() {
            BalanceSyncSource::Initial
        } else {
            BalanceSyncSource::Polling
        };
        self.run_or_join(identity.user_id, SyncMode::Fetch, source)
            .await
    }

    /// User-initiated refresh: asks the server to recompute the balance.
    pub async fn force_sync(&self) -> Option<u64> {
        let identity = self.inner.identity.resolve().await;
        info!("[BalanceSync] Forced sync for user {}", identity.user_id);
        self.run_or_join(
            identity.user_id,
            SyncMode::ForceRefresh,
            BalanceSyncSource::Forced,
        )
        .await
    }

    /// Periodic fetch, ignoring cache freshness.
    pub async fn poll(&self) -> Option<u64> {
        let identity = self.inner.identity.resolve().await;
        self.run_or_join(identity.user_id, SyncMode::Fetch, BalanceSyncSource::Polling)
            .await
    }

    /// Apply a server-pushed balance for the current identity. A push
    /// addressed to another identity is ignored.
    pub async fn apply_push(&self, user_id: Option<i64>, balance: u64) -> Option<u64> {
        let identity = self.inner.identity.resolve().await;
        if let Some(target) = user_id {
            if target != identity.user_id {
                debug!(
                    "[BalanceSync] Ignoring push for user {} (current user {})",
                    target, identity.user_id
                );
                return None;
            }
        }

        let ticket = self.inner.next_ticket();
        Some(
            self.inner
                .apply_remote(identity.user_id, balance, BalanceSyncSource::Push, ticket),
        )
    }

    /// Last cached balance without any network access.
    pub async fn cached_balance(&self) -> Option<u64> {
        let identity = self.inner.identity.resolve().await;
        offline_fallback(self.inner.cache.get(identity.user_id).as_ref())
    }

    /// Called after the effective identity changed. Balances are never
    /// carried across identities; the new identity is fetched from scratch.
    pub async fn on_identity_changed(&self, previous_user_id: Option<i64>) -> Option<u64> {
        let identity = self.inner.identity.resolve().await;
        if previous_user_id == Some(identity.user_id) {
            return self.cached_balance().await;
        }
        info!(
            "[BalanceSync] Identity changed {:?} -> {}; fetching balance",
            previous_user_id, identity.user_id
        );
        self.run_or_join(
            identity.user_id,
            SyncMode::Fetch,
            BalanceSyncSource::Initial,
        )
        .await
    }

    pub fn subscribe(&self, sink: Arc<dyn BalanceEventSink>) -> SubscriptionId {
        let id = self.inner.next_subscription.fetch_add(1, Ordering::SeqCst);
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, sink));
        id
    }

    /// Returns whether the subscription existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }

    pub fn status(&self) -> SyncStatus {
        let mut status = self
            .inner
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        status.in_flight = !self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty();
        status
    }

    /// Drop ordering state and health counters. Cached balances are owned
    /// by [`BalanceCache`] and cleared separately.
    pub fn reset(&self) {
        self.inner
            .last_applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        *self
            .inner
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = SyncStatus::default();
    }

    async fn run_or_join(
        &self,
        user_id: i64,
        mode: SyncMode,
        source: BalanceSyncSource,
    ) -> Option<u64> {
        let shared = match self.claim_slot(user_id, mode, source, false) {
            Slot::Lead(future) => future,
            Slot::Join(future) => {
                debug!("[BalanceSync] Joining in-flight sync for user {}", user_id);
                match tokio::time::timeout(self.inner.sync_wait_timeout, future).await {
                    Ok(result) => return result,
                    Err(_) => {
                        warn!(
                            "[BalanceSync] In-flight sync for user {} exceeded {:?}; starting a new one",
                            user_id, self.inner.sync_wait_timeout
                        );
                        match self.claim_slot(user_id, mode, source, true) {
                            Slot::Lead(future) | Slot::Join(future) => future,
                        }
                    }
                }
            }
        };
        shared.await
    }

    /// Join the current in-flight sync for `user_id`, or register a new one.
    fn claim_slot(
        &self,
        user_id: i64,
        mode: SyncMode,
        source: BalanceSyncSource,
        supersede: bool,
    ) -> Slot {
        let mut in_flight = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if !supersede {
            if let Some(existing) = in_flight.get(&user_id) {
                return Slot::Join(existing.future.clone());
            }
        }

        let ticket = self.inner.next_ticket();
        let inner = Arc::clone(&self.inner);
        let future = async move {
            let result = inner.execute(user_id, mode, source, ticket).await;
            inner.release_slot(user_id, ticket);
            result
        }
        .boxed()
        .shared();

        in_flight.insert(
            user_id,
            InFlightSync {
                ticket,
                future: future.clone(),
            },
        );
        Slot::Lead(future)
    }
}

impl EngineInner {
    fn next_ticket(&self) -> SyncTicket {
        SyncTicket {
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
        }
    }

    fn release_slot(&self, user_id: i64, ticket: SyncTicket) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight.get(&user_id).map(|slot| slot.ticket) == Some(ticket) {
            in_flight.remove(&user_id);
        }
    }

    async fn execute(
        &self,
        user_id: i64,
        mode: SyncMode,
        source: BalanceSyncSource,
        ticket: SyncTicket,
    ) -> Option<u64> {
        let mut mode = mode;
        let mut source = source;
        let mut attempt: u32 = 0;

        let failure = loop {
            attempt += 1;
            let err = match self.call_remote(user_id, mode).await {
                Ok(balance) => {
                    return Some(self.apply_remote(user_id, balance, source, ticket));
                }
                Err(err) => err,
            };

            let class = err.retry_class();
            if mode == SyncMode::ForceRefresh && class == SyncRetryClass::Permanent {
                warn!(
                    "[BalanceSync] Balance sync endpoint rejected request for user {} ({}); using balance fetch",
                    user_id, err
                );
                mode = SyncMode::Fetch;
                source = BalanceSyncSource::LegacyFallback;
                continue;
            }

            if class == SyncRetryClass::Retryable && self.retry.allows_retry_after(attempt) {
                let delay = self.retry.backoff(attempt);
                debug!(
                    "[BalanceSync] Attempt {} for user {} failed ({}); retrying in {:?}",
                    attempt, user_id, err, delay
                );
                self.clock.sleep(delay).await;
                continue;
            }

            break err;
        };

        if self.is_superseded(user_id, ticket) {
            debug!(
                "[BalanceSync] Superseded sync for user {} failed ({}); a newer result is already applied",
                user_id, failure
            );
            return offline_fallback(self.cache.get(user_id).as_ref());
        }
        self.record_failure(user_id, source, &failure, attempt)
    }

    fn is_superseded(&self, user_id: i64, ticket: SyncTicket) -> bool {
        let last_applied = self
            .last_applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        is_stale(ticket, last_applied.get(&user_id).copied())
    }

    async fn call_remote(&self, user_id: i64, mode: SyncMode) -> Result<u64, TransportError> {
        let request = async {
            match mode {
                SyncMode::Fetch => self.transport.fetch_balance(user_id).await,
                SyncMode::ForceRefresh => {
                    self.transport
                        .sync_balance(
                            user_id,
                            BalanceSyncRequest {
                                force_refresh: true,
                                clear_cache: false,
                            },
                        )
                        .await
                }
            }
        };
        match tokio::time::timeout(self.request_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    /// Write an authoritative value unless a later-initiated sync already
    /// applied one. Returns the balance now cached.
    fn apply_remote(
        &self,
        user_id: i64,
        balance: u64,
        source: BalanceSyncSource,
        ticket: SyncTicket,
    ) -> u64 {
        let change = {
            let mut last_applied = self
                .last_applied
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if is_stale(ticket, last_applied.get(&user_id).copied()) {
                let current = self.cache.get(user_id).map(|record| record.balance);
                warn!(
                    "[BalanceSync] Discarding stale {:?} result {} for user {} (cached {:?})",
                    source, balance, user_id, current
                );
                return current.unwrap_or(balance);
            }
            last_applied.insert(user_id, ticket);

            let previous = self.cache.get(user_id);
            let resolution = resolve_remote(previous.as_ref(), balance);
            let record = self.cache.put(user_id, balance);
            resolution.should_notify().then(|| BalanceChange {
                user_id,
                old_balance: resolution.old_balance(),
                new_balance: resolution.balance(),
                source,
                timestamp: record.timestamp,
            })
        };

        {
            let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
            status.last_success_at = Some(self.clock.now_millis());
            status.last_source = Some(source);
            status.last_error = None;
            status.consecutive_failures = 0;
        }

        if let Some(change) = change {
            info!(
                "[BalanceSync] Balance for user {} changed {:?} -> {} ({:?})",
                user_id, change.old_balance, change.new_balance, source
            );
            self.emit(&BalanceEvent::BalanceChanged(change));
        }
        balance
    }

    fn record_failure(
        &self,
        user_id: i64,
        source: BalanceSyncSource,
        err: &TransportError,
        attempts: u32,
    ) -> Option<u64> {
        let cached = offline_fallback(self.cache.get(user_id).as_ref());
        warn!(
            "[BalanceSync] Sync for user {} failed after {} attempt(s): {}; serving cached {:?}",
            user_id, attempts, err, cached
        );

        {
            let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
            status.last_error = Some(err.to_string());
            status.consecutive_failures = status.consecutive_failures.saturating_add(1);
        }

        self.emit(&BalanceEvent::SyncFailed(SyncFailure {
            user_id,
            source,
            error: err.to_string(),
            attempts,
            cached_balance: cached,
            timestamp: self.clock.now_millis(),
        }));
        cached
    }

    fn emit(&self, event: &BalanceEvent) {
        let sinks: Vec<Arc<dyn BalanceEventSink>> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, sink)| Arc::clone(sink))
            .collect();
        for sink in sinks {
            sink.on_event(event);
        }
    }
}
