//! Fakes shared by the sync crate's unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use stylist_core::balance::{BalanceEvent, BalanceEventSink};
use stylist_core::storage::KeyValueStore;
use stylist_core::transport::{
    AnonymousUser, BalanceSyncRequest, BalanceTransport, DeviceInfo, DeviceUser,
    IdentityTransport, LinkHostIdentityRequest, TransportError,
};

/// 2026-01-15T00:00:00Z
pub const T0: i64 = 1_768_435_200_000;
pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Store whose every operation fails.
pub struct BrokenStore;

impl KeyValueStore for BrokenStore {
    fn get(&self, _key: &str) -> stylist_core::Result<Option<String>> {
        Err(stylist_core::Error::storage("disk gone"))
    }

    fn set(&self, _key: &str, _value: &str) -> stylist_core::Result<()> {
        Err(stylist_core::Error::storage("disk gone"))
    }

    fn remove(&self, _key: &str) -> stylist_core::Result<()> {
        Err(stylist_core::Error::storage("disk gone"))
    }

    fn keys_with_prefix(&self, _prefix: &str) -> stylist_core::Result<Vec<String>> {
        Err(stylist_core::Error::storage("disk gone"))
    }
}

fn unreachable() -> TransportError {
    TransportError::network("connection refused")
}

pub struct FakeIdentityTransport {
    pub device_user: Mutex<Result<Option<DeviceUser>, TransportError>>,
    pub anonymous_user: Mutex<Result<AnonymousUser, TransportError>>,
    pub link_result: Mutex<Result<bool, TransportError>>,
    pub usernames: Mutex<HashMap<String, i64>>,
    pub calls: Mutex<Vec<String>>,
    pub link_requests: Mutex<Vec<LinkHostIdentityRequest>>,
    device_lookup_hangs: AtomicBool,
}

impl FakeIdentityTransport {
    /// Every call fails with a network error.
    pub fn unreachable() -> Self {
        Self {
            device_user: Mutex::new(Err(unreachable())),
            anonymous_user: Mutex::new(Err(unreachable())),
            link_result: Mutex::new(Err(unreachable())),
            usernames: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            link_requests: Mutex::new(Vec::new()),
            device_lookup_hangs: AtomicBool::new(false),
        }
    }

    pub fn with_device_user(self, user: Option<DeviceUser>) -> Self {
        *self.device_user.lock().unwrap() = Ok(user);
        self
    }

    /// Device lookup never answers.
    pub fn with_hanging_device_lookup(self) -> Self {
        self.device_lookup_hangs.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_anonymous_user(self, user_id: i64) -> Self {
        *self.anonymous_user.lock().unwrap() = Ok(AnonymousUser {
            user_id,
            is_existing: false,
        });
        self
    }

    pub fn with_link_result(self, linked: bool) -> Self {
        *self.link_result.lock().unwrap() = Ok(linked);
        self
    }

    pub fn with_username(self, username: &str, user_id: i64) -> Self {
        self.usernames
            .lock()
            .unwrap()
            .insert(username.to_string(), user_id);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.calls().iter().filter(|call| call.as_str() == name).count()
    }

    fn record(&self, name: &str) {
        self.calls.lock().unwrap().push(name.to_string());
    }
}

#[async_trait]
impl IdentityTransport for FakeIdentityTransport {
    async fn find_user_by_device(
        &self,
        _fingerprint: &str,
    ) -> Result<Option<DeviceUser>, TransportError> {
        self.record("find_user_by_device");
        if self.device_lookup_hangs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.device_user.lock().unwrap().clone()
    }

    async fn create_anonymous_user(
        &self,
        _fingerprint: &str,
        _device_info: &DeviceInfo,
    ) -> Result<AnonymousUser, TransportError> {
        self.record("create_anonymous_user");
        tokio::task::yield_now().await;
        self.anonymous_user.lock().unwrap().clone()
    }

    async fn link_host_identity(
        &self,
        request: &LinkHostIdentityRequest,
    ) -> Result<bool, TransportError> {
        self.record("link_host_identity");
        self.link_requests.lock().unwrap().push(request.clone());
        self.link_result.lock().unwrap().clone()
    }

    async fn resolve_username(&self, username: &str) -> Result<Option<i64>, TransportError> {
        self.record("resolve_username");
        Ok(self.usernames.lock().unwrap().get(username).copied())
    }
}

/// Scripted reply for one balance call.
pub enum BalanceReply {
    Value(u64),
    Fail(TransportError),
    /// Wait for the gate to be notified, then reply.
    Gated(Arc<Notify>, Result<u64, TransportError>),
}

#[derive(Default)]
pub struct FakeBalanceTransport {
    fetch_replies: Mutex<VecDeque<BalanceReply>>,
    sync_replies: Mutex<VecDeque<BalanceReply>>,
    fetch_calls: AtomicUsize,
    sync_calls: AtomicUsize,
    fetched_users: Mutex<Vec<i64>>,
}

impl FakeBalanceTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_fetch(&self, reply: BalanceReply) -> &Self {
        self.fetch_replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn push_sync(&self, reply: BalanceReply) -> &Self {
        self.sync_replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn sync_calls(&self) -> usize {
        self.sync_calls.load(Ordering::SeqCst)
    }

    pub fn fetched_users(&self) -> Vec<i64> {
        self.fetched_users.lock().unwrap().clone()
    }

    async fn answer(reply: Option<BalanceReply>) -> Result<u64, TransportError> {
        match reply {
            None => Err(unreachable()),
            Some(BalanceReply::Value(balance)) => Ok(balance),
            Some(BalanceReply::Fail(err)) => Err(err),
            Some(BalanceReply::Gated(gate, result)) => {
                gate.notified().await;
                result
            }
        }
    }
}

#[async_trait]
impl BalanceTransport for FakeBalanceTransport {
    async fn fetch_balance(&self, user_id: i64) -> Result<u64, TransportError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.fetched_users.lock().unwrap().push(user_id);
        let reply = self.fetch_replies.lock().unwrap().pop_front();
        Self::answer(reply).await
    }

    async fn sync_balance(
        &self,
        _user_id: i64,
        _request: BalanceSyncRequest,
    ) -> Result<u64, TransportError> {
        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.sync_replies.lock().unwrap().pop_front();
        Self::answer(reply).await
    }
}

/// Sink that keeps every event it receives.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<BalanceEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<BalanceEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl BalanceEventSink for RecordingSink {
    fn on_event(&self, event: &BalanceEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
