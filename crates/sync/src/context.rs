//! Per-launch service container.

use log::info;
use serde::Serialize;
use std::sync::Arc;

use stylist_api_client::StylistApiClient;
use stylist_core::balance::{BalanceEventSink, BalanceRecord};
use stylist_core::clock::{Clock, SystemClock};
use stylist_core::identity::{HostPlatformUser, Identity, SessionRecord};
use stylist_core::storage::KeyValueStore;
use stylist_core::transport::{BalanceTransport, IdentityTransport};
use stylist_storage_sqlite::SqliteKeyValueStore;

use crate::balance_cache::BalanceCache;
use crate::balance_sync_engine::{BalanceSyncEngine, SubscriptionId, SyncStatus};
use crate::config::SyncConfig;
use crate::identity_resolver::IdentityResolver;
use crate::launch::LaunchContext;
use crate::scheduler::{BalanceScheduler, SyncTrigger};
use crate::session_store::SessionStore;

/// Serializable snapshot for support screens and logs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsReport {
    pub identity: Option<Identity>,
    pub session: Option<SessionRecord>,
    pub session_valid: bool,
    pub device_fingerprint: Option<String>,
    pub cached_balance: Option<BalanceRecord>,
    pub sync_status: SyncStatus,
    pub online: bool,
    pub visible: bool,
    pub background_polling: bool,
    pub api_base_url: String,
}

pub struct AppContext {
    config: SyncConfig,
    session_store: Arc<SessionStore>,
    balance_cache: Arc<BalanceCache>,
    identity_resolver: Arc<IdentityResolver>,
    balance_engine: BalanceSyncEngine,
    scheduler: Arc<BalanceScheduler>,
}

impl AppContext {
    /// Wire services over the given storage, transports and clock.
    pub fn build(
        config: SyncConfig,
        launch: LaunchContext,
        store: Arc<dyn KeyValueStore>,
        identity_transport: Arc<dyn IdentityTransport>,
        balance_transport: Arc<dyn BalanceTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let session_store = Arc::new(SessionStore::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            config.session_max_age,
        ));
        let balance_cache = Arc::new(BalanceCache::new(store, Arc::clone(&clock)));
        let identity_resolver = Arc::new(IdentityResolver::new(
            &config,
            launch,
            Arc::clone(&session_store),
            identity_transport,
            Arc::clone(&clock),
        ));
        let balance_engine = BalanceSyncEngine::new(
            &config,
            Arc::clone(&identity_resolver),
            Arc::clone(&balance_cache),
            balance_transport,
            clock,
        );
        let scheduler = Arc::new(BalanceScheduler::new(&config, balance_engine.clone()));

        Self {
            config,
            session_store,
            balance_cache,
            identity_resolver,
            balance_engine,
            scheduler,
        }
    }

    /// Production wiring: SQLite storage under `config.data_dir` and the
    /// HTTP backend at `config.api_base_url`.
    pub fn connect(config: SyncConfig, launch: LaunchContext) -> stylist_core::Result<Self> {
        let store = Arc::new(SqliteKeyValueStore::open(
            &config.data_dir,
            &config.storage_namespace,
        )?);
        let client = Arc::new(StylistApiClient::with_timeout(
            &config.api_base_url,
            config.request_timeout,
        ));
        info!(
            "[Config] Connected storage at {} and backend {}",
            config.data_dir, config.api_base_url
        );
        Ok(Self::build(
            config,
            launch,
            store,
            client.clone(),
            client,
            Arc::new(SystemClock),
        ))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn identity_resolver(&self) -> Arc<IdentityResolver> {
        Arc::clone(&self.identity_resolver)
    }

    pub fn balance_engine(&self) -> BalanceSyncEngine {
        self.balance_engine.clone()
    }

    pub fn scheduler(&self) -> Arc<BalanceScheduler> {
        Arc::clone(&self.scheduler)
    }

    pub fn balance_cache(&self) -> Arc<BalanceCache> {
        Arc::clone(&self.balance_cache)
    }

    /// Resolve the identity, load the first balance and start polling.
    pub async fn start(&self) -> Option<u64> {
        let identity = self.identity_resolver.resolve().await;
        info!(
            "[Config] Starting for user {} ({})",
            identity.user_id,
            identity.source.as_str()
        );
        let balance = self.scheduler.trigger(SyncTrigger::FirstAccess).await;
        self.scheduler.ensure_background_started().await;
        balance
    }

    pub async fn shutdown(&self) {
        self.scheduler.ensure_background_stopped().await;
    }

    pub fn subscribe(&self, sink: Arc<dyn BalanceEventSink>) -> SubscriptionId {
        self.balance_engine.subscribe(sink)
    }

    /// The host platform reported a signed-in user after startup.
    pub async fn handle_host_login(&self, host_user: HostPlatformUser) -> Identity {
        let previous = self
            .identity_resolver
            .current()
            .await
            .map(|identity| identity.user_id);
        let identity = self.identity_resolver.promote_to_host(host_user).await;
        self.balance_engine.on_identity_changed(previous).await;
        identity
    }

    /// Forget the session, every cached balance and the resolved identity.
    pub async fn reset(&self) {
        self.identity_resolver.reset().await;
        self.balance_cache.clear(None);
        self.balance_engine.reset();
        info!("[Config] Local identity and balance state cleared");
    }

    pub async fn diagnostics(&self) -> DiagnosticsReport {
        let identity = self.identity_resolver.current().await;
        let session = self.session_store.load();
        let session_valid = session
            .as_ref()
            .is_some_and(|record| self.session_store.is_valid(record));
        let cached_balance = identity
            .as_ref()
            .and_then(|identity| self.balance_cache.get(identity.user_id));

        DiagnosticsReport {
            identity,
            session,
            session_valid,
            device_fingerprint: self.session_store.load_fingerprint(),
            cached_balance,
            sync_status: self.balance_engine.status(),
            online: self.scheduler.is_online(),
            visible: self.scheduler.is_visible(),
            background_polling: self.scheduler.is_background_running().await,
            api_base_url: self.config.api_base_url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launch::USER_ID_PARAM;
    use crate::test_support::{BalanceReply, FakeBalanceTransport, FakeIdentityTransport, T0};
    use stylist_core::clock::ManualClock;
    use stylist_core::identity::{IdentitySource, DEFAULT_FALLBACK_USER_ID};
    use stylist_core::storage::MemoryKeyValueStore;

    fn context(
        launch: LaunchContext,
        identity: FakeIdentityTransport,
    ) -> (AppContext, Arc<FakeBalanceTransport>, Arc<MemoryKeyValueStore>) {
        let store = Arc::new(MemoryKeyValueStore::new());
        let balances = Arc::new(FakeBalanceTransport::new());
        let context = AppContext::build(
            SyncConfig::default(),
            launch,
            store.clone(),
            Arc::new(identity),
            balances.clone(),
            Arc::new(ManualClock::new(T0)),
        );
        (context, balances, store)
    }

    #[tokio::test]
    async fn start_resolves_identity_and_loads_balance() {
        let (context, balances, _store) = context(
            LaunchContext::new().with_query_param(USER_ID_PARAM, "12345"),
            FakeIdentityTransport::unreachable(),
        );
        balances.push_fetch(BalanceReply::Value(300));

        assert_eq!(context.start().await, Some(300));
        assert!(context.scheduler().is_background_running().await);

        let report = context.diagnostics().await;
        assert_eq!(report.identity.map(|i| i.user_id), Some(12345));
        assert!(report.session_valid);
        assert_eq!(report.cached_balance.map(|r| r.balance), Some(300));
        assert_eq!(report.sync_status.consecutive_failures, 0);
        assert!(report.device_fingerprint.is_some());

        context.shutdown().await;
        assert!(!context.scheduler().is_background_running().await);
    }

    #[tokio::test]
    async fn diagnostics_serialize_to_camel_case_json() {
        let (context, _balances, _store) =
            context(LaunchContext::new(), FakeIdentityTransport::unreachable());
        context.identity_resolver().resolve().await;

        let json = serde_json::to_value(context.diagnostics().await).unwrap();

        assert_eq!(json["identity"]["userId"], DEFAULT_FALLBACK_USER_ID);
        assert_eq!(json["identity"]["source"], "fallback");
        assert_eq!(json["syncStatus"]["inFlight"], false);
        assert!(json["cachedBalance"].is_null());
    }

    #[tokio::test]
    async fn host_login_switches_identity_and_refetches() {
        let (context, balances, _store) = context(
            LaunchContext::new(),
            FakeIdentityTransport::unreachable()
                .with_device_user(None)
                .with_anonymous_user(1001)
                .with_link_result(true),
        );
        balances
            .push_fetch(BalanceReply::Value(5))
            .push_fetch(BalanceReply::Value(70));
        context.balance_engine().get_balance(false).await;

        let identity = context
            .handle_host_login(HostPlatformUser {
                id: 4242,
                username: Some("anna".to_string()),
                first_name: None,
                last_name: None,
                language_code: None,
            })
            .await;

        assert_eq!(identity.source, IdentitySource::HostPlatform);
        assert_eq!(balances.fetched_users(), vec![1001, 4242]);
        assert_eq!(context.balance_engine().cached_balance().await, Some(70));
    }

    #[tokio::test]
    async fn reset_clears_session_balances_and_identity() {
        let (context, balances, store) = context(
            LaunchContext::new().with_query_param(USER_ID_PARAM, "12345"),
            FakeIdentityTransport::unreachable(),
        );
        balances.push_fetch(BalanceReply::Value(300));
        context.balance_engine().get_balance(false).await;

        context.reset().await;

        let report = context.diagnostics().await;
        assert!(report.identity.is_none());
        assert!(report.session.is_none());
        assert!(store
            .keys_with_prefix(stylist_core::storage::BALANCE_KEY_PREFIX)
            .unwrap()
            .is_empty());
        assert!(context.balance_cache().get(12345).is_none());
    }

    #[tokio::test]
    async fn connect_with_unreachable_backend_degrades_gracefully() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SyncConfig::default();
        config.data_dir = dir.path().to_string_lossy().to_string();
        config.api_base_url = "http://127.0.0.1:9/api".to_string();
        config.retry.max_attempts = 1;

        let context = AppContext::connect(config, LaunchContext::new()).unwrap();
        let identity = context.identity_resolver().resolve().await;

        assert_eq!(identity.source, IdentitySource::Fallback);
        assert_eq!(context.balance_engine().get_balance(false).await, None);
        assert!(dir.path().join("stylist.db").exists());
    }
}
