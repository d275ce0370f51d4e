//! Effective-identity resolution.
//!
//! Sources are tried strongest first: host platform, URL parameters, the
//! stored session, the device fingerprint lookup, anonymous creation and,
//! when everything else failed, the configured fallback identity. The
//! result is cached for the lifetime of the resolver until it is
//! invalidated or promoted to a host identity.

use log::{debug, info, warn};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;

use stylist_core::clock::Clock;
use stylist_core::identity::{
    parse_user_id, HostPlatformUser, Identity, IdentitySource, PlatformInfo, SessionRecord,
};
use stylist_core::transport::{
    DeviceInfo, IdentityTransport, LinkHostIdentityRequest, TransportError,
};

use crate::config::SyncConfig;
use crate::fingerprint::DeviceFingerprintGenerator;
use crate::launch::{LaunchContext, TELEGRAM_ID_PARAM, USERNAME_PARAM, USER_ID_PARAM};
use crate::session_store::SessionStore;

pub struct IdentityResolver {
    launch: RwLock<LaunchContext>,
    session_store: Arc<SessionStore>,
    transport: Arc<dyn IdentityTransport>,
    fingerprints: DeviceFingerprintGenerator,
    clock: Arc<dyn Clock>,
    fallback_user_id: i64,
    request_timeout: Duration,
    current: Mutex<Option<Identity>>,
}

impl IdentityResolver {
    pub fn new(
        config: &SyncConfig,
        launch: LaunchContext,
        session_store: Arc<SessionStore>,
        transport: Arc<dyn IdentityTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let fingerprints = DeviceFingerprintGenerator::for_environment(launch.environment.clone());
        Self {
            launch: RwLock::new(launch),
            session_store,
            transport,
            fingerprints,
            clock,
            fallback_user_id: config.fallback_user_id,
            request_timeout: config.request_timeout,
            current: Mutex::new(None),
        }
    }

    /// Replace the fingerprint generator (tests, embedding shells with their
    /// own probes).
    pub fn with_fingerprint_generator(mut self, fingerprints: DeviceFingerprintGenerator) -> Self {
        self.fingerprints = fingerprints;
        self
    }

    /// Current effective identity. Never fails: when every source is
    /// unavailable the fallback identity is returned.
    ///
    /// Concurrent callers share a single resolution.
    pub async fn resolve(&self) -> Identity {
        let mut current = self.current.lock().await;
        if let Some(identity) = current.as_ref() {
            return identity.clone();
        }

        let identity = self.resolve_uncached().await;
        info!(
            "[Identity] Resolved user {} via {}",
            identity.user_id,
            identity.source.as_str()
        );
        *current = Some(identity.clone());
        identity
    }

    /// Cached identity without triggering resolution.
    pub async fn current(&self) -> Option<Identity> {
        self.current.lock().await.clone()
    }

    /// Forget the cached identity; the next [`Self::resolve`] starts over.
    pub async fn invalidate(&self) {
        *self.current.lock().await = None;
    }

    /// Forget the cached identity and the stored session.
    pub async fn reset(&self) {
        let mut current = self.current.lock().await;
        self.session_store.clear();
        *current = None;
        info!("[Identity] Identity state reset");
    }

    /// Switch to a host-platform identity that appeared after startup.
    ///
    /// A device-scoped identity in use is linked to the host account first.
    /// Its balance is not carried over.
    pub async fn promote_to_host(&self, host_user: HostPlatformUser) -> Identity {
        if host_user.id <= 0 {
            warn!("[Identity] Ignoring host user with invalid id {}", host_user.id);
            return self.resolve().await;
        }

        let mut current = self.current.lock().await;
        if let Some(existing) = current.as_ref() {
            if existing.source == IdentitySource::HostPlatform && existing.user_id == host_user.id {
                return existing.clone();
            }
        }

        let launch = {
            let mut launch = self.launch.write().unwrap_or_else(PoisonError::into_inner);
            launch.host_user = Some(host_user.clone());
            launch.clone()
        };

        let fingerprint = match current.as_ref() {
            Some(existing) => existing.device_fingerprint.clone(),
            None => self.fingerprint(),
        };
        let linkable = current
            .as_ref()
            .filter(|existing| existing.source.is_device_scoped())
            .map(|existing| existing.user_id)
            .or_else(|| self.stored_device_scoped_id());

        let is_linked = self.link_if_needed(linkable, &host_user).await;
        let identity = Identity {
            user_id: host_user.id,
            source: IdentitySource::HostPlatform,
            device_fingerprint: fingerprint,
            is_linked,
        };
        self.persist(&identity, &launch);

        info!(
            "[Identity] Promoted to host user {} (previous: {:?})",
            host_user.id,
            current.as_ref().map(|existing| existing.user_id)
        );
        *current = Some(identity.clone());
        identity
    }

    /// Stored fingerprint, generated and persisted on first use.
    pub fn fingerprint(&self) -> String {
        if let Some(fingerprint) = self.session_store.load_fingerprint() {
            return fingerprint;
        }
        let fingerprint = self.fingerprints.generate();
        debug!("[Identity] Generated device fingerprint {}", fingerprint);
        self.session_store.save_fingerprint(&fingerprint);
        fingerprint
    }

    pub fn device_info(&self) -> DeviceInfo {
        let launch = self.launch_snapshot();
        let environment = launch.environment;
        DeviceInfo {
            platform: environment
                .platform
                .unwrap_or_else(|| format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)),
            language: environment.language.or_else(|| {
                launch
                    .host_user
                    .as_ref()
                    .and_then(|user| user.language_code.clone())
            }),
            timezone: environment.timezone,
            screen: environment.screen,
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    fn launch_snapshot(&self) -> LaunchContext {
        self.launch
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn resolve_uncached(&self) -> Identity {
        let launch = self.launch_snapshot();
        let fingerprint = self.fingerprint();

        if let Some(identity) = self.from_host_platform(&launch, &fingerprint).await {
            self.persist(&identity, &launch);
            return identity;
        }
        if let Some(identity) = self.from_url_parameter(&launch, &fingerprint) {
            self.persist(&identity, &launch);
            return identity;
        }
        if let Some(identity) = self.from_username(&launch, &fingerprint).await {
            self.persist(&identity, &launch);
            return identity;
        }
        if let Some(identity) = self.from_session(&fingerprint) {
            return identity;
        }
        if let Some(identity) = self.from_device_lookup(&fingerprint).await {
            self.persist(&identity, &launch);
            return identity;
        }
        if let Some(identity) = self.from_anonymous_creation(&fingerprint).await {
            self.persist(&identity, &launch);
            return identity;
        }

        warn!(
            "[Identity] All identity sources failed; using fallback user {}",
            self.fallback_user_id
        );
        let identity = Identity::fallback(self.fallback_user_id, fingerprint);
        self.persist(&identity, &launch);
        identity
    }

    async fn from_host_platform(
        &self,
        launch: &LaunchContext,
        fingerprint: &str,
    ) -> Option<Identity> {
        let host_user = launch.host_user.as_ref().filter(|user| user.id > 0)?;
        let linkable = self.stored_device_scoped_id();
        let is_linked = self.link_if_needed(linkable, host_user).await;

        Some(Identity {
            user_id: host_user.id,
            source: IdentitySource::HostPlatform,
            device_fingerprint: fingerprint.to_string(),
            is_linked,
        })
    }

    fn from_url_parameter(&self, launch: &LaunchContext, fingerprint: &str) -> Option<Identity> {
        for param in [USER_ID_PARAM, TELEGRAM_ID_PARAM] {
            let Some(raw) = launch.query_param(param) else {
                continue;
            };
            match parse_user_id(raw) {
                Some(user_id) if user_id == self.fallback_user_id => {
                    warn!(
                        "[Identity] Ignoring {}={}: matches the fallback identity",
                        param, raw
                    );
                }
                Some(user_id) => {
                    return Some(Identity {
                        user_id,
                        source: IdentitySource::UrlParameter,
                        device_fingerprint: fingerprint.to_string(),
                        is_linked: false,
                    });
                }
                None => debug!("[Identity] Ignoring invalid {}={}", param, raw),
            }
        }
        None
    }

    async fn from_username(&self, launch: &LaunchContext, fingerprint: &str) -> Option<Identity> {
        let username = launch.query_param(USERNAME_PARAM)?.trim_start_matches('@');
        if username.is_empty() {
            return None;
        }

        let user_id = self
            .call("resolve_username", self.transport.resolve_username(username))
            .await
            .flatten()
            .filter(|id| *id > 0 && *id != self.fallback_user_id);
        match user_id {
            Some(user_id) => Some(Identity {
                user_id,
                source: IdentitySource::UrlParameter,
                device_fingerprint: fingerprint.to_string(),
                is_linked: false,
            }),
            None => {
                debug!("[Identity] Username @{} did not resolve", username);
                None
            }
        }
    }

    fn from_session(&self, fingerprint: &str) -> Option<Identity> {
        let record = self.session_store.load_valid()?;
        if record.source.is_fallback() {
            debug!("[Identity] Skipping stored fallback session");
            return None;
        }
        Some(Identity {
            user_id: record.user_id,
            source: IdentitySource::SessionStore,
            device_fingerprint: fingerprint.to_string(),
            is_linked: record.is_linked,
        })
    }

    async fn from_device_lookup(&self, fingerprint: &str) -> Option<Identity> {
        let user = self
            .call(
                "find_user_by_device",
                self.transport.find_user_by_device(fingerprint),
            )
            .await
            .flatten()
            .filter(|user| user.user_id > 0)?;

        Some(Identity {
            user_id: user.user_id,
            source: IdentitySource::DeviceFingerprint,
            device_fingerprint: fingerprint.to_string(),
            is_linked: user.is_linked,
        })
    }

    async fn from_anonymous_creation(&self, fingerprint: &str) -> Option<Identity> {
        let device_info = self.device_info();
        let user = self
            .call(
                "create_anonymous_user",
                self.transport.create_anonymous_user(fingerprint, &device_info),
            )
            .await
            .filter(|user| user.user_id > 0)?;

        if user.is_existing {
            debug!("[Identity] Backend returned existing anonymous user {}", user.user_id);
        }
        Some(Identity {
            user_id: user.user_id,
            source: IdentitySource::AnonymousCreated,
            device_fingerprint: fingerprint.to_string(),
            is_linked: false,
        })
    }

    /// User id of a stored device-scoped session, valid or not.
    fn stored_device_scoped_id(&self) -> Option<i64> {
        self.session_store
            .load()
            .filter(|record| record.source.is_device_scoped())
            .map(|record| record.user_id)
    }

    /// Link `anonymous_id` to the host account. Failure is logged and does
    /// not block the host identity.
    async fn link_if_needed(&self, anonymous_id: Option<i64>, host_user: &HostPlatformUser) -> bool {
        let Some(anonymous_id) = anonymous_id.filter(|id| *id != host_user.id) else {
            return false;
        };

        let request = LinkHostIdentityRequest {
            anonymous_id,
            host_user: host_user.clone(),
        };
        match self
            .call("link_host_identity", self.transport.link_host_identity(&request))
            .await
        {
            Some(true) => {
                info!(
                    "[Identity] Linked anonymous user {} to host user {}",
                    anonymous_id, host_user.id
                );
                true
            }
            Some(false) => {
                warn!(
                    "[Identity] Backend declined linking {} to host user {}",
                    anonymous_id, host_user.id
                );
                false
            }
            None => false,
        }
    }

    fn persist(&self, identity: &Identity, launch: &LaunchContext) {
        let host_user = launch
            .host_user
            .clone()
            .filter(|_| identity.source == IdentitySource::HostPlatform);
        let record = SessionRecord::from_identity(identity, self.clock.now_millis())
            .with_platform_info(platform_info(launch))
            .with_host_platform_info(host_user);
        self.session_store.save(&record);
    }

    async fn call<T>(
        &self,
        operation: &str,
        request: impl Future<Output = Result<T, TransportError>>,
    ) -> Option<T> {
        match tokio::time::timeout(self.request_timeout, request).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(err)) => {
                warn!("[Identity] {} failed: {}", operation, err);
                None
            }
            Err(_) => {
                warn!(
                    "[Identity] {} timed out after {:?}",
                    operation, self.request_timeout
                );
                None
            }
        }
    }
}

fn platform_info(launch: &LaunchContext) -> PlatformInfo {
    let environment = &launch.environment;
    PlatformInfo {
        platform: environment
            .platform
            .clone()
            .unwrap_or_else(|| std::env::consts::OS.to_string()),
        language: environment.language.clone(),
        timezone: environment.timezone.clone(),
    }
}
