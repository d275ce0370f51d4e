//! Identity, session record and host-platform user models.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Identity used when every resolution path fails.
pub const DEFAULT_FALLBACK_USER_ID: i64 = 5_930_269_100;

/// How an identity was determined, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    HostPlatform,
    UrlParameter,
    SessionStore,
    DeviceFingerprint,
    AnonymousCreated,
    Fallback,
}

impl IdentitySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HostPlatform => "host_platform",
            Self::UrlParameter => "url_parameter",
            Self::SessionStore => "session_store",
            Self::DeviceFingerprint => "device_fingerprint",
            Self::AnonymousCreated => "anonymous_created",
            Self::Fallback => "fallback",
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback)
    }

    /// Identities that exist only because of this device and can be upgraded
    /// by linking a host-platform account.
    pub fn is_device_scoped(&self) -> bool {
        matches!(self, Self::DeviceFingerprint | Self::AnonymousCreated)
    }
}

/// User object injected by the embedding chat platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPlatformUser {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
}

/// Environment description persisted with the session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformInfo {
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

/// Effective user identity for balance and consultation requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: i64,
    pub source: IdentitySource,
    pub device_fingerprint: String,
    pub is_linked: bool,
}

impl Identity {
    pub fn fallback(user_id: i64, device_fingerprint: impl Into<String>) -> Self {
        Self {
            user_id,
            source: IdentitySource::Fallback,
            device_fingerprint: device_fingerprint.into(),
            is_linked: false,
        }
    }
}

/// Persisted result of the last successful identity resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub user_id: i64,
    pub source: IdentitySource,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default)]
    pub is_linked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_info: Option<PlatformInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_platform_info: Option<HostPlatformUser>,
}

impl SessionRecord {
    pub fn from_identity(identity: &Identity, timestamp: i64) -> Self {
        Self {
            user_id: identity.user_id,
            source: identity.source,
            timestamp,
            is_linked: identity.is_linked,
            platform_info: None,
            host_platform_info: None,
        }
    }

    pub fn with_platform_info(mut self, platform_info: PlatformInfo) -> Self {
        self.platform_info = Some(platform_info);
        self
    }

    pub fn with_host_platform_info(mut self, host_user: Option<HostPlatformUser>) -> Self {
        self.host_platform_info = host_user;
        self
    }

    /// Age and shape check. The source tag is validated on decode.
    pub fn is_valid_at(&self, now_millis: i64, max_age: Duration) -> bool {
        if !is_valid_user_id(self.user_id) || self.timestamp <= 0 {
            return false;
        }
        let age = now_millis.saturating_sub(self.timestamp);
        age >= 0 && (age as u128) < max_age.as_millis()
    }
}

pub fn is_valid_user_id(user_id: i64) -> bool {
    user_id > 0
}

/// Parse a user identifier from untrusted input.
pub fn parse_user_id(raw: &str) -> Option<i64> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|value| is_valid_user_id(*value))
}
