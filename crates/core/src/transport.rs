//! Network ports used by the identity resolver and the balance sync engine.
//!
//! The HTTP client crate implements these traits; tests substitute fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::HostPlatformUser;
use crate::sync::{classify_http_status, SyncRetryClass};

/// Failure of a single remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection failure, DNS failure, reset, etc.
    #[error("Network error: {0}")]
    Network(String),

    /// The client-side timeout elapsed.
    #[error("Request timed out")]
    Timeout,

    /// Non-2xx response.
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// 2xx response without the expected fields.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Rejected locally before anything was sent.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse(message.into())
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// HTTP status if the server answered.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classify error for retry policy. Malformed bodies are retried like
    /// network failures.
    pub fn retry_class(&self) -> SyncRetryClass {
        match self {
            Self::Network(_) | Self::Timeout | Self::MalformedResponse(_) => {
                SyncRetryClass::Retryable
            }
            Self::Status { status, .. } => classify_http_status(*status),
            Self::InvalidRequest(_) => SyncRetryClass::Permanent,
        }
    }
}

/// Identity the backend associated with a device fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceUser {
    pub user_id: i64,
    pub is_linked: bool,
}

/// Result of anonymous identity creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnonymousUser {
    pub user_id: i64,
    /// The backend already knew this device and returned its identity.
    pub is_existing: bool,
}

/// Device description sent along with anonymous identity creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub platform: String,
    pub language: Option<String>,
    pub timezone: Option<String>,
    pub screen: Option<String>,
    pub client_version: String,
}

/// Request to associate an anonymous identity with a host-platform identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkHostIdentityRequest {
    pub anonymous_id: i64,
    pub host_user: HostPlatformUser,
}

/// Options for the server-side balance refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BalanceSyncRequest {
    pub force_refresh: bool,
    pub clear_cache: bool,
}

#[async_trait]
pub trait IdentityTransport: Send + Sync {
    /// Look up the identity previously linked to this device. `Ok(None)` when
    /// the device is unknown.
    async fn find_user_by_device(
        &self,
        fingerprint: &str,
    ) -> Result<Option<DeviceUser>, TransportError>;

    async fn create_anonymous_user(
        &self,
        fingerprint: &str,
        device_info: &DeviceInfo,
    ) -> Result<AnonymousUser, TransportError>;

    /// Returns whether the backend accepted the link.
    async fn link_host_identity(
        &self,
        request: &LinkHostIdentityRequest,
    ) -> Result<bool, TransportError>;

    /// Resolve a human-readable handle. `Ok(None)` when unknown.
    async fn resolve_username(&self, username: &str) -> Result<Option<i64>, TransportError>;
}

#[async_trait]
pub trait BalanceTransport: Send + Sync {
    /// Authoritative current balance.
    async fn fetch_balance(&self, user_id: i64) -> Result<u64, TransportError>;

    /// Ask the server to recompute the balance and return it.
    async fn sync_balance(
        &self,
        user_id: i64,
        request: BalanceSyncRequest,
    ) -> Result<u64, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_response_is_retryable() {
        let err = TransportError::malformed("missing balance");
        assert_eq!(err.retry_class(), SyncRetryClass::Retryable);
    }

    #[test]
    fn status_errors_follow_http_classification() {
        assert_eq!(
            TransportError::status(503, "down").retry_class(),
            SyncRetryClass::Retryable
        );
        assert_eq!(
            TransportError::status(404, "missing").retry_class(),
            SyncRetryClass::Permanent
        );
        assert_eq!(
            TransportError::status(401, "no").retry_class(),
            SyncRetryClass::ReauthRequired
        );
        assert_eq!(TransportError::Timeout.status_code(), None);
    }

    #[test]
    fn invalid_request_is_permanent_without_status() {
        let err = TransportError::invalid_request("Username is empty");
        assert_eq!(err.retry_class(), SyncRetryClass::Permanent);
        assert_eq!(err.status_code(), None);
    }
}
