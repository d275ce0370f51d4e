//! Error types for the API client crate.

use stylist_core::sync::{classify_http_status, SyncRetryClass};
use stylist_core::transport::TransportError;
use thiserror::Error;

/// Result type alias for API client operations.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors that can occur while talking to the backend.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API error response from the backend
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// 2xx response that lacks the expected fields
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Invalid request (bad base URL, empty identifier, etc.)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    /// Create an API error from status and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
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

    /// HTTP status if this is an API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }

    /// Classify error for retry policy.
    pub fn retry_class(&self) -> SyncRetryClass {
        match self {
            Self::Api { status, .. } => classify_http_status(*status),
            Self::Http(_) => SyncRetryClass::Retryable,
            Self::Json(_) | Self::MalformedResponse(_) => SyncRetryClass::Retryable,
            Self::InvalidRequest(_) => SyncRetryClass::Permanent,
        }
    }
}

impl From<ApiError> for TransportError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Http(inner) if inner.is_timeout() => TransportError::Timeout,
            ApiError::Http(inner) => match inner.status() {
                Some(status) => TransportError::status(status.as_u16(), inner.to_string()),
                None => TransportError::network(inner.to_string()),
            },
            ApiError::Json(inner) => TransportError::malformed(inner.to_string()),
            ApiError::MalformedResponse(message) => TransportError::malformed(message),
            ApiError::Api { status, message } => TransportError::status(status, message),
            ApiError::InvalidRequest(message) => TransportError::invalid_request(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_class_for_auth_error_is_reauth() {
        let err = ApiError::api(401, "unauthorized");
        assert_eq!(err.retry_class(), SyncRetryClass::ReauthRequired);
    }

    #[test]
    fn malformed_response_maps_to_retryable_transport_error() {
        let err: TransportError = ApiError::malformed("missing balance").into();
        assert_eq!(err, TransportError::malformed("missing balance"));
        assert_eq!(err.retry_class(), SyncRetryClass::Retryable);
    }

    #[test]
    fn api_status_is_preserved_in_transport_error() {
        let err: TransportError = ApiError::api(503, "maintenance").into();
        assert_eq!(err.status_code(), Some(503));
        assert!(ApiError::api(404, "nope").is_not_found());
    }

    #[test]
    fn local_validation_failure_is_not_reported_as_http_status() {
        let err: TransportError = ApiError::invalid_request("Device fingerprint is empty").into();
        assert_eq!(err, TransportError::invalid_request("Device fingerprint is empty"));
        assert_eq!(err.status_code(), None);
        assert_eq!(err.retry_class(), SyncRetryClass::Permanent);
    }
}
