//! Wire types for the stylist backend API.

use serde::{Deserialize, Serialize};

/// Error body returned by the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    #[serde(default, alias = "message")]
    pub detail: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

/// Body for `POST /users/{id}/balance/sync`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BalanceSyncBody {
    pub force_refresh: bool,
    pub clear_cache: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceLookupUser {
    #[serde(default)]
    pub telegram_id: Option<i64>,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub is_linked: Option<bool>,
}

impl DeviceLookupUser {
    /// Host-platform id when linked, otherwise the backend id.
    pub fn effective_id(&self) -> Option<i64> {
        self.telegram_id.filter(|id| *id > 0).or(self.id).filter(|id| *id > 0)
    }
}

/// Response of `GET /users/device/{fingerprint}`.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceLookupResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub user: Option<DeviceLookupUser>,
}

/// Body for `POST /users/anonymous`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnonymousUserRequest<'a> {
    pub device_fingerprint: &'a str,
    pub device_info: &'a stylist_core::transport::DeviceInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnonymousUserPayload {
    pub id: Option<i64>,
    #[serde(default)]
    pub is_existing: bool,
}

/// Response of `POST /users/anonymous`.
#[derive(Debug, Clone, Deserialize)]
pub struct AnonymousUserResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub user: Option<AnonymousUserPayload>,
}

/// Body for `POST /users/link-telegram`.
#[derive(Debug, Clone, Serialize)]
pub struct LinkTelegramRequest {
    pub anonymous_id: i64,
    pub telegram_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

/// Generic `{ success, message }` response.
#[derive(Debug, Clone, Deserialize)]
pub struct SuccessResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// Response of `GET /users/resolve?username=...`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResolveUsernameResponse {
    #[serde(default)]
    pub telegram_id: Option<i64>,
}
