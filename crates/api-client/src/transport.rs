//! Transport port implementations backed by the HTTP client.

use async_trait::async_trait;
use log::debug;

use stylist_core::transport::{
    AnonymousUser, BalanceSyncRequest, BalanceTransport, DeviceInfo, DeviceUser,
    IdentityTransport, LinkHostIdentityRequest, TransportError,
};

use crate::client::StylistApiClient;
use crate::types::{BalanceSyncBody, LinkTelegramRequest};

#[async_trait]
impl IdentityTransport for StylistApiClient {
    async fn find_user_by_device(
        &self,
        fingerprint: &str,
    ) -> Result<Option<DeviceUser>, TransportError> {
        let user = StylistApiClient::find_user_by_device(self, fingerprint).await?;
        Ok(user.and_then(|user| {
            user.effective_id().map(|user_id| DeviceUser {
                user_id,
                is_linked: user.is_linked.unwrap_or(false),
            })
        }))
    }

    async fn create_anonymous_user(
        &self,
        fingerprint: &str,
        device_info: &DeviceInfo,
    ) -> Result<AnonymousUser, TransportError> {
        let user = StylistApiClient::create_anonymous_user(self, fingerprint, device_info).await?;
        let user_id = user
            .id
            .ok_or_else(|| TransportError::malformed("Anonymous user response has no id"))?;
        Ok(AnonymousUser {
            user_id,
            is_existing: user.is_existing,
        })
    }

    async fn link_host_identity(
        &self,
        request: &LinkHostIdentityRequest,
    ) -> Result<bool, TransportError> {
        let body = LinkTelegramRequest {
            anonymous_id: request.anonymous_id,
            telegram_id: request.host_user.id,
            username: request.host_user.username.clone(),
            first_name: request.host_user.first_name.clone(),
            last_name: request.host_user.last_name.clone(),
        };
        let response = self.link_telegram(&body).await?;
        if !response.success {
            debug!(
                "[StylistApi] Link rejected: {}",
                response.message.unwrap_or_default()
            );
        }
        Ok(response.success)
    }

    async fn resolve_username(&self, username: &str) -> Result<Option<i64>, TransportError> {
        Ok(StylistApiClient::resolve_username(self, username).await?)
    }
}

#[async_trait]
impl BalanceTransport for StylistApiClient {
    async fn fetch_balance(&self, user_id: i64) -> Result<u64, TransportError> {
        Ok(self.get_balance(user_id).await?)
    }

    async fn sync_balance(
        &self,
        user_id: i64,
        request: BalanceSyncRequest,
    ) -> Result<u64, TransportError> {
        let body = BalanceSyncBody {
            force_refresh: request.force_refresh,
            clear_cache: request.clear_cache,
        };
        Ok(StylistApiClient::sync_balance(self, user_id, body).await?)
    }
}
