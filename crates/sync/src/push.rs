//! Optional server push channel.
//!
//! The embedding application owns the connection (WebSocket, long poll) and
//! hands its text frames to [`run_push_listener`] as a stream. Polling keeps
//! working when no listener runs.

use futures::{Stream, StreamExt};
use log::{debug, info, warn};
use serde::Deserialize;
use tokio::task::JoinHandle;

use crate::balance_sync_engine::BalanceSyncEngine;

const BALANCE_UPDATE_TYPE: &str = "balance_update";

/// Raw push frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PushMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
struct BalanceUpdateData {
    balance: u64,
    #[serde(default, alias = "telegram_id", alias = "userId")]
    user_id: Option<i64>,
}

/// A decoded balance update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceUpdate {
    pub balance: u64,
    /// Identity the update is addressed to, when the server says so.
    pub user_id: Option<i64>,
}

impl PushMessage {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// `Some` for well-formed `balance_update` frames only.
    pub fn balance_update(&self) -> Option<BalanceUpdate> {
        if self.kind != BALANCE_UPDATE_TYPE {
            return None;
        }
        match serde_json::from_value::<BalanceUpdateData>(self.data.clone()) {
            Ok(data) => Some(BalanceUpdate {
                balance: data.balance,
                user_id: data.user_id,
            }),
            Err(err) => {
                warn!("[Push] Malformed balance_update payload: {}", err);
                None
            }
        }
    }
}

/// Apply balance updates from `frames` until the stream ends. Returns the
/// number of updates applied.
pub async fn run_push_listener<S>(engine: BalanceSyncEngine, frames: S) -> usize
where
    S: Stream<Item = String> + Send,
{
    futures::pin_mut!(frames);
    let mut applied = 0;

    while let Some(raw) = frames.next().await {
        let message = match PushMessage::parse(&raw) {
            Ok(message) => message,
            Err(err) => {
                warn!("[Push] Ignoring unparseable frame: {}", err);
                continue;
            }
        };
        let Some(update) = message.balance_update() else {
            debug!("[Push] Ignoring '{}' message", message.kind);
            continue;
        };
        if engine
            .apply_push(update.user_id, update.balance)
            .await
            .is_some()
        {
            applied += 1;
        }
    }

    info!("[Push] Push channel closed after {} update(s)", applied);
    applied
}

pub fn spawn_push_listener<S>(engine: BalanceSyncEngine, frames: S) -> JoinHandle<usize>
where
    S: Stream<Item = String> + Send + 'static,
{
    tokio::spawn(run_push_listener(engine, frames))
}
