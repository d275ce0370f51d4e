//! Sync triggers and the background polling loop.

use log::{debug, info};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::balance_sync_engine::BalanceSyncEngine;
use crate::config::SyncConfig;

/// What caused a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    FirstAccess,
    Foreground,
    NetworkRestored,
    Periodic,
    Manual,
    /// Push signal without a balance payload.
    Push,
}

pub struct BalanceScheduler {
    engine: BalanceSyncEngine,
    poll_interval: Duration,
    poll_jitter: Duration,
    online: AtomicBool,
    visible: AtomicBool,
    background_task: Mutex<Option<JoinHandle<()>>>,
}

impl BalanceScheduler {
    pub fn new(config: &SyncConfig, engine: BalanceSyncEngine) -> Self {
        Self {
            engine,
            poll_interval: config.poll_interval,
            poll_jitter: config.poll_jitter,
            online: AtomicBool::new(true),
            visible: AtomicBool::new(true),
            background_task: Mutex::new(None),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    /// Run the sync matching `trigger`. While offline only manual syncs reach
    /// the network; other triggers return the cached balance.
    pub async fn trigger(&self, trigger: SyncTrigger) -> Option<u64> {
        if !self.is_online() && trigger != SyncTrigger::Manual {
            debug!("[Scheduler] Offline; skipping {:?} sync", trigger);
            return self.engine.cached_balance().await;
        }

        debug!("[Scheduler] Sync triggered by {:?}", trigger);
        match trigger {
            SyncTrigger::FirstAccess => self.engine.get_balance(false).await,
            SyncTrigger::Foreground | SyncTrigger::NetworkRestored | SyncTrigger::Push => {
                self.engine.get_balance(true).await
            }
            SyncTrigger::Periodic => self.engine.poll().await,
            SyncTrigger::Manual => self.engine.force_sync().await,
        }
    }

    /// Returns whether a foreground sync ran.
    pub async fn on_visibility_changed(&self, visible: bool) -> bool {
        let was_visible = self.visible.swap(visible, Ordering::SeqCst);
        if visible && !was_visible {
            self.trigger(SyncTrigger::Foreground).await;
            return true;
        }
        false
    }

    /// Returns whether a reconnect sync ran.
    pub async fn on_connectivity_changed(&self, online: bool) -> bool {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        if online && !was_online {
            info!("[Scheduler] Network restored");
            self.trigger(SyncTrigger::NetworkRestored).await;
            return true;
        }
        if !online && was_online {
            info!("[Scheduler] Network lost; polling paused");
        }
        false
    }

    /// Spawn the polling loop unless it is already running. Ticks are skipped
    /// while the app is hidden or offline.
    pub async fn ensure_background_started(self: &Arc<Self>) {
        let mut guard = self.background_task.lock().await;
        if let Some(handle) = guard.as_ref() {
            if !handle.is_finished() {
                return;
            }
            guard.take();
        }

        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(scheduler.next_delay()).await;
                if !scheduler.is_visible() || !scheduler.is_online() {
                    debug!("[Scheduler] Skipping periodic sync (hidden or offline)");
                    continue;
                }
                scheduler.trigger(SyncTrigger::Periodic).await;
            }
        });
        info!(
            "[Scheduler] Background polling started (every {:?} + up to {:?})",
            self.poll_interval, self.poll_jitter
        );
        *guard = Some(handle);
    }

    pub async fn ensure_background_stopped(&self) {
        let mut guard = self.background_task.lock().await;
        if let Some(handle) = guard.take() {
            handle.abort();
            info!("[Scheduler] Background polling stopped");
        }
    }

    pub async fn is_background_running(&self) -> bool {
        self.background_task
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn next_delay(&self) -> Duration {
        let jitter_bound = self.poll_jitter.as_millis() as u64;
        let jitter_ms = if jitter_bound > 0 {
            rand::thread_rng().gen_range(0..=jitter_bound)
        } else {
            0
        };
        self.poll_interval + Duration::from_millis(jitter_ms)
    }
}
