//! Identity resolution and STcoin balance synchronization.
//!
//! The [`context::AppContext`] wires one instance of each service per
//! application launch:
//!
//! - [`identity_resolver::IdentityResolver`] decides who the current user is.
//! - [`balance_sync_engine::BalanceSyncEngine`] keeps the cached balance in
//!   line with the server.
//! - [`scheduler::BalanceScheduler`] turns visibility, connectivity, timer and
//!   push signals into syncs.

pub mod balance_cache;
pub mod balance_sync_engine;
pub mod config;
pub mod conflict;
pub mod context;
pub mod fingerprint;
pub mod identity_resolver;
pub mod launch;
pub mod push;
pub mod scheduler;
pub mod session_store;

#[cfg(test)]
mod test_support;

pub use balance_cache::BalanceCache;
pub use balance_sync_engine::{BalanceSyncEngine, SubscriptionId, SyncStatus};
pub use config::SyncConfig;
pub use context::{AppContext, DiagnosticsReport};
pub use fingerprint::{DeviceFingerprintGenerator, EnvironmentProbe};
pub use identity_resolver::IdentityResolver;
pub use launch::{DeviceEnvironment, LaunchContext};
pub use push::{run_push_listener, spawn_push_listener, PushMessage};
pub use scheduler::{BalanceScheduler, SyncTrigger};
pub use session_store::SessionStore;
