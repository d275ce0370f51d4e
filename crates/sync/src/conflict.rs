//! Conflict policy between cached and remote balances.
//!
//! The server value always wins. The comparison only decides whether the
//! change is worth a notification; balances are never merged client-side.

use stylist_core::balance::BalanceRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceResolution {
    /// Nothing was cached; the remote value becomes the first record.
    Initial { balance: u64 },
    Unchanged { balance: u64 },
    Changed { old: u64, new: u64 },
}

impl BalanceResolution {
    pub fn balance(&self) -> u64 {
        match self {
            Self::Initial { balance } | Self::Unchanged { balance } => *balance,
            Self::Changed { new, .. } => *new,
        }
    }

    pub fn old_balance(&self) -> Option<u64> {
        match self {
            Self::Initial { .. } => None,
            Self::Unchanged { balance } => Some(*balance),
            Self::Changed { old, .. } => Some(*old),
        }
    }

    pub fn should_notify(&self) -> bool {
        !matches!(self, Self::Unchanged { .. })
    }
}

pub fn resolve_remote(cached: Option<&BalanceRecord>, remote: u64) -> BalanceResolution {
    match cached {
        None => BalanceResolution::Initial { balance: remote },
        Some(record) if record.balance == remote => BalanceResolution::Unchanged { balance: remote },
        Some(record) => BalanceResolution::Changed {
            old: record.balance,
            new: remote,
        },
    }
}

/// Value to report when the server cannot be reached.
pub fn offline_fallback(cached: Option<&BalanceRecord>) -> Option<u64> {
    cached.map(|record| record.balance)
}

/// Ordering key for sync completions, handed out in initiation order.
/// Wall-clock time is not part of the key, so clock corrections cannot
/// reorder syncs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SyncTicket {
    pub seq: u64,
}

/// A completion is stale when a sync initiated later was already applied.
pub fn is_stale(ticket: SyncTicket, last_applied: Option<SyncTicket>) -> bool {
    last_applied.is_some_and(|applied| ticket < applied)
}
