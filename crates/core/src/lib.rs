//! Core domain types and ports for the stylist client.
//!
//! This crate holds the identity and balance models, the retry/backoff policy,
//! and the traits (storage, transport, clock) that the sync crate is built on.

pub mod balance;
pub mod clock;
pub mod errors;
pub mod identity;
pub mod storage;
pub mod sync;
pub mod transport;

pub use errors::{Error, Result};
