//! HTTP client for the stylist backend.
//!
//! Covers balance reads and refreshes, device lookup, anonymous identity
//! creation, host-identity linking and username resolution.

pub mod client;
pub mod error;
mod transport;
pub mod types;

pub use client::StylistApiClient;
pub use error::{ApiError, Result};
pub use types::*;
