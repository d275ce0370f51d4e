//! Identity domain models.

mod identity_model;

pub use identity_model::*;
