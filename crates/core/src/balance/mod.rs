//! Balance domain models.

mod balance_model;

pub use balance_model::*;
