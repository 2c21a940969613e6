//! Quota-bearing principals.

pub mod model;

pub use model::{Group, User};
