//! # vaultfs-api
//!
//! The streaming read endpoints of vaultfs on Axum: signed content
//! downloads, signed thumbnail fetches and direct links with per-link
//! throttling.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;
pub mod throttle;

pub use error::ApiError;
pub use router::build_router;
pub use state::AppState;
