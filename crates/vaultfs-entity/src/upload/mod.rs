//! Resumable upload session entities.

pub mod session;

pub use session::{UploadSession, UploadState, chunk_count};
