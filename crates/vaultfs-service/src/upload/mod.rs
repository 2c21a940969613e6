//! Resumable chunked uploads.

pub mod manager;
pub mod types;

pub use manager::UploadSessionManager;
pub use types::{ChunkReceipt, OpenUpload, UploadResult, UploadTicket};
