//! Convenience result type alias for vaultfs.

use crate::error::AppError;

/// A specialized `Result` type for vaultfs operations.
pub type AppResult<T> = Result<T, AppError>;
