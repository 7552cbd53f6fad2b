//! Convenience result type alias for BlockVault.

use crate::error::AppError;

/// A specialized `Result` type for BlockVault operations.
pub type AppResult<T> = Result<T, AppError>;
