//! # blockvault-core
//!
//! Core crate for BlockVault. Contains configuration schemas, typed
//! identifiers, typed record filters, retention-policy parsing, the
//! cloud collaborator trait, and the unified error system.
//!
//! This crate has **no** internal dependencies on other BlockVault crates.

pub mod config;
pub mod error;
pub mod result;
pub mod traits;
pub mod types;

pub use error::AppError;
pub use result::AppResult;
