//! Core type definitions used across the BlockVault workspace.

pub mod filter;
pub mod id;
pub mod retention;

pub use filter::{Condition, Filter, FilterField, FilterOp, FilterValue, Filterable};
pub use id::*;
pub use retention::RetentionPolicy;
