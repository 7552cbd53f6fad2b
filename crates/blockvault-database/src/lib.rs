//! # blockvault-database
//!
//! The [`RecordStore`] abstraction the engines are written against, its
//! PostgreSQL implementation built on sqlx repositories, and a
//! process-local [`MemoryRecordStore`] with identical semantics.

pub mod connection;
pub mod memory;
pub mod migration;
pub mod postgres;
pub mod repositories;
pub mod store;

pub use connection::DatabasePool;
pub use memory::MemoryRecordStore;
pub use postgres::PgRecordStore;
pub use store::{RecordStore, open_store};
