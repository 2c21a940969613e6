//! # vaultfs-database
//!
//! The transactional repository boundary of the engine. Each aggregate has
//! a repository trait; every multi-row mutation (upload commit, version
//! promotion, subtree delete, purge) is a single trait method so that an
//! implementation can make it atomic.
//!
//! Two implementations ship: [`MemoryStore`] keeps all state behind one
//! lock and backs embedded mode and tests, [`PgStore`] runs each mutation
//! in a PostgreSQL transaction.

pub mod connection;
pub mod memory;
pub mod migration;
pub mod postgres;
pub mod repositories;
pub mod store;

pub use connection::DatabasePool;
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use store::Store;
