//! Arca Task Store
//!
//! Durable state for download, bulk-registration, migration and upload-queue
//! tasks, plus the historical result records that outlive them. [`TaskStore`]
//! is the contract; [`PgTaskStore`] and [`InMemoryTaskStore`] implement it.

pub mod memory;
pub mod postgres;
pub mod setup;
pub mod store;

pub use memory::InMemoryTaskStore;
pub use postgres::PgTaskStore;
pub use setup::setup_database;
pub use store::TaskStore;
