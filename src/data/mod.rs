//! Data layer module
//!
//! Handles all data persistence and caching:
//! - SQLite keyed record table
//! - Cycle-scoped partitions and the shared users partition
//! - Entity record helpers
//! - Change notifications
//! - Collection cache (volatile)

mod cache;
mod database;
mod events;
mod models;
mod partition;
pub mod records;

pub use cache::CollectionCache;
pub use database::Database;
pub use events::{ChangeReason, DataChanged, EventBus, Subscription};
pub use models::*;
pub use partition::{
    CycleContext, DATABASE_NAME, PartitionHandle, Store, StoreName, partition_namespace,
    system_namespace,
};
