//! Durable, partitioned key-value storage.
//!
//! Every partition shares one SQLite table keyed by `(partition, key)`, with
//! secondary indexes on `timestamp` and `synced`. Each operation runs as a
//! single transaction; the store surviving a restart is what lets queued
//! writes and cached reads outlive the process.

mod storage;
mod traits;

pub use storage::{SqliteStore, Store};
pub use traits::{Index, IndexValue, Partition, Record};
