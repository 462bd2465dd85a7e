//! Core traits and types for the partitioned store.

use serde::{de::DeserializeOwned, Serialize};

/// Named partitions of the persistent store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
  /// Previously fetched GET payloads
  ApiCache,
  /// Mutating requests waiting for connectivity
  OfflineQueue,
  /// Small persisted preferences (auth token, id remaps)
  UserSettings,
  /// Entity mirror for leads
  Leads,
}

impl Partition {
  pub const ALL: [Partition; 4] = [
    Partition::ApiCache,
    Partition::OfflineQueue,
    Partition::UserSettings,
    Partition::Leads,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      Partition::ApiCache => "apiCache",
      Partition::OfflineQueue => "offlineQueue",
      Partition::UserSettings => "userSettings",
      Partition::Leads => "leads",
    }
  }
}

impl std::fmt::Display for Partition {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Secondary indexes available on every partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Index {
  Timestamp,
  Synced,
}

impl Index {
  pub(crate) fn column(&self) -> &'static str {
    match self {
      Index::Timestamp => "timestamp",
      Index::Synced => "synced",
    }
  }
}

/// Value matched against an index column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexValue(pub(crate) i64);

impl From<i64> for IndexValue {
  fn from(value: i64) -> Self {
    Self(value)
  }
}

impl From<bool> for IndexValue {
  fn from(value: bool) -> Self {
    Self(value as i64)
  }
}

/// Trait for values that live in a store partition.
///
/// Implementors provide their primary key and, optionally, the values of the
/// indexed columns.
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Primary key within the partition
  fn key(&self) -> String;

  /// Value of the `timestamp` index, if the record has one
  fn timestamp(&self) -> Option<i64> {
    None
  }

  /// Value of the `synced` index, if the record has one
  fn synced(&self) -> Option<bool> {
    None
  }

  /// Partition this record type is stored in
  fn partition() -> Partition;
}
