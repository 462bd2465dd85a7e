//! Local optimistic copy of business entities.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::clock::{SharedClock, Stamper};
use crate::error::{Error, Result};
use crate::store::{Index, Partition, Record, SqliteStore, Store};

/// Prefix of locally generated placeholder ids.
pub const TEMP_PREFIX: &str = "temp-";

/// Whether `id` is a `temp-<digits>` placeholder.
pub fn is_temp_id(id: &str) -> bool {
  id.strip_prefix(TEMP_PREFIX)
    .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

pub fn temp_id(stamp: i64) -> String {
  format!("{}{}", TEMP_PREFIX, stamp)
}

/// Identifier of an entity payload, from `id` or `_id`.
pub fn entity_id(entity: &Value) -> Option<String> {
  let id = entity.get("id").or_else(|| entity.get("_id"))?;
  match id {
    Value::String(s) if !s.is_empty() => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

/// A mirrored entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
  /// Server id, or a temp id until the server confirms the entity
  pub id: String,
  pub data: Value,
  pub timestamp: i64,
  /// True iff `id` is server-issued
  pub synced: bool,
}

impl Record for EntityRecord {
  fn key(&self) -> String {
    self.id.clone()
  }

  fn timestamp(&self) -> Option<i64> {
    Some(self.timestamp)
  }

  fn synced(&self) -> Option<bool> {
    Some(self.synced)
  }

  fn partition() -> Partition {
    Partition::Leads
  }
}

/// Entity mirror for one partition of business entities (leads).
pub struct EntityMirror<S: Store = SqliteStore> {
  store: Arc<S>,
  stamper: Arc<Stamper>,
}

impl<S: Store> EntityMirror<S> {
  pub fn new(store: Arc<S>, clock: SharedClock) -> Result<Self> {
    let stamper = Stamper::new(clock);
    for record in store.get_all_by_index::<EntityRecord>(Index::Synced, false.into())? {
      if let Some(stamp) = record.id.strip_prefix(TEMP_PREFIX).and_then(|s| s.parse().ok()) {
        stamper.observe(stamp);
      }
    }

    Ok(Self {
      store,
      stamper: Arc::new(stamper),
    })
  }

  /// Upsert an entity by its id. `synced` follows from the id.
  pub fn store(&self, entity: Value) -> Result<EntityRecord> {
    let id = entity_id(&entity)
      .ok_or_else(|| Error::InvalidRequest("entity has no id".to_string()))?;
    let record = self.record(id, entity);
    self.store.put(&record)?;
    debug!(id = %record.id, synced = record.synced, "mirrored entity");
    Ok(record)
  }

  /// Store a not-yet-confirmed entity under a fresh temp id.
  pub fn store_local(&self, data: Value) -> Result<EntityRecord> {
    let Value::Object(mut fields) = data else {
      return Err(Error::InvalidRequest(
        "entity payload must be a JSON object".to_string(),
      ));
    };

    let id = temp_id(self.stamper.next());
    fields.insert("id".to_string(), Value::String(id.clone()));
    let record = self.record(id, Value::Object(fields));
    self.store.put(&record)?;
    debug!(id = %record.id, "mirrored local entity");
    Ok(record)
  }

  pub fn get(&self, id: &str) -> Result<Option<EntityRecord>> {
    self.store.get::<EntityRecord>(id)
  }

  pub fn list(&self) -> Result<Vec<EntityRecord>> {
    self.store.get_all::<EntityRecord>()
  }

  /// Records still carrying a temp id.
  pub fn list_unsynced(&self) -> Result<Vec<EntityRecord>> {
    let records = self
      .store
      .get_all_by_index::<EntityRecord>(Index::Synced, false.into())?;
    Ok(records.into_iter().filter(|r| is_temp_id(&r.id)).collect())
  }

  /// Swap a temp record for the server-confirmed entity in one transaction.
  pub fn replace(&self, temp_id: &str, server_entity: Value) -> Result<EntityRecord> {
    let id = entity_id(&server_entity)
      .ok_or_else(|| Error::InvalidRequest("server entity has no id".to_string()))?;
    let record = self.record(id, server_entity);
    self.store.replace(temp_id, &record)?;
    info!(temp_id, id = %record.id, "replaced temp entity with server record");
    Ok(record)
  }

  pub fn remove(&self, id: &str) -> Result<bool> {
    self.store.delete::<EntityRecord>(id)
  }

  /// Drop synced records whose id is not in `keep`. Temp records are left
  /// alone since the server has not seen them yet.
  pub fn retain_synced(&self, keep: &HashSet<String>) -> Result<usize> {
    let mut removed = 0;
    for record in self
      .store
      .get_all_by_index::<EntityRecord>(Index::Synced, true.into())?
    {
      if !keep.contains(&record.id) && self.remove(&record.id)? {
        removed += 1;
      }
    }
    if removed > 0 {
      debug!(removed, "dropped entities the server no longer returns");
    }
    Ok(removed)
  }

  pub fn clear(&self) -> Result<usize> {
    self.store.clear(Partition::Leads)
  }

  fn record(&self, id: String, data: Value) -> EntityRecord {
    EntityRecord {
      synced: !is_temp_id(&id),
      id,
      data,
      timestamp: self.stamper.next(),
    }
  }
}

impl<S: Store> Clone for EntityMirror<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      stamper: Arc::clone(&self.stamper),
    }
  }
}
