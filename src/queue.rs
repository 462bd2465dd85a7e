//! Durable FIFO log of writes that could not reach the network.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::info;

use crate::clock::{SharedClock, Stamper};
use crate::error::{Error, Result};
use crate::store::{Partition, Record, SqliteStore, Store};

/// HTTP methods that can be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WriteMethod {
  Post,
  Put,
  Patch,
  Delete,
}

impl WriteMethod {
  pub fn as_str(&self) -> &'static str {
    match self {
      WriteMethod::Post => "POST",
      WriteMethod::Put => "PUT",
      WriteMethod::Patch => "PATCH",
      WriteMethod::Delete => "DELETE",
    }
  }

  pub fn to_method(self) -> Method {
    match self {
      WriteMethod::Post => Method::POST,
      WriteMethod::Put => Method::PUT,
      WriteMethod::Patch => Method::PATCH,
      WriteMethod::Delete => Method::DELETE,
    }
  }
}

impl TryFrom<&Method> for WriteMethod {
  type Error = Error;

  fn try_from(method: &Method) -> Result<Self> {
    match *method {
      Method::POST => Ok(WriteMethod::Post),
      Method::PUT => Ok(WriteMethod::Put),
      Method::PATCH => Ok(WriteMethod::Patch),
      Method::DELETE => Ok(WriteMethod::Delete),
      ref other => Err(Error::InvalidRequest(format!(
        "{} requests cannot be queued",
        other
      ))),
    }
  }
}

impl std::fmt::Display for WriteMethod {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A pending mutating request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
  /// Sortable id: zero-padded creation stamp plus a digest of method and url
  pub id: String,
  pub method: WriteMethod,
  pub url: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub data: Option<Value>,
  /// Creation stamp in epoch milliseconds, strictly increasing per store
  pub timestamp: i64,
  /// Temp id of the mirrored entity this write creates
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub entity_id: Option<String>,
}

impl QueueItem {
  /// Whether this item's url or created entity mentions `id`.
  pub fn references(&self, id: &str) -> bool {
    self.entity_id.as_deref() == Some(id) || self.url.split('/').any(|segment| segment == id)
  }
}

impl Record for QueueItem {
  fn key(&self) -> String {
    self.id.clone()
  }

  fn timestamp(&self) -> Option<i64> {
    Some(self.timestamp)
  }

  fn partition() -> Partition {
    Partition::OfflineQueue
  }
}

/// Offline write queue.
///
/// Items are appended, listed oldest-first and deleted once the server has
/// accepted them. They are never modified in place, and identical writes are
/// not deduplicated.
pub struct OfflineQueue<S: Store = SqliteStore> {
  store: Arc<S>,
  stamper: Arc<Stamper>,
}

impl<S: Store> OfflineQueue<S> {
  /// Create the queue, continuing the stamp sequence of any persisted items.
  pub fn new(store: Arc<S>, clock: SharedClock) -> Result<Self> {
    let stamper = Stamper::new(clock);
    if let Some(last) = store.get_all::<QueueItem>()?.last() {
      stamper.observe(last.timestamp);
    }

    Ok(Self {
      store,
      stamper: Arc::new(stamper),
    })
  }

  /// Append a write to the queue.
  pub fn enqueue(
    &self,
    method: WriteMethod,
    url: &str,
    data: Option<Value>,
    entity_id: Option<String>,
  ) -> Result<QueueItem> {
    let timestamp = self.stamper.next();
    let item = QueueItem {
      id: item_id(method, url, timestamp),
      method,
      url: url.to_string(),
      data,
      timestamp,
      entity_id,
    };
    self.store.put(&item)?;

    info!(id = %item.id, method = %method, url, "queued write for sync");
    Ok(item)
  }

  /// All pending items, oldest first.
  pub fn list(&self) -> Result<Vec<QueueItem>> {
    self.store.get_all::<QueueItem>()
  }

  /// Delete a confirmed item. Returns whether it was present.
  pub fn remove(&self, id: &str) -> Result<bool> {
    self.store.delete::<QueueItem>(id)
  }

  pub fn len(&self) -> Result<usize> {
    self.store.count(Partition::OfflineQueue)
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }

  /// Discard every pending item.
  pub fn clear(&self) -> Result<usize> {
    self.store.clear(Partition::OfflineQueue)
  }
}

impl<S: Store> Clone for OfflineQueue<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      stamper: Arc::clone(&self.stamper),
    }
  }
}

fn item_id(method: WriteMethod, url: &str, timestamp: i64) -> String {
  let mut hasher = Sha256::new();
  hasher.update(method.as_str().as_bytes());
  hasher.update(url.as_bytes());
  hasher.update(timestamp.to_be_bytes());
  let digest = hex::encode(hasher.finalize());
  format!("{:013}-{}", timestamp, &digest[..12])
}
