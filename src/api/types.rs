//! Request and response types of the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::cache::CacheEntry;
use crate::mirror::entity_id;

/// Upstream response envelope: `{ success, data?, message? }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEnvelope {
  pub success: bool,
  #[serde(default)]
  pub data: Option<Value>,
  #[serde(default)]
  pub message: Option<String>,
}

impl ApiEnvelope {
  pub fn ok(data: Option<Value>) -> Self {
    Self {
      success: true,
      data,
      message: None,
    }
  }

  /// Interpret a JSON body. Bodies without a `success` flag are treated as a
  /// bare successful payload.
  pub fn from_value(value: Value) -> Self {
    if value.get("success").is_some_and(Value::is_boolean) {
      if let Ok(envelope) = serde_json::from_value::<ApiEnvelope>(value.clone()) {
        return envelope;
      }
    }
    Self::ok(Some(value))
  }
}

/// Indicates where response data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
  /// Fresh data from network
  Network,
  /// Cached data within the caller's max age
  CacheFresh,
  /// Cached data served past its max age (offline or network exhausted)
  CacheStale,
  /// Write accepted locally and queued for sync
  Queued,
  /// Read served from the entity mirror
  Mirror,
}

/// Result of an orchestrated request, with metadata about its source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
  pub data: Value,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
  pub source: Source,
  /// When the data was cached (if from cache)
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cached_at: Option<DateTime<Utc>>,
}

impl Response {
  pub fn from_network(data: Value, message: Option<String>) -> Self {
    Self {
      data,
      message,
      source: Source::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(entry: CacheEntry, is_stale: bool) -> Self {
    Self {
      cached_at: entry.cached_at(),
      data: entry.data,
      message: None,
      source: if is_stale {
        Source::CacheStale
      } else {
        Source::CacheFresh
      },
    }
  }

  pub fn queued(data: Value) -> Self {
    Self {
      data,
      message: Some("queued for sync".to_string()),
      source: Source::Queued,
      cached_at: None,
    }
  }

  pub fn from_mirror(data: Value) -> Self {
    Self {
      data,
      message: None,
      source: Source::Mirror,
      cached_at: None,
    }
  }

  pub fn is_from_cache(&self) -> bool {
    matches!(self.source, Source::CacheFresh | Source::CacheStale)
  }

  /// Data was served although it may be outdated.
  pub fn is_stale(&self) -> bool {
    matches!(self.source, Source::CacheStale | Source::Mirror)
  }

  pub fn is_queued(&self) -> bool {
    self.source == Source::Queued
  }

  /// Entity id carried by the payload, if any.
  pub fn id(&self) -> Option<String> {
    entity_id(&self.data)
  }
}

/// Per-call options. Unset fields fall back to [`ClientOptions`].
#[derive(Debug, Clone)]
pub struct RequestConfig {
  pub body: Option<Value>,
  /// Read from and write to the response cache (GET only)
  pub use_cache: bool,
  pub max_age: Option<Duration>,
  pub ttl: Option<Duration>,
  pub timeout: Option<Duration>,
  pub max_attempts: Option<u32>,
}

impl Default for RequestConfig {
  fn default() -> Self {
    Self {
      body: None,
      use_cache: true,
      max_age: None,
      ttl: None,
      timeout: None,
      max_attempts: None,
    }
  }
}

impl RequestConfig {
  pub fn with_body(mut self, body: Value) -> Self {
    self.body = Some(body);
    self
  }

  pub fn without_cache(mut self) -> Self {
    self.use_cache = false;
    self
  }

  pub fn with_max_age(mut self, max_age: Duration) -> Self {
    self.max_age = Some(max_age);
    self
  }

  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = Some(ttl);
    self
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  pub fn with_max_attempts(mut self, attempts: u32) -> Self {
    self.max_attempts = Some(attempts);
    self
  }
}

/// Client-wide defaults.
#[derive(Debug, Clone)]
pub struct ClientOptions {
  /// Deadline of a single network attempt
  pub timeout: Duration,
  /// Attempts per request, including the first
  pub max_attempts: u32,
  /// Backoff before retry `n` is `backoff_base * 2^n`
  pub backoff_base: Duration,
  /// How long a cached GET is served without revalidation
  pub cache_max_age: Duration,
  /// How long a cached GET is retained for stale fallback
  pub cache_ttl: Duration,
  /// Drop a queued write after this many failed sync attempts
  pub max_item_attempts: Option<u32>,
  /// Bearer token used when none is stored locally
  pub token: Option<String>,
}

impl Default for ClientOptions {
  fn default() -> Self {
    Self {
      timeout: Duration::from_secs(10),
      max_attempts: 3,
      backoff_base: Duration::from_secs(1),
      cache_max_age: Duration::from_secs(5 * 60),
      cache_ttl: Duration::from_secs(24 * 60 * 60),
      max_item_attempts: None,
      token: None,
    }
  }
}

/// Snapshot of local sync state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
  pub online: bool,
  pub queued: usize,
  pub unsynced: usize,
  pub cached: usize,
}
