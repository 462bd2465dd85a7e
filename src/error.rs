//! Error types shared by every layer of the client.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the store, the network layer and the orchestrator.
#[derive(Debug, Error)]
pub enum Error {
  /// The local store could not be opened or initialized. Never retried.
  #[error("storage unavailable: {0}")]
  StorageUnavailable(String),

  /// A storage operation failed after the store was opened.
  #[error("storage error: {0}")]
  Storage(#[from] rusqlite::Error),

  /// A single network attempt exceeded its deadline.
  #[error("request timed out after {0:?}")]
  NetworkTimeout(Duration),

  /// Transport-level failure (connection refused, DNS, reset, ...).
  #[error("network error: {0}")]
  Network(String),

  /// The server answered with a non-2xx status.
  #[error("HTTP {status}: {message}")]
  Http { status: u16, message: String },

  /// The server answered 2xx but flagged the request as unsuccessful.
  #[error("request rejected: {0}")]
  Rejected(String),

  /// Device is offline and no cached payload exists for the request.
  #[error("offline and no cached data for {0}")]
  NoCacheOffline(String),

  /// The operation cannot be performed without connectivity.
  #[error("{0} requires a network connection")]
  Offline(String),

  #[error("invalid request: {0}")]
  InvalidRequest(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("configuration error: {0}")]
  Config(String),
}

impl Error {
  /// Whether the orchestrator may retry the attempt that produced this error.
  ///
  /// Only transient network failures qualify; an HTTP status is a
  /// server-confirmed answer and is surfaced after its first occurrence.
  pub fn is_retryable(&self) -> bool {
    matches!(self, Error::NetworkTimeout(_) | Error::Network(_))
  }

  /// Storage failures always propagate, even out of best-effort paths.
  /// Whether a failed GET may be answered from an expired cache entry.
  ///
  /// An HTTP status ends the attempts without a retry but still falls back;
  /// a 2xx envelope with `success: false` is an answer and does not.
  pub fn allows_stale_fallback(&self) -> bool {
    self.is_retryable() || matches!(self, Error::Http { .. })
  }

  pub fn is_storage(&self) -> bool {
    matches!(self, Error::StorageUnavailable(_) | Error::Storage(_))
  }
}

impl From<reqwest::Error> for Error {
  fn from(err: reqwest::Error) -> Self {
    if err.is_decode() {
      Error::Network(format!("failed to decode response: {err}"))
    } else {
      Error::Network(err.to_string())
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
