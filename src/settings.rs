//! Small persisted preferences.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;
use crate::store::{Partition, Record, SqliteStore, Store};

/// Key holding the bearer token.
pub const AUTH_TOKEN_KEY: &str = "authToken";

const REMAP_PREFIX: &str = "idRemap:";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
  pub key: String,
  pub value: Value,
}

impl Record for Setting {
  fn key(&self) -> String {
    self.key.clone()
  }

  fn partition() -> Partition {
    Partition::UserSettings
  }
}

/// Typed access to the `userSettings` partition.
pub struct Settings<S: Store = SqliteStore> {
  store: Arc<S>,
}

impl<S: Store> Settings<S> {
  pub fn new(store: Arc<S>) -> Self {
    Self { store }
  }

  pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
    match self.store.get::<Setting>(key)? {
      Some(setting) => Ok(Some(serde_json::from_value(setting.value)?)),
      None => Ok(None),
    }
  }

  pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
    self.store.put(&Setting {
      key: key.to_string(),
      value: serde_json::to_value(value)?,
    })
  }

  pub fn remove(&self, key: &str) -> Result<bool> {
    self.store.delete::<Setting>(key)
  }

  /// Remove every setting, remaps included.
  pub fn clear(&self) -> Result<usize> {
    self.store.clear(Partition::UserSettings)
  }

  pub fn auth_token(&self) -> Result<Option<String>> {
    self.get(AUTH_TOKEN_KEY)
  }

  /// Remember that `temp_id` became `server_id`.
  pub fn record_remap(&self, temp_id: &str, server_id: &str) -> Result<()> {
    self.set(&remap_key(temp_id), &server_id)
  }

  pub fn resolve_remap(&self, temp_id: &str) -> Result<Option<String>> {
    self.get(&remap_key(temp_id))
  }

  /// All recorded `(temp_id, server_id)` pairs.
  pub fn remaps(&self) -> Result<Vec<(String, String)>> {
    let remaps = self
      .store
      .get_all::<Setting>()?
      .into_iter()
      .filter_map(|setting| {
        let temp = setting.key.strip_prefix(REMAP_PREFIX)?.to_string();
        let server = setting.value.as_str()?.to_string();
        Some((temp, server))
      })
      .collect();
    Ok(remaps)
  }

  pub fn forget_remap(&self, temp_id: &str) -> Result<bool> {
    self.remove(&remap_key(temp_id))
  }
}

impl<S: Store> Clone for Settings<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
    }
  }
}

fn remap_key(temp_id: &str) -> String {
  format!("{}{}", REMAP_PREFIX, temp_id)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn settings() -> Settings {
    Settings::new(Arc::new(SqliteStore::open_in_memory().unwrap()))
  }

  #[test]
  fn test_token_round_trip_and_removal() {
    let settings = settings();
    assert_eq!(settings.auth_token().unwrap(), None);

    settings.set(AUTH_TOKEN_KEY, &"secret").unwrap();
    assert_eq!(settings.auth_token().unwrap(), Some("secret".to_string()));

    assert!(settings.remove(AUTH_TOKEN_KEY).unwrap());
    assert_eq!(settings.auth_token().unwrap(), None);
  }

  #[test]
  fn test_remaps_are_listed_separately_from_other_settings() {
    let settings = settings();
    settings.set("theme", &"dark").unwrap();
    settings.record_remap("temp-1", "srv-1").unwrap();

    assert_eq!(
      settings.resolve_remap("temp-1").unwrap(),
      Some("srv-1".to_string())
    );
    assert_eq!(
      settings.remaps().unwrap(),
      vec![("temp-1".to_string(), "srv-1".to_string())]
    );

    assert!(settings.forget_remap("temp-1").unwrap());
    assert!(settings.remaps().unwrap().is_empty());
  }
}
