//! Lead endpoints and their entity-mirror bookkeeping.

use reqwest::Method;
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

use super::client::ApiClient;
use super::types::{RequestConfig, Response, Source};
use crate::error::{Error, Result};
use crate::mirror::entity_id;
use crate::store::Store;

pub(crate) const LEADS_ENDPOINT: &str = "/leads";

pub(crate) fn lead_endpoint(id: &str) -> String {
  format!("{}/{}", LEADS_ENDPOINT, id)
}

/// What a write does to the entity mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EntityOp {
  None,
  Create,
  Update(String),
  Delete(String),
}

impl EntityOp {
  /// Recognize lead writes by method and endpoint.
  pub(crate) fn classify(method: &Method, endpoint: &str) -> Self {
    let path = endpoint
      .split('?')
      .next()
      .unwrap_or(endpoint)
      .trim_end_matches('/');
    let Some(rest) = path.strip_prefix(LEADS_ENDPOINT) else {
      return EntityOp::None;
    };

    if rest.is_empty() {
      return if *method == Method::POST {
        EntityOp::Create
      } else {
        EntityOp::None
      };
    }

    match rest.strip_prefix('/') {
      Some(id) if !id.is_empty() && !id.contains('/') => match *method {
        Method::PUT | Method::PATCH => EntityOp::Update(id.to_string()),
        Method::DELETE => EntityOp::Delete(id.to_string()),
        _ => EntityOp::None,
      },
      _ => EntityOp::None,
    }
  }
}

/// Pull the lead list out of a `GET /leads` payload.
fn lead_list(data: &Value) -> Option<&Vec<Value>> {
  data
    .as_array()
    .or_else(|| data.get("leads").and_then(Value::as_array))
}

impl<S: Store> ApiClient<S> {
  /// List leads. Falls back to the entity mirror when offline with no cache.
  pub async fn get_leads(&self) -> Result<Response> {
    match self.get(LEADS_ENDPOINT, RequestConfig::default()).await {
      Ok(response) => {
        if response.source == Source::Network {
          self.mirror_leads(&response.data)?;
        }
        Ok(response)
      }
      Err(Error::NoCacheOffline(_)) => {
        let leads: Vec<Value> = self
          .leads()
          .list()?
          .into_iter()
          .map(|record| record.data)
          .collect();
        debug!(count = leads.len(), "offline, serving leads from mirror");
        Ok(Response::from_mirror(Value::Array(leads)))
      }
      Err(e) => Err(e),
    }
  }

  pub async fn create_lead(&self, lead: Value) -> Result<Response> {
    let config = RequestConfig::default().with_body(lead);
    self
      .write(Method::POST, LEADS_ENDPOINT, config, EntityOp::Create)
      .await
  }

  pub async fn update_lead(&self, id: &str, changes: Value) -> Result<Response> {
    let config = RequestConfig::default().with_body(changes);
    self
      .write(
        Method::PUT,
        &lead_endpoint(id),
        config,
        EntityOp::Update(id.to_string()),
      )
      .await
  }

  pub async fn delete_lead(&self, id: &str) -> Result<Response> {
    self
      .write(
        Method::DELETE,
        &lead_endpoint(id),
        RequestConfig::default(),
        EntityOp::Delete(id.to_string()),
      )
      .await
  }

  /// Make the mirror match a full lead list: upsert what the server
  /// returned and drop synced leads it no longer has.
  fn mirror_leads(&self, data: &Value) -> Result<()> {
    let Some(leads) = lead_list(data) else {
      return Ok(());
    };
    let mut seen = HashSet::new();
    for lead in leads {
      if let Some(id) = entity_id(lead) {
        self.leads().store(lead.clone())?;
        seen.insert(id);
      }
    }
    self.leads().retain_synced(&seen)?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_classify_lead_writes() {
    assert_eq!(EntityOp::classify(&Method::POST, "/leads"), EntityOp::Create);
    assert_eq!(EntityOp::classify(&Method::POST, "/leads/"), EntityOp::Create);
    assert_eq!(
      EntityOp::classify(&Method::PUT, "/leads/abc"),
      EntityOp::Update("abc".into())
    );
    assert_eq!(
      EntityOp::classify(&Method::PATCH, "/leads/abc?notify=1"),
      EntityOp::Update("abc".into())
    );
    assert_eq!(
      EntityOp::classify(&Method::DELETE, "/leads/temp-12"),
      EntityOp::Delete("temp-12".into())
    );
  }

  #[test]
  fn test_classify_ignores_other_endpoints() {
    assert_eq!(EntityOp::classify(&Method::POST, "/leadsx"), EntityOp::None);
    assert_eq!(EntityOp::classify(&Method::POST, "/leads/1/notes"), EntityOp::None);
    assert_eq!(EntityOp::classify(&Method::PUT, "/leads"), EntityOp::None);
    assert_eq!(EntityOp::classify(&Method::POST, "/auth/login"), EntityOp::None);
  }

  #[test]
  fn test_lead_list_accepts_array_or_wrapper() {
    let bare = serde_json::json!([{"id": 1}]);
    let wrapped = serde_json::json!({"leads": [{"id": 1}], "total": 1});
    assert_eq!(lead_list(&bare).map(Vec::len), Some(1));
    assert_eq!(lead_list(&wrapped).map(Vec::len), Some(1));
    assert!(lead_list(&serde_json::json!({"id": 1})).is_none());
  }
}
