//! Request orchestrator: the single entry point the application talks to.

use reqwest::Method;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::http::HttpClient;
use super::leads::EntityOp;
use super::types::{ApiEnvelope, ClientOptions, RequestConfig, Response, Status};
use crate::cache::{cache_key, CacheManager};
use crate::clock::{SharedClock, SystemClock};
use crate::config::Config;
use crate::connectivity::{Connectivity, Subscription};
use crate::error::{Error, Result};
use crate::mirror::{entity_id, is_temp_id, temp_id, EntityMirror};
use crate::queue::{OfflineQueue, WriteMethod};
use crate::settings::{Settings, AUTH_TOKEN_KEY};
use crate::store::{SqliteStore, Store};
use crate::sync::{Reconciler, SyncOutcome};

const LOGIN_ENDPOINT: &str = "/auth/login";

/// API client with transparent caching, offline queueing and sync.
///
/// Reads are cache-first with stale fallback; writes made while offline are
/// accepted locally and replayed by the [`Reconciler`] once connectivity
/// returns. Construct one per application and share it by reference or
/// clone (clones share all state).
pub struct ApiClient<S: Store = SqliteStore> {
  http: HttpClient,
  cache: CacheManager<S>,
  queue: OfflineQueue<S>,
  leads: EntityMirror<S>,
  settings: Settings<S>,
  connectivity: Connectivity,
  reconciler: Reconciler<S>,
  clock: SharedClock,
  options: ClientOptions,
}

impl ApiClient<SqliteStore> {
  /// Build a client from configuration on top of an opened store.
  pub fn from_config(
    config: &Config,
    store: SqliteStore,
    connectivity: Connectivity,
  ) -> Result<Self> {
    let http = HttpClient::new(&config.api.base_url)?;
    Self::new(
      http,
      Arc::new(store),
      config.client_options(),
      connectivity,
      Arc::new(SystemClock),
    )
  }
}

impl<S: Store> ApiClient<S> {
  pub fn new(
    http: HttpClient,
    store: Arc<S>,
    options: ClientOptions,
    connectivity: Connectivity,
    clock: SharedClock,
  ) -> Result<Self> {
    store.initialize()?;

    let cache = CacheManager::new(Arc::clone(&store), Arc::clone(&clock));
    let queue = OfflineQueue::new(Arc::clone(&store), Arc::clone(&clock))?;
    let leads = EntityMirror::new(Arc::clone(&store), Arc::clone(&clock))?;
    let settings = Settings::new(store);
    let reconciler = Reconciler::new(
      http.clone(),
      queue.clone(),
      leads.clone(),
      settings.clone(),
      &options,
    );

    Ok(Self {
      http,
      cache,
      queue,
      leads,
      settings,
      connectivity,
      reconciler,
      clock,
      options,
    })
  }

  pub async fn get(&self, endpoint: &str, config: RequestConfig) -> Result<Response> {
    self.request(Method::GET, endpoint, config).await
  }

  pub async fn post(&self, endpoint: &str, config: RequestConfig) -> Result<Response> {
    self.request(Method::POST, endpoint, config).await
  }

  pub async fn put(&self, endpoint: &str, config: RequestConfig) -> Result<Response> {
    self.request(Method::PUT, endpoint, config).await
  }

  pub async fn patch(&self, endpoint: &str, config: RequestConfig) -> Result<Response> {
    self.request(Method::PATCH, endpoint, config).await
  }

  pub async fn delete(&self, endpoint: &str, config: RequestConfig) -> Result<Response> {
    self.request(Method::DELETE, endpoint, config).await
  }

  /// Dispatch a request through the read or write path.
  pub async fn request(
    &self,
    method: Method,
    endpoint: &str,
    config: RequestConfig,
  ) -> Result<Response> {
    if method == Method::GET {
      return self.read(endpoint, &config).await;
    }
    let op = EntityOp::classify(&method, endpoint);
    self.write(method, endpoint, config, op).await
  }

  /// Authenticate and persist the returned bearer token.
  pub async fn login(&self, email: &str, password: &str) -> Result<Response> {
    if !self.connectivity.is_online() {
      return Err(Error::Offline("login".to_string()));
    }

    let config = RequestConfig::default().with_body(json!({
      "email": email,
      "password": password,
    }));
    let envelope = self
      .send_with_retry(&Method::POST, LOGIN_ENDPOINT, &config)
      .await?;
    let data = envelope.data.unwrap_or(Value::Null);

    let token = data
      .get("token")
      .and_then(Value::as_str)
      .ok_or_else(|| Error::Rejected("login response did not include a token".to_string()))?;
    self.settings.set(AUTH_TOKEN_KEY, &token)?;

    info!(email, "logged in");
    Ok(Response::from_network(data, envelope.message))
  }

  /// Forget the token and every piece of local data, pending writes included.
  pub fn logout(&self) -> Result<()> {
    let pending = self.queue.len()?;
    if pending > 0 {
      warn!(pending, "discarding queued writes on logout");
    }

    self.settings.clear()?;
    self.cache.clear()?;
    self.queue.clear()?;
    self.leads.clear()?;
    info!("logged out");
    Ok(())
  }

  /// Run one reconciliation pass now.
  pub async fn sync_offline_data(&self) -> Result<SyncOutcome> {
    self.reconciler.run().await
  }

  pub fn clear_cache(&self) -> Result<usize> {
    let removed = self.cache.clear()?;
    info!(removed, "cleared response cache");
    Ok(removed)
  }

  pub fn status(&self) -> Result<Status> {
    Ok(Status {
      online: self.connectivity.is_online(),
      queued: self.queue.len()?,
      unsynced: self.leads.list_unsynced()?.len(),
      cached: self.cache.len()?,
    })
  }

  /// Reconcile automatically whenever connectivity is restored.
  ///
  /// Listening stops when the returned subscription is dropped.
  pub fn watch_connectivity(&self) -> Subscription {
    let reconciler = self.reconciler.clone();
    self.connectivity.on_restored(move || {
      let reconciler = reconciler.clone();
      async move {
        if let Err(e) = reconciler.run().await {
          warn!(error = %e, "background sync failed");
        }
      }
    })
  }

  pub fn connectivity(&self) -> &Connectivity {
    &self.connectivity
  }

  pub fn cache(&self) -> &CacheManager<S> {
    &self.cache
  }

  pub fn queue(&self) -> &OfflineQueue<S> {
    &self.queue
  }

  pub fn leads(&self) -> &EntityMirror<S> {
    &self.leads
  }

  pub fn settings(&self) -> &Settings<S> {
    &self.settings
  }

  pub fn reconciler(&self) -> &Reconciler<S> {
    &self.reconciler
  }

  /// Cache-first read.
  ///
  /// 1. Fresh cache entry: serve it
  /// 2. Offline: serve any cache entry as stale, or fail with `NoCacheOffline`
  /// 3. Online: fetch with retries and cache the result
  /// 4. Retries exhausted or HTTP error status: serve any cache entry as stale
  async fn read(&self, endpoint: &str, config: &RequestConfig) -> Result<Response> {
    let key = cache_key(Method::GET.as_str(), endpoint, config.body.as_ref());
    let max_age = config.max_age.unwrap_or(self.options.cache_max_age);

    if config.use_cache {
      if let Some(entry) = self.cache.get_stale(&key)? {
        if entry.is_fresh(self.clock.now_millis(), max_age) {
          debug!(endpoint, "served from cache");
          return Ok(Response::from_cache(entry, false));
        }
      }
    }

    if !self.connectivity.is_online() {
      return match self.cache.get_stale(&key)? {
        Some(entry) => {
          warn!(endpoint, "offline, serving stale cache");
          Ok(Response::from_cache(entry, true))
        }
        None => Err(Error::NoCacheOffline(endpoint.to_string())),
      };
    }

    match self.send_with_retry(&Method::GET, endpoint, config).await {
      Ok(envelope) => {
        let data = envelope.data.unwrap_or(Value::Null);
        if config.use_cache {
          let ttl = config.ttl.unwrap_or(self.options.cache_ttl);
          self.cache.set(&key, data.clone(), ttl)?;
        }
        Ok(Response::from_network(data, envelope.message))
      }
      Err(e) if e.allows_stale_fallback() => match self.cache.get_stale(&key)? {
        Some(entry) => {
          warn!(endpoint, error = %e, "request failed, serving stale cache");
          Ok(Response::from_cache(entry, true))
        }
        None => Err(e),
      },
      Err(e) => Err(e),
    }
  }

  /// Write path. Offline writes are queued; online failures are surfaced.
  pub(super) async fn write(
    &self,
    method: Method,
    endpoint: &str,
    config: RequestConfig,
    op: EntityOp,
  ) -> Result<Response> {
    if !self.connectivity.is_online() {
      return self.write_offline(&method, endpoint, config.body, op);
    }

    // A lead still known by its temp id is addressed by its server id once
    // the create has synced, and queued behind the create until then.
    let temp = match &op {
      EntityOp::Update(id) | EntityOp::Delete(id) if is_temp_id(id) => Some(id.clone()),
      _ => None,
    };
    let mut endpoint = endpoint.to_string();
    let mut op = op;
    if let Some(temp) = temp {
      match self.settings.resolve_remap(&temp)? {
        Some(server_id) => {
          endpoint = endpoint.replacen(&temp, &server_id, 1);
          op = EntityOp::classify(&method, &endpoint);
        }
        None if self.create_pending(&temp)? => {
          debug!(id = %temp, "lead not synced yet, queueing write behind its create");
          return self.write_offline(&method, &endpoint, config.body, op);
        }
        None => {}
      }
    }
    let endpoint = endpoint.as_str();

    let envelope = self.send_with_retry(&method, endpoint, &config).await?;
    let data = envelope.data.unwrap_or(Value::Null);

    match &op {
      EntityOp::Create | EntityOp::Update(_) if entity_id(&data).is_some() => {
        self.leads.store(data.clone())?;
      }
      EntityOp::Delete(id) => {
        self.leads.remove(id)?;
      }
      _ => {}
    }

    Ok(Response::from_network(data, envelope.message))
  }

  fn write_offline(
    &self,
    method: &Method,
    endpoint: &str,
    body: Option<Value>,
    op: EntityOp,
  ) -> Result<Response> {
    let write_method = WriteMethod::try_from(method)?;

    match op {
      EntityOp::Create => {
        let record = self
          .leads
          .store_local(body.clone().unwrap_or_else(|| json!({})))?;
        self
          .queue
          .enqueue(write_method, endpoint, body, Some(record.id.clone()))?;
        Ok(Response::queued(record.data))
      }
      EntityOp::Update(id) => {
        let base = match self.leads.get(&id)? {
          Some(existing) => existing.data,
          None => json!({}),
        };
        let merged = with_id(merge_fields(base, body.as_ref()), &id);
        let record = self.leads.store(merged)?;
        self.queue.enqueue(write_method, endpoint, body, None)?;
        Ok(Response::queued(record.data))
      }
      EntityOp::Delete(id) => {
        self.leads.remove(&id)?;
        self.queue.enqueue(write_method, endpoint, body, None)?;
        Ok(Response::queued(json!({ "id": id })))
      }
      EntityOp::None => {
        let item = self
          .queue
          .enqueue(write_method, endpoint, body.clone(), None)?;
        let data = with_id(body.unwrap_or_else(|| json!({})), &temp_id(item.timestamp));
        Ok(Response::queued(data))
      }
    }
  }

  /// Send with per-attempt timeout and exponential backoff.
  ///
  /// Only transient failures are retried; an HTTP status or a rejected
  /// envelope is returned after the first occurrence.
  async fn send_with_retry(
    &self,
    method: &Method,
    endpoint: &str,
    config: &RequestConfig,
  ) -> Result<ApiEnvelope> {
    let attempts = config
      .max_attempts
      .unwrap_or(self.options.max_attempts)
      .max(1);
    let timeout = config.timeout.unwrap_or(self.options.timeout);
    let token = self.token()?;

    let mut attempt = 0;
    loop {
      let result = self
        .http
        .send(
          method.clone(),
          endpoint,
          config.body.as_ref(),
          token.as_deref(),
          timeout,
        )
        .await;

      match result {
        Err(e) if e.is_retryable() && attempt + 1 < attempts => {
          let delay = backoff_delay(self.options.backoff_base, attempt);
          warn!(
            %method,
            endpoint,
            attempt = attempt + 1,
            error = %e,
            "request failed, retrying in {:?}",
            delay
          );
          tokio::time::sleep(delay).await;
          attempt += 1;
        }
        other => return other,
      }
    }
  }

  /// Whether a temp-id lead is still waiting for its create to sync.
  fn create_pending(&self, temp_id: &str) -> Result<bool> {
    if self.leads.get(temp_id)?.is_some() {
      return Ok(true);
    }
    Ok(
      self
        .queue
        .list()?
        .iter()
        .any(|item| item.entity_id.as_deref() == Some(temp_id)),
    )
  }

  fn token(&self) -> Result<Option<String>> {
    Ok(self.settings.auth_token()?.or_else(|| self.options.token.clone()))
  }
}

impl<S: Store> Clone for ApiClient<S> {
  fn clone(&self) -> Self {
    Self {
      http: self.http.clone(),
      cache: self.cache.clone(),
      queue: self.queue.clone(),
      leads: self.leads.clone(),
      settings: self.settings.clone(),
      connectivity: self.connectivity.clone(),
      reconciler: self.reconciler.clone(),
      clock: Arc::clone(&self.clock),
      options: self.options.clone(),
    }
  }
}

/// Wait before retry number `attempt + 1`: `base * 2^attempt`.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
  base.saturating_mul(2u32.saturating_pow(attempt))
}

/// Shallow-merge `patch` into `base`; a non-object patch replaces it.
fn merge_fields(base: Value, patch: Option<&Value>) -> Value {
  match (base, patch) {
    (Value::Object(mut fields), Some(Value::Object(changes))) => {
      for (key, value) in changes {
        fields.insert(key.clone(), value.clone());
      }
      Value::Object(fields)
    }
    (base, None) => base,
    (_, Some(patch)) => patch.clone(),
  }
}

fn with_id(value: Value, id: &str) -> Value {
  let mut fields = match value {
    Value::Object(fields) => fields,
    Value::Null => Map::new(),
    other => {
      let mut fields = Map::new();
      fields.insert("data".to_string(), other);
      fields
    }
  };
  fields.insert("id".to_string(), Value::String(id.to_string()));
  Value::Object(fields)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::types::Source;
  use crate::clock::ManualClock;
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn options() -> ClientOptions {
    ClientOptions {
      timeout: Duration::from_millis(200),
      backoff_base: Duration::from_millis(1),
      ..ClientOptions::default()
    }
  }

  struct Harness {
    server: MockServer,
    clock: Arc<ManualClock>,
    client: ApiClient,
  }

  async fn setup(online: bool) -> Harness {
    let server = MockServer::start().await;
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let shared: SharedClock = clock.clone();
    let client = ApiClient::new(
      HttpClient::new(&format!("{}/api", server.uri())).unwrap(),
      Arc::new(SqliteStore::open_in_memory().unwrap()),
      options(),
      Connectivity::new(online),
      shared,
    )
    .unwrap();
    Harness {
      server,
      clock,
      client,
    }
  }

  fn ok(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": data}))
  }

  async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.unwrap_or_default().len()
  }

  #[tokio::test]
  async fn test_get_populates_cache_and_serves_hit() {
    let h = setup(true).await;
    Mock::given(method("GET"))
      .and(path("/api/leads"))
      .respond_with(ok(json!([{"id": 1}])))
      .expect(1)
      .mount(&h.server)
      .await;

    let first = h.client.get("/leads", RequestConfig::default()).await.unwrap();
    assert_eq!(first.source, Source::Network);

    let second = h.client.get("/leads", RequestConfig::default()).await.unwrap();
    assert_eq!(second.source, Source::CacheFresh);
    assert_eq!(second.data, json!([{"id": 1}]));
  }

  #[tokio::test]
  async fn test_expired_cache_is_refetched() {
    let h = setup(true).await;
    Mock::given(method("GET"))
      .and(path("/api/leads"))
      .respond_with(ok(json!([])))
      .expect(2)
      .mount(&h.server)
      .await;

    let config = RequestConfig::default().with_max_age(Duration::from_secs(60));
    h.client.get("/leads", config.clone()).await.unwrap();
    h.clock.advance(Duration::from_secs(61));
    let response = h.client.get("/leads", config).await.unwrap();
    assert_eq!(response.source, Source::Network);
  }

  #[tokio::test]
  async fn test_offline_get_serves_stale_or_fails() {
    let h = setup(true).await;
    Mock::given(method("GET"))
      .and(path("/api/leads"))
      .respond_with(ok(json!([{"id": 1}])))
      .mount(&h.server)
      .await;

    h.client.get("/leads", RequestConfig::default()).await.unwrap();
    h.clock.advance(Duration::from_secs(3600));
    h.client.connectivity().set_online(false);

    let stale = h.client.get("/leads", RequestConfig::default()).await.unwrap();
    assert_eq!(stale.source, Source::CacheStale);
    assert!(stale.is_stale());
    assert_eq!(stale.data, json!([{"id": 1}]));

    let missing = h.client.get("/campaigns", RequestConfig::default()).await;
    assert!(matches!(missing, Err(Error::NoCacheOffline(_))));
    assert_eq!(request_count(&h.server).await, 1);
  }

  #[tokio::test]
  async fn test_timeouts_are_retried_then_fall_back_to_stale_cache() {
    let h = setup(true).await;
    h.client
      .cache()
      .set(
        &cache_key("GET", "/leads", None),
        json!(["cached"]),
        Duration::from_secs(86_400),
      )
      .unwrap();
    h.clock.advance(Duration::from_secs(600));

    Mock::given(method("GET"))
      .and(path("/api/leads"))
      .respond_with(ok(json!(["fresh"])).set_delay(Duration::from_millis(500)))
      .expect(3)
      .mount(&h.server)
      .await;

    let response = h.client.get("/leads", RequestConfig::default()).await.unwrap();
    assert_eq!(response.source, Source::CacheStale);
    assert_eq!(response.data, json!(["cached"]));
  }

  #[tokio::test]
  async fn test_exhausted_get_without_cache_fails() {
    let h = setup(true).await;
    Mock::given(method("GET"))
      .and(path("/api/leads"))
      .respond_with(ok(json!([])).set_delay(Duration::from_millis(500)))
      .expect(2)
      .mount(&h.server)
      .await;

    let config = RequestConfig::default().with_max_attempts(2);
    let result = h.client.get("/leads", config).await;
    assert!(matches!(result, Err(Error::NetworkTimeout(_))));
  }

  #[tokio::test]
  async fn test_http_errors_are_not_retried() {
    let h = setup(true).await;
    Mock::given(method("GET"))
      .and(path("/api/leads"))
      .respond_with(ResponseTemplate::new(500))
      .expect(1)
      .mount(&h.server)
      .await;

    let result = h.client.get("/leads", RequestConfig::default()).await;
    assert!(matches!(result, Err(Error::Http { status: 500, .. })));
  }

  #[tokio::test]
  async fn test_online_write_failure_is_surfaced_not_queued() {
    let h = setup(true).await;
    Mock::given(method("POST"))
      .and(path("/api/leads"))
      .respond_with(ResponseTemplate::new(503))
      .expect(1)
      .mount(&h.server)
      .await;

    let result = h.client.create_lead(json!({"name": "A"})).await;
    assert!(matches!(result, Err(Error::Http { status: 503, .. })));
    assert_eq!(h.client.queue().len().unwrap(), 0);
    assert!(h.client.leads().list().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_write_responses_are_never_cached() {
    let h = setup(true).await;
    Mock::given(method("POST"))
      .and(path("/api/notes"))
      .respond_with(ok(json!({"id": "n1"})))
      .mount(&h.server)
      .await;

    let body = json!({"text": "hi"});
    let response = h
      .client
      .post("/notes", RequestConfig::default().with_body(body))
      .await
      .unwrap();
    assert_eq!(response.source, Source::Network);
    assert!(h.client.cache().is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_offline_write_returns_temp_id_and_queues_once() {
    let h = setup(false).await;

    let response = h
      .client
      .post(
        "/notes",
        RequestConfig::default().with_body(json!({"text": "hi"})),
      )
      .await
      .unwrap();

    assert!(response.is_queued());
    assert!(is_temp_id(&response.id().unwrap()));
    assert_eq!(response.data["text"], "hi");
    assert_eq!(h.client.queue().len().unwrap(), 1);
    assert_eq!(request_count(&h.server).await, 0);
  }

  #[tokio::test]
  async fn test_offline_create_lead_mirrors_temp_record() {
    let h = setup(false).await;

    let response = h.client.create_lead(json!({"name": "A"})).await.unwrap();
    let id = response.id().unwrap();

    assert!(is_temp_id(&id));
    assert_eq!(response.data["name"], "A");
    assert_eq!(h.client.queue().len().unwrap(), 1);

    let item = &h.client.queue().list().unwrap()[0];
    assert_eq!(item.entity_id.as_deref(), Some(id.as_str()));
    assert_eq!(item.data, Some(json!({"name": "A"})));
    assert!(!h.client.leads().get(&id).unwrap().unwrap().synced);
  }

  #[tokio::test]
  async fn test_offline_update_and_delete_touch_the_mirror() {
    let h = setup(false).await;
    h.client
      .leads()
      .store(json!({"id": "srv-1", "name": "A", "status": "new"}))
      .unwrap();

    let updated = h
      .client
      .update_lead("srv-1", json!({"status": "contacted"}))
      .await
      .unwrap();
    assert_eq!(
      updated.data,
      json!({"id": "srv-1", "name": "A", "status": "contacted"})
    );

    h.client.delete_lead("srv-1").await.unwrap();
    assert!(h.client.leads().get("srv-1").unwrap().is_none());

    let methods: Vec<WriteMethod> = h
      .client
      .queue()
      .list()
      .unwrap()
      .into_iter()
      .map(|i| i.method)
      .collect();
    assert_eq!(methods, vec![WriteMethod::Put, WriteMethod::Delete]);
  }

  #[tokio::test]
  async fn test_get_leads_refreshes_mirror_and_falls_back_to_it() {
    let h = setup(true).await;
    Mock::given(method("GET"))
      .and(path("/api/leads"))
      .respond_with(ok(json!([{"_id": "srv-1", "name": "A"}])))
      .mount(&h.server)
      .await;

    h.client.get_leads().await.unwrap();
    assert!(h.client.leads().get("srv-1").unwrap().is_some());

    h.client.clear_cache().unwrap();
    h.client.connectivity().set_online(false);
    let offline = h.client.get_leads().await.unwrap();
    assert_eq!(offline.source, Source::Mirror);
    assert_eq!(offline.data, json!([{"_id": "srv-1", "name": "A"}]));
  }

  #[tokio::test]
  async fn test_login_stores_token_used_by_later_requests() {
    let h = setup(true).await;
    Mock::given(method("POST"))
      .and(path("/api/auth/login"))
      .respond_with(ok(json!({"token": "tok-1", "user": {"email": "a@b.c"}})))
      .mount(&h.server)
      .await;
    Mock::given(method("GET"))
      .and(path("/api/leads"))
      .and(wiremock::matchers::header("authorization", "Bearer tok-1"))
      .respond_with(ok(json!([])))
      .expect(1)
      .mount(&h.server)
      .await;

    h.client.login("a@b.c", "pw").await.unwrap();
    assert_eq!(
      h.client.settings().auth_token().unwrap().as_deref(),
      Some("tok-1")
    );
    h.client.get("/leads", RequestConfig::default()).await.unwrap();
  }

  #[tokio::test]
  async fn test_login_requires_connectivity() {
    let h = setup(false).await;
    let result = h.client.login("a@b.c", "pw").await;
    assert!(matches!(result, Err(Error::Offline(_))));
  }

  #[tokio::test]
  async fn test_logout_clears_local_state() {
    let h = setup(false).await;
    h.client.settings().set(AUTH_TOKEN_KEY, &"tok").unwrap();
    h.client.create_lead(json!({"name": "A"})).await.unwrap();
    h.client
      .cache()
      .set("k", json!(1), Duration::from_secs(60))
      .unwrap();

    h.client.logout().unwrap();

    let status = h.client.status().unwrap();
    assert_eq!(
      status,
      Status {
        online: false,
        queued: 0,
        unsynced: 0,
        cached: 0
      }
    );
    assert_eq!(h.client.settings().auth_token().unwrap(), None);
  }

  #[tokio::test]
  async fn test_offline_create_then_reconnect_reconciles() {
    let h = setup(false).await;
    Mock::given(method("POST"))
      .and(path("/api/leads"))
      .respond_with(ok(json!({"_id": "srv-1", "name": "A"})))
      .expect(1)
      .mount(&h.server)
      .await;

    let created = h.client.create_lead(json!({"name": "A"})).await.unwrap();
    let temp = created.id().unwrap();
    assert!(is_temp_id(&temp));
    assert_eq!(h.client.queue().len().unwrap(), 1);

    h.client.connectivity().set_online(true);
    let outcome = h.client.sync_offline_data().await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Completed(_)));

    assert_eq!(h.client.queue().len().unwrap(), 0);
    let leads = h.client.leads().list().unwrap();
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0].id, "srv-1");
    assert!(leads[0].synced);
    assert!(h.client.leads().get(&temp).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_watch_connectivity_reconciles_on_restore() {
    let h = setup(false).await;
    Mock::given(method("POST"))
      .and(path("/api/leads"))
      .respond_with(ok(json!({"_id": "srv-7", "name": "B"})))
      .expect(1)
      .mount(&h.server)
      .await;

    let subscription = h.client.watch_connectivity();
    h.client.create_lead(json!({"name": "B"})).await.unwrap();

    h.client.connectivity().set_online(true);
    for _ in 0..50 {
      if h.client.queue().is_empty().unwrap() {
        break;
      }
      tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(h.client.queue().is_empty().unwrap());
    assert!(h.client.leads().get("srv-7").unwrap().is_some());
    subscription.unsubscribe();
  }

  #[tokio::test]
  async fn test_http_error_falls_back_to_stale_cache_without_retry() {
    let h = setup(true).await;
    h.client
      .cache()
      .set(
        &cache_key("GET", "/leads", None),
        json!(["cached"]),
        Duration::from_secs(86_400),
      )
      .unwrap();
    h.clock.advance(Duration::from_secs(600));

    Mock::given(method("GET"))
      .and(path("/api/leads"))
      .respond_with(ResponseTemplate::new(500))
      .expect(1)
      .mount(&h.server)
      .await;

    let response = h.client.get("/leads", RequestConfig::default()).await.unwrap();
    assert_eq!(response.source, Source::CacheStale);
    assert_eq!(response.data, json!(["cached"]));
  }

  #[test]
  fn test_backoff_doubles_per_attempt() {
    let base = Duration::from_millis(100);
    assert_eq!(backoff_delay(base, 0), Duration::from_millis(100));
    assert_eq!(backoff_delay(base, 1), Duration::from_millis(200));
    assert_eq!(backoff_delay(base, 2), Duration::from_millis(400));
    assert!(backoff_delay(base, 40) > Duration::from_secs(3600));
  }

  #[tokio::test]
  async fn test_retries_wait_with_exponential_backoff() {
    let client = ApiClient::new(
      HttpClient::new("http://127.0.0.1:9/api").unwrap(),
      Arc::new(SqliteStore::open_in_memory().unwrap()),
      ClientOptions {
        timeout: Duration::from_millis(200),
        max_attempts: 4,
        backoff_base: Duration::from_millis(40),
        ..ClientOptions::default()
      },
      Connectivity::new(true),
      Arc::new(ManualClock::new(1_700_000_000_000)),
    )
    .unwrap();

    let started = std::time::Instant::now();
    let result = client
      .get("/leads", RequestConfig::default().without_cache())
      .await;

    assert!(result.unwrap_err().is_retryable());
    // 40 + 80 + 160 ms between four attempts; linear spacing would be 120 ms
    assert!(started.elapsed() >= Duration::from_millis(280));
  }

  #[tokio::test]
  async fn test_online_write_to_unsynced_lead_queues_behind_create() {
    let h = setup(false).await;
    let created = h.client.create_lead(json!({"name": "Ada"})).await.unwrap();
    let temp = created.id().unwrap();

    h.client.connectivity().set_online(true);
    let updated = h
      .client
      .update_lead(&temp, json!({"name": "Ada L."}))
      .await
      .unwrap();

    assert!(updated.is_queued());
    assert_eq!(h.client.queue().len().unwrap(), 2);
    assert_eq!(request_count(&h.server).await, 0);

    Mock::given(method("POST"))
      .and(path("/api/leads"))
      .respond_with(ok(json!({"id": "srv-9", "name": "Ada"})))
      .expect(1)
      .mount(&h.server)
      .await;
    Mock::given(method("PUT"))
      .and(path("/api/leads/srv-9"))
      .respond_with(ok(json!({"id": "srv-9", "name": "Ada L."})))
      .expect(1)
      .mount(&h.server)
      .await;

    h.client.sync_offline_data().await.unwrap();
    assert!(h.client.queue().is_empty().unwrap());
    assert_eq!(
      h.client.leads().get("srv-9").unwrap().unwrap().data["name"],
      json!("Ada L.")
    );
  }

  #[tokio::test]
  async fn test_online_write_to_synced_temp_id_uses_server_id() {
    let h = setup(true).await;
    h.client.settings().record_remap("temp-5", "srv-5").unwrap();
    h.client.leads().store(json!({"id": "srv-5"})).unwrap();
    Mock::given(method("DELETE"))
      .and(path("/api/leads/srv-5"))
      .respond_with(ok(json!(null)))
      .expect(1)
      .mount(&h.server)
      .await;

    let response = h.client.delete_lead("temp-5").await.unwrap();
    assert_eq!(response.source, Source::Network);
    assert!(h.client.leads().get("srv-5").unwrap().is_none());
  }

  #[tokio::test]
  async fn test_get_leads_drops_leads_the_server_no_longer_returns() {
    let h = setup(true).await;
    h.client.leads().store(json!({"id": "old"})).unwrap();
    let local = h.client.leads().store_local(json!({"name": "L"})).unwrap();
    Mock::given(method("GET"))
      .and(path("/api/leads"))
      .respond_with(ok(json!({"leads": [{"id": "a"}]})))
      .mount(&h.server)
      .await;

    h.client.get_leads().await.unwrap();

    let mut ids: Vec<String> = h
      .client
      .leads()
      .list()
      .unwrap()
      .into_iter()
      .map(|r| r.id)
      .collect();
    ids.sort();
    let mut expected = vec!["a".to_string(), local.id];
    expected.sort();
    assert_eq!(ids, expected);
  }

  #[test]
  fn test_merge_fields_overlays_changes() {
    let merged = merge_fields(json!({"a": 1, "b": 2}), Some(&json!({"b": 3, "c": 4})));
    assert_eq!(merged, json!({"a": 1, "b": 3, "c": 4}));
    assert_eq!(merge_fields(json!({"a": 1}), None), json!({"a": 1}));
  }

  #[test]
  fn test_with_id_wraps_non_objects() {
    assert_eq!(with_id(Value::Null, "temp-1"), json!({"id": "temp-1"}));
    assert_eq!(
      with_id(json!([1]), "temp-1"),
      json!({"id": "temp-1", "data": [1]})
    );
  }
}
