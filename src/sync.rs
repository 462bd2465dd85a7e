//! Reconciliation of offline writes once connectivity returns.
//!
//! A pass first replays the offline queue oldest-first, then pushes mirrored
//! entities that still carry a temp id and have no queued create. Failures
//! leave the item or record in place for the next pass; they are logged and
//! counted in the [`SyncReport`] but never returned as errors. Only storage
//! failures abort a pass.

use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::api::{ClientOptions, EntityOp, HttpClient, LEADS_ENDPOINT};
use crate::error::Result;
use crate::mirror::{entity_id, is_temp_id, EntityMirror};
use crate::queue::{OfflineQueue, QueueItem};
use crate::settings::Settings;
use crate::store::{SqliteStore, Store};

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
  /// Queue items accepted by the server and removed
  pub replayed: usize,
  /// Queue items that failed and stay queued
  pub failed: usize,
  /// Queue items waiting on an entity that has no server id yet
  pub deferred: usize,
  /// Queue items and temp entities given up on: past the attempt ceiling,
  /// depending on an abandoned entity, or referring to one that is gone
  pub dropped: usize,
  /// Temp entities replaced by server records
  pub entities_synced: usize,
  /// Temp entities whose create failed
  pub entities_failed: usize,
}

impl SyncReport {
  /// True when nothing was left behind for a later pass.
  pub fn is_clean(&self) -> bool {
    self.failed == 0 && self.deferred == 0 && self.entities_failed == 0
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
  Completed(SyncReport),
  /// Another pass was already running; this request was dropped
  Skipped,
}

/// Releases the single-flight latch when a pass ends, however it ends.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
  fn drop(&mut self) {
    self.0.store(false, Ordering::SeqCst);
  }
}

/// Sync reconciler with a single-flight latch.
pub struct Reconciler<S: Store = SqliteStore> {
  http: HttpClient,
  queue: OfflineQueue<S>,
  leads: EntityMirror<S>,
  settings: Settings<S>,
  timeout: Duration,
  fallback_token: Option<String>,
  max_item_attempts: Option<u32>,
  running: Arc<AtomicBool>,
  attempts: Arc<Mutex<HashMap<String, u32>>>,
}

impl<S: Store> Reconciler<S> {
  pub fn new(
    http: HttpClient,
    queue: OfflineQueue<S>,
    leads: EntityMirror<S>,
    settings: Settings<S>,
    options: &ClientOptions,
  ) -> Self {
    Self {
      http,
      queue,
      leads,
      settings,
      timeout: options.timeout,
      fallback_token: options.token.clone(),
      max_item_attempts: options.max_item_attempts,
      running: Arc::new(AtomicBool::new(false)),
      attempts: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  pub fn is_running(&self) -> bool {
    self.running.load(Ordering::SeqCst)
  }

  /// Run one pass, or return `Skipped` if a pass is already running.
  pub async fn run(&self) -> Result<SyncOutcome> {
    if self
      .running
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      debug!("sync already running, dropping request");
      return Ok(SyncOutcome::Skipped);
    }
    let _guard = RunningGuard(Arc::clone(&self.running));

    let token = self
      .settings
      .auth_token()?
      .or_else(|| self.fallback_token.clone());
    let mut report = SyncReport::default();

    self.drain_queue(token.as_deref(), &mut report).await?;
    self.push_unsynced(token.as_deref(), &mut report).await?;
    self.forget_settled_remaps()?;

    info!(
      replayed = report.replayed,
      failed = report.failed,
      deferred = report.deferred,
      dropped = report.dropped,
      entities_synced = report.entities_synced,
      entities_failed = report.entities_failed,
      "sync pass finished"
    );
    Ok(SyncOutcome::Completed(report))
  }

  async fn drain_queue(&self, token: Option<&str>, report: &mut SyncReport) -> Result<()> {
    // Items removed mid-pass along with an abandoned entity.
    let mut discarded = HashSet::new();

    for item in self.queue.list()? {
      if discarded.contains(&item.id) {
        continue;
      }

      let url = self.resolve_url(&item.url)?;
      let unresolved: Vec<&str> = url.split('/').filter(|s| is_temp_id(s)).collect();
      if !unresolved.is_empty() {
        if self.can_resolve(&unresolved)? {
          debug!(id = %item.id, url = %url, "waiting for referenced entity to sync");
          report.deferred += 1;
        } else {
          warn!(id = %item.id, url = %url, "dropping queued write for an entity that will never sync");
          self.queue.remove(&item.id)?;
          self.forget_attempts(&item.id);
          report.dropped += 1;
        }
        continue;
      }

      let result = self
        .http
        .send(
          item.method.to_method(),
          &url,
          item.data.as_ref(),
          token,
          self.timeout,
        )
        .await;

      match result {
        Ok(envelope) => {
          self.queue.remove(&item.id)?;
          self.forget_attempts(&item.id);
          report.replayed += 1;
          debug!(id = %item.id, method = %item.method, url = %url, "replayed queued write");
          self.apply_replayed(&item, &url, envelope.data, report)?;
        }
        Err(e) => {
          warn!(
            id = %item.id,
            method = %item.method,
            url = %url,
            error = %e,
            "queued write failed"
          );
          if self.attempts_exhausted(&item.id) {
            warn!(id = %item.id, "dropping queued write after too many attempts");
            self.queue.remove(&item.id)?;
            report.dropped += 1;
            if let Some(temp_id) = item.entity_id.as_deref() {
              report.dropped += self.abandon_entity(temp_id, &mut discarded)?;
            }
          } else {
            report.failed += 1;
          }
        }
      }
    }
    Ok(())
  }

  /// Mirror the effect of a replayed write.
  fn apply_replayed(
    &self,
    item: &QueueItem,
    url: &str,
    data: Option<Value>,
    report: &mut SyncReport,
  ) -> Result<()> {
    if let Some(temp_id) = item.entity_id.as_deref() {
      if self.confirm_entity(temp_id, data)? {
        report.entities_synced += 1;
      }
      return Ok(());
    }

    match EntityOp::classify(&item.method.to_method(), url) {
      EntityOp::Update(_) => {
        if let Some(entity) = data.filter(|d| entity_id(d).is_some()) {
          self.leads.store(entity)?;
        }
      }
      EntityOp::Delete(id) => {
        self.leads.remove(&id)?;
      }
      _ => {}
    }
    Ok(())
  }

  async fn push_unsynced(&self, token: Option<&str>, report: &mut SyncReport) -> Result<()> {
    let unsynced = self.leads.list_unsynced()?;
    if unsynced.is_empty() {
      return Ok(());
    }

    // Records with a queued create are handled by the queue replay.
    let pending: HashSet<String> = self
      .queue
      .list()?
      .into_iter()
      .filter_map(|item| item.entity_id)
      .collect();

    for record in unsynced {
      if pending.contains(&record.id) {
        continue;
      }

      let body = without_id(&record.data);
      let result = self
        .http
        .send(Method::POST, LEADS_ENDPOINT, Some(&body), token, self.timeout)
        .await;

      match result {
        Ok(envelope) => {
          self.forget_attempts(&record.id);
          if self.confirm_entity(&record.id, envelope.data)? {
            report.entities_synced += 1;
          } else {
            report.entities_failed += 1;
          }
        }
        Err(e) => {
          warn!(id = %record.id, error = %e, "failed to push unsynced entity");
          if self.attempts_exhausted(&record.id) {
            warn!(id = %record.id, "discarding local entity after too many attempts");
            self.leads.remove(&record.id)?;
            report.dropped += 1;
          } else {
            report.entities_failed += 1;
          }
        }
      }
    }
    Ok(())
  }

  /// Swap a temp record for the server entity and remember the id mapping.
  ///
  /// A create the server accepted without returning an id cannot be mapped;
  /// the temp record is dropped so it is not created a second time.
  fn confirm_entity(&self, temp_id: &str, data: Option<Value>) -> Result<bool> {
    let confirmed = data.and_then(|d| entity_id(&d).map(|id| (id, d)));
    let Some((server_id, entity)) = confirmed else {
      warn!(temp_id, "server accepted create without returning an id");
      self.leads.remove(temp_id)?;
      return Ok(false);
    };

    self.settings.record_remap(temp_id, &server_id)?;
    if self.leads.get(temp_id)?.is_some() {
      self.leads.replace(temp_id, entity)?;
    }
    Ok(true)
  }

  /// Whether every temp id can still get a server id, through a queued create
  /// or a local record the mirror push will create.
  fn can_resolve(&self, temp_ids: &[&str]) -> Result<bool> {
    let creates: HashSet<String> = self
      .queue
      .list()?
      .into_iter()
      .filter_map(|item| item.entity_id)
      .collect();
    for temp_id in temp_ids {
      if !creates.contains(*temp_id) && self.leads.get(temp_id)?.is_none() {
        return Ok(false);
      }
    }
    Ok(true)
  }

  /// Give up on a temp entity whose create was dropped: remove its local
  /// record and every queued write that refers to it. Returns the number of
  /// queue items removed.
  fn abandon_entity(&self, temp_id: &str, discarded: &mut HashSet<String>) -> Result<usize> {
    self.leads.remove(temp_id)?;
    let mut removed = 0;
    for item in self.queue.list()? {
      if item.references(temp_id) && self.queue.remove(&item.id)? {
        self.forget_attempts(&item.id);
        discarded.insert(item.id);
        removed += 1;
      }
    }
    warn!(temp_id, removed, "abandoned local entity and its queued writes");
    Ok(removed)
  }

  /// Rewrite temp ids in a url to their server ids where known.
  fn resolve_url(&self, url: &str) -> Result<String> {
    let mut segments = Vec::new();
    for segment in url.split('/') {
      let resolved = if is_temp_id(segment) {
        self.settings.resolve_remap(segment)?
      } else {
        None
      };
      segments.push(resolved.unwrap_or_else(|| segment.to_string()));
    }
    Ok(segments.join("/"))
  }

  /// Drop remaps no queued write refers to anymore.
  fn forget_settled_remaps(&self) -> Result<()> {
    let items = self.queue.list()?;
    for (temp_id, _) in self.settings.remaps()? {
      if !items.iter().any(|item| item.references(&temp_id)) {
        self.settings.forget_remap(&temp_id)?;
      }
    }
    Ok(())
  }

  fn attempts_exhausted(&self, id: &str) -> bool {
    let Some(max) = self.max_item_attempts else {
      return false;
    };
    let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
    let count = attempts.entry(id.to_string()).or_insert(0);
    *count += 1;
    if *count >= max {
      attempts.remove(id);
      true
    } else {
      false
    }
  }

  fn forget_attempts(&self, id: &str) {
    self
      .attempts
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .remove(id);
  }
}

impl<S: Store> Clone for Reconciler<S> {
  fn clone(&self) -> Self {
    Self {
      http: self.http.clone(),
      queue: self.queue.clone(),
      leads: self.leads.clone(),
      settings: self.settings.clone(),
      timeout: self.timeout,
      fallback_token: self.fallback_token.clone(),
      max_item_attempts: self.max_item_attempts,
      running: Arc::clone(&self.running),
      attempts: Arc::clone(&self.attempts),
    }
  }
}

fn without_id(data: &Value) -> Value {
  let mut body = data.clone();
  if let Some(fields) = body.as_object_mut() {
    fields.remove("id");
  }
  body
}
