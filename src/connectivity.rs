//! Online/offline state and change subscriptions.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Shared connectivity flag.
///
/// The host application reports transitions with [`set_online`](Self::set_online);
/// consumers either poll [`is_online`](Self::is_online) or subscribe.
#[derive(Clone)]
pub struct Connectivity {
  tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self { tx: Arc::new(tx) }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Record the current state. Returns whether it changed.
  pub fn set_online(&self, online: bool) -> bool {
    let changed = self.tx.send_if_modified(|current| {
      if *current == online {
        false
      } else {
        *current = online;
        true
      }
    });
    if changed {
      info!(online, "connectivity changed");
    }
    changed
  }

  /// Raw receiver for callers that want every state change.
  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }

  /// Run `handler` on every offline → online transition.
  ///
  /// The handler runs on a spawned task that lives until the returned
  /// [`Subscription`] is dropped or unsubscribed. Transitions that happen
  /// while the handler is running are coalesced.
  pub fn on_restored<F, Fut>(&self, handler: F) -> Subscription
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    // Read the starting state now so a change made before the task is first
    // polled still counts as a transition.
    let mut rx = self.tx.subscribe();
    let mut was_online = *rx.borrow_and_update();
    let handle = tokio::spawn(async move {
      while rx.changed().await.is_ok() {
        let online = *rx.borrow_and_update();
        if online && !was_online {
          handler().await;
        }
        was_online = online;
      }
    });

    Subscription { handle }
  }
}

impl Default for Connectivity {
  fn default() -> Self {
    Self::new(true)
  }
}

/// Handle owning a connectivity listener. Dropping it unsubscribes.
pub struct Subscription {
  handle: JoinHandle<()>,
}

impl Subscription {
  pub fn unsubscribe(self) {
    drop(self);
  }

  pub fn is_active(&self) -> bool {
    !self.handle.is_finished()
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.handle.abort();
  }
}
