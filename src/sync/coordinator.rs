//! Offline sync coordinator: queue failed mutations, replay them in order.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use url::Url;

use super::queue::{MutationStore, QueuedMutation};
use crate::event::Event;
use crate::net::{Credentials, Network, Request, Response};

/// Outcome of one drain round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
  /// Entries confirmed by the server and removed
  pub replayed: usize,
  /// Entries still queued after this round
  pub remaining: usize,
  /// The round ended at an entry that did not succeed
  pub stopped_early: bool,
}

/// Owns the mutation queue.
///
/// Mutations are replayed oldest first, and the round ends at the first one
/// that does not succeed, so a later mutation never commits ahead of an
/// earlier one that is still stuck.
pub struct SyncCoordinator<S: MutationStore> {
  store: Arc<S>,
  network: Arc<dyn Network>,
  origin: Url,
  credentials: Credentials,
  sync_tag: String,
  registrar: Option<mpsc::UnboundedSender<Event>>,
  drain_lock: Arc<Mutex<()>>,
}

impl<S: MutationStore> SyncCoordinator<S> {
  pub fn new(
    store: S,
    network: Arc<dyn Network>,
    origin: Url,
    credentials: Credentials,
    sync_tag: impl Into<String>,
  ) -> Self {
    Self {
      store: Arc::new(store),
      network,
      origin,
      credentials,
      sync_tag: sync_tag.into(),
      registrar: None,
      drain_lock: Arc::new(Mutex::new(())),
    }
  }

  /// Ask the host for a wake-up on the sync tag after each enqueue.
  pub fn with_registrar(mut self, registrar: mpsc::UnboundedSender<Event>) -> Self {
    self.registrar = Some(registrar);
    self
  }

  pub fn sync_tag(&self) -> &str {
    &self.sync_tag
  }

  /// Persist a failed mutation for later replay.
  ///
  /// Never fails: without working storage the mutation is simply lost,
  /// which is the same outcome as having no offline support at all.
  pub fn enqueue(&self, url: &str, method: &str, body: &str) -> Option<i64> {
    let id = match self.store.add(url, method, body, Utc::now()) {
      Ok(id) => {
        tracing::info!(id, url, method, "queued mutation for background sync");
        Some(id)
      }
      Err(e) => {
        tracing::warn!(error = %e, url, "could not persist mutation, dropping it");
        None
      }
    };

    self.register();
    id
  }

  fn register(&self) {
    if let Some(registrar) = &self.registrar {
      if registrar
        .send(Event::SyncRegistered(self.sync_tag.clone()))
        .is_err()
      {
        tracing::debug!(tag = %self.sync_tag, "sync registration not delivered");
      }
    }
  }

  /// Entry point for the host's connectivity-restored signal.
  ///
  /// Signals carrying another tag are ignored.
  pub async fn on_sync(&self, tag: &str) -> Option<DrainReport> {
    if tag != self.sync_tag {
      tracing::debug!(tag, expected = %self.sync_tag, "ignoring sync signal");
      return None;
    }
    Some(self.drain().await)
  }

  /// Replay every queued mutation in id order, stopping at the first failure.
  ///
  /// Only one drain runs at a time, so no entry is replayed twice by
  /// overlapping signals.
  pub async fn drain(&self) -> DrainReport {
    let _guard = self.drain_lock.lock().await;

    let entries = match self.store.get_all() {
      Ok(entries) => entries,
      Err(e) => {
        tracing::warn!(error = %e, "could not read sync queue");
        return DrainReport::default();
      }
    };

    let mut report = DrainReport {
      remaining: entries.len(),
      ..DrainReport::default()
    };

    for entry in entries {
      match self.replay(&entry).await {
        Ok(response) if response.is_success() => {
          match self.store.delete(entry.id) {
            Ok(_) => {
              report.replayed += 1;
              report.remaining -= 1;
              tracing::info!(id = entry.id, url = %entry.url, "replayed queued mutation");
            }
            Err(e) => {
              // Delivered but still queued; stop so it is retried first
              tracing::warn!(id = entry.id, error = %e, "replayed mutation could not be removed");
              report.stopped_early = true;
              break;
            }
          }
        }
        Ok(response) => {
          tracing::info!(id = entry.id, status = response.status, "replay rejected, will retry on next sync");
          report.stopped_early = true;
          break;
        }
        Err(e) => {
          tracing::info!(id = entry.id, error = %e, "still offline, will retry on next sync");
          report.stopped_early = true;
          break;
        }
      }
    }

    report
  }

  async fn replay(&self, entry: &QueuedMutation) -> Result<Response> {
    let method = Method::from_bytes(entry.method.as_bytes())
      .map_err(|e| eyre!("Invalid method '{}': {}", entry.method, e))?;
    let url = self
      .origin
      .join(&entry.url)
      .map_err(|e| eyre!("Invalid url '{}': {}", entry.url, e))?;

    let headers = self.credentials.json_headers(&self.origin, &url);
    let request = Request::new(method, url)
      .with_headers(headers)
      .with_body(entry.body.clone());

    Ok(self.network.fetch(&request).await?)
  }

  /// Queued mutations, oldest first.
  pub fn pending(&self) -> Result<Vec<QueuedMutation>> {
    self.store.get_all()
  }
}

impl<S: MutationStore> Clone for SyncCoordinator<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      network: Arc::clone(&self.network),
      origin: self.origin.clone(),
      credentials: self.credentials.clone(),
      sync_tag: self.sync_tag.clone(),
      registrar: self.registrar.clone(),
      drain_lock: Arc::clone(&self.drain_lock),
    }
  }
}
