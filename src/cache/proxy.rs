//! The cache proxy state machine: install, activate, intercept.

use std::sync::{Arc, Mutex, PoisonError};

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

use super::store::CacheStore;
use super::types::{CacheKey, Manifest, Phase, Request, Response};
use crate::config::ProxyConfig;
use crate::error::{ActivateError, FetchError, InstallError, StoreError};
use crate::fetch::Fetch;

/// Emitted when a new generation finishes installing, before it displaces
/// the current one. The app shell can prompt the user to reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateEvent {
  pub generation: String,
}

/// Cache proxy for one generation instance.
///
/// Sits between the application and the network: every outgoing request
/// goes through [`intercept`](CacheProxy::intercept), which answers
/// cache-first and falls back to the fetcher on miss. The instance owns
/// one generation id and moves it through
/// `Installing → Waiting → Active`; activation deletes every other
/// generation left in the store.
pub struct CacheProxy<S: CacheStore, F: Fetch> {
  store: Arc<S>,
  fetcher: Arc<F>,
  generation: String,
  manifest: Manifest,
  origin: Url,
  phase: Mutex<Phase>,
  /// Background store writes from the fetch path; drained by `settle`.
  pending_stores: tokio::sync::Mutex<JoinSet<()>>,
  update_tx: Option<mpsc::UnboundedSender<UpdateEvent>>,
}

impl<S: CacheStore, F: Fetch> CacheProxy<S, F> {
  pub fn new(config: &ProxyConfig, store: S, fetcher: F) -> Self {
    Self {
      store: Arc::new(store),
      fetcher: Arc::new(fetcher),
      generation: config.generation.clone(),
      manifest: Manifest::from(config.precache.clone()),
      origin: config.origin.clone(),
      phase: Mutex::new(Phase::Installing),
      pending_stores: tokio::sync::Mutex::new(JoinSet::new()),
      update_tx: None,
    }
  }

  /// Attach the channel update notifications are sent on.
  pub fn with_update_notifier(mut self, tx: mpsc::UnboundedSender<UpdateEvent>) -> Self {
    self.update_tx = Some(tx);
    self
  }

  /// The generation id this instance manages.
  pub fn generation(&self) -> &str {
    &self.generation
  }

  /// All generation ids currently present in the store.
  pub async fn generations(&self) -> Result<Vec<String>, StoreError> {
    self.store.list_generations().await
  }

  pub fn phase(&self) -> Phase {
    *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn set_phase(&self, phase: Phase) {
    *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
  }

  /// Preload the manifest into a fresh generation namespace.
  ///
  /// All-or-nothing: if any resource fails to fetch (or fetches with a
  /// non-200 status), the half-populated namespace is removed and the
  /// generation never reaches `Waiting`. On success the generation is
  /// `Waiting` and, because there is no coexistence period with a prior
  /// instance, activation may follow immediately.
  pub async fn install(&self) -> Result<(), InstallError> {
    if self.phase() != Phase::Installing {
      return Err(InstallError::AlreadyInstalled(self.generation.clone()));
    }

    info!(generation = %self.generation, "installing cache generation");
    self.store.open(&self.generation).await?;

    let mut entries = Vec::with_capacity(self.manifest.len());
    for resource in self.manifest.iter() {
      let url = match self.origin.join(resource) {
        Ok(url) => url,
        Err(source) => {
          self.abort_install().await;
          return Err(InstallError::BadResource {
            resource: resource.to_string(),
            source,
          });
        }
      };

      let request = Request::get(url);
      let response = match self.fetcher.fetch(&request).await {
        Ok(response) => response,
        Err(source) => {
          self.abort_install().await;
          return Err(InstallError::Preload {
            url: request.url.to_string(),
            source,
          });
        }
      };

      if response.status != 200 {
        let status = response.status;
        self.abort_install().await;
        return Err(InstallError::PreloadStatus {
          url: request.url.to_string(),
          status,
        });
      }

      entries.push((CacheKey::for_request(&request), response));
    }

    if let Err(e) = self.store.add_all(&self.generation, entries).await {
      self.abort_install().await;
      return Err(e.into());
    }

    self.set_phase(Phase::Waiting);
    info!(generation = %self.generation, "install complete, skipping waiting period");

    if let Some(tx) = &self.update_tx {
      // Best effort: the notifier may have gone away
      let _ = tx.send(UpdateEvent {
        generation: self.generation.clone(),
      });
    }

    Ok(())
  }

  /// Remove whatever install managed to create before it failed.
  async fn abort_install(&self) {
    if let Err(error) = self.store.delete_generation(&self.generation).await {
      warn!(generation = %self.generation, %error, "failed to remove aborted generation");
    }
  }

  /// Promote the waiting generation to current and clean up the rest.
  ///
  /// Deletions run in parallel, one per stale generation; each failure is
  /// logged on its own and blocks neither the other deletions nor
  /// activation. Returns once every deletion has settled.
  pub async fn activate(&self) -> Result<(), ActivateError> {
    {
      let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
      if *phase != Phase::Waiting {
        return Err(ActivateError::NothingWaiting);
      }
      *phase = Phase::Active;
    }
    info!(generation = %self.generation, "activating cache generation");

    let ids = self.store.list_generations().await?;
    let deletions = ids
      .iter()
      .filter(|id| *id != &self.generation)
      .map(|id| async move {
        match self.store.delete_generation(id).await {
          Ok(true) => info!(generation = %id, "deleted stale cache generation"),
          Ok(false) => debug!(generation = %id, "stale cache generation already gone"),
          Err(error) => {
            warn!(generation = %id, %error, "failed to delete stale cache generation");
          }
        }
      });
    join_all(deletions).await;

    Ok(())
  }

  /// Answer one outgoing request, cache-first.
  ///
  /// Cache hits come back without touching the network. On a miss the
  /// fetcher runs; a network error propagates to the caller unchanged. A
  /// successful 200 same-origin response is copied into the store on a
  /// background task while the original goes straight back to the caller.
  /// Anything else (non-200, cross-origin, opaque) passes through uncached.
  /// Non-GET requests bypass the cache entirely.
  pub async fn intercept(&self, request: &Request) -> Result<Response, FetchError> {
    if request.method != reqwest::Method::GET {
      return self.fetcher.fetch(request).await;
    }

    let key = CacheKey::for_request(request);
    match self.store.lookup(&self.generation, &key).await {
      Ok(Some(cached)) => {
        info!(url = %request.url, "serving from cache");
        return Ok(cached.response);
      }
      Ok(None) => {}
      Err(error) => {
        // Degrade to a miss; the caller still gets a response
        warn!(url = %request.url, %error, "cache lookup failed");
      }
    }

    let response = self.fetcher.fetch(request).await?;

    if response.is_cacheable() {
      // Independent copy for the store path; the caller keeps the original
      let copy = response.clone();
      let store = Arc::clone(&self.store);
      let generation = self.generation.clone();
      let url = request.url.clone();
      let mut tasks = self.pending_stores.lock().await;
      tasks.spawn(async move {
        if let Err(error) = store.put(&generation, &key, copy).await {
          warn!(url = %url, %error, "failed to store response");
        }
      });
    } else {
      debug!(url = %request.url, status = response.status, "response not cacheable");
    }

    Ok(response)
  }

  /// Wait for all in-flight background store writes to settle.
  ///
  /// The fetch path hands writes to background tasks so responses reach
  /// the caller without waiting on the store; this is the handle the
  /// hosting environment awaits before treating the fetch phase as done.
  pub async fn settle(&self) {
    // Drain a local copy; the lock is only held for the swap, so the
    // fetch path can keep spawning store tasks meanwhile.
    let mut tasks = {
      let mut pending = self.pending_stores.lock().await;
      std::mem::take(&mut *pending)
    };
    while let Some(result) = tasks.join_next().await {
      if let Err(error) = result {
        warn!(%error, "background cache write panicked");
      }
    }
  }
}
