//! Registration: wiring the proxy into the application shell.
//!
//! The shell calls [`register`] once after its initial load. Registration
//! drives the whole lifecycle — install the generation, emit the update
//! notification, activate immediately (there is no waiting period) — and
//! hands back a [`Registration`] the shell keeps around for interception
//! and update events.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::cache::{CacheProxy, CacheStore, UpdateEvent};
use crate::config::ProxyConfig;
use crate::error::RegisterError;
use crate::fetch::Fetch;

/// Handle returned by a successful registration.
pub struct Registration<S: CacheStore, F: Fetch> {
  scope: String,
  proxy: Arc<CacheProxy<S, F>>,
  updates: mpsc::UnboundedReceiver<UpdateEvent>,
}

impl<S: CacheStore, F: Fetch> std::fmt::Debug for Registration<S, F> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Registration")
      .field("scope", &self.scope)
      .finish_non_exhaustive()
  }
}

impl<S: CacheStore, F: Fetch> Registration<S, F> {
  /// The URL scope this registration covers.
  pub fn scope(&self) -> &str {
    &self.scope
  }

  /// Shared handle to the proxy, for routing intercepted requests.
  pub fn proxy(&self) -> Arc<CacheProxy<S, F>> {
    Arc::clone(&self.proxy)
  }

  /// Receive the next update event. Events are buffered, so subscribing
  /// after registration still sees the install-time notification.
  pub async fn update_found(&mut self) -> Option<UpdateEvent> {
    self.updates.recv().await
  }
}

/// Register the cache proxy and run its install/activate lifecycle.
///
/// Returns `Ok(None)` when the configuration disables registration. Any
/// install failure aborts registration: no partially-populated generation
/// is ever left active.
pub async fn register<S: CacheStore, F: Fetch>(
  config: ProxyConfig,
  store: S,
  fetcher: F,
) -> Result<Option<Registration<S, F>>, RegisterError> {
  if !config.enabled {
    info!("cache proxy registration disabled by configuration");
    return Ok(None);
  }

  let (tx, updates) = mpsc::unbounded_channel();
  let scope = config.scope.clone();
  let proxy = Arc::new(CacheProxy::new(&config, store, fetcher).with_update_notifier(tx));

  proxy.install().await?;
  // skip-waiting: promote right away, no coexistence with a prior instance
  proxy.activate().await?;

  info!(scope = %scope, generation = %proxy.generation(), "cache proxy registered");

  Ok(Some(Registration {
    scope,
    proxy,
    updates,
  }))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryStore, Phase, Request, Response, ResponseKind};
  use crate::error::FetchError;
  use async_trait::async_trait;
  use std::collections::BTreeMap;
  use url::Url;

  /// Serves an empty 200 same-origin response for every URL.
  struct AlwaysOk;

  #[async_trait]
  impl Fetch for AlwaysOk {
    async fn fetch(&self, _request: &Request) -> Result<Response, FetchError> {
      Ok(Response {
        status: 200,
        kind: ResponseKind::Basic,
        headers: BTreeMap::new(),
        body: b"<html>".to_vec(),
      })
    }
  }

  fn config(enabled: bool) -> ProxyConfig {
    ProxyConfig {
      generation: "photobooth-v21".to_string(),
      scope: "/".to_string(),
      origin: "https://booth.example".parse().unwrap(),
      precache: vec!["/index.html".to_string()],
      enabled,
    }
  }

  #[tokio::test]
  async fn register_runs_lifecycle_and_emits_update() {
    let registration = register(config(true), MemoryStore::new(), AlwaysOk)
      .await
      .unwrap();
    let mut registration = registration.unwrap();

    assert_eq!(registration.scope(), "/");
    let proxy = registration.proxy();
    assert_eq!(proxy.phase(), Phase::Active);
    assert_eq!(
      proxy.generations().await.unwrap(),
      vec!["photobooth-v21"]
    );

    let event = registration.update_found().await.unwrap();
    assert_eq!(event.generation, "photobooth-v21");

    // Exactly one event per install
    assert!(registration.updates.try_recv().is_err());
  }

  #[tokio::test]
  async fn disabled_config_registers_nothing() {
    let registration = register(config(false), MemoryStore::new(), AlwaysOk)
      .await
      .unwrap();
    assert!(registration.is_none());
  }

  #[tokio::test]
  async fn failed_install_aborts_registration() {
    struct AlwaysDown;

    #[async_trait]
    impl Fetch for AlwaysDown {
      async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        Err(FetchError::Unreachable(request.url.to_string()))
      }
    }

    let err = register(config(true), MemoryStore::new(), AlwaysDown)
      .await
      .unwrap_err();
    assert!(matches!(err, RegisterError::Install(_)));
  }

  #[tokio::test]
  async fn registered_proxy_serves_intercepted_requests() {
    let registration = register(config(true), MemoryStore::new(), AlwaysOk)
      .await
      .unwrap()
      .unwrap();

    let origin: Url = "https://booth.example".parse().unwrap();
    let request = Request::get(origin.join("/index.html").unwrap());
    let response = registration.proxy().intercept(&request).await.unwrap();
    assert_eq!(response.body, b"<html>");
  }
}
