//! Network transport seam.

use std::collections::BTreeMap;

use async_trait::async_trait;
use url::Url;

use crate::cache::{Request, Response, ResponseKind};
use crate::error::FetchError;

/// The proxy's view of the network. Production code uses [`HttpFetcher`];
/// tests script responses behind the same trait.
///
/// The proxy imposes no timeout of its own; whatever the implementation
/// does about timeouts and cancellation governs fetch duration.
#[async_trait]
pub trait Fetch: Send + Sync + 'static {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

/// HTTP transport backed by reqwest.
///
/// Responses are classified against the configured app origin: a final
/// URL on the same origin yields a `Basic` response, anything else `Cors`.
pub struct HttpFetcher {
  client: reqwest::Client,
  origin: Url,
}

impl HttpFetcher {
  pub fn new(origin: Url) -> Self {
    Self {
      client: reqwest::Client::new(),
      origin,
    }
  }

  /// Use a preconfigured client (custom timeouts, proxies, ...).
  pub fn with_client(client: reqwest::Client, origin: Url) -> Self {
    Self { client, origin }
  }
}

#[async_trait]
impl Fetch for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    let response = self
      .client
      .request(request.method.clone(), request.url.clone())
      .send()
      .await?;

    let status = response.status().as_u16();
    // Classify on the final URL so redirects off-origin count as CORS
    let kind = if response.url().origin() == self.origin.origin() {
      ResponseKind::Basic
    } else {
      ResponseKind::Cors
    };

    let mut headers = BTreeMap::new();
    for (name, value) in response.headers() {
      if let Ok(value) = value.to_str() {
        headers.insert(name.to_string(), value.to_string());
      }
    }

    let body = response.bytes().await?.to_vec();

    Ok(Response {
      status,
      kind,
      headers,
      body,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn origin_comparison_ignores_path() {
    let origin: Url = "https://booth.example/".parse().unwrap();
    let same: Url = "https://booth.example/photos/1.png".parse().unwrap();
    let other: Url = "https://cdn.example/photos/1.png".parse().unwrap();

    assert_eq!(origin.origin(), same.origin());
    assert_ne!(origin.origin(), other.origin());
  }
}
