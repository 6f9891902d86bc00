//! Core types for the caching system.

use std::collections::BTreeMap;

use reqwest::Method;
use sha2::{Digest, Sha256};
use url::Url;

/// One outgoing request as seen by the proxy. Transient, never persisted.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
}

impl Request {
  /// Build a GET request, the only method the cache keys on.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
    }
  }
}

/// Request identity inside a generation: method + URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  method: String,
  url: String,
}

impl CacheKey {
  pub fn for_request(request: &Request) -> Self {
    Self {
      method: request.method.to_string(),
      url: request.url.to_string(),
    }
  }

  pub fn method(&self) -> &str {
    &self.method
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  /// Stable, fixed-length key for storage backends.
  pub fn hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// How the response relates to the app's origin, in the service-worker
/// sense: `Basic` is same-origin, `Cors` crossed an origin boundary, and
/// `Opaque` is a cross-origin response whose contents are not readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
  Basic,
  Cors,
  Opaque,
}

impl ResponseKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
      Self::Opaque => "opaque",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "basic" => Some(Self::Basic),
      "cors" => Some(Self::Cors),
      "opaque" => Some(Self::Opaque),
      _ => None,
    }
  }
}

/// A response as stored in (or served from) the cache.
///
/// The body is an owned byte buffer, so cloning yields a fully independent
/// copy — the caller's copy and the store's copy never share a stream.
#[derive(Debug, Clone)]
pub struct Response {
  pub status: u16,
  pub kind: ResponseKind,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
}

impl Response {
  /// Cache policy: only successful same-origin responses are stored.
  /// Everything else still goes back to the caller, just uncached.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200 && self.kind == ResponseKind::Basic
  }
}

/// The ordered set of resources that must be preloaded before a new
/// generation is usable. Paths are resolved against the configured origin.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
  resources: Vec<String>,
}

impl Manifest {
  pub fn new(resources: Vec<String>) -> Self {
    Self { resources }
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.resources.iter().map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.resources.len()
  }

  pub fn is_empty(&self) -> bool {
    self.resources.is_empty()
  }
}

impl From<Vec<String>> for Manifest {
  fn from(resources: Vec<String>) -> Self {
    Self::new(resources)
  }
}

/// Lifecycle phase of a generation instance.
///
/// A superseded generation has no phase of its own; it is simply deleted
/// during cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  /// Preloading the manifest into a fresh namespace.
  Installing,
  /// Preload complete; ready to be promoted.
  Waiting,
  /// Current generation; lookups and writes target it.
  Active,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cache_key_hash_is_stable_and_method_sensitive() {
    let url: Url = "https://booth.example/index.html".parse().unwrap();
    let get = CacheKey::for_request(&Request::get(url.clone()));
    let get_again = CacheKey::for_request(&Request::get(url.clone()));
    let head = CacheKey::for_request(&Request {
      method: Method::HEAD,
      url,
    });

    assert_eq!(get.hash(), get_again.hash());
    assert_ne!(get.hash(), head.hash());
    // sha256 hex
    assert_eq!(get.hash().len(), 64);
  }

  #[test]
  fn only_200_basic_responses_are_cacheable() {
    let mut response = Response {
      status: 200,
      kind: ResponseKind::Basic,
      headers: BTreeMap::new(),
      body: b"ok".to_vec(),
    };
    assert!(response.is_cacheable());

    response.status = 404;
    assert!(!response.is_cacheable());

    response.status = 200;
    response.kind = ResponseKind::Cors;
    assert!(!response.is_cacheable());

    response.kind = ResponseKind::Opaque;
    assert!(!response.is_cacheable());
  }
}
