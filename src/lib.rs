//! Offline-first cache proxy for the photobooth app.
//!
//! Intercepts outgoing requests and serves them cache-first from versioned
//! cache generations, fetching and caching on miss. Generations move through
//! an install → waiting → active lifecycle; activating a new generation
//! deletes every stale one. The store and transport sit behind small traits
//! so the proxy can run against SQLite + reqwest in production and in-memory
//! fakes in tests.

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod register;

pub use cache::{
  CacheKey, CacheProxy, CacheStore, CachedResponse, Manifest, MemoryStore, Phase, Request,
  Response, ResponseKind, SqliteStore, UpdateEvent,
};
pub use config::ProxyConfig;
pub use error::{
  ActivateError, ConfigError, FetchError, InstallError, RegisterError, StoreError,
};
pub use fetch::{Fetch, HttpFetcher};
pub use register::{register, Registration};
