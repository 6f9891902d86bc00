//! Versioned offline cache: request/response types, store backends, and the
//! proxy state machine.
//!
//! A *generation* is one versioned namespace of cached responses. At most
//! one generation is current; activating a new one deletes the rest. The
//! [`CacheProxy`] drives the install → waiting → active lifecycle and
//! answers intercepted requests cache-first.

mod proxy;
mod store;
mod types;

pub use proxy::{CacheProxy, UpdateEvent};
pub use store::{CacheStore, CachedResponse, MemoryStore, SqliteStore};
pub use types::{CacheKey, Manifest, Phase, Request, Response, ResponseKind};
