//! Error types for the cache proxy.
//!
//! The split mirrors how failures propagate: [`FetchError`] reaches the
//! caller of an intercepted request unchanged, [`StoreError`] is internal
//! bookkeeping that gets logged and absorbed, and the lifecycle errors
//! ([`InstallError`], [`ActivateError`]) abort their phase transition.

use thiserror::Error;

/// A network fetch failed. Propagated to the caller as-is, never retried.
#[derive(Debug, Error)]
pub enum FetchError {
  /// Transport-level failure from the HTTP client.
  #[error(transparent)]
  Http(#[from] reqwest::Error),

  /// No route to the resource. Used by transports without an HTTP stack
  /// underneath (e.g. test fakes).
  #[error("network unreachable: {0}")]
  Unreachable(String),
}

/// A cache store operation failed.
///
/// Store failures on the request path are non-fatal: a failed lookup
/// degrades to a miss and a failed write leaves the in-flight response
/// untouched.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("cache store lock poisoned")]
  LockPoisoned,

  #[error("cache store I/O failed")]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Sqlite(#[from] rusqlite::Error),

  #[error("failed to serialize cached headers")]
  Headers(#[from] serde_json::Error),

  #[error("failed to parse stored timestamp '{value}'")]
  Timestamp { value: String },

  #[error("corrupt cache entry: {0}")]
  Corrupt(String),
}

/// Install aborted; the generation never reaches `Waiting`.
#[derive(Debug, Error)]
pub enum InstallError {
  /// `install` was called on a generation that is already past the
  /// installing phase.
  #[error("generation {0} is already installed")]
  AlreadyInstalled(String),

  /// A manifest resource could not be fetched. Preload is all-or-nothing,
  /// so one failure aborts the whole install.
  #[error("failed to preload {url}")]
  Preload {
    url: String,
    #[source]
    source: FetchError,
  },

  /// A manifest resource fetched but came back with a non-200 status.
  #[error("preload of {url} returned status {status}")]
  PreloadStatus { url: String, status: u16 },

  /// A manifest entry does not resolve against the configured origin.
  #[error("manifest resource '{resource}' is not a valid path")]
  BadResource {
    resource: String,
    #[source]
    source: url::ParseError,
  },

  /// The store could not create or populate the generation namespace.
  #[error(transparent)]
  Store(#[from] StoreError),
}

/// Activate aborted or could not start cleanup.
#[derive(Debug, Error)]
pub enum ActivateError {
  /// `activate` was called without a waiting generation to promote.
  #[error("no waiting generation to activate")]
  NothingWaiting,

  /// The store could not enumerate generations, so cleanup never ran.
  /// The generation is still promoted; stale caches survive until the
  /// next activation.
  #[error(transparent)]
  Store(#[from] StoreError),
}

/// Configuration file could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config file {path}")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse config file {path}")]
  Parse {
    path: String,
    #[source]
    source: serde_yaml::Error,
  },
}

/// Registration failed while driving the install/activate lifecycle.
#[derive(Debug, Error)]
pub enum RegisterError {
  #[error(transparent)]
  Install(#[from] InstallError),

  #[error(transparent)]
  Activate(#[from] ActivateError),
}
