//! Proxy configuration.

use std::path::Path;

use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;

/// Configuration for one proxy registration.
///
/// `enabled` replaces the ambient "should we register at all" flag: the
/// decision is explicit per call, not global state.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
  /// Version tag naming the cache generation, e.g. "photobooth-v21".
  pub generation: String,

  /// URL scope the proxy covers.
  #[serde(default = "default_scope")]
  pub scope: String,

  /// App origin. Manifest paths resolve against it and same-origin
  /// classification compares against it.
  pub origin: Url,

  /// Resources preloaded during install. All must fetch for the
  /// generation to become usable.
  #[serde(default)]
  pub precache: Vec<String>,

  /// Whether registration should happen at all.
  #[serde(default = "default_enabled")]
  pub enabled: bool,
}

fn default_scope() -> String {
  "/".to_string()
}

fn default_enabled() -> bool {
  true
}

impl ProxyConfig {
  /// Load configuration from a YAML file.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.display().to_string(),
      source,
    })?;

    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
      path: path.display().to_string(),
      source,
    })
  }
}
