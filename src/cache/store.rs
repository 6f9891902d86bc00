//! Cache store trait and its in-memory and SQLite implementations.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::types::{CacheKey, Response, ResponseKind};
use crate::error::StoreError;

/// A cached response together with the time it was stored.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  pub stored_at: DateTime<Utc>,
}

/// Capability interface over the cache store.
///
/// The store maps generation ids to sets of entries. Methods take the
/// generation id directly rather than going through a per-generation
/// handle; that keeps implementations shareable across spawned tasks.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
  /// Create the namespace for a generation if it does not exist yet.
  async fn open(&self, generation: &str) -> Result<(), StoreError>;

  /// Store a batch of entries atomically: either every entry lands or the
  /// generation's entry set is unchanged.
  async fn add_all(
    &self,
    generation: &str,
    entries: Vec<(CacheKey, Response)>,
  ) -> Result<(), StoreError>;

  /// Store a single entry, replacing any previous entry under the same key.
  async fn put(
    &self,
    generation: &str,
    key: &CacheKey,
    response: Response,
  ) -> Result<(), StoreError>;

  /// Look up an entry within one generation.
  async fn lookup(
    &self,
    generation: &str,
    key: &CacheKey,
  ) -> Result<Option<CachedResponse>, StoreError>;

  /// All known generation ids, including empty ones.
  async fn list_generations(&self) -> Result<Vec<String>, StoreError>;

  /// Delete a generation and all its entries. Returns whether it existed.
  async fn delete_generation(&self, generation: &str) -> Result<bool, StoreError>;
}

/// In-memory store. The default for tests and for hosts that don't want
/// cached responses to outlive the process.
#[derive(Default)]
pub struct MemoryStore {
  generations: Mutex<HashMap<String, HashMap<CacheKey, CachedResponse>>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, HashMap<CacheKey, CachedResponse>>>, StoreError> {
    self.generations.lock().map_err(|_| StoreError::LockPoisoned)
  }
}

#[async_trait]
impl CacheStore for MemoryStore {
  async fn open(&self, generation: &str) -> Result<(), StoreError> {
    self.lock()?.entry(generation.to_string()).or_default();
    Ok(())
  }

  async fn add_all(
    &self,
    generation: &str,
    entries: Vec<(CacheKey, Response)>,
  ) -> Result<(), StoreError> {
    let mut generations = self.lock()?;
    let slot = generations.entry(generation.to_string()).or_default();
    let stored_at = Utc::now();
    for (key, response) in entries {
      slot.insert(
        key,
        CachedResponse {
          response,
          stored_at,
        },
      );
    }
    Ok(())
  }

  async fn put(
    &self,
    generation: &str,
    key: &CacheKey,
    response: Response,
  ) -> Result<(), StoreError> {
    self
      .lock()?
      .entry(generation.to_string())
      .or_default()
      .insert(
        key.clone(),
        CachedResponse {
          response,
          stored_at: Utc::now(),
        },
      );
    Ok(())
  }

  async fn lookup(
    &self,
    generation: &str,
    key: &CacheKey,
  ) -> Result<Option<CachedResponse>, StoreError> {
    Ok(
      self
        .lock()?
        .get(generation)
        .and_then(|entries| entries.get(key))
        .cloned(),
    )
  }

  async fn list_generations(&self) -> Result<Vec<String>, StoreError> {
    let mut ids: Vec<String> = self.lock()?.keys().cloned().collect();
    ids.sort();
    Ok(ids)
  }

  async fn delete_generation(&self, generation: &str) -> Result<bool, StoreError> {
    Ok(self.lock()?.remove(generation).is_some())
  }
}

/// SQLite-backed store, so cached responses survive restarts.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open the store at the default location under the user data dir.
  pub fn open() -> Result<Self, StoreError> {
    let path = Self::default_path()?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    Self::open_at(&path)
  }

  /// Open the store at an explicit path.
  pub fn open_at(path: &std::path::Path) -> Result<Self, StoreError> {
    let conn = Connection::open(path)?;
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  fn default_path() -> Result<std::path::PathBuf, StoreError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| {
        StoreError::Io(std::io::Error::new(
          std::io::ErrorKind::NotFound,
          "could not determine data directory",
        ))
      })?;

    Ok(data_dir.join("boothcache").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<(), StoreError> {
    let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
    conn.execute_batch(CACHE_SCHEMA)?;
    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
    self.conn.lock().map_err(|_| StoreError::LockPoisoned)
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per generation, so empty generations are still listed
CREATE TABLE IF NOT EXISTS generations (
    generation TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses, keyed by request identity within a generation
CREATE TABLE IF NOT EXISTS cache_entries (
    generation TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    kind TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_generation
    ON cache_entries(generation);
"#;

fn insert_entry(
  conn: &Connection,
  generation: &str,
  key: &CacheKey,
  response: &Response,
) -> Result<(), StoreError> {
  let headers = serde_json::to_string(&response.headers)?;
  conn.execute(
    "INSERT OR REPLACE INTO cache_entries
       (generation, key_hash, method, url, status, kind, headers, body, stored_at)
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
    params![
      generation,
      key.hash(),
      key.method(),
      key.url(),
      response.status,
      response.kind.as_str(),
      headers,
      response.body,
    ],
  )?;
  Ok(())
}

fn ensure_generation(conn: &Connection, generation: &str) -> Result<(), StoreError> {
  conn.execute(
    "INSERT OR IGNORE INTO generations (generation) VALUES (?)",
    params![generation],
  )?;
  Ok(())
}

#[async_trait]
impl CacheStore for SqliteStore {
  async fn open(&self, generation: &str) -> Result<(), StoreError> {
    let conn = self.lock()?;
    ensure_generation(&conn, generation)
  }

  async fn add_all(
    &self,
    generation: &str,
    entries: Vec<(CacheKey, Response)>,
  ) -> Result<(), StoreError> {
    let conn = self.lock()?;

    conn.execute("BEGIN TRANSACTION", [])?;

    let result = (|| -> Result<(), StoreError> {
      ensure_generation(&conn, generation)?;
      for (key, response) in &entries {
        insert_entry(&conn, generation, key, response)?;
      }
      Ok(())
    })();

    match result {
      Ok(()) => {
        conn.execute("COMMIT", [])?;
        Ok(())
      }
      Err(e) => {
        // Preload is all-or-nothing
        let _ = conn.execute("ROLLBACK", []);
        Err(e)
      }
    }
  }

  async fn put(
    &self,
    generation: &str,
    key: &CacheKey,
    response: Response,
  ) -> Result<(), StoreError> {
    let conn = self.lock()?;
    ensure_generation(&conn, generation)?;
    insert_entry(&conn, generation, key, &response)
  }

  async fn lookup(
    &self,
    generation: &str,
    key: &CacheKey,
  ) -> Result<Option<CachedResponse>, StoreError> {
    let conn = self.lock()?;

    let row: Option<(u16, String, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, kind, headers, body, stored_at FROM cache_entries
         WHERE generation = ? AND key_hash = ?",
        params![generation, key.hash()],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
          ))
        },
      )
      .optional()?;

    let (status, kind, headers, body, stored_at) = match row {
      Some(row) => row,
      None => return Ok(None),
    };

    let kind = ResponseKind::parse(&kind)
      .ok_or_else(|| StoreError::Corrupt(format!("unknown response kind '{kind}'")))?;
    let headers = serde_json::from_str(&headers)?;
    let stored_at = parse_datetime(&stored_at)?;

    Ok(Some(CachedResponse {
      response: Response {
        status,
        kind,
        headers,
        body,
      },
      stored_at,
    }))
  }

  async fn list_generations(&self) -> Result<Vec<String>, StoreError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT generation FROM generations ORDER BY generation")?;
    let ids = stmt
      .query_map([], |row| row.get::<_, String>(0))?
      .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
  }

  async fn delete_generation(&self, generation: &str) -> Result<bool, StoreError> {
    let conn = self.lock()?;

    conn.execute("BEGIN TRANSACTION", [])?;

    // Entries and the listing row go together or not at all
    let result = (|| -> Result<bool, StoreError> {
      conn.execute(
        "DELETE FROM cache_entries WHERE generation = ?",
        params![generation],
      )?;
      let removed = conn.execute(
        "DELETE FROM generations WHERE generation = ?",
        params![generation],
      )?;
      Ok(removed > 0)
    })();

    match result {
      Ok(removed) => {
        conn.execute("COMMIT", [])?;
        Ok(removed)
      }
      Err(e) => {
        let _ = conn.execute("ROLLBACK", []);
        Err(e)
      }
    }
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|_| StoreError::Timestamp {
      value: s.to_string(),
    })
}
