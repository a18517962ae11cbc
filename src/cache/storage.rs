//! Named cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;

use super::traits::{CachedResponse, RequestKey};
use crate::db::Database;
use crate::net::Response;

/// Trait for named-cache backends.
///
/// A generation is created implicitly by the first write into it.
pub trait CacheStorage: Send + Sync {
  /// Look up a snapshot in one generation.
  fn match_entry(&self, generation: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Store a snapshot, replacing any previous one for the same key.
  fn put(&self, generation: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Store several snapshots atomically: either all are written or none.
  fn put_all(&self, generation: &str, entries: &[(RequestKey, Response)]) -> Result<()>;

  /// Names of every generation present.
  fn generations(&self) -> Result<Vec<String>>;

  /// Delete a generation and all its entries. Returns whether it existed.
  fn delete_generation(&self, generation: &str) -> Result<bool>;

  /// Record that a generation finished its install step.
  fn mark_installed(&self, generation: &str) -> Result<()>;

  fn is_installed(&self, generation: &str) -> Result<bool>;
}

/// SQLite-based cache storage.
pub struct SqliteStorage {
  db: Arc<Database>,
}

impl SqliteStorage {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

const INSERT_GENERATION: &str = "INSERT OR IGNORE INTO cache_generations (name) VALUES (?)";

const UPSERT_ENTRY: &str =
  "INSERT OR REPLACE INTO cache_entries (generation, request_hash, method, url, status, content_type, body, stored_at)
   VALUES (?, ?, ?, ?, ?, ?, ?, ?)";

impl CacheStorage for SqliteStorage {
  fn match_entry(&self, generation: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self.db.conn()?;

    let row: Option<(u16, Option<String>, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, content_type, body, stored_at FROM cache_entries
         WHERE generation = ? AND request_hash = ?",
        params![generation, key.cache_hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache: {}", e))?;

    match row {
      Some((status, content_type, body, stored_at)) => Ok(Some(CachedResponse {
        response: Response {
          status,
          content_type,
          body,
        },
        stored_at: parse_datetime(&stored_at)?,
      })),
      None => Ok(None),
    }
  }

  fn put(&self, generation: &str, key: &RequestKey, response: &Response) -> Result<()> {
    let conn = self.db.conn()?;

    conn
      .execute(INSERT_GENERATION, params![generation])
      .map_err(|e| eyre!("Failed to open cache {}: {}", generation, e))?;

    conn
      .execute(
        UPSERT_ENTRY,
        params![
          generation,
          key.cache_hash(),
          key.method,
          key.url,
          response.status,
          response.content_type,
          response.body,
          Utc::now().to_rfc3339()
        ],
      )
      .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    Ok(())
  }

  fn put_all(&self, generation: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(INSERT_GENERATION, params![generation])
      .map_err(|e| eyre!("Failed to open cache {}: {}", generation, e))?;

    let stored_at = Utc::now().to_rfc3339();
    for (key, response) in entries {
      tx.execute(
        UPSERT_ENTRY,
        params![
          generation,
          key.cache_hash(),
          key.method,
          key.url,
          response.status,
          response.content_type,
          response.body,
          stored_at
        ],
      )
      .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn generations(&self) -> Result<Vec<String>> {
    let conn = self.db.conn()?;

    let mut stmt = conn
      .prepare(
        "SELECT name FROM cache_generations
         UNION SELECT DISTINCT generation FROM cache_entries
         ORDER BY 1",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to list caches: {}", e))?;

    Ok(names)
  }

  fn delete_generation(&self, generation: &str) -> Result<bool> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let entries = tx
      .execute(
        "DELETE FROM cache_entries WHERE generation = ?",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to delete cache entries: {}", e))?;
    let named = tx
      .execute(
        "DELETE FROM cache_generations WHERE name = ?",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to delete cache {}: {}", generation, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(entries + named > 0)
  }

  fn mark_installed(&self, generation: &str) -> Result<()> {
    let conn = self.db.conn()?;

    conn
      .execute(
        "INSERT INTO cache_generations (name, installed_at) VALUES (?1, ?2)
         ON CONFLICT(name) DO UPDATE SET installed_at = ?2",
        params![generation, Utc::now().to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to mark cache {} installed: {}", generation, e))?;

    Ok(())
  }

  fn is_installed(&self, generation: &str) -> Result<bool> {
    let conn = self.db.conn()?;

    let installed: Option<Option<String>> = conn
      .query_row(
        "SELECT installed_at FROM cache_generations WHERE name = ?",
        params![generation],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache {}: {}", generation, e))?;

    Ok(installed.flatten().is_some())
  }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
