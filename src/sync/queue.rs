//! Durable mutation queue storage.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use std::sync::Arc;

use crate::db::Database;

/// A mutation that could not reach the network, waiting to be replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMutation {
  /// Assigned at enqueue time, strictly increasing
  pub id: i64,
  pub url: String,
  pub method: String,
  /// Encoded payload, replayed as-is
  pub body: String,
  pub enqueued_at: DateTime<Utc>,
}

/// Trait for mutation queue backends.
///
/// Each call is atomic with respect to every other call on the same store.
pub trait MutationStore: Send + Sync {
  /// Append a mutation and return its id.
  fn add(&self, url: &str, method: &str, body: &str, enqueued_at: DateTime<Utc>) -> Result<i64>;

  /// All queued mutations, oldest first.
  fn get_all(&self) -> Result<Vec<QueuedMutation>>;

  /// Remove one mutation. Returns whether it was still present.
  fn delete(&self, id: i64) -> Result<bool>;
}

/// SQLite-backed mutation queue.
pub struct SqliteMutationStore {
  db: Arc<Database>,
}

impl SqliteMutationStore {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

impl MutationStore for SqliteMutationStore {
  fn add(&self, url: &str, method: &str, body: &str, enqueued_at: DateTime<Utc>) -> Result<i64> {
    let conn = self.db.conn()?;

    conn
      .execute(
        "INSERT INTO sync_queue (url, method, body, enqueued_at) VALUES (?, ?, ?, ?)",
        params![url, method, body, enqueued_at.to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to queue mutation: {}", e))?;

    Ok(conn.last_insert_rowid())
  }

  fn get_all(&self) -> Result<Vec<QueuedMutation>> {
    let conn = self.db.conn()?;

    let mut stmt = conn
      .prepare("SELECT id, url, method, body, enqueued_at FROM sync_queue ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare queue query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, String>(3)?,
          row.get::<_, String>(4)?,
        ))
      })
      .map_err(|e| eyre!("Failed to read queue: {}", e))?;

    let mut mutations = Vec::new();
    for row in rows {
      let (id, url, method, body, enqueued_at) =
        row.map_err(|e| eyre!("Failed to read queued mutation: {}", e))?;
      mutations.push(QueuedMutation {
        id,
        url,
        method,
        body,
        enqueued_at: parse_timestamp(&enqueued_at)?,
      });
    }

    Ok(mutations)
  }

  fn delete(&self, id: i64) -> Result<bool> {
    let conn = self.db.conn()?;

    let removed = conn
      .execute("DELETE FROM sync_queue WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to delete queued mutation {}: {}", id, e))?;

    Ok(removed > 0)
  }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse timestamp '{}': {}", s, e))
}
