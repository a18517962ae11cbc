pub mod schema;

use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite connection shared by the mutation queue and the response cache.
///
/// Each component owns its own tables; the connection lock serializes every
/// statement so a read-modify-delete sequence never interleaves with another.
pub struct Database {
  conn: Mutex<Connection>,
}

impl Database {
  /// Open or create the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open a database that lives only as long as this process.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::from_connection(conn)
  }

  /// Open the database at `path`, or fall back to a non-durable in-memory one.
  ///
  /// Storage being unavailable must not stop the game from submitting
  /// answers; it only removes offline durability.
  pub fn open_or_in_memory(path: &Path) -> Result<Self> {
    match Self::open(path) {
      Ok(db) => Ok(db),
      Err(e) => {
        tracing::warn!(error = %e, "durable storage unavailable, offline queue will not survive restart");
        Self::open_in_memory()
      }
    }
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let db = Self {
      conn: Mutex::new(conn),
    };
    db.run_migrations()?;
    Ok(db)
  }

  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(schema::SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;
    Ok(())
  }

  /// Lock the connection.
  pub fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn table_names(db: &Database) -> Vec<String> {
    let conn = db.conn().unwrap();
    let mut stmt = conn
      .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
      .unwrap();
    stmt
      .query_map([], |row| row.get(0))
      .unwrap()
      .filter_map(|r| r.ok())
      .collect()
  }

  #[test]
  fn test_in_memory_runs_migrations() {
    let db = Database::open_in_memory().unwrap();
    let tables = table_names(&db);

    assert!(tables.contains(&"sync_queue".to_string()));
    assert!(tables.contains(&"cache_generations".to_string()));
    assert!(tables.contains(&"cache_entries".to_string()));
  }

  #[test]
  fn test_open_creates_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("skool.db");

    let db = Database::open(&path).unwrap();
    assert!(path.exists());

    // Migrations are idempotent
    drop(db);
    Database::open(&path).unwrap();
  }

  #[test]
  fn test_unusable_path_falls_back_to_memory() {
    let dir = tempfile::tempdir().unwrap();
    // A directory cannot be opened as a database file
    let db = Database::open_or_in_memory(dir.path()).unwrap();
    assert!(table_names(&db).contains(&"sync_queue".to_string()));
  }
}
