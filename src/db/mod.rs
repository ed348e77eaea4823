pub mod schema;

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{StoreError, StoreResult};

/// Database connection wrapper for the local store
pub struct Database {
  conn: Connection,
}

impl Database {
  /// Open or create the database at `path`, or at the default location
  pub fn open(path: Option<&Path>) -> StoreResult<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| StoreError::unavailable("open", e))?;
    }

    let conn = Connection::open(&path).map_err(|e| StoreError::Unavailable {
      op: "open",
      reason: format!("{}: {}", path.display(), e),
    })?;

    let db = Self { conn };
    db.configure()?;
    db.run_migrations()?;

    Ok(db)
  }

  /// Open a throwaway in-memory database
  pub fn open_in_memory() -> StoreResult<Self> {
    let conn = Connection::open_in_memory().map_err(|e| StoreError::unavailable("open", e))?;
    let db = Self { conn };
    db.configure()?;
    db.run_migrations()?;
    Ok(db)
  }

  /// Get the default database path
  pub fn default_path() -> StoreResult<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| StoreError::unavailable("open", "could not determine data directory"))?;

    Ok(data_dir.join("reqsync").join("store.db"))
  }

  fn configure(&self) -> StoreResult<()> {
    self
      .conn
      .busy_timeout(Duration::from_secs(5))
      .map_err(|e| StoreError::unavailable("configure", e))?;
    self
      .conn
      .pragma_update(None, "foreign_keys", "ON")
      .map_err(|e| StoreError::unavailable("configure", e))?;
    // In-memory databases answer "memory" here, which is fine.
    self
      .conn
      .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
      .map_err(|e| StoreError::unavailable("configure", e))?;
    Ok(())
  }

  /// Run database migrations
  fn run_migrations(&self) -> StoreResult<()> {
    self
      .conn
      .execute_batch(schema::SCHEMA)
      .map_err(|e| StoreError::unavailable("migrate", e))?;
    Ok(())
  }

  /// Give up the wrapper and keep the connection
  pub fn into_conn(self) -> Connection {
    self.conn
  }
}
