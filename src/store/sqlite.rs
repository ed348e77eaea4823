//! SQLite implementation of the local store and asset caches.

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;

use super::assets::{url_hash, AssetCache, CachedAsset};
use super::{LocalStore, Partition, Record, Seq, StoreKey};
use crate::db::Database;
use crate::error::{StoreError, StoreResult};

/// SQLite-backed store. Opened once per process and closed on shutdown.
pub struct SqliteStore {
  conn: Mutex<Option<Connection>>,
}

impl SqliteStore {
  /// Open the store at `path`, or at the default data location.
  pub fn open(path: Option<&Path>) -> StoreResult<Self> {
    let db = Database::open(path)?;
    Ok(Self::from_database(db))
  }

  pub fn open_in_memory() -> StoreResult<Self> {
    let db = Database::open_in_memory()?;
    Ok(Self::from_database(db))
  }

  fn from_database(db: Database) -> Self {
    Self {
      conn: Mutex::new(Some(db.into_conn())),
    }
  }

  /// Close the underlying connection. Later calls fail with `Unavailable`.
  pub fn close(&self) -> StoreResult<()> {
    let mut guard = self
      .conn
      .lock()
      .map_err(|e| StoreError::unavailable("close", format!("lock poisoned: {}", e)))?;
    if let Some(conn) = guard.take() {
      conn
        .close()
        .map_err(|(_, e)| StoreError::unavailable("close", e))?;
    }
    Ok(())
  }

  fn with_conn<T>(
    &self,
    op: &'static str,
    f: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
  ) -> StoreResult<T> {
    let mut guard = self
      .conn
      .lock()
      .map_err(|e| StoreError::unavailable(op, format!("lock poisoned: {}", e)))?;
    let conn = guard
      .as_mut()
      .ok_or_else(|| StoreError::unavailable(op, "store is closed"))?;
    f(conn).map_err(|e| StoreError::unavailable(op, e))
  }
}

fn table(partition: Partition) -> &'static str {
  partition.name()
}

fn key_column(partition: Partition) -> &'static str {
  if partition.is_sequenced() {
    "seq"
  } else {
    "key"
  }
}

fn sql_key(partition: Partition, key: &StoreKey) -> StoreResult<SqlValue> {
  match (partition.is_sequenced(), key) {
    (true, StoreKey::Seq(seq)) => Ok(SqlValue::Integer(*seq)),
    (false, StoreKey::Id(id)) => Ok(SqlValue::Text(id.clone())),
    _ => Err(StoreError::InvalidKey {
      partition: partition.name(),
      key: key.to_string(),
    }),
  }
}

fn decode_record(key: StoreKey, data: &[u8], stored_at: &str) -> StoreResult<Record> {
  Ok(Record {
    key,
    value: serde_json::from_slice(data)?,
    stored_at: parse_datetime(stored_at)?,
  })
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> StoreResult<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| StoreError::unavailable("decode", format!("bad timestamp '{}': {}", s, e)))
}

impl LocalStore for SqliteStore {
  fn get(&self, partition: Partition, key: &StoreKey) -> StoreResult<Option<Record>> {
    let id = sql_key(partition, key)?;
    let sql = format!(
      "SELECT data, stored_at FROM {} WHERE {} = ?1",
      table(partition),
      key_column(partition)
    );

    let row: Option<(Vec<u8>, String)> = self.with_conn("get", |conn| {
      conn
        .query_row(&sql, params![id], |row| Ok((row.get(0)?, row.get(1)?)))
        .optional()
    })?;

    row
      .map(|(data, stored_at)| decode_record(key.clone(), &data, &stored_at))
      .transpose()
  }

  fn put_all(&self, partition: Partition, records: &[(StoreKey, Value)]) -> StoreResult<()> {
    // Validate and serialize everything before touching the database
    let rows = records
      .iter()
      .map(|(key, value)| Ok((sql_key(partition, key)?, serde_json::to_vec(value)?)))
      .collect::<StoreResult<Vec<(SqlValue, Vec<u8>)>>>()?;

    let sql = format!(
      "INSERT OR REPLACE INTO {} ({}, data, stored_at) VALUES (?1, ?2, datetime('now'))",
      table(partition),
      key_column(partition)
    );

    self.with_conn("put_all", |conn| {
      let tx = conn.transaction()?;
      {
        let mut stmt = tx.prepare(&sql)?;
        for (key, data) in &rows {
          stmt.execute(params![key, data])?;
        }
      }
      tx.commit()
    })
  }

  fn append(&self, partition: Partition, value: &Value) -> StoreResult<Seq> {
    if !partition.is_sequenced() {
      return Err(StoreError::Unsupported {
        op: "append",
        partition: partition.name(),
      });
    }
    let data = serde_json::to_vec(value)?;
    let sql = format!(
      "INSERT INTO {} (data, stored_at) VALUES (?1, datetime('now'))",
      table(partition)
    );

    self.with_conn("append", |conn| {
      conn.execute(&sql, params![data])?;
      Ok(conn.last_insert_rowid())
    })
  }

  fn delete(&self, partition: Partition, key: &StoreKey) -> StoreResult<()> {
    let id = sql_key(partition, key)?;
    let sql = format!(
      "DELETE FROM {} WHERE {} = ?1",
      table(partition),
      key_column(partition)
    );
    self.with_conn("delete", |conn| conn.execute(&sql, params![id]).map(|_| ()))
  }

  fn list_all(&self, partition: Partition) -> StoreResult<Vec<Record>> {
    let sql = format!(
      "SELECT {col}, data, stored_at FROM {table} ORDER BY {col}",
      col = key_column(partition),
      table = table(partition)
    );

    let rows: Vec<(SqlValue, Vec<u8>, String)> = self.with_conn("list_all", |conn| {
      let mut stmt = conn.prepare(&sql)?;
      let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
      Ok(rows)
    })?;

    rows
      .into_iter()
      .map(|(key, data, stored_at)| {
        let key = match key {
          SqlValue::Integer(seq) => StoreKey::Seq(seq),
          SqlValue::Text(id) => StoreKey::Id(id),
          other => {
            return Err(StoreError::InvalidKey {
              partition: partition.name(),
              key: format!("{:?}", other),
            })
          }
        };
        decode_record(key, &data, &stored_at)
      })
      .collect()
  }

  fn count(&self, partition: Partition) -> StoreResult<usize> {
    let sql = format!("SELECT COUNT(*) FROM {}", table(partition));
    let count: i64 = self.with_conn("count", |conn| conn.query_row(&sql, [], |row| row.get(0)))?;
    Ok(count as usize)
  }

  fn clear(&self, partition: Partition) -> StoreResult<()> {
    let sql = format!("DELETE FROM {}", table(partition));
    self.with_conn("clear", |conn| conn.execute(&sql, []).map(|_| ()))
  }
}

impl AssetCache for SqliteStore {
  fn open_cache(&self, name: &str) -> StoreResult<()> {
    self.with_conn("open_cache", |conn| {
      conn
        .execute(
          "INSERT OR IGNORE INTO asset_caches (name) VALUES (?1)",
          params![name],
        )
        .map(|_| ())
    })
  }

  fn cache_names(&self) -> StoreResult<Vec<String>> {
    self.with_conn("cache_names", |conn| {
      let mut stmt = conn.prepare("SELECT name FROM asset_caches ORDER BY name")?;
      let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
      Ok(names)
    })
  }

  fn delete_cache(&self, name: &str) -> StoreResult<bool> {
    self.with_conn("delete_cache", |conn| {
      let tx = conn.transaction()?;
      tx.execute(
        "DELETE FROM asset_cache WHERE cache_name = ?1",
        params![name],
      )?;
      let removed = tx.execute("DELETE FROM asset_caches WHERE name = ?1", params![name])?;
      tx.commit()?;
      Ok(removed > 0)
    })
  }

  fn lookup_asset(&self, name: &str, url: &str) -> StoreResult<Option<CachedAsset>> {
    let hash = url_hash(url);
    let row: Option<(String, u16, String, Vec<u8>, Vec<u8>)> =
      self.with_conn("lookup_asset", |conn| {
        conn
          .query_row(
            "SELECT url, status, final_url, headers, body FROM asset_cache
             WHERE cache_name = ?1 AND url_hash = ?2",
            params![name, hash],
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
          .optional()
      })?;

    match row {
      Some((url, status, final_url, headers, body)) => Ok(Some(CachedAsset {
        url,
        status,
        final_url,
        headers: serde_json::from_slice(&headers)?,
        body,
      })),
      None => Ok(None),
    }
  }

  fn store_assets(&self, name: &str, assets: &[CachedAsset]) -> StoreResult<()> {
    let rows = assets
      .iter()
      .map(|asset| Ok((asset, url_hash(&asset.url), serde_json::to_vec(&asset.headers)?)))
      .collect::<StoreResult<Vec<_>>>()?;

    self.with_conn("store_assets", |conn| {
      let tx = conn.transaction()?;
      tx.execute(
        "INSERT OR IGNORE INTO asset_caches (name) VALUES (?1)",
        params![name],
      )?;
      {
        let mut stmt = tx.prepare(
          "INSERT OR REPLACE INTO asset_cache
             (cache_name, url_hash, url, status, final_url, headers, body, cached_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, datetime('now'))",
        )?;
        for (asset, hash, headers) in &rows {
          stmt.execute(params![
            name,
            hash,
            asset.url,
            asset.status,
            asset.final_url,
            headers,
            asset.body
          ])?;
        }
      }
      tx.commit()
    })
  }
}
