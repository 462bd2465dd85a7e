//! Store trait and SQLite implementation.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use super::traits::{Index, IndexValue, Partition, Record};
use crate::error::{Error, Result};

/// Trait for storage backends.
///
/// The partition an operation touches is taken from the record type, so
/// `store.get::<CacheEntry>(key)` reads from `apiCache`.
pub trait Store: Send + Sync + 'static {
  /// Create partitions and indexes. Safe to call any number of times.
  fn initialize(&self) -> Result<()>;

  /// Get a single record by key.
  fn get<R: Record>(&self, key: &str) -> Result<Option<R>>;

  /// Insert or fully overwrite a record.
  fn put<R: Record>(&self, record: &R) -> Result<()>;

  /// Delete a record. Returns whether a record was removed.
  fn delete<R: Record>(&self, key: &str) -> Result<bool>;

  /// All records of the partition, ordered by timestamp then key.
  fn get_all<R: Record>(&self) -> Result<Vec<R>>;

  /// All records whose indexed column equals `value`.
  fn get_all_by_index<R: Record>(&self, index: Index, value: IndexValue) -> Result<Vec<R>>;

  /// Delete `old_key` and insert `record` in one transaction.
  fn replace<R: Record>(&self, old_key: &str, record: &R) -> Result<()>;

  /// Remove every record of a partition.
  fn clear(&self, partition: Partition) -> Result<usize>;

  /// Number of records in a partition.
  fn count(&self, partition: Partition) -> Result<usize>;
}

/// SQLite-based store implementation.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open (or create) the store file at `path` and initialize it.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
      std::fs::create_dir_all(parent).map_err(|e| {
        Error::StorageUnavailable(format!(
          "failed to create store directory {}: {}",
          parent.display(),
          e
        ))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      Error::StorageUnavailable(format!(
        "failed to open store at {}: {}",
        path.display(),
        e
      ))
    })?;

    debug!(path = %path.display(), "opened store");
    Self::from_connection(conn)
  }

  /// Open the store at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  /// Open a store that lives only as long as this value.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| Error::StorageUnavailable(format!("failed to open in-memory store: {}", e)))?;
    Self::from_connection(conn)
  }

  /// Get the default store path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| Error::StorageUnavailable("could not determine data directory".into()))?;

    Ok(data_dir.join("leadsync").join("store.db"))
  }

  /// Names of the partitions registered by `initialize`.
  pub fn partition_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT name FROM partitions ORDER BY name")?;
    let names = stmt
      .query_map([], |row| row.get(0))?
      .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.initialize()?;
    Ok(store)
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| Error::StorageUnavailable(format!("lock poisoned: {}", e)))
  }
}

/// Schema for the record store.
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS partitions (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS records (
    partition_name TEXT NOT NULL,
    key TEXT NOT NULL,
    data BLOB NOT NULL,
    timestamp INTEGER,
    synced INTEGER,
    PRIMARY KEY (partition_name, key)
);

CREATE INDEX IF NOT EXISTS idx_records_timestamp
    ON records(partition_name, timestamp);

CREATE INDEX IF NOT EXISTS idx_records_synced
    ON records(partition_name, synced);
"#;

const INSERT_RECORD: &str = "INSERT OR REPLACE INTO records (partition_name, key, data, timestamp, synced)
   VALUES (?1, ?2, ?3, ?4, ?5)";

/// Run a `SELECT data ...` query and decode every row.
///
/// Rows that no longer decode as `R` are skipped so one bad record cannot
/// hide the rest of the partition.
fn query_records<R: Record, P: rusqlite::Params>(
  conn: &Connection,
  sql: &str,
  params: P,
) -> Result<Vec<R>> {
  let mut stmt = conn.prepare(sql)?;
  let rows = stmt.query_map(params, |row| row.get::<_, Vec<u8>>(0))?;

  let mut records = Vec::new();
  for row in rows {
    let data = row?;
    match serde_json::from_slice::<R>(&data) {
      Ok(record) => records.push(record),
      Err(e) => warn!(
        partition = %R::partition(),
        error = %e,
        "skipping undecodable record"
      ),
    }
  }
  Ok(records)
}

impl Store for SqliteStore {
  fn initialize(&self) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| Error::StorageUnavailable(format!("failed to begin schema transaction: {}", e)))?;

    tx.execute_batch(STORE_SCHEMA)
      .map_err(|e| Error::StorageUnavailable(format!("failed to create schema: {}", e)))?;

    for partition in Partition::ALL {
      tx.execute(
        "INSERT OR IGNORE INTO partitions (name) VALUES (?1)",
        params![partition.as_str()],
      )?;
    }

    tx.commit()
      .map_err(|e| Error::StorageUnavailable(format!("failed to commit schema: {}", e)))?;
    Ok(())
  }

  fn get<R: Record>(&self, key: &str) -> Result<Option<R>> {
    let conn = self.lock()?;
    let data: Option<Vec<u8>> = conn
      .query_row(
        "SELECT data FROM records WHERE partition_name = ?1 AND key = ?2",
        params![R::partition().as_str(), key],
        |row| row.get(0),
      )
      .optional()?;
    drop(conn);

    match data {
      Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
      None => Ok(None),
    }
  }

  fn put<R: Record>(&self, record: &R) -> Result<()> {
    let data = serde_json::to_vec(record)?;
    let conn = self.lock()?;
    conn.execute(
      INSERT_RECORD,
      params![
        R::partition().as_str(),
        record.key(),
        data,
        record.timestamp(),
        record.synced()
      ],
    )?;
    Ok(())
  }

  fn delete<R: Record>(&self, key: &str) -> Result<bool> {
    let conn = self.lock()?;
    let removed = conn.execute(
      "DELETE FROM records WHERE partition_name = ?1 AND key = ?2",
      params![R::partition().as_str(), key],
    )?;
    Ok(removed > 0)
  }

  fn get_all<R: Record>(&self) -> Result<Vec<R>> {
    let conn = self.lock()?;
    query_records(
      &conn,
      "SELECT data FROM records WHERE partition_name = ?1 ORDER BY timestamp, key",
      params![R::partition().as_str()],
    )
  }

  fn get_all_by_index<R: Record>(&self, index: Index, value: IndexValue) -> Result<Vec<R>> {
    let sql = format!(
      "SELECT data FROM records WHERE partition_name = ?1 AND {} = ?2 ORDER BY timestamp, key",
      index.column()
    );
    let conn = self.lock()?;
    query_records(&conn, &sql, params![R::partition().as_str(), value.0])
  }

  fn replace<R: Record>(&self, old_key: &str, record: &R) -> Result<()> {
    let data = serde_json::to_vec(record)?;
    let partition = R::partition().as_str();

    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    tx.execute(
      "DELETE FROM records WHERE partition_name = ?1 AND key = ?2",
      params![partition, old_key],
    )?;
    tx.execute(
      INSERT_RECORD,
      params![
        partition,
        record.key(),
        data,
        record.timestamp(),
        record.synced()
      ],
    )?;
    tx.commit()?;
    Ok(())
  }

  fn clear(&self, partition: Partition) -> Result<usize> {
    let conn = self.lock()?;
    let removed = conn.execute(
      "DELETE FROM records WHERE partition_name = ?1",
      params![partition.as_str()],
    )?;
    Ok(removed)
  }

  fn count(&self, partition: Partition) -> Result<usize> {
    let conn = self.lock()?;
    let count: i64 = conn.query_row(
      "SELECT COUNT(*) FROM records WHERE partition_name = ?1",
      params![partition.as_str()],
      |row| row.get(0),
    )?;
    Ok(count as usize)
  }
}
