//! SQLite implementation of the cache storage trait.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;

use super::traits::{request_key, CacheStorage, CachedResponse, EntrySummary, Registration};
use crate::db::{parse_datetime, Database};
use crate::http::{Request, Response};
use crate::lifecycle::LifecycleState;

/// SQLite-based cache storage implementation.
#[derive(Clone)]
pub struct SqliteStorage {
  db: Arc<Database>,
}

impl SqliteStorage {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

fn ensure_partition(conn: &Connection, name: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO cache_partitions (name) VALUES (?)",
      params![name],
    )
    .map_err(|e| eyre!("Failed to open partition '{}': {}", name, e))?;
  Ok(())
}

/// Row mapper for registrations. An unknown state surfaces as the inner error.
fn read_registration(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<Registration>> {
  let version: String = row.get(0)?;
  let state: String = row.get(1)?;
  let static_partition: String = row.get(2)?;
  let dynamic_partition: String = row.get(3)?;

  Ok(state.parse::<LifecycleState>().map(|state| Registration {
    version,
    state,
    static_partition,
    dynamic_partition,
  }))
}

fn insert_entry(
  conn: &Connection,
  partition: &str,
  request: &Request,
  response: &Response,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries (partition, request_key, method, url, status, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        partition,
        request_key(request),
        request.method.as_str(),
        request.url.as_str(),
        response.status,
        headers,
        response.body,
      ],
    )
    .map_err(|e| eyre!("Failed to store {} in '{}': {}", request.url, partition, e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn open_partition(&self, name: &str) -> Result<()> {
    let conn = self.db.lock()?;
    ensure_partition(&conn, name)
  }

  fn partition_names(&self) -> Result<Vec<String>> {
    let conn = self.db.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_partitions ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list partitions: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read partition name: {}", e))?;

    Ok(names)
  }

  fn delete_partition(&self, name: &str) -> Result<bool> {
    let mut conn = self.db.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE partition = ?",
      params![name],
    )
    .map_err(|e| eyre!("Failed to delete entries of '{}': {}", name, e))?;

    let removed = tx
      .execute("DELETE FROM cache_partitions WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete partition '{}': {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn put(&self, partition: &str, request: &Request, response: &Response) -> Result<()> {
    self.put_all(partition, &[(request.clone(), response.clone())])
  }

  fn put_all(&self, partition: &str, entries: &[(Request, Response)]) -> Result<()> {
    let mut conn = self.db.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_partition(&tx, partition)?;
    for (request, response) in entries {
      insert_entry(&tx, partition, request, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn get(&self, partition: &str, request: &Request) -> Result<Option<CachedResponse>> {
    let conn = self.db.lock()?;

    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, cached_at FROM cache_entries
         WHERE partition = ? AND request_key = ?",
        params![partition, request_key(request)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {} in '{}': {}", request.url, partition, e))?;

    match row {
      Some((status, headers, body, cached_at)) => {
        let headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
        Ok(Some(CachedResponse {
          response: Response {
            status,
            headers,
            body,
          },
          cached_at: parse_datetime(&cached_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn entries(&self, partition: &str) -> Result<Vec<EntrySummary>> {
    let conn = self.db.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT method, url, status, length(body), cached_at FROM cache_entries
         WHERE partition = ?
         ORDER BY url",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map(params![partition], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, u16>(2)?,
          row.get::<_, i64>(3)?,
          row.get::<_, String>(4)?,
        ))
      })
      .map_err(|e| eyre!("Failed to list entries of '{}': {}", partition, e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read entry: {}", e))?;

    rows
      .into_iter()
      .map(|(method, url, status, size, cached_at)| {
        Ok(EntrySummary {
          method,
          url,
          status,
          size: size.max(0) as usize,
          cached_at: parse_datetime(&cached_at)?,
        })
      })
      .collect()
  }

  fn registration(&self, version: &str) -> Result<Option<Registration>> {
    let conn = self.db.lock()?;

    conn
      .query_row(
        "SELECT version, state, static_partition, dynamic_partition FROM registrations
         WHERE version = ?",
        params![version],
        read_registration,
      )
      .optional()
      .map_err(|e| eyre!("Failed to read registration '{}': {}", version, e))?
      .transpose()
  }

  fn save_registration(&self, registration: &Registration) -> Result<()> {
    let mut conn = self.db.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    if registration.state == LifecycleState::Active {
      tx.execute(
        "UPDATE registrations SET state = ?, updated_at = datetime('now')
         WHERE state = ? AND version != ?",
        params![
          LifecycleState::Redundant.as_str(),
          LifecycleState::Active.as_str(),
          registration.version,
        ],
      )
      .map_err(|e| eyre!("Failed to retire previous registration: {}", e))?;
    }

    tx.execute(
      "INSERT INTO registrations (version, state, static_partition, dynamic_partition, updated_at)
       VALUES (?, ?, ?, ?, datetime('now'))
       ON CONFLICT(version) DO UPDATE SET
         state = excluded.state,
         static_partition = excluded.static_partition,
         dynamic_partition = excluded.dynamic_partition,
         updated_at = excluded.updated_at",
      params![
        registration.version,
        registration.state.as_str(),
        registration.static_partition,
        registration.dynamic_partition,
      ],
    )
    .map_err(|e| eyre!("Failed to store registration '{}': {}", registration.version, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn active_registration(&self) -> Result<Option<Registration>> {
    let conn = self.db.lock()?;

    conn
      .query_row(
        "SELECT version, state, static_partition, dynamic_partition FROM registrations
         WHERE state = ?
         ORDER BY updated_at DESC, rowid DESC
         LIMIT 1",
        params![LifecycleState::Active.as_str()],
        read_registration,
      )
      .optional()
      .map_err(|e| eyre!("Failed to read active registration: {}", e))?
      .transpose()
  }
}
