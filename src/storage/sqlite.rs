//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the storage traits.
//! The connection sits behind a mutex so one `SqliteStorage` can be shared by
//! every worker task in the process.

use crate::model::{ResourceFlags, ResourceKind, Subject, SubjectId, Watermark};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{
    AdjacencyStore, CrawlLog, StorageError, StorageResult, SubjectRegistry, WatermarkStore,
};
use crate::storage::{CrawlLogEntry, CrawlStatus, WatermarkRecord};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Opens (or creates) the state database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        // Several worker processes may share the file
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database (for tests and dry runs)
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

fn sql_id(id: u64) -> StorageResult<i64> {
    i64::try_from(id).map_err(|_| StorageError::ValueOutOfRange(format!("id {}", id)))
}

fn row_id(value: i64) -> StorageResult<u64> {
    u64::try_from(value).map_err(|_| StorageError::ValueOutOfRange(format!("stored id {}", value)))
}

fn parse_resource(value: &str) -> StorageResult<ResourceKind> {
    value
        .parse()
        .map_err(|_| StorageError::ValueOutOfRange(format!("resource '{}'", value)))
}

fn subject_from_row(id: i64, flags: i64, updated_at: String) -> StorageResult<Subject> {
    let bits = u32::try_from(flags)
        .map_err(|_| StorageError::ValueOutOfRange(format!("flags {}", flags)))?;
    Ok(Subject {
        id: row_id(id)?,
        flags: ResourceFlags::from_bits(bits),
        updated_at: Some(updated_at),
    })
}

/// Upserts one watermark on `conn`, which may be inside a transaction
fn write_watermark(
    conn: &Connection,
    subject: SubjectId,
    resource: ResourceKind,
    watermark: &Watermark,
) -> StorageResult<()> {
    if !watermark.matches_kind(resource) {
        return Err(StorageError::WatermarkShape {
            subject,
            resource,
            shape: watermark.shape_name().to_string(),
        });
    }
    let (shape, first, second, third) = watermark
        .to_columns()
        .ok_or_else(|| StorageError::ValueOutOfRange(watermark.to_string()))?;

    conn.execute(
        "INSERT INTO watermarks
            (subject_id, resource, shape, first_value, second_value, third_value, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(subject_id, resource) DO UPDATE SET
            shape = excluded.shape,
            first_value = excluded.first_value,
            second_value = excluded.second_value,
            third_value = excluded.third_value,
            updated_at = excluded.updated_at",
        params![
            sql_id(subject)?,
            resource.as_str(),
            shape,
            first,
            second,
            third,
            Utc::now().to_rfc3339()
        ],
    )?;
    Ok(())
}

impl WatermarkStore for SqliteStorage {
    fn get_watermark(
        &self,
        subject: SubjectId,
        resource: ResourceKind,
    ) -> StorageResult<Watermark> {
        let conn = self.conn()?;
        let row: Option<(String, i64, i64, Option<i64>)> = conn
            .query_row(
                "SELECT shape, first_value, second_value, third_value FROM watermarks
                 WHERE subject_id = ?1 AND resource = ?2",
                params![sql_id(subject)?, resource.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        match row {
            None => Ok(Watermark::zero_for(resource)),
            Some((shape, first, second, third)) => {
                let watermark = Watermark::from_columns(&shape, first, second, third)
                    .filter(|w| w.matches_kind(resource))
                    .ok_or(StorageError::WatermarkShape {
                        subject,
                        resource,
                        shape,
                    })?;
                Ok(watermark)
            }
        }
    }

    fn put_watermark(
        &self,
        subject: SubjectId,
        resource: ResourceKind,
        watermark: &Watermark,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        write_watermark(&conn, subject, resource, watermark)
    }

    fn put_watermark_with_pending(
        &self,
        subject: SubjectId,
        resource: ResourceKind,
        watermark: &Watermark,
        pending: &[u64],
    ) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        write_watermark(&tx, subject, resource, watermark)?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO pending_adjacency (subject_id, resource, target_id)
                 VALUES (?1, ?2, ?3)",
            )?;
            for target in pending {
                stmt.execute(params![sql_id(subject)?, resource.as_str(), sql_id(*target)?])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn list_watermarks(&self) -> StorageResult<Vec<WatermarkRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT subject_id, resource, shape, first_value, second_value, third_value, updated_at
             FROM watermarks ORDER BY subject_id, resource",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, Option<i64>>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut records = Vec::with_capacity(rows.len());
        for (subject, resource, shape, first, second, third, updated_at) in rows {
            let subject = row_id(subject)?;
            let resource = parse_resource(&resource)?;
            let watermark = Watermark::from_columns(&shape, first, second, third).ok_or(
                StorageError::WatermarkShape {
                    subject,
                    resource,
                    shape: shape.clone(),
                },
            )?;
            records.push(WatermarkRecord {
                subject,
                resource,
                watermark,
                updated_at,
            });
        }
        Ok(records)
    }
}

impl SubjectRegistry for SqliteStorage {
    fn list_enabled(&self, resource: ResourceKind) -> StorageResult<Vec<Subject>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT subject_id, flags, updated_at FROM subjects
             WHERE (flags & ?1) != 0 ORDER BY subject_id",
        )?;
        let rows = stmt
            .query_map(params![resource.bit()], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<Vec<(i64, i64, String)>, _>>()?;

        rows.into_iter()
            .map(|(id, flags, updated_at)| subject_from_row(id, flags, updated_at))
            .collect()
    }

    fn list_subjects(&self) -> StorageResult<Vec<Subject>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT subject_id, flags, updated_at FROM subjects ORDER BY subject_id")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<Vec<(i64, i64, String)>, _>>()?;

        rows.into_iter()
            .map(|(id, flags, updated_at)| subject_from_row(id, flags, updated_at))
            .collect()
    }

    fn get_subject(&self, subject: SubjectId) -> StorageResult<Option<Subject>> {
        let conn = self.conn()?;
        let row: Option<(i64, i64, String)> = conn
            .query_row(
                "SELECT subject_id, flags, updated_at FROM subjects WHERE subject_id = ?1",
                params![sql_id(subject)?],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        row.map(|(id, flags, updated_at)| subject_from_row(id, flags, updated_at))
            .transpose()
    }

    fn set_flags(&self, subject: SubjectId, flags: &ResourceFlags) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO subjects (subject_id, flags, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(subject_id) DO UPDATE SET
                flags = excluded.flags,
                updated_at = excluded.updated_at",
            params![sql_id(subject)?, flags.bits(), now],
        )?;
        Ok(())
    }

    fn delete_subject(&self, subject: SubjectId) -> StorageResult<bool> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM subjects WHERE subject_id = ?1",
            params![sql_id(subject)?],
        )?;
        Ok(removed > 0)
    }
}

impl AdjacencyStore for SqliteStorage {
    fn record_adjacency(
        &self,
        subject: SubjectId,
        resource: ResourceKind,
        targets: &[u64],
    ) -> StorageResult<usize> {
        if targets.is_empty() {
            return Ok(0);
        }

        let subject_id = sql_id(subject)?;
        let now = Utc::now().to_rfc3339();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut insert = tx.prepare(
                "INSERT OR IGNORE INTO adjacency (subject_id, resource, target_id, first_seen_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            let mut clear = tx.prepare(
                "DELETE FROM pending_adjacency
                 WHERE subject_id = ?1 AND resource = ?2 AND target_id = ?3",
            )?;
            for target in targets {
                let target = sql_id(*target)?;
                inserted += insert.execute(params![subject_id, resource.as_str(), target, now])?;
                clear.execute(params![subject_id, resource.as_str(), target])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn pending_adjacency(&self, subject: SubjectId, resource: ResourceKind) -> StorageResult<Vec<u64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT target_id FROM pending_adjacency
             WHERE subject_id = ?1 AND resource = ?2 ORDER BY target_id",
        )?;
        let rows = stmt
            .query_map(params![sql_id(subject)?, resource.as_str()], |row| {
                row.get::<_, i64>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(row_id).collect()
    }

    fn count_adjacency(&self, subject: SubjectId, resource: ResourceKind) -> StorageResult<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM adjacency WHERE subject_id = ?1 AND resource = ?2",
            params![sql_id(subject)?, resource.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn adjacency_totals(&self) -> StorageResult<HashMap<ResourceKind, u64>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT resource, COUNT(*) FROM adjacency GROUP BY resource")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut totals = HashMap::new();
        for (resource, count) in rows {
            totals.insert(parse_resource(&resource)?, count as u64);
        }
        Ok(totals)
    }
}

impl CrawlLog for SqliteStorage {
    fn record_crawl(&self, entry: &CrawlLogEntry) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO crawl_log (subject_id, resource, status, item_count, request, error_message, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                sql_id(entry.subject)?,
                entry.resource.as_str(),
                entry.status.to_db_string(),
                entry.item_count,
                entry.request,
                entry.error_message,
                entry.recorded_at
            ],
        )?;
        Ok(())
    }

    fn recent_crawls(
        &self,
        subject: SubjectId,
        resource: ResourceKind,
        limit: u32,
    ) -> StorageResult<Vec<CrawlLogEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT status, item_count, request, error_message, recorded_at FROM crawl_log
             WHERE subject_id = ?1 AND resource = ?2
             ORDER BY id DESC LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![sql_id(subject)?, resource.as_str(), limit], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(status, item_count, request, error_message, recorded_at)| {
                let status = CrawlStatus::from_db_string(&status).ok_or_else(|| {
                    StorageError::ValueOutOfRange(format!("crawl status '{}'", status))
                })?;
                Ok(CrawlLogEntry {
                    subject,
                    resource,
                    status,
                    item_count,
                    request,
                    error_message,
                    recorded_at,
                })
            })
            .collect()
    }

    fn crawl_outcome_counts(&self) -> StorageResult<HashMap<CrawlStatus, u64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM crawl_log GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut counts = HashMap::new();
        for (status, count) in rows {
            if let Some(status) = CrawlStatus::from_db_string(&status) {
                counts.insert(status, count as u64);
            }
        }
        Ok(counts)
    }
}
