//! Ledger of applied migrations.
//!
//! History lives beside the field data it describes so that a migration and
//! its history entry commit (or roll back) in the same transaction: every
//! method takes the connection or open transaction to use.

use rusqlite::{params, Connection, OptionalExtension};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::debug;

use crate::database::validate_identifier;
use crate::error::StorageError;
use crate::record::HistoryRecord;

pub const DEFAULT_HISTORY_TABLE: &str = "acf_migrations";
pub const DEFAULT_HISTORY_OPTION: &str = "acf_migration_history";

/// Tracks which migrations have run.
pub trait MigrationHistory {
    /// Whether `name` has an active history record.
    fn has_run(&self, conn: &Connection, name: &str) -> Result<bool, StorageError>;

    /// Record `name` as run in a new batch.
    fn add(
        &mut self,
        conn: &Connection,
        name: &str,
        description: &str,
    ) -> Result<HistoryRecord, StorageError>;

    /// Remove the record for `name`. Returns whether a record existed.
    fn remove(&mut self, conn: &Connection, name: &str) -> Result<bool, StorageError>;

    /// All records, oldest first.
    fn all(&self, conn: &Connection) -> Result<Vec<HistoryRecord>, StorageError>;

    /// The `limit` most recent records, newest first.
    fn recent(&self, conn: &Connection, limit: usize) -> Result<Vec<HistoryRecord>, StorageError> {
        let mut records = self.all(conn)?;
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }

    /// Records of one batch, newest first.
    fn batch(&self, conn: &Connection, batch: i64) -> Result<Vec<HistoryRecord>, StorageError> {
        let mut records: Vec<_> = self
            .all(conn)?
            .into_iter()
            .filter(|r| r.batch == batch)
            .collect();
        records.reverse();
        Ok(records)
    }

    fn last_batch_number(&self, conn: &Connection) -> Result<Option<i64>, StorageError> {
        Ok(self.all(conn)?.iter().map(|r| r.batch).max())
    }

    /// Remove every record of `batch`. Returns the number removed.
    fn remove_batch(&mut self, conn: &Connection, batch: i64) -> Result<usize, StorageError> {
        let mut removed = 0;
        for record in self.batch(conn, batch)? {
            if self.remove(conn, &record.name)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// `false` for trackers that only pretend to record history; history
    /// checks are skipped for them.
    fn is_tracking(&self) -> bool {
        true
    }
}

fn now_rfc3339() -> Result<String, StorageError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|e| StorageError::Backend(format!("timestamp formatting failed: {e}")))
}

// ── Dedicated table ──────────────────────────────────────────────────────────

/// History in a dedicated table of the network.
#[derive(Debug, Clone)]
pub struct DatabaseMigrationHistory {
    table: String,
}

impl DatabaseMigrationHistory {
    pub fn new(network_prefix: &str, table: &str) -> Result<Self, StorageError> {
        let table = format!("{network_prefix}{table}");
        validate_identifier(&table)?;
        Ok(DatabaseMigrationHistory { table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn exists(&self, conn: &Connection) -> Result<bool, StorageError> {
        let found: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![self.table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn ensure_table(&self, conn: &Connection) -> Result<(), StorageError> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL DEFAULT '',
                batch INTEGER NOT NULL,
                run_at TEXT NOT NULL
            );",
            self.table
        ))?;
        Ok(())
    }

    fn query(&self, conn: &Connection, order: &str) -> Result<Vec<HistoryRecord>, StorageError> {
        if !self.exists(conn)? {
            return Ok(Vec::new());
        }
        let mut stmt = conn.prepare(&format!(
            "SELECT name, description, batch, run_at FROM {} ORDER BY {order}",
            self.table
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok(HistoryRecord {
                name: row.get(0)?,
                description: row.get(1)?,
                batch: row.get(2)?,
                run_at: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

impl MigrationHistory for DatabaseMigrationHistory {
    fn has_run(&self, conn: &Connection, name: &str) -> Result<bool, StorageError> {
        if !self.exists(conn)? {
            return Ok(false);
        }
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE name = ?1", self.table),
            params![name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn add(
        &mut self,
        conn: &Connection,
        name: &str,
        description: &str,
    ) -> Result<HistoryRecord, StorageError> {
        self.ensure_table(conn)?;
        let batch: i64 = conn.query_row(
            &format!("SELECT COALESCE(MAX(batch), 0) + 1 FROM {}", self.table),
            [],
            |row| row.get(0),
        )?;
        let record = HistoryRecord {
            name: name.to_string(),
            description: description.to_string(),
            batch,
            run_at: now_rfc3339()?,
        };
        conn.execute(
            &format!(
                "INSERT INTO {} (name, description, batch, run_at) VALUES (?1, ?2, ?3, ?4)",
                self.table
            ),
            params![record.name, record.description, record.batch, record.run_at],
        )?;
        debug!(name, batch, "history record added");
        Ok(record)
    }

    fn remove(&mut self, conn: &Connection, name: &str) -> Result<bool, StorageError> {
        if !self.exists(conn)? {
            return Ok(false);
        }
        let removed = conn.execute(
            &format!("DELETE FROM {} WHERE name = ?1", self.table),
            params![name],
        )?;
        Ok(removed > 0)
    }

    fn all(&self, conn: &Connection) -> Result<Vec<HistoryRecord>, StorageError> {
        self.query(conn, "batch, id")
    }

    fn recent(&self, conn: &Connection, limit: usize) -> Result<Vec<HistoryRecord>, StorageError> {
        let mut records = self.query(conn, "batch DESC, id DESC")?;
        records.truncate(limit);
        Ok(records)
    }
}

// ── Options row ──────────────────────────────────────────────────────────────

/// History kept as a JSON document in one row of the main site's options table.
#[derive(Debug, Clone)]
pub struct OptionsMigrationHistory {
    table: String,
    option_name: String,
}

impl OptionsMigrationHistory {
    pub fn new(network_prefix: &str, option_name: &str) -> Result<Self, StorageError> {
        let table = format!("{network_prefix}options");
        validate_identifier(&table)?;
        Ok(OptionsMigrationHistory {
            table,
            option_name: option_name.to_string(),
        })
    }

    fn load(&self, conn: &Connection) -> Result<Vec<HistoryRecord>, StorageError> {
        let raw: Option<String> = conn
            .query_row(
                &format!("SELECT option_value FROM {} WHERE option_name = ?1", self.table),
                params![self.option_name],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(raw) if !raw.trim().is_empty() => Ok(serde_json::from_str(&raw)?),
            _ => Ok(Vec::new()),
        }
    }

    fn store(&self, conn: &Connection, records: &[HistoryRecord]) -> Result<(), StorageError> {
        conn.execute(
            &format!(
                "INSERT INTO {} (option_name, option_value, autoload) VALUES (?1, ?2, 'no')
                 ON CONFLICT(option_name) DO UPDATE SET option_value = excluded.option_value",
                self.table
            ),
            params![self.option_name, serde_json::to_string(records)?],
        )?;
        Ok(())
    }
}

impl MigrationHistory for OptionsMigrationHistory {
    fn has_run(&self, conn: &Connection, name: &str) -> Result<bool, StorageError> {
        Ok(self.load(conn)?.iter().any(|r| r.name == name))
    }

    fn add(
        &mut self,
        conn: &Connection,
        name: &str,
        description: &str,
    ) -> Result<HistoryRecord, StorageError> {
        let mut records = self.load(conn)?;
        records.retain(|r| r.name != name);
        let record = HistoryRecord {
            name: name.to_string(),
            description: description.to_string(),
            batch: records.iter().map(|r| r.batch).max().unwrap_or(0) + 1,
            run_at: now_rfc3339()?,
        };
        records.push(record.clone());
        self.store(conn, &records)?;
        Ok(record)
    }

    fn remove(&mut self, conn: &Connection, name: &str) -> Result<bool, StorageError> {
        let mut records = self.load(conn)?;
        let before = records.len();
        records.retain(|r| r.name != name);
        if records.len() == before {
            return Ok(false);
        }
        self.store(conn, &records)?;
        Ok(true)
    }

    fn all(&self, conn: &Connection) -> Result<Vec<HistoryRecord>, StorageError> {
        self.load(conn)
    }
}

// ── No-op ────────────────────────────────────────────────────────────────────

/// Remembers records for the current process only and never reports a
/// migration as run.
#[derive(Debug, Clone, Default)]
pub struct NullMigrationHistory {
    records: Vec<HistoryRecord>,
}

impl NullMigrationHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MigrationHistory for NullMigrationHistory {
    fn has_run(&self, _conn: &Connection, _name: &str) -> Result<bool, StorageError> {
        Ok(false)
    }

    fn add(
        &mut self,
        _conn: &Connection,
        name: &str,
        description: &str,
    ) -> Result<HistoryRecord, StorageError> {
        let record = HistoryRecord {
            name: name.to_string(),
            description: description.to_string(),
            batch: self.records.iter().map(|r| r.batch).max().unwrap_or(0) + 1,
            run_at: now_rfc3339()?,
        };
        self.records.push(record.clone());
        Ok(record)
    }

    fn remove(&mut self, _conn: &Connection, name: &str) -> Result<bool, StorageError> {
        let before = self.records.len();
        self.records.retain(|r| r.name != name);
        Ok(self.records.len() != before)
    }

    fn all(&self, _conn: &Connection) -> Result<Vec<HistoryRecord>, StorageError> {
        Ok(self.records.clone())
    }

    fn is_tracking(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    fn db() -> Database {
        let db = Database::open_in_memory("wp_").unwrap();
        db.install().unwrap();
        db
    }

    fn exercise(history: &mut dyn MigrationHistory, conn: &Connection) {
        assert!(!history.has_run(conn, "a").unwrap());
        let a = history.add(conn, "a", "first").unwrap();
        let b = history.add(conn, "b", "second").unwrap();
        assert_eq!(a.batch, 1);
        assert_eq!(b.batch, 2);
        assert!(history.has_run(conn, "a").unwrap());

        let recent: Vec<String> = history.recent(conn, 1).unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(recent, vec!["b"]);
        assert_eq!(history.last_batch_number(conn).unwrap(), Some(2));
        assert_eq!(history.batch(conn, 1).unwrap()[0].name, "a");

        assert!(history.remove(conn, "a").unwrap());
        assert!(!history.remove(conn, "a").unwrap());
        assert_eq!(history.remove_batch(conn, 2).unwrap(), 1);
        assert!(history.all(conn).unwrap().is_empty());
    }

    #[test]
    fn database_history() {
        let db = db();
        let mut history = DatabaseMigrationHistory::new("wp_", DEFAULT_HISTORY_TABLE).unwrap();
        exercise(&mut history, db.connection());
    }

    #[test]
    fn database_history_reads_do_not_create_table() {
        let db = db();
        let history = DatabaseMigrationHistory::new("wp_", DEFAULT_HISTORY_TABLE).unwrap();
        assert!(history.all(db.connection()).unwrap().is_empty());
        assert!(!history.exists(db.connection()).unwrap());
    }

    #[test]
    fn options_history() {
        let db = db();
        let mut history = OptionsMigrationHistory::new("wp_", DEFAULT_HISTORY_OPTION).unwrap();
        exercise(&mut history, db.connection());
    }

    #[test]
    fn database_history_rolls_back_with_transaction() {
        let mut db = db();
        let mut history = DatabaseMigrationHistory::new("wp_", DEFAULT_HISTORY_TABLE).unwrap();
        history.add(db.connection(), "kept", "").unwrap();
        {
            let tx = db.connection_mut().transaction().unwrap();
            history.add(&tx, "discarded", "").unwrap();
            tx.rollback().unwrap();
        }
        assert!(history.has_run(db.connection(), "kept").unwrap());
        assert!(!history.has_run(db.connection(), "discarded").unwrap());
    }

    #[test]
    fn null_history_never_reports_runs() {
        let db = db();
        let mut history = NullMigrationHistory::new();
        history.add(db.connection(), "a", "").unwrap();
        assert!(!history.has_run(db.connection(), "a").unwrap());
        assert!(!history.is_tracking());
        assert_eq!(history.all(db.connection()).unwrap().len(), 1);
    }
}
