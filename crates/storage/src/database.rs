//! SQLite-backed installation: connection, schema, and tenant registry.
//!
//! The schema mirrors the table layout of a WordPress installation closely
//! enough for the storage locations to share its naming conventions:
//! per-site `posts`, `postmeta`, `termmeta` and `options` tables, plus the
//! network-wide `usermeta` table and (for multisite installations) the
//! `blogs` registry.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::StorageError;
use crate::record::Site;

/// Default network table prefix.
pub const DEFAULT_TABLE_PREFIX: &str = "wp_";

/// An open installation database.
#[derive(Debug)]
pub struct Database {
    conn: Connection,
    prefix: String,
}

/// Per-call execution context handed to storage locations.
///
/// Carries the connection (or open transaction), the tenant whose tables
/// are addressed, and whether writes must be replaced by row-count estimates.
#[derive(Debug, Clone, Copy)]
pub struct StorageScope<'a> {
    conn: &'a Connection,
    site: &'a Site,
    dry_run: bool,
}

impl<'a> StorageScope<'a> {
    pub fn new(conn: &'a Connection, site: &'a Site, dry_run: bool) -> Self {
        StorageScope {
            conn,
            site,
            dry_run,
        }
    }

    pub fn conn(&self) -> &'a Connection {
        self.conn
    }

    pub fn site(&self) -> &'a Site {
        self.site
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

/// Reject anything other than ASCII alphanumerics and underscores.
pub fn validate_identifier(ident: &str) -> Result<(), StorageError> {
    if !ident.is_empty() && ident.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(StorageError::InvalidIdentifier(ident.to_string()))
    }
}

impl Database {
    /// Open (or create) the database file at `path`.
    pub fn open(path: impl AsRef<Path>, prefix: &str) -> Result<Self, StorageError> {
        validate_identifier(prefix)?;
        let conn = Connection::open(path)?;
        Ok(Database {
            conn,
            prefix: prefix.to_string(),
        })
    }

    /// Open a private in-memory database (tests, dry experiments).
    pub fn open_in_memory(prefix: &str) -> Result<Self, StorageError> {
        validate_identifier(prefix)?;
        Ok(Database {
            conn: Connection::open_in_memory()?,
            prefix: prefix.to_string(),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// The main site of this installation.
    pub fn main_site(&self) -> Site {
        Site::main(&self.prefix)
    }

    /// Create the single-site tables (idempotent).
    pub fn install(&self) -> Result<(), StorageError> {
        let main = self.main_site();
        install_site_tables(&self.conn, &main)?;
        let usermeta = main.network_table("usermeta");
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {usermeta} (
                umeta_id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL DEFAULT 0,
                meta_key TEXT,
                meta_value TEXT
            );
            CREATE INDEX IF NOT EXISTS {usermeta}_key ON {usermeta}(meta_key);"
        ))?;
        debug!(prefix = %self.prefix, "installed single-site tables");
        Ok(())
    }

    /// Turn the installation into a network: create the site registry and
    /// register the main site.
    pub fn install_network(&self) -> Result<(), StorageError> {
        self.install()?;
        let blogs = self.blogs_table();
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {blogs} (
                blog_id INTEGER PRIMARY KEY AUTOINCREMENT,
                path TEXT NOT NULL UNIQUE
            );"
        ))?;
        self.conn.execute(
            &format!("INSERT OR IGNORE INTO {blogs} (blog_id, path) VALUES (?1, '/')"),
            params![Site::MAIN_SITE_ID],
        )?;
        info!(prefix = %self.prefix, "installed network tables");
        Ok(())
    }

    /// Register a new site in the network and create its tables.
    pub fn add_site(&self, path: &str) -> Result<Site, StorageError> {
        if !self.is_multisite()? {
            self.install_network()?;
        }
        let blogs = self.blogs_table();
        self.conn.execute(
            &format!("INSERT INTO {blogs} (path) VALUES (?1)"),
            params![path],
        )?;
        let site = Site::secondary(self.conn.last_insert_rowid(), path, &self.prefix);
        install_site_tables(&self.conn, &site)?;
        info!(site_id = site.id, path, "added site");
        Ok(site)
    }

    /// Whether the site registry exists.
    pub fn is_multisite(&self) -> Result<bool, StorageError> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![self.blogs_table()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// All sites, ordered by id. Single-site installations report the main site only.
    pub fn sites(&self) -> Result<Vec<Site>, StorageError> {
        if !self.is_multisite()? {
            return Ok(vec![self.main_site()]);
        }
        let mut stmt = self.conn.prepare(&format!(
            "SELECT blog_id, path FROM {} ORDER BY blog_id",
            self.blogs_table()
        ))?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;
        let mut sites = Vec::new();
        for row in rows {
            let (id, path) = row?;
            sites.push(Site::secondary(id, &path, &self.prefix));
        }
        Ok(sites)
    }

    /// Write a consistent copy of the database to `path`.
    pub fn backup_to(&self, path: impl AsRef<Path>) -> Result<(), StorageError> {
        let target = path.as_ref().to_string_lossy().into_owned();
        self.conn.execute("VACUUM INTO ?1", params![target])?;
        info!(path = %target, "database backup written");
        Ok(())
    }

    fn blogs_table(&self) -> String {
        format!("{}blogs", self.prefix)
    }
}

fn install_site_tables(conn: &Connection, site: &Site) -> Result<(), StorageError> {
    validate_identifier(&site.table_prefix)?;
    let posts = site.table("posts");
    let postmeta = site.table("postmeta");
    let termmeta = site.table("termmeta");
    let options = site.table("options");
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {posts} (
            ID INTEGER PRIMARY KEY AUTOINCREMENT,
            post_title TEXT NOT NULL DEFAULT '',
            post_content TEXT NOT NULL DEFAULT '',
            post_type TEXT NOT NULL DEFAULT 'post'
        );
        CREATE TABLE IF NOT EXISTS {postmeta} (
            meta_id INTEGER PRIMARY KEY AUTOINCREMENT,
            post_id INTEGER NOT NULL DEFAULT 0,
            meta_key TEXT,
            meta_value TEXT
        );
        CREATE INDEX IF NOT EXISTS {postmeta}_key ON {postmeta}(meta_key);
        CREATE TABLE IF NOT EXISTS {termmeta} (
            meta_id INTEGER PRIMARY KEY AUTOINCREMENT,
            term_id INTEGER NOT NULL DEFAULT 0,
            meta_key TEXT,
            meta_value TEXT
        );
        CREATE INDEX IF NOT EXISTS {termmeta}_key ON {termmeta}(meta_key);
        CREATE TABLE IF NOT EXISTS {options} (
            option_id INTEGER PRIMARY KEY AUTOINCREMENT,
            option_name TEXT NOT NULL UNIQUE,
            option_value TEXT NOT NULL DEFAULT '',
            autoload TEXT NOT NULL DEFAULT 'yes'
        );"
    ))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_site_reports_main_site_only() {
        let db = Database::open_in_memory("wp_").unwrap();
        db.install().unwrap();
        assert!(!db.is_multisite().unwrap());
        let sites = db.sites().unwrap();
        assert_eq!(sites, vec![Site::main("wp_")]);
    }

    #[test]
    fn add_site_creates_prefixed_tables() {
        let db = Database::open_in_memory("wp_").unwrap();
        let site = db.add_site("/two/").unwrap();
        assert_eq!(site.id, 2);
        assert_eq!(site.table_prefix, "wp_2_");
        assert!(db.is_multisite().unwrap());

        db.connection()
            .execute("INSERT INTO wp_2_postmeta (post_id, meta_key) VALUES (1, 'x')", [])
            .unwrap();
        let ids: Vec<i64> = db.sites().unwrap().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn rejects_unsafe_prefix() {
        let err = Database::open_in_memory("wp; DROP").unwrap_err();
        assert!(matches!(err, StorageError::InvalidIdentifier(_)));
    }

    #[test]
    fn backup_writes_copy() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory("wp_").unwrap();
        db.install().unwrap();
        let target = dir.path().join("copy.db");
        db.backup_to(&target).unwrap();
        let copy = Database::open(&target, "wp_").unwrap();
        let count: i64 = copy
            .connection()
            .query_row("SELECT COUNT(*) FROM wp_options", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
