//! Database snapshots taken before a migration and restored on demand.

use std::path::{Path, PathBuf};

use fieldmig_storage::Database;
use time::macros::format_description;
use time::OffsetDateTime;

const BACKUP_PREFIX: &str = "fieldmig_";
const BACKUP_EXTENSION: &str = "sqlite";

/// Write a snapshot of `db` into `dir`. Returns the backup file.
pub(crate) fn create_backup(db: &Database, dir: &Path) -> Result<PathBuf, String> {
    std::fs::create_dir_all(dir)
        .map_err(|e| format!("could not create backup directory '{}': {}", dir.display(), e))?;
    let stamp = OffsetDateTime::now_utc()
        .format(format_description!(
            "[year]_[month]_[day]_[hour][minute][second]_[subsecond digits:3]"
        ))
        .map_err(|e| format!("timestamp formatting failed: {}", e))?;
    let path = dir.join(format!("{BACKUP_PREFIX}{stamp}.{BACKUP_EXTENSION}"));
    db.backup_to(&path)
        .map_err(|e| format!("backup to '{}' failed: {}", path.display(), e))?;
    Ok(path)
}

/// The newest backup in `dir`, by file name.
pub(crate) fn latest_backup(dir: &Path) -> Result<PathBuf, String> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| format!("could not read backup directory '{}': {}", dir.display(), e))?;
    let mut backups: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| is_backup(path))
        .collect();
    backups.sort();
    backups
        .pop()
        .ok_or_else(|| format!("no backups found in '{}'", dir.display()))
}

fn is_backup(path: &Path) -> bool {
    let named = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(BACKUP_PREFIX));
    named && path.extension().and_then(|e| e.to_str()) == Some(BACKUP_EXTENSION)
}

/// Copy `backup` over the database file at `db_path`.
pub(crate) fn restore_backup(backup: &Path, db_path: &Path) -> Result<(), String> {
    if !backup.is_file() {
        return Err(format!("backup '{}' does not exist", backup.display()));
    }
    std::fs::copy(backup, db_path).map_err(|e| {
        format!(
            "could not restore '{}' to '{}': {}",
            backup.display(),
            db_path.display(),
            e
        )
    })?;
    Ok(())
}
