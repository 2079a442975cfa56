//! The orchestrator: validates a migration, resolves its mappings and
//! applies them to every storage location of one tenant or a network.
//!
//! ```text
//! Idle → Validating → Resolving → Executing → Committed | RolledBack | Failed
//! ```
//!
//! `run` never returns an error. Every failure is folded into an
//! unsuccessful [`MigrationResult`] carrying the error message.

use std::sync::Arc;

use fieldmig_storage::{Database, HistoryRecord, MigrationHistory, Site, StorageLocation, StorageScope};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::MigrationConfig;
use crate::error::MigrationError;
use crate::events::{EventDispatcher, EventObserver, TracingObserver};
use crate::mappings::{MappingsResolver, ResolvedMigration};
use crate::migration::{Migration, ROLLBACK_PREFIX};
use crate::migrators::{FieldContext, FieldMigrator, FieldMigrators};
use crate::resolver::FieldResolvers;
use crate::result::MigrationResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    Idle,
    Validating,
    Resolving,
    Executing,
    Committed,
    /// A storage failure rolled the tenant's transaction back.
    RolledBack,
    /// Rejected before execution, or failed on at least one site.
    Failed,
}

/// Which history records to roll back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackSelection {
    /// The `n` most recently run migrations.
    Steps(usize),
    /// Every migration of the most recent batch.
    LastBatch,
}

pub struct Migrator {
    resolver: MappingsResolver,
    migrators: FieldMigrators,
    history: Box<dyn MigrationHistory>,
    default_storage: Vec<Arc<dyn StorageLocation>>,
    observers: Vec<Box<dyn EventObserver>>,
    dry_run: bool,
    multisite: bool,
    state: MigrationState,
}

impl Migrator {
    pub fn new(config: &MigrationConfig) -> Result<Self, MigrationError> {
        Ok(Migrator {
            resolver: MappingsResolver::new(FieldResolvers::new(), config.separator.clone()),
            migrators: FieldMigrators::new(),
            history: config.history()?,
            default_storage: config.default_storage_locations(),
            observers: vec![Box::new(TracingObserver)],
            dry_run: false,
            multisite: false,
            state: MigrationState::Idle,
        })
    }

    /// Replace the configured history tracker.
    pub fn with_history(mut self, history: Box<dyn MigrationHistory>) -> Self {
        self.history = history;
        self
    }

    pub fn resolvers_mut(&mut self) -> &mut FieldResolvers {
        self.resolver.resolvers_mut()
    }

    pub fn register_field_migrator(
        &mut self,
        field_type: impl Into<String>,
        migrator: impl FieldMigrator + 'static,
    ) {
        self.migrators.register(field_type, migrator);
    }

    /// Receive every event of subsequent runs.
    pub fn add_observer(&mut self, observer: impl EventObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Run on every site of the network instead of the main site only.
    pub fn set_multisite(&mut self, multisite: bool) {
        self.multisite = multisite;
    }

    pub fn is_multisite(&self) -> bool {
        self.multisite
    }

    pub fn history(&self) -> &dyn MigrationHistory {
        self.history.as_ref()
    }

    pub fn state(&self) -> MigrationState {
        self.state
    }

    // ── Entry points ─────────────────────────────────────────────────────────

    #[tracing::instrument(
        skip_all,
        fields(migration = %migration.name(), dry_run = self.dry_run, multisite = self.multisite)
    )]
    pub fn run(&mut self, db: &mut Database, migration: &Migration) -> MigrationResult {
        let mut result = MigrationResult::new(self.dry_run);
        let locations = self.storage_locations_for(migration);

        self.state = MigrationState::Validating;
        if let Err(e) = self.validate(db, migration, &locations) {
            return self.abort(result, e);
        }

        self.state = MigrationState::Resolving;
        let resolved = match self.resolver.resolve(migration) {
            Ok(resolved) => resolved,
            Err(e) => return self.abort(result, e.into()),
        };

        self.state = MigrationState::Executing;
        info!(
            mappings = resolved.field_mappings().len(),
            storage_locations = locations.len(),
            "executing migration"
        );
        let outcome = if self.multisite {
            self.run_network(db, &resolved, &locations, &mut result)
        } else {
            self.run_single(db, &resolved, &locations, &mut result)
        };

        match outcome {
            Ok(()) => {
                self.state = MigrationState::Committed;
                info!(rows = result.total_count(), "migration finished");
            }
            Err(e) => {
                warn!(error = %e, "migration failed");
                self.state = match e {
                    MigrationError::SitesFailed(_) => MigrationState::Failed,
                    _ if self.dry_run => MigrationState::Failed,
                    _ => MigrationState::RolledBack,
                };
                result.fail(e.to_string());
            }
        }
        result
    }

    /// Run once in dry-run mode regardless of the current setting.
    pub fn dry_run(&mut self, db: &mut Database, migration: &Migration) -> MigrationResult {
        let previous = std::mem::replace(&mut self.dry_run, true);
        let result = self.run(db, migration);
        self.dry_run = previous;
        result
    }

    /// Run the inverse of `migration`.
    pub fn rollback(&mut self, db: &mut Database, migration: &Migration) -> MigrationResult {
        let rollback = migration.generate_rollback();
        self.run(db, &rollback)
    }

    /// Forward migrations eligible for rollback, most recent first.
    pub fn rollback_candidates(
        &self,
        db: &Database,
        selection: RollbackSelection,
    ) -> Result<Vec<HistoryRecord>, MigrationError> {
        let forward: Vec<HistoryRecord> = self
            .history
            .recent(db.connection(), usize::MAX)?
            .into_iter()
            .filter(|record| !record.name.starts_with(ROLLBACK_PREFIX))
            .collect();
        let candidates = match selection {
            RollbackSelection::Steps(steps) => forward.into_iter().take(steps).collect(),
            RollbackSelection::LastBatch => match forward.iter().map(|r| r.batch).max() {
                Some(last) => forward.into_iter().filter(|r| r.batch == last).collect(),
                None => Vec::new(),
            },
        };
        Ok(candidates)
    }

    // ── Phases ───────────────────────────────────────────────────────────────

    fn storage_locations_for(&self, migration: &Migration) -> Vec<Arc<dyn StorageLocation>> {
        if migration.storage_locations().is_empty() {
            self.default_storage.clone()
        } else {
            migration.storage_locations().to_vec()
        }
    }

    fn validate(
        &self,
        db: &Database,
        migration: &Migration,
        locations: &[Arc<dyn StorageLocation>],
    ) -> Result<(), MigrationError> {
        if !migration.has_field_structures() {
            return Err(MigrationError::MissingFields);
        }
        if locations.is_empty() {
            return Err(MigrationError::NoStorageLocations);
        }
        if self.multisite && !db.is_multisite()? {
            return Err(MigrationError::NotMultisite);
        }
        if !self.history.is_tracking() {
            debug!("history tracking disabled; skipping history checks");
            return Ok(());
        }
        let conn = db.connection();
        match migration.rollback_of() {
            Some(original) => {
                if !self.history.has_run(conn, original)? {
                    return Err(MigrationError::NotRun(original.to_string()));
                }
                if self.history.has_run(conn, migration.name())? {
                    return Err(MigrationError::RollbackAlreadyRun(migration.name().to_string()));
                }
            }
            None => {
                if self.history.has_run(conn, migration.name())? {
                    return Err(MigrationError::AlreadyRun(migration.name().to_string()));
                }
            }
        }
        Ok(())
    }

    fn abort(&mut self, mut result: MigrationResult, error: MigrationError) -> MigrationResult {
        warn!(error = %error, kind = ?error.kind(), "migration rejected");
        self.state = MigrationState::Failed;
        result.fail(error.to_string());
        result
    }

    fn run_single(
        &mut self,
        db: &mut Database,
        resolved: &ResolvedMigration<'_>,
        locations: &[Arc<dyn StorageLocation>],
        result: &mut MigrationResult,
    ) -> Result<(), MigrationError> {
        let Migrator {
            resolver,
            migrators,
            history,
            observers,
            dry_run,
            ..
        } = self;
        let site = db.main_site();
        let mut events = dispatcher(result, observers);
        let dry_run = *dry_run;
        in_transaction(db, &site, dry_run, |scope| {
            apply(migrators, resolver.separator(), resolved, locations, scope, &mut events)?;
            if dry_run {
                return Ok(());
            }
            record_history(history.as_mut(), scope.conn(), resolved.migration())
        })
    }

    /// Run every site in turn. A failing site is recorded and the remaining
    /// sites still run; history is written only when all of them succeeded.
    fn run_network(
        &mut self,
        db: &mut Database,
        resolved: &ResolvedMigration<'_>,
        locations: &[Arc<dyn StorageLocation>],
        result: &mut MigrationResult,
    ) -> Result<(), MigrationError> {
        let Migrator {
            resolver,
            migrators,
            history,
            observers,
            dry_run,
            ..
        } = self;
        let dry_run = *dry_run;
        let sites = db.sites()?;
        let mut failures = Vec::new();

        for site in &sites {
            let mut site_result = MigrationResult::new(dry_run);
            let outcome = {
                let mut events = dispatcher(&mut site_result, observers);
                in_transaction(db, site, dry_run, |scope| {
                    apply(migrators, resolver.separator(), resolved, locations, scope, &mut events)
                })
            };
            match outcome {
                Ok(()) => debug!(site_id = site.id, rows = site_result.total_count(), "site migrated"),
                Err(e) => {
                    warn!(site_id = site.id, path = %site.path, error = %e, "site failed");
                    site_result.fail(e.to_string());
                    failures.push(format!("site {} ({}): {}", site.id, site.path, e));
                }
            }
            result.add_site_result(site.id, site_result);
        }

        if !failures.is_empty() {
            return Err(MigrationError::SitesFailed(failures));
        }
        if !dry_run {
            let main = db.main_site();
            in_transaction(db, &main, false, |scope| {
                record_history(history.as_mut(), scope.conn(), resolved.migration())
            })?;
        }
        result.set_message(format!("migrated {} site(s)", sites.len()));
        Ok(())
    }
}

// ── Execution helpers ────────────────────────────────────────────────────────

fn dispatcher<'o>(
    result: &'o mut MigrationResult,
    observers: &'o mut [Box<dyn EventObserver>],
) -> EventDispatcher<'o> {
    let mut events = EventDispatcher::new();
    events.add_observer(result);
    for observer in observers.iter_mut() {
        events.add_observer(observer.as_mut());
    }
    events
}

/// Run `work` inside one transaction of `db`, or directly against the
/// connection in dry-run mode.
fn in_transaction<F>(db: &mut Database, site: &Site, dry_run: bool, work: F) -> Result<(), MigrationError>
where
    F: FnOnce(&StorageScope<'_>) -> Result<(), MigrationError>,
{
    if dry_run {
        return work(&StorageScope::new(db.connection(), site, true));
    }
    let tx = db.connection_mut().transaction()?;
    let outcome = work(&StorageScope::new(&tx, site, false));
    match outcome {
        Ok(()) => {
            tx.commit()?;
            Ok(())
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback() {
                warn!(error = %rollback, "transaction rollback failed");
            }
            Err(e)
        }
    }
}

/// Every field mapping against every storage location, then one embedded
/// rewrite per location.
fn apply(
    migrators: &FieldMigrators,
    separator: &str,
    resolved: &ResolvedMigration<'_>,
    locations: &[Arc<dyn StorageLocation>],
    scope: &StorageScope<'_>,
    events: &mut EventDispatcher<'_>,
) -> Result<(), MigrationError> {
    let migration = resolved.migration();
    let key_map = resolved.key_map();
    let rewrite = resolved.embedded_rewrite(separator);

    for storage in locations {
        let ctx = FieldContext {
            storage: storage.as_ref(),
            scope,
            separator,
            transformers: migration.transformers(),
            key_map: &key_map,
            old_fields: resolved.old_fields(),
            new_fields: resolved.new_fields(),
        };
        for mapping in resolved.field_mappings() {
            migrators
                .get(mapping.field_type())
                .migrate_field(mapping, &ctx, events)?;
        }
        if !rewrite.is_empty() {
            let rewritten = storage.rewrite_embedded(scope, &rewrite)?;
            if rewritten > 0 {
                events.rows_affected(storage.storage_type(), rewritten);
            }
        }
    }
    Ok(())
}

/// A rollback replaces its original's record; a forward run clears any
/// earlier rollback of itself.
fn record_history(
    history: &mut dyn MigrationHistory,
    conn: &Connection,
    migration: &Migration,
) -> Result<(), MigrationError> {
    match migration.rollback_of() {
        Some(original) => {
            history.remove(conn, original)?;
        }
        None => {
            history.remove(conn, &Migration::rollback_name(migration.name()))?;
        }
    }
    let record = history.add(conn, migration.name(), migration.description())?;
    debug!(name = %record.name, batch = record.batch, "history recorded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldmig_storage::{MetaStorage, NullMigrationHistory};
    use serde_json::json;

    fn setup() -> Database {
        let db = Database::open_in_memory("wp_").unwrap();
        db.install().unwrap();
        db
    }

    fn title_rename() -> Migration {
        Migration::new("rename_title")
            .before(json!([{ "key": "field_title", "name": "title", "type": "text" }]))
            .after(json!([{ "key": "field_title", "name": "headline", "type": "text" }]))
            .rename("title", "headline")
            .for_storage_location(Arc::new(MetaStorage::posts()))
    }

    #[test]
    fn missing_structures_fail_validation() {
        let mut db = setup();
        let mut migrator = Migrator::new(&MigrationConfig::default()).unwrap();
        let result = migrator.run(&mut db, &Migration::new("empty"));
        assert!(!result.success());
        assert_eq!(
            result.message(),
            Some(MigrationError::MissingFields.to_string().as_str())
        );
        assert_eq!(migrator.state(), MigrationState::Failed);
    }

    #[test]
    fn no_storage_locations_fail_validation() {
        let mut db = setup();
        let config = MigrationConfig {
            storage: Vec::new(),
            ..MigrationConfig::default()
        };
        let mut migrator = Migrator::new(&config).unwrap();
        let migration = Migration::new("no_storage")
            .before(json!([{ "key": "field_a", "name": "a" }]))
            .after(json!([{ "key": "field_a", "name": "b" }]));
        let result = migrator.run(&mut db, &migration);
        assert!(!result.success());
        assert!(result.message().unwrap().contains("no storage locations"));
    }

    #[test]
    fn multisite_requires_a_network() {
        let mut db = setup();
        let mut migrator = Migrator::new(&MigrationConfig::default()).unwrap();
        migrator.set_multisite(true);
        let result = migrator.run(&mut db, &title_rename());
        assert!(!result.success());
        assert_eq!(result.message(), Some("this is not a multisite installation"));
    }

    #[test]
    fn rollback_requires_original_run() {
        let mut db = setup();
        let mut migrator = Migrator::new(&MigrationConfig::default()).unwrap();
        let result = migrator.rollback(&mut db, &title_rename());
        assert!(!result.success());
        assert!(result.message().unwrap().contains("has not been run"));
    }

    #[test]
    fn null_history_skips_history_checks() {
        let mut db = setup();
        let mut migrator = Migrator::new(&MigrationConfig::default())
            .unwrap()
            .with_history(Box::new(NullMigrationHistory::new()));
        assert!(migrator.run(&mut db, &title_rename()).success());
        assert!(migrator.run(&mut db, &title_rename()).success());
        assert!(migrator.rollback(&mut db, &title_rename()).success());
    }

    #[test]
    fn unresolvable_definitions_abort_before_execution() {
        let mut db = setup();
        let mut migrator = Migrator::new(&MigrationConfig::default()).unwrap();
        let migration = Migration::new("bad")
            .before(json!("not a field collection"))
            .after(json!([{ "key": "field_a", "name": "a" }]));
        let result = migrator.run(&mut db, &migration);
        assert!(!result.success());
        assert!(result.message().unwrap().contains("unresolvable"));
        assert_eq!(migrator.state(), MigrationState::Failed);
    }

    #[test]
    fn dry_run_restores_previous_mode() {
        let mut db = setup();
        let mut migrator = Migrator::new(&MigrationConfig::default()).unwrap();
        let result = migrator.dry_run(&mut db, &title_rename());
        assert!(result.success());
        assert!(result.is_dry_run());
        assert!(!migrator.is_dry_run());
        assert_eq!(migrator.state(), MigrationState::Committed);
        assert!(!migrator.history().has_run(db.connection(), "rename_title").unwrap());
    }
}
