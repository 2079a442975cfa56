mod backup;
mod commands;
mod render;

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use fieldmig_core::MigrationConfig;
use fieldmig_storage::Database;
use tracing_subscriber::EnvFilter;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Custom field data migrations for WordPress-style databases.
#[derive(Parser)]
#[command(name = "fieldmig", version, about = "Custom field data migrations")]
struct Cli {
    /// SQLite database of the installation
    #[arg(long, global = true, env = "FIELDMIG_DB")]
    db: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Log engine activity to stderr
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run pending migrations
    Migrate {
        #[command(flatten)]
        run: RunArgs,
        /// Run only the migration with this name
        #[arg(long)]
        name: Option<String>,
    },

    /// Roll back previously run migrations
    Rollback {
        #[command(flatten)]
        run: RunArgs,
        /// Roll back the migration with this name
        #[arg(long, conflicts_with_all = ["steps", "batch"])]
        name: Option<String>,
        /// Number of most recent migrations to roll back
        #[arg(long, default_value_t = 1)]
        steps: usize,
        /// Roll back every migration of the most recent batch
        #[arg(long, conflicts_with = "steps")]
        batch: bool,
    },

    /// Create a new migration file
    Make {
        /// Migration name (letters, digits, '_' and '-')
        name: String,
        /// Directory to create the file in
        #[arg(long)]
        path: Option<PathBuf>,
        /// Human-readable description
        #[arg(long, default_value = "")]
        description: String,
    },

    /// Show which migrations have run
    Status {
        /// Migrations directory
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Replace the database with a backup
    Restore {
        /// Directory holding backups
        #[arg(long)]
        backup_dir: Option<PathBuf>,
        /// Backup file to restore (default: the newest one)
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

/// Flags shared by `migrate` and `rollback`.
#[derive(clap::Args)]
pub(crate) struct RunArgs {
    /// Migrations directory
    #[arg(long)]
    pub path: Option<PathBuf>,
    /// Report what would change without writing
    #[arg(long)]
    pub dry_run: bool,
    /// Run on every site of a multisite network
    #[arg(long)]
    pub network: bool,
    /// Neither check nor record migration history
    #[arg(long)]
    pub ignore_history: bool,
    /// Back the database up before running
    #[arg(long)]
    pub backup: bool,
    /// Directory for backups
    #[arg(long)]
    pub backup_dir: Option<PathBuf>,
}

/// Settings every command needs.
pub(crate) struct Context {
    pub config: MigrationConfig,
    pub db_path: Option<PathBuf>,
    pub output: OutputFormat,
    pub quiet: bool,
}

impl Context {
    /// Exit with an error unless `--db` (or `FIELDMIG_DB`) was given.
    pub fn db_path(&self) -> &Path {
        match &self.db_path {
            Some(path) => path,
            None => fail("no database given: pass --db or set FIELDMIG_DB", self),
        }
    }

    /// Open the database and make sure the tables exist.
    pub fn open_database(&self) -> Database {
        let path = self.db_path();
        let db = match Database::open(path, &self.config.table_prefix) {
            Ok(db) => db,
            Err(e) => fail(&format!("could not open '{}': {}", path.display(), e), self),
        };
        if let Err(e) = db.install() {
            fail(&format!("could not prepare '{}': {}", path.display(), e), self);
        }
        db
    }

    pub fn migrations_path(&self, path: Option<PathBuf>) -> PathBuf {
        path.unwrap_or_else(|| self.config.migrations_path.clone())
    }

    pub fn backup_path(&self, path: Option<PathBuf>) -> PathBuf {
        path.unwrap_or_else(|| self.config.backup_path.clone())
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let config = match &cli.config {
        Some(path) => match MigrationConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                report_error(&e.to_string(), cli.output, cli.quiet);
                process::exit(1);
            }
        },
        None => MigrationConfig::default(),
    };
    let ctx = Context {
        config,
        db_path: cli.db,
        output: cli.output,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Migrate { run, name } => {
            commands::migrate::cmd_migrate(&ctx, run, name.as_deref());
        }
        Commands::Rollback {
            run,
            name,
            steps,
            batch,
        } => {
            commands::rollback::cmd_rollback(&ctx, run, name.as_deref(), steps, batch);
        }
        Commands::Make {
            name,
            path,
            description,
        } => {
            commands::make::cmd_make(&ctx, &name, path, &description);
        }
        Commands::Status { path } => {
            commands::status::cmd_status(&ctx, path);
        }
        Commands::Restore { backup_dir, file } => {
            commands::restore::cmd_restore(&ctx, backup_dir, file);
        }
    }
}

/// Logs go to stderr; `RUST_LOG` overrides the verbosity flags.
fn init_tracing(verbose: bool, quiet: bool) {
    let default = if quiet {
        "error"
    } else if verbose {
        "warn,fieldmig=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("error: {}", msg),
        OutputFormat::Json => {
            let json = serde_json::json!({ "error": msg });
            eprintln!("{}", json);
        }
    }
}

/// Report `msg` and exit with status 1.
pub(crate) fn fail(msg: &str, ctx: &Context) -> ! {
    report_error(msg, ctx.output, ctx.quiet);
    process::exit(1);
}
