//! Command-line options and the merged effective configuration
//!
//! Options are resolved once at batch start with precedence, highest first:
//! explicit CLI flag > config file value > built-in default. The resulting
//! [`EffectiveOptions`] value is immutable and passed into every component;
//! nothing reads ambient process-wide configuration after resolution.

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::config::ConfigFile;
use crate::error::SyncError;

#[derive(Parser, Debug)]
#[command(name = "relsync")]
#[command(about = "Synchronize tables between two PostgreSQL databases")]
#[command(long_about = None)]
pub struct Cli {
    /// Tables or groups to sync (comma-separated). Empty means every table
    /// in the selected schemas.
    pub tables: Vec<String>,

    /// Source database connection string
    #[arg(long, env = "RELSYNC_FROM")]
    pub from: Option<String>,

    /// Destination database connection string
    #[arg(long, env = "RELSYNC_TO")]
    pub to: Option<String>,

    /// Worker width (0 or absent means strategy default)
    #[arg(long)]
    pub jobs: Option<usize>,

    /// Stop dispatching new tables after the first failure
    #[arg(long)]
    pub fail_fast: bool,

    /// Defer destination constraint checks to commit and wrap the whole
    /// batch in paired snapshot transactions (forces sequential execution)
    #[arg(long)]
    pub defer_constraints: bool,

    /// Sequential execution with line-per-event logging instead of spinners
    #[arg(long)]
    pub in_batches: bool,

    /// Debug mode (forces sequential execution)
    #[arg(long)]
    pub debug: bool,

    /// Dump and apply schema before copying any data
    #[arg(long)]
    pub schema_first: bool,

    /// Dump and apply schema, then exit without copying data
    #[arg(long)]
    pub schema_only: bool,

    /// Keep existing destination rows, only insert missing ones
    #[arg(long)]
    pub preserve: bool,

    /// Truncate destination tables instead of deleting rows before copy
    #[arg(long)]
    pub truncate: bool,

    /// Resolve and print the plan without copying anything
    #[arg(long)]
    pub dry_run: bool,

    /// Schemas to resolve tables from (comma-separated, default: public)
    #[arg(long, value_delimiter = ',')]
    pub schemas: Vec<String>,

    /// Tables to exclude from the resolved set (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Config file path (default: .relsync.yml if present)
    #[arg(long, value_name = "PATH")]
    pub config: Option<std::path::PathBuf>,

    /// Internal: run a single table-sync job, reading the JSON payload
    /// from stdin and printing the JSON-encoded result on stdout. Used by
    /// process-pooled dispatch.
    #[arg(long, hide = true)]
    pub worker: bool,
}

/// The merged configuration governing one batch. Resolved once, immutable
/// thereafter. Serializable so process workers receive the exact options
/// the parent resolved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EffectiveOptions {
    pub from: String,
    pub to: String,
    pub jobs: Option<usize>,
    pub schemas: Vec<String>,
    pub exclude: Vec<String>,
    pub fail_fast: bool,
    pub defer_constraints: bool,
    pub in_batches: bool,
    pub debug: bool,
    pub schema_first: bool,
    pub schema_only: bool,
    pub preserve: bool,
    pub truncate: bool,
    pub dry_run: bool,
}

impl EffectiveOptions {
    /// Merge CLI flags over config file values over defaults, then validate
    /// option combinations.
    pub fn resolve(cli: &Cli, file: &ConfigFile) -> Result<Self, SyncError> {
        let from = cli
            .from
            .clone()
            .or_else(|| file.from.clone())
            .ok_or_else(|| {
                SyncError::Configuration(
                    "no source database: pass --from or set `from` in the config file".into(),
                )
            })?;
        let to = cli.to.clone().or_else(|| file.to.clone()).ok_or_else(|| {
            SyncError::Configuration(
                "no destination database: pass --to or set `to` in the config file".into(),
            )
        })?;

        let schemas = if !cli.schemas.is_empty() {
            cli.schemas.clone()
        } else if !file.schemas.is_empty() {
            file.schemas.clone()
        } else {
            vec!["public".to_string()]
        };

        let mut exclude = file.exclude.clone();
        exclude.extend(cli.exclude.iter().cloned());

        let options = EffectiveOptions {
            from,
            to,
            jobs: cli.jobs.or(file.jobs),
            schemas,
            exclude,
            fail_fast: cli.fail_fast || file.fail_fast.unwrap_or(false),
            defer_constraints: cli.defer_constraints || file.defer_constraints.unwrap_or(false),
            in_batches: cli.in_batches,
            debug: cli.debug,
            schema_first: cli.schema_first,
            schema_only: cli.schema_only,
            preserve: cli.preserve || file.preserve.unwrap_or(false),
            truncate: cli.truncate || file.truncate.unwrap_or(false),
            dry_run: cli.dry_run,
        };
        options.validate()?;
        Ok(options)
    }

    fn validate(&self) -> Result<(), SyncError> {
        if self.preserve && (self.schema_first || self.schema_only) {
            return Err(SyncError::Configuration(
                "--preserve cannot be combined with --schema-first or --schema-only".into(),
            ));
        }
        if self.preserve && self.truncate {
            return Err(SyncError::Configuration(
                "--preserve cannot be combined with --truncate".into(),
            ));
        }
        Ok(())
    }

    /// Whether the whole batch must run inside one consistency envelope.
    pub fn requires_consistency(&self) -> bool {
        self.defer_constraints
    }
}
