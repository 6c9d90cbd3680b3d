//! relsync library
//!
//! Synchronizes tables between two PostgreSQL databases on a per-table
//! basis. Users select tables explicitly, by config-file group, or by
//! schema; relsync copies rows concurrently, optionally applies schema
//! first, and reports per-table success or failure with timing.
//!
//! # Architecture
//!
//! - [`resolver`] turns CLI arguments into an ordered table list
//! - [`plan`] picks the dispatch strategy (sequential, threaded, or
//!   process-pooled) from the merged options
//! - [`envelope`] wraps the batch in paired snapshot transactions when
//!   constraint deferral is requested
//! - [`job`] runs one table-sync job and owns the error boundary
//! - [`orchestrator`] coordinates the batch end to end and aggregates
//!   the summary
//!
//! # CLI Usage
//!
//! ```bash
//! # Sync two tables with four workers
//! relsync public.users public.orders \
//!   --from postgres://src/app --to postgres://dst/app --jobs 4
//!
//! # Whole schema, all-or-nothing, stop on first failure
//! relsync --schemas public --defer-constraints --fail-fast \
//!   --from $SRC --to $DST
//!
//! # Schema only, no data
//! relsync --schema-only --from $SRC --to $DST
//! ```

pub mod config;
pub mod db;
pub mod envelope;
pub mod error;
pub mod job;
pub mod options;
pub mod orchestrator;
pub mod plan;
pub mod progress;
pub mod resolver;
pub mod schema_sync;
pub mod table_sync;

pub use error::SyncError;
pub use job::{JobResult, JobStatus, SyncJob};
pub use options::{Cli, EffectiveOptions};
pub use orchestrator::{BatchOrchestrator, BatchSummary};
pub use plan::{ConcurrencyPlan, DispatchMode};
pub use resolver::TableDescriptor;
