//! Batch orchestration
//!
//! Turns the resolved table list into a dispatched batch of sync jobs:
//! precondition checks, the optional schema pre-step, job construction
//! (dropping tables with no shared columns), dispatch through the selected
//! concurrency mode, streaming result collection with cooperative
//! fail-fast, and the final summary. Batch states run
//! `Validating -> (SchemaSync) -> Dispatching -> Collecting` and terminate
//! in either a summary or a batch-level error naming every failed table.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::ConfigFile;
use crate::db::{ConnectionPair, DataSource};
use crate::envelope::{ConsistencyEnvelope, TransactionEnvelope};
use crate::error::SyncError;
use crate::job::{run_job, run_job_detached, run_job_in_subprocess, JobResult, SyncJob};
use crate::options::EffectiveOptions;
use crate::plan::{ConcurrencyPlan, DispatchMode};
use crate::progress::{format_elapsed, ProgressReporter};
use crate::resolver::{TableDescriptor, TableResolver};
use crate::schema_sync::SchemaSync;
use crate::table_sync::TableSyncer;

/// Aggregate over all job results. The batch succeeded only when `failed`
/// is empty.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    /// Failed table names in completion order, not submission order.
    pub failed: Vec<String>,
    pub elapsed: Duration,
}

impl BatchSummary {
    pub fn from_results(results: &[JobResult], elapsed: Duration) -> BatchSummary {
        BatchSummary {
            total: results.len(),
            succeeded: results.iter().filter(|r| !r.is_failed()).count(),
            failed: results
                .iter()
                .filter(|r| r.is_failed())
                .map(|r| r.table.clone())
                .collect(),
            elapsed,
        }
    }
}

/// Preflight data for one table: what the two sides have in common and the
/// advisory notes to show before dispatch.
pub struct TablePreflight {
    pub table: TableDescriptor,
    pub shared_fields: Vec<String>,
    pub notes: Vec<String>,
}

pub struct BatchOrchestrator {
    options: EffectiveOptions,
    config: ConfigFile,
}

impl BatchOrchestrator {
    pub fn new(options: EffectiveOptions, config: ConfigFile) -> BatchOrchestrator {
        BatchOrchestrator { options, config }
    }

    /// Run the whole batch. Fails with a [`SyncError`] if the batch does
    /// not fully succeed.
    pub async fn run(&self, args: &[String]) -> anyhow::Result<BatchSummary> {
        let started = Instant::now();

        let pair = ConnectionPair::connect(&self.options.from, &self.options.to).await?;
        let resolver = TableResolver::new(&self.config, &self.options);
        let tables = resolver.tables(args, &pair.source).await?;
        if tables.is_empty() {
            return Err(SyncError::Configuration("no tables to sync".into()).into());
        }

        // Destination tables may not exist until the schema step has run,
        // so their check moves after it when a schema flag is set.
        self.check_tables(&pair.source, &tables).await?;
        if !destination_check_deferred(&self.options) {
            self.check_tables(&pair.destination, &tables).await?;
        }

        if self.options.schema_first || self.options.schema_only {
            SchemaSync::new(&self.options.from, &self.options.to, &tables)
                .perform()
                .await?;
            if self.options.schema_only {
                return Ok(BatchSummary::from_results(&[], started.elapsed()));
            }
            self.check_tables(&pair.destination, &tables).await?;
        }

        let preflights = self.preflight(&pair, &tables).await?;
        for note in preflights.iter().flat_map(|p| p.notes.iter()) {
            info!("{note}");
        }
        let (jobs, dropped) = plan_jobs(preflights, &self.options);
        for warning in &dropped {
            warn!("{warning}");
        }
        if jobs.is_empty() {
            return Err(SyncError::Configuration(
                "no syncable tables: every resolved table was dropped".into(),
            )
            .into());
        }

        let plan = ConcurrencyPlan::resolve(&self.options);
        info!(
            "syncing {} table(s), {} mode, width {}",
            jobs.len(),
            plan.mode.as_str(),
            plan.width
        );

        if self.options.dry_run {
            for job in &jobs {
                info!("would sync {}", job.table);
            }
            return Ok(BatchSummary::from_results(&[], started.elapsed()));
        }

        let progress = ProgressReporter::new(self.options.in_batches);
        let results = if self.options.requires_consistency() {
            // Consistency implies sequential, so the envelope's two
            // transactions are held only by this single execution path.
            let envelope = ConsistencyEnvelope::open(&pair).await?;
            let results =
                dispatch_sequential(&jobs, &pair, &progress, self.options.fail_fast).await;
            settle_envelope(envelope, &results).await?;
            results
        } else {
            match plan.mode {
                DispatchMode::Sequential => {
                    dispatch_sequential(&jobs, &pair, &progress, self.options.fail_fast).await
                }
                DispatchMode::Threaded => {
                    dispatch_pooled(
                        jobs,
                        plan.width,
                        self.options.fail_fast,
                        &progress,
                        run_job_detached,
                    )
                    .await
                }
                DispatchMode::ProcessPooled => {
                    dispatch_pooled(
                        jobs,
                        plan.width,
                        self.options.fail_fast,
                        &progress,
                        run_job_in_subprocess,
                    )
                    .await
                }
            }
        };

        let summary = BatchSummary::from_results(&results, started.elapsed());
        if summary.failed.is_empty() {
            Ok(summary)
        } else {
            Err(SyncError::Batch {
                count: summary.failed.len(),
                tables: summary.failed,
            }
            .into())
        }
    }

    /// Every named table must exist on the given side before any job
    /// starts against it.
    async fn check_tables(
        &self,
        side: &DataSource,
        tables: &[TableDescriptor],
    ) -> anyhow::Result<()> {
        let mut missing = Vec::new();
        for table in tables {
            if !side.table_exists(table).await? {
                missing.push(format!("{table} (missing on {})", side.role()));
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SyncError::Precondition(missing.join(", ")).into())
        }
    }

    async fn preflight(
        &self,
        pair: &ConnectionPair,
        tables: &[TableDescriptor],
    ) -> anyhow::Result<Vec<TablePreflight>> {
        let mut preflights = Vec::with_capacity(tables.len());
        for table in tables {
            let syncer = TableSyncer::new(table, &self.options);
            preflights.push(TablePreflight {
                shared_fields: syncer.shared_fields(pair).await?,
                notes: syncer.notes(pair).await?,
                table: table.clone(),
            });
        }
        Ok(preflights)
    }
}

/// Whether the destination existence check waits until after the schema
/// step. With `--schema-first` or `--schema-only` the destination tables
/// are expected to be created by the dump, not to pre-exist.
pub fn destination_check_deferred(options: &EffectiveOptions) -> bool {
    options.schema_first || options.schema_only
}

/// Commit the envelope when every job succeeded, roll it back otherwise.
/// A rolled-back batch is not an envelope error; the failed jobs already
/// carry the diagnosis.
pub async fn settle_envelope<E: TransactionEnvelope>(
    envelope: E,
    results: &[JobResult],
) -> Result<(), SyncError> {
    if results.iter().any(JobResult::is_failed) {
        envelope.rollback().await;
        Ok(())
    } else {
        envelope.commit().await
    }
}

/// Build one job per table, dropping tables whose column intersection is
/// empty. Dropped tables are warnings, not failures, and produce no
/// result.
pub fn plan_jobs(
    preflights: Vec<TablePreflight>,
    options: &EffectiveOptions,
) -> (Vec<SyncJob>, Vec<String>) {
    let mut jobs = Vec::new();
    let mut dropped = Vec::new();
    for preflight in preflights {
        if preflight.shared_fields.is_empty() {
            dropped.push(format!(
                "skipping {}: no columns in common between source and destination",
                preflight.table
            ));
        } else {
            jobs.push(SyncJob {
                table: preflight.table,
                options: options.clone(),
            });
        }
    }
    (jobs, dropped)
}

/// Sequential dispatch on the caller's connection pair, in table-list
/// order. Used for width-1 plans and for the consistency envelope, whose
/// transactions live on this pair.
pub async fn dispatch_sequential(
    jobs: &[SyncJob],
    pair: &ConnectionPair,
    progress: &ProgressReporter,
    fail_fast: bool,
) -> Vec<JobResult> {
    let mut results = Vec::with_capacity(jobs.len());
    for job in jobs {
        progress.start(&job.table.qualified());
        let result = run_job(job, pair).await;
        progress.finish(&result);
        let failed = result.is_failed();
        results.push(result);
        if failed && fail_fast {
            warn!("fail-fast: not dispatching remaining tables");
            break;
        }
    }
    results
}

/// Pooled dispatch: keep up to `width` workers busy, collect results as
/// they complete. Fail-fast is cooperative; once a failure is observed no
/// new job starts, but in-flight jobs run to completion. A worker that
/// panics is reported as a failed result for its table.
pub async fn dispatch_pooled<W, Fut>(
    jobs: Vec<SyncJob>,
    width: usize,
    fail_fast: bool,
    progress: &ProgressReporter,
    worker: W,
) -> Vec<JobResult>
where
    W: Fn(SyncJob) -> Fut,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    let width = width.max(1);
    let mut queue = jobs.into_iter();
    let mut pool: JoinSet<JobResult> = JoinSet::new();
    let mut inflight: HashMap<tokio::task::Id, String> = HashMap::new();
    let mut results = Vec::new();
    let mut cancelled = false;

    loop {
        while !cancelled && pool.len() < width {
            let Some(job) = queue.next() else { break };
            let table = job.table.qualified();
            progress.start(&table);
            let handle = pool.spawn(worker(job));
            inflight.insert(handle.id(), table);
        }

        let Some(joined) = pool.join_next_with_id().await else {
            break;
        };
        let result = match joined {
            Ok((id, result)) => {
                inflight.remove(&id);
                result
            }
            Err(join_error) => {
                let table = inflight
                    .remove(&join_error.id())
                    .unwrap_or_else(|| "(unknown)".to_string());
                JobResult::failed(
                    table,
                    Duration::ZERO,
                    format!("worker task panicked: {join_error}"),
                )
            }
        };
        progress.finish(&result);
        if result.is_failed() && fail_fast && !cancelled {
            cancelled = true;
            warn!("fail-fast: not dispatching remaining tables");
        }
        results.push(result);
    }
    results
}

/// One line for the final summary.
pub fn summary_line(summary: &BatchSummary) -> String {
    format!(
        "synced {} table(s) in {}",
        summary.succeeded,
        format_elapsed(summary.elapsed)
    )
}
