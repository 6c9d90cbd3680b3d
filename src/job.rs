//! Sync jobs and the job runner boundary
//!
//! One [`SyncJob`] per resolved table. Whatever happens inside a job is
//! caught here and turned into a [`JobResult`]; a failing table never
//! crashes sibling jobs or the orchestrator. Exactly one result is
//! produced per dispatched job, also under process-pooled execution where
//! the result crosses a process boundary as one line of JSON on the
//! child's stdout.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::db::ConnectionPair;
use crate::table_sync::TableSyncer;

/// One unit of work: a table plus the merged options of the batch. Owns no
/// connection state; execution borrows the caller's pair or opens a fresh
/// one per worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    pub table: crate::resolver::TableDescriptor,
    pub options: crate::options::EffectiveOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Success,
    Failed,
}

/// Outcome of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub table: String,
    pub status: JobStatus,
    pub elapsed_ms: u64,
    pub rows: u64,
    /// Full error text for failed jobs; the first line is used for display.
    pub message: Option<String>,
}

impl JobResult {
    pub fn success(table: String, elapsed: Duration, rows: u64) -> JobResult {
        JobResult {
            table,
            status: JobStatus::Success,
            elapsed_ms: elapsed.as_millis() as u64,
            rows,
            message: None,
        }
    }

    pub fn failed(table: String, elapsed: Duration, message: String) -> JobResult {
        JobResult {
            table,
            status: JobStatus::Failed,
            elapsed_ms: elapsed.as_millis() as u64,
            rows: 0,
            message: Some(message),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == JobStatus::Failed
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    /// First line of the message, for one-line reporting.
    pub fn display_message(&self) -> Option<&str> {
        self.message.as_deref().and_then(|m| m.lines().next())
    }
}

/// Run one job on the given connections, catching any error at this
/// boundary.
pub async fn run_job(job: &SyncJob, pair: &ConnectionPair) -> JobResult {
    let table = job.table.qualified();
    let started = Instant::now();
    match TableSyncer::new(&job.table, &job.options).sync(pair).await {
        Ok(rows) => JobResult::success(table, started.elapsed(), rows),
        Err(e) => JobResult::failed(table, started.elapsed(), format!("{e:#}")),
    }
}

/// Worker entry point for threaded dispatch: connections are never shared
/// across worker boundaries, so each job re-establishes its own pair
/// before running.
pub async fn run_job_detached(job: SyncJob) -> JobResult {
    let started = Instant::now();
    let pair = match ConnectionPair::connect(&job.options.from, &job.options.to).await {
        Ok(pair) => pair,
        Err(e) => {
            return JobResult::failed(job.table.qualified(), started.elapsed(), format!("{e:#}"))
        }
    };
    run_job(&job, &pair).await
}

/// Parent side of process-pooled dispatch: re-invoke this executable for
/// one job and read the JSON result from the child's stdout. A child that
/// exits without printing a result yields a failed result naming the exit
/// status.
pub async fn run_job_in_subprocess(job: SyncJob) -> JobResult {
    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => return JobResult::failed(job.table.qualified(), Duration::ZERO, e.to_string()),
    };
    run_job_via_exe(exe, job).await
}

/// Spawn `exe --worker` for one job. The payload travels over the child's
/// stdin, never argv: connection strings may embed passwords and argv is
/// world-readable for the whole life of the job.
pub async fn run_job_via_exe(exe: PathBuf, job: SyncJob) -> JobResult {
    let table = job.table.qualified();
    let started = Instant::now();

    let payload = match serde_json::to_string(&job) {
        Ok(payload) => payload,
        Err(e) => return JobResult::failed(table, started.elapsed(), e.to_string()),
    };

    let child = Command::new(exe)
        .arg("--worker")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn();
    let mut child = match child {
        Ok(child) => child,
        Err(e) => {
            return JobResult::failed(
                table,
                started.elapsed(),
                format!("failed to spawn worker process: {e}"),
            )
        }
    };

    if let Some(mut stdin) = child.stdin.take() {
        // The child may exit before reading; a missing result is reported
        // below either way.
        let _ = stdin.write_all(payload.as_bytes()).await;
    }

    let output = match child.wait_with_output().await {
        Ok(output) => output,
        Err(e) => {
            return JobResult::failed(
                table,
                started.elapsed(),
                format!("failed to wait for worker process: {e}"),
            )
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    match stdout
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .map(serde_json::from_str::<JobResult>)
    {
        Some(Ok(result)) => result,
        _ => JobResult::failed(
            table,
            started.elapsed(),
            format!("worker process produced no result ({})", output.status),
        ),
    }
}

/// Child side of process-pooled dispatch: read the job from stdin, run it
/// on fresh connections, print the result as one line of JSON.
pub async fn worker_main() -> anyhow::Result<()> {
    let mut payload = String::new();
    tokio::io::stdin()
        .read_to_string(&mut payload)
        .await
        .context("failed to read worker payload from stdin")?;
    let job: SyncJob = serde_json::from_str(&payload).context("invalid worker payload")?;
    let result = run_job_detached(job).await;
    println!(
        "{}",
        serde_json::to_string(&result).context("failed to encode job result")?
    );
    Ok(())
}
