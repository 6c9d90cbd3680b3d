//! Dispatch and aggregation properties of the batch orchestrator, exercised
//! with stub workers (no database required).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use relsync::envelope::TransactionEnvelope;
use relsync::job::{JobResult, SyncJob};
use relsync::orchestrator::{
    destination_check_deferred, dispatch_pooled, plan_jobs, settle_envelope, BatchSummary,
    TablePreflight,
};
use relsync::progress::ProgressReporter;
use relsync::{EffectiveOptions, SyncError, TableDescriptor};

fn job(name: &str) -> SyncJob {
    SyncJob {
        table: TableDescriptor::parse(name).unwrap(),
        options: EffectiveOptions::default(),
    }
}

fn jobs(names: &[&str]) -> Vec<SyncJob> {
    names.iter().map(|n| job(n)).collect()
}

fn succeed(job: SyncJob) -> JobResult {
    JobResult::success(job.table.qualified(), Duration::from_millis(1), 10)
}

#[tokio::test]
async fn one_result_per_dispatched_job() {
    let progress = ProgressReporter::new(true);
    let results = dispatch_pooled(
        jobs(&["a", "b", "c", "d", "e"]),
        2,
        false,
        &progress,
        |job| async move { succeed(job) },
    )
    .await;

    assert_eq!(results.len(), 5);
    assert!(results.iter().all(|r| !r.is_failed()));
}

#[tokio::test]
async fn failures_are_collected_without_fail_fast() {
    let progress = ProgressReporter::new(true);
    let results = dispatch_pooled(
        jobs(&["public.a", "public.b", "public.c"]),
        1,
        false,
        &progress,
        |job| async move {
            if job.table.name == "b" {
                JobResult::failed(job.table.qualified(), Duration::ZERO, "boom".into())
            } else {
                succeed(job)
            }
        },
    )
    .await;

    assert_eq!(results.len(), 3);
    let summary = BatchSummary::from_results(&results, Duration::from_secs(1));
    assert_eq!(summary.total, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, vec!["public.b".to_string()]);
}

#[tokio::test]
async fn fail_fast_stops_dispatching_new_jobs() {
    let progress = ProgressReporter::new(true);
    let dispatched = Arc::new(AtomicUsize::new(0));
    let counter = dispatched.clone();

    let results = dispatch_pooled(
        jobs(&["public.a", "public.b", "public.c", "public.d"]),
        1,
        true,
        &progress,
        move |job| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                JobResult::failed(job.table.qualified(), Duration::ZERO, "boom".into())
            }
        },
    )
    .await;

    // With width 1 only the failing job ever starts; the rest are never
    // dispatched but the already-dispatched job still reports a result.
    assert_eq!(dispatched.load(Ordering::SeqCst), 1);
    assert_eq!(results.len(), 1);
    assert!(results[0].is_failed());
}

#[tokio::test]
async fn in_flight_jobs_finish_after_fail_fast_triggers() {
    let progress = ProgressReporter::new(true);
    let dispatched = Arc::new(AtomicUsize::new(0));
    let counter = dispatched.clone();

    let results = dispatch_pooled(
        jobs(&["public.a", "public.b", "public.c", "public.d"]),
        2,
        true,
        &progress,
        move |job| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if job.table.name == "a" {
                    JobResult::failed(job.table.qualified(), Duration::ZERO, "boom".into())
                } else {
                    // Outlive the failure so cancellation is observed while
                    // this job is still in flight.
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    succeed(job)
                }
            }
        },
    )
    .await;

    // Strictly fewer than all four jobs were dispatched, and every
    // dispatched job produced exactly one result.
    let started = dispatched.load(Ordering::SeqCst);
    assert!(started < 4, "dispatched {started} jobs");
    assert_eq!(results.len(), started);
    assert_eq!(results.iter().filter(|r| r.is_failed()).count(), 1);
}

#[tokio::test]
async fn worker_panics_become_failed_results() {
    let progress = ProgressReporter::new(true);
    let results = dispatch_pooled(
        jobs(&["public.a", "public.b"]),
        2,
        false,
        &progress,
        |job| async move {
            if job.table.name == "a" {
                panic!("worker blew up");
            }
            succeed(job)
        },
    )
    .await;

    assert_eq!(results.len(), 2);
    let failed: Vec<_> = results.iter().filter(|r| r.is_failed()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].table, "public.a");
}

#[test]
fn tables_without_shared_columns_are_dropped_with_a_warning() {
    let options = EffectiveOptions::default();
    let preflights = vec![
        TablePreflight {
            table: TableDescriptor::parse("public.users").unwrap(),
            shared_fields: vec!["id".into(), "email".into()],
            notes: vec![],
        },
        TablePreflight {
            table: TableDescriptor::parse("public.legacy").unwrap(),
            shared_fields: vec![],
            notes: vec![],
        },
    ];

    let (jobs, dropped) = plan_jobs(preflights, &options);
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].table.qualified(), "public.users");
    assert_eq!(dropped.len(), 1);
    assert!(dropped[0].contains("public.legacy"));
}

/// Records which settlement path ran, standing in for the real
/// two-transaction envelope.
struct RecordingEnvelope {
    outcome: Arc<Mutex<Option<&'static str>>>,
    commit_error: Option<String>,
}

impl RecordingEnvelope {
    fn new(outcome: Arc<Mutex<Option<&'static str>>>) -> RecordingEnvelope {
        RecordingEnvelope {
            outcome,
            commit_error: None,
        }
    }

    fn failing_commit(outcome: Arc<Mutex<Option<&'static str>>>, message: &str) -> RecordingEnvelope {
        RecordingEnvelope {
            outcome,
            commit_error: Some(message.to_string()),
        }
    }
}

#[async_trait::async_trait]
impl TransactionEnvelope for RecordingEnvelope {
    async fn commit(self) -> Result<(), SyncError> {
        *self.outcome.lock().unwrap() = Some("commit");
        match self.commit_error {
            Some(message) => Err(SyncError::Consistency(message)),
            None => Ok(()),
        }
    }

    async fn rollback(self) {
        *self.outcome.lock().unwrap() = Some("rollback");
    }
}

#[tokio::test]
async fn envelope_commits_when_every_job_succeeds() {
    let outcome = Arc::new(Mutex::new(None));
    let results = vec![
        JobResult::success("public.a".into(), Duration::from_millis(1), 1),
        JobResult::success("public.b".into(), Duration::from_millis(1), 2),
    ];

    settle_envelope(RecordingEnvelope::new(outcome.clone()), &results)
        .await
        .unwrap();
    assert_eq!(*outcome.lock().unwrap(), Some("commit"));
}

#[tokio::test]
async fn envelope_rolls_back_on_any_failed_job() {
    let outcome = Arc::new(Mutex::new(None));
    let results = vec![
        JobResult::success("public.a".into(), Duration::from_millis(1), 1),
        JobResult::failed("public.b".into(), Duration::ZERO, "boom".into()),
    ];

    // A rolled-back batch settles cleanly; the failed jobs carry the
    // diagnosis.
    settle_envelope(RecordingEnvelope::new(outcome.clone()), &results)
        .await
        .unwrap();
    assert_eq!(*outcome.lock().unwrap(), Some("rollback"));
}

#[tokio::test]
async fn commit_failures_surface_as_consistency_errors() {
    let outcome = Arc::new(Mutex::new(None));
    let results = vec![JobResult::success(
        "public.a".into(),
        Duration::from_millis(1),
        1,
    )];

    let err = settle_envelope(
        RecordingEnvelope::failing_commit(outcome.clone(), "deferred FK violated"),
        &results,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, SyncError::Consistency(_)));
    assert_eq!(*outcome.lock().unwrap(), Some("commit"));
}

#[test]
fn destination_existence_check_waits_for_schema_step() {
    let mut options = EffectiveOptions::default();
    assert!(!destination_check_deferred(&options));

    options.schema_first = true;
    assert!(destination_check_deferred(&options));

    let mut options = EffectiveOptions::default();
    options.schema_only = true;
    assert!(destination_check_deferred(&options));
}

#[test]
fn empty_failure_list_is_the_only_success_condition() {
    let results = vec![
        JobResult::success("public.a".into(), Duration::from_millis(5), 1),
        JobResult::success("public.b".into(), Duration::from_millis(7), 2),
    ];
    let summary = BatchSummary::from_results(&results, Duration::from_millis(12));
    assert_eq!(summary.succeeded, 2);
    assert!(summary.failed.is_empty());
}
