//! The process-worker contract: exactly one result per dispatched job,
//! even when the child dies without printing one.

use relsync::job::{run_job_via_exe, SyncJob};
use relsync::{EffectiveOptions, TableDescriptor};
use std::path::PathBuf;

fn job() -> SyncJob {
    let mut options = EffectiveOptions::default();
    // Port 9 (discard) is never a postgres server, so the worker fails at
    // connect time and must still report a result.
    options.from = "postgres://relsync@127.0.0.1:9/src".into();
    options.to = "postgres://relsync@127.0.0.1:9/dst".into();
    SyncJob {
        table: TableDescriptor::parse("public.users").unwrap(),
        options,
    }
}

#[tokio::test]
async fn worker_result_crosses_the_process_boundary() {
    let exe = PathBuf::from(env!("CARGO_BIN_EXE_relsync"));
    let result = run_job_via_exe(exe, job()).await;

    assert!(result.is_failed());
    assert_eq!(result.table, "public.users");
    let message = result.message.as_deref().unwrap_or("");
    assert!(
        message.contains("source"),
        "expected a connect failure, got: {message}"
    );
}

#[tokio::test]
async fn dead_worker_yields_failed_result_with_exit_status() {
    // `false` exits without ever reading the payload or printing a result.
    let result = run_job_via_exe(PathBuf::from("false"), job()).await;

    assert!(result.is_failed());
    assert_eq!(result.table, "public.users");
    let message = result.message.as_deref().unwrap_or("");
    assert!(
        message.contains("produced no result"),
        "expected the no-result diagnosis, got: {message}"
    );
}
