//! Per-job progress reporting
//!
//! Live spinners (one per in-flight table) when stderr is a terminal and
//! `--in-batches` is off; otherwise one log line per start/finish event.
//! Start and finish are strictly ordered per job; interleaving across jobs
//! is expected.

use indicatif::{MultiProgress, ProgressBar};
use std::collections::HashMap;
use std::io::IsTerminal;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{error, info};

use crate::job::JobResult;

pub struct ProgressReporter {
    spinners: Option<Spinners>,
}

struct Spinners {
    multi: MultiProgress,
    active: Mutex<HashMap<String, ProgressBar>>,
}

impl ProgressReporter {
    pub fn new(line_mode: bool) -> ProgressReporter {
        let interactive = !line_mode && std::io::stderr().is_terminal();
        ProgressReporter {
            spinners: interactive.then(|| Spinners {
                multi: MultiProgress::new(),
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn start(&self, table: &str) {
        match &self.spinners {
            Some(spinners) => {
                let bar = spinners.multi.add(ProgressBar::new_spinner());
                bar.set_message(format!("{table}: syncing"));
                bar.enable_steady_tick(Duration::from_millis(100));
                if let Ok(mut active) = spinners.active.lock() {
                    active.insert(table.to_string(), bar);
                }
            }
            None => info!("{table}: syncing"),
        }
    }

    pub fn finish(&self, result: &JobResult) {
        let line = match result.display_message() {
            Some(message) => format!(
                "{}: failed after {} ({message})",
                result.table,
                format_elapsed(result.elapsed())
            ),
            None => format!(
                "{}: synced {} row(s) in {}",
                result.table,
                result.rows,
                format_elapsed(result.elapsed())
            ),
        };
        match &self.spinners {
            Some(spinners) => {
                let bar = spinners
                    .active
                    .lock()
                    .ok()
                    .and_then(|mut active| active.remove(&result.table));
                if let Some(bar) = bar {
                    bar.finish_with_message(line);
                }
            }
            None if result.is_failed() => error!("{line}"),
            None => info!("{line}"),
        }
    }
}

pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs < 1.0 {
        format!("{}ms", elapsed.as_millis())
    } else if secs < 60.0 {
        format!("{secs:.1}s")
    } else {
        format!("{}m{:02}s", elapsed.as_secs() / 60, elapsed.as_secs() % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_elapsed_times() {
        assert_eq!(format_elapsed(Duration::from_millis(250)), "250ms");
        assert_eq!(format_elapsed(Duration::from_millis(2_500)), "2.5s");
        assert_eq!(format_elapsed(Duration::from_secs(125)), "2m05s");
    }
}
