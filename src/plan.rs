//! Concurrency planning
//!
//! Decides once per batch how jobs are dispatched: sequentially, on a pool
//! of tasks inside this process, or on a pool of worker processes. Deferred
//! constraints need a single logical transaction scope spanning both
//! connections, which isolated workers cannot share, so any consistency or
//! debugging flag forces sequential execution.

use tracing::warn;

use crate::options::EffectiveOptions;

const DEFAULT_THREADED_WIDTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    Sequential,
    Threaded,
    ProcessPooled,
}

impl DispatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchMode::Sequential => "sequential",
            DispatchMode::Threaded => "threaded",
            DispatchMode::ProcessPooled => "process-pooled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyPlan {
    pub mode: DispatchMode,
    pub width: usize,
}

impl ConcurrencyPlan {
    pub fn resolve(options: &EffectiveOptions) -> ConcurrencyPlan {
        Self::resolve_for_host(options, cfg!(unix))
    }

    /// Rules evaluated in order, first match wins. Split out from
    /// [`ConcurrencyPlan::resolve`] so the non-fork branch is testable on
    /// any host.
    pub fn resolve_for_host(options: &EffectiveOptions, fork_supported: bool) -> ConcurrencyPlan {
        if options.debug || options.in_batches || options.defer_constraints {
            // Any explicitly requested width is overridden, not just
            // widths above one.
            if let Some(n) = options.jobs {
                warn!(
                    "ignoring --jobs {n}: debug, in-batches and defer-constraints run sequentially"
                );
            }
            return ConcurrencyPlan {
                mode: DispatchMode::Sequential,
                width: 1,
            };
        }

        let requested = options.jobs.filter(|&n| n > 0);
        if !fork_supported {
            return ConcurrencyPlan {
                mode: DispatchMode::Threaded,
                width: requested.unwrap_or(DEFAULT_THREADED_WIDTH),
            };
        }

        ConcurrencyPlan {
            mode: DispatchMode::ProcessPooled,
            width: requested.unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(DEFAULT_THREADED_WIDTH)
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> EffectiveOptions {
        EffectiveOptions::default()
    }

    #[test]
    fn consistency_flags_force_sequential() {
        let cases: [fn(&mut EffectiveOptions); 3] = [
            |o| o.debug = true,
            |o| o.in_batches = true,
            |o| o.defer_constraints = true,
        ];
        for set in cases {
            // Requested widths of 1 and above are both overridden.
            for jobs in [Some(1), Some(8)] {
                let mut opts = options();
                opts.jobs = jobs;
                set(&mut opts);
                let plan = ConcurrencyPlan::resolve(&opts);
                assert_eq!(plan.mode, DispatchMode::Sequential);
                assert_eq!(plan.width, 1);
            }
        }
    }

    #[test]
    fn threaded_fallback_without_fork_support() {
        let opts = options();
        let plan = ConcurrencyPlan::resolve_for_host(&opts, false);
        assert_eq!(plan.mode, DispatchMode::Threaded);
        assert_eq!(plan.width, 4);

        let mut opts = options();
        opts.jobs = Some(2);
        let plan = ConcurrencyPlan::resolve_for_host(&opts, false);
        assert_eq!(plan.width, 2);
    }

    #[test]
    fn process_pooled_with_explicit_width() {
        let mut opts = options();
        opts.jobs = Some(3);
        let plan = ConcurrencyPlan::resolve_for_host(&opts, true);
        assert_eq!(plan.mode, DispatchMode::ProcessPooled);
        assert_eq!(plan.width, 3);
    }

    #[test]
    fn zero_width_means_strategy_default() {
        let mut opts = options();
        opts.jobs = Some(0);
        let plan = ConcurrencyPlan::resolve_for_host(&opts, true);
        assert_eq!(plan.mode, DispatchMode::ProcessPooled);
        assert!(plan.width >= 1);
    }
}
