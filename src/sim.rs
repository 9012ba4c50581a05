//! Drives a hierarchy over a stream of trace operations.

use std::io;

use crate::{hierarchy::CacheHierarchy, trace::TraceOp};

/// Warmup, limit and progress settings for one run. Zero disables each.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunControl {
    /// Statistics are cleared after this many operations; contents stay.
    pub n_warm: u64,
    /// Stop after this many operations past the warmup.
    pub n_limit: u64,
    pub heartbeat: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Every operation applied, warmup included.
    pub seen: u64,
    /// Operations the statistics cover.
    pub measured: u64,
    pub warmed_up: bool,
}

/// Feeds `ops` into `hierarchy` until the stream ends or the limit is hit.
///
/// If the stream ends before the warmup is done, nothing is cleared and the
/// summary covers every operation.
pub fn run_trace<I>(
    hierarchy: &mut CacheHierarchy,
    ops: I,
    ctl: &RunControl,
) -> io::Result<RunSummary>
where
    I: IntoIterator<Item = io::Result<TraceOp>>,
{
    let mut seen: u64 = 0;
    let mut measured: u64 = 0;
    let mut warmup = ctl.n_warm > 0;
    let mut next_heartbeat = ctl.heartbeat;

    for t in ops {
        let t = t?;
        hierarchy.access(t.op, t.addr);
        seen += 1;
        measured += 1;

        if ctl.heartbeat != 0 && seen >= next_heartbeat {
            log::info!("Accesses: {seen}");
            next_heartbeat += ctl.heartbeat;
        }

        if warmup {
            if seen >= ctl.n_warm {
                hierarchy.clear_stats();
                measured = 0;
                warmup = false;
                log::info!("Finished Warmup!");
            }
        } else if ctl.n_limit != 0 && measured >= ctl.n_limit {
            break;
        }
    }
    if warmup {
        log::warn!(
            "trace ended after {seen} accesses, before the {} access warmup finished",
            ctl.n_warm
        );
    }
    log::info!("Ran {seen} accesses");

    Ok(RunSummary {
        seen,
        measured,
        warmed_up: ctl.n_warm > 0 && !warmup,
    })
}
