//! Grid search over L1/L2 geometry and prefetch buffer depth.
//!
//! The trace is parsed once and shared; every grid point gets its own
//! hierarchy, so points are independent and can run on any worker.

use serde::Serialize;

use crate::{
    config::HierarchyConfig,
    error::ConfigError,
    report::Report,
    trace::TraceOp,
};

pub const L1_SIZES: [usize; 3] = [16 * 1024, 32 * 1024, 64 * 1024];
pub const L1_ASSOC: [usize; 3] = [2, 4, 8];
pub const L2_SIZES: [usize; 3] = [128 * 1024, 256 * 1024, 512 * 1024];
pub const L2_ASSOC: [usize; 2] = [4, 8];
pub const PREFETCH_ENTRIES: [usize; 3] = [0, 8, 16];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepPoint {
    pub l1_size: usize,
    pub l1_assoc: usize,
    pub l2_size: usize,
    pub l2_assoc: usize,
    pub prefetch_entries: usize,
}

impl SweepPoint {
    /// `base` with this point's geometry; next-line prefetch on at both levels.
    pub fn apply(&self, base: &HierarchyConfig) -> HierarchyConfig {
        let mut cfg = base.clone();
        cfg.l1.size_bytes = self.l1_size;
        cfg.l1.assoc = self.l1_assoc;
        cfg.l2.size_bytes = self.l2_size;
        cfg.l2.assoc = self.l2_assoc;
        for level in [&mut cfg.l1, &mut cfg.l2] {
            level.prefetch_buf_entries = self.prefetch_entries;
            level.next_line_prefetch = true;
        }
        cfg
    }
}

/// Every grid point, outermost loop first.
pub fn grid() -> Vec<SweepPoint> {
    let mut points = Vec::new();
    for l1_size in L1_SIZES {
        for l1_assoc in L1_ASSOC {
            for l2_size in L2_SIZES {
                for l2_assoc in L2_ASSOC {
                    for prefetch_entries in PREFETCH_ENTRIES {
                        points.push(SweepPoint {
                            l1_size,
                            l1_assoc,
                            l2_size,
                            l2_assoc,
                            prefetch_entries,
                        });
                    }
                }
            }
        }
    }
    points
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepResult {
    pub point: SweepPoint,
    pub report: Report,
}

impl SweepResult {
    pub fn l1_miss_rate(&self) -> f64 {
        self.report.l1.miss_rate
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Sweep {
    /// In grid order.
    pub results: Vec<SweepResult>,
    /// Index into `results` of the lowest L1 miss rate; the earliest point
    /// wins a tie. `None` when no points were run.
    pub best: Option<usize>,
}

impl Sweep {
    pub fn best(&self) -> Option<&SweepResult> {
        self.results.get(self.best?)
    }
}

pub fn run_point(
    base: &HierarchyConfig,
    point: SweepPoint,
    ops: &[TraceOp],
) -> Result<SweepResult, ConfigError> {
    let mut hierarchy = point.apply(base).to_hierarchy()?;
    for t in ops {
        hierarchy.access(t.op, t.addr);
    }
    Ok(SweepResult {
        point,
        report: Report::new(&hierarchy, ops.len() as u64),
    })
}

/// Runs `points` against `ops` on `jobs` worker threads.
///
/// Workers pull point indices from a shared channel; results are put back in
/// grid order before picking the best one, so the outcome does not depend on
/// scheduling. The first failing point (in grid order) is returned as the
/// error.
pub fn run(
    base: &HierarchyConfig,
    points: &[SweepPoint],
    ops: &[TraceOp],
    jobs: usize,
) -> Result<Sweep, (usize, ConfigError)> {
    let (work_tx, work_rx) = crossbeam::channel::unbounded::<usize>();
    let (done_tx, done_rx) = crossbeam::channel::unbounded();
    for idx in 0..points.len() {
        // Receiver is alive until the scope below ends.
        let _ = work_tx.send(idx);
    }
    drop(work_tx);

    let jobs = jobs.clamp(1, points.len().max(1));
    log::info!("sweeping {} points on {} threads", points.len(), jobs);

    let scoped = crossbeam::scope(|s| {
        for _ in 0..jobs {
            let work_rx = work_rx.clone();
            let done_tx = done_tx.clone();
            s.spawn(move |_| {
                for idx in work_rx.iter() {
                    let res = run_point(base, points[idx], ops);
                    if let Ok(r) = &res {
                        log::debug!("point {idx}: l1 miss_rate={:.6}", r.l1_miss_rate());
                    }
                    if done_tx.send((idx, res)).is_err() {
                        return;
                    }
                }
            });
        }
    });
    if let Err(panic) = scoped {
        std::panic::resume_unwind(panic);
    }
    drop(done_tx);

    let mut slots: Vec<Option<Result<SweepResult, ConfigError>>> =
        (0..points.len()).map(|_| None).collect();
    for (idx, res) in done_rx.iter() {
        slots[idx] = Some(res);
    }

    let mut results = Vec::with_capacity(points.len());
    for (idx, slot) in slots.into_iter().enumerate() {
        match slot {
            Some(Ok(r)) => results.push(r),
            Some(Err(err)) => return Err((idx, err)),
            None => unreachable!("every sweep point is sent exactly once"),
        }
    }

    let mut best: Option<usize> = None;
    for (idx, r) in results.iter().enumerate() {
        if best.map_or(true, |b| r.l1_miss_rate() < results[b].l1_miss_rate()) {
            best = Some(idx);
        }
    }

    Ok(Sweep { results, best })
}
