//! Best-fit mapping of a task onto the platform.

use crate::archi::Platform;
use crate::error::{Error, Result};
use crate::sched::schedule::Stats;

/// Cost-unit penalty added to the GRT's ready time so ties break in favor
/// of other PEs and the GRT stays free for orchestration work.
pub const GRT_BIAS: u64 = 10;

/// Outcome of a mapping decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mapping {
    pub pe: usize,
    pub start: u64,
    pub end: u64,
}

/// Pick the PE minimizing the task's end time among the eligible ones,
/// breaking ties by minimum idle time.
///
/// `min_start_on` gives the earliest start on a candidate PE, which folds in
/// the communication cost from every predecessor's PE. `timing_on` is the
/// execution time per cluster.
pub fn best_fit(
    platform: &Platform,
    stats: &Stats,
    task_name: &str,
    mappable: &dyn Fn(usize) -> bool,
    min_start_on: &dyn Fn(usize) -> u64,
    timing_on: &dyn Fn(usize) -> u64,
) -> Result<Mapping> {
    let grt = platform.grt();
    let mut found: Option<Mapping> = None;
    let mut best_idle = u64::MAX;
    for pe in platform.pes() {
        if !pe.enabled || !mappable(pe.virtual_ix) {
            continue;
        }
        let ready = stats.end_time(pe.virtual_ix) + u64::from(pe.virtual_ix == grt) * GRT_BIAS;
        let start = ready.max(min_start_on(pe.virtual_ix));
        let idle = start - ready;
        let end = start + timing_on(pe.cluster_ix);
        match found {
            None => {
                found = Some(Mapping {
                    pe: pe.virtual_ix,
                    start,
                    end,
                });
                best_idle = best_idle.min(idle);
            }
            Some(best) if end < best.end => {
                found = Some(Mapping {
                    pe: pe.virtual_ix,
                    start,
                    end,
                });
                best_idle = best_idle.min(idle);
            }
            Some(best) if end == best.end && idle < best_idle => {
                found = Some(Mapping {
                    pe: pe.virtual_ix,
                    start,
                    end,
                });
                best_idle = idle;
            }
            Some(_) => {}
        }
    }
    found.ok_or_else(|| Error::NoEligiblePe {
        task: task_name.to_string(),
    })
}
