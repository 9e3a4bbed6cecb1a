use crate::allocation::AllocState;
use crate::pool::{Caller, Pool};
use crate::queue;
use crate::{AllocationId, ResourceId};
use chrono::{DateTime, Utc};

/// Outcome of one reclamation pass.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub timed_out: Vec<AllocationId>,
    pub overtime: Vec<AllocationId>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.timed_out.is_empty() && self.overtime.is_empty()
    }
}

/// Age out allocations nobody is using.
///
/// There is no reliable signal of use, so the only ground truth is
/// `last_activity`: an allocation whose window expired is reclaimed as
/// `timedout`, one that kept itself alive past the maximum session length as
/// `overtime`. Both release all owned resources, drop all wait-queue entries
/// and immediately re-run admission for every freed resource, so a queued
/// allocation can be promoted within the same pass.
pub(crate) fn sweep(pool: &mut Pool, now: DateTime<Utc>) -> SweepReport {
    let idle_timeout = pool.config.idle_timeout;
    let session_limit = pool.config.session_limit;

    let mut reclaim: Vec<(AllocationId, AllocState)> = Vec::new();
    for record in pool.records.values() {
        if !record.state.is_live() {
            continue;
        }
        let idle = (now - record.last_activity).to_std().unwrap_or_default();
        let session = (now - record.created_at).to_std().unwrap_or_default();
        if record.state.holds_resources() && session > session_limit {
            reclaim.push((record.id, AllocState::Overtime));
        } else if idle > idle_timeout {
            reclaim.push((record.id, AllocState::Timedout));
        }
    }
    reclaim.sort_by_key(|(id, _)| *id);

    let mut report = SweepReport::default();
    let mut freed: Vec<ResourceId> = Vec::new();
    for (id, state) in reclaim {
        log::info!("Reclaiming idle allocation {id}: {state}");
        freed.extend(pool.release_all(id));
        pool.queues.purge(id);
        pool.set_state(id, state);
        match state {
            AllocState::Overtime => report.overtime.push(id),
            _ => report.timed_out.push(id),
        }
    }

    if !freed.is_empty() {
        queue::offer_resources(pool, &freed);
    }
    pool.flush_journal();
    report
}

/// Compare the client's believed states against ground truth.
///
/// Every mentioned allocation the caller participates in has its
/// `last_activity` refreshed; the response carries only the entries whose
/// true state differs from the belief, so a client tracking many allocations
/// pays bandwidth proportional to the number of discrepancies. Unknown ids
/// and allocations the caller cannot see reconcile to `invalid`.
pub(crate) fn reconcile(
    pool: &mut Pool,
    caller: &Caller,
    beliefs: &[(AllocationId, AllocState)],
    now: DateTime<Utc>,
) -> Vec<(AllocationId, AllocState)> {
    let mut divergent = Vec::new();
    for (id, believed) in beliefs {
        let visible = match pool.records.get(id) {
            Some(record) if caller.admin || record.participant(&caller.user) => {
                Some(record.state)
            }
            _ => None,
        };
        let actual = match visible {
            Some(state) => {
                if state.is_live() {
                    pool.touch(*id, now);
                }
                state
            }
            None => AllocState::Invalid,
        };
        if actual != *believed {
            divergent.push((*id, actual));
        }
    }
    pool.flush_journal();
    divergent
}
