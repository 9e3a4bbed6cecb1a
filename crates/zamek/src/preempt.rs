use crate::allocation::AllocState;
use crate::journal::JournalEvent;
use crate::pool::Pool;
use crate::{AllocationId, Priority, ResourceId};

/// True when the holder of `resource` may be evicted: the queue is in
/// preemptive mode and the holder's priority is strictly worse (numerically
/// greater) than the best queued entry. Equal priorities never preempt.
pub(crate) fn evictable(pool: &Pool, resource: &ResourceId, holder: AllocationId) -> bool {
    if !pool.queues.preemptive(resource) {
        return false;
    }
    let Some((_, head)) = pool.queues.head(resource) else {
        return false;
    };
    match pool.records.get(&holder) {
        Some(record) => record.priority > head.priority,
        None => {
            log::error!("Resource {resource} is held by unknown allocation {holder}");
            false
        }
    }
}

/// True when granting `resource` to a candidate of the given priority would
/// be undone right away: some other queued entry keeps the queue preemptive
/// and outranks the candidate. Such a grant must not be made at all.
pub(crate) fn would_be_evicted(
    pool: &Pool,
    resource: &ResourceId,
    candidate: AllocationId,
    priority: Priority,
) -> bool {
    let mut preempt_pending = false;
    let mut best_other: Option<Priority> = None;
    for (id, key) in pool.queues.entries(resource) {
        if id == candidate {
            continue;
        }
        preempt_pending |= key.preempt;
        best_other = Some(best_other.map_or(key.priority, |b| b.min(key.priority)));
    }
    preempt_pending && best_other.is_some_and(|best| priority > best)
}

/// Run the preemption check of a single resource; returns true when the
/// holder was evicted and the resource freed.
pub(crate) fn resolve(pool: &mut Pool, resource: &ResourceId) -> bool {
    let Some(holder) = pool.ledger.owner(resource) else {
        return false;
    };
    if !evictable(pool, resource, holder) {
        return false;
    }
    evict(pool, resource, holder);
    true
}

/// Immediately and unconditionally take `resource` away from `victim`.
///
/// Only the contested resource is released: a victim that still holds other
/// resources of its granted group keeps them and becomes `restart-needed`;
/// one that lost its entire grant becomes `removed`.
pub(crate) fn evict(pool: &mut Pool, resource: &ResourceId, victim: AllocationId) {
    pool.record_event(&JournalEvent::Released {
        resource: resource.clone(),
        id: victim,
    });
    assert!(pool.ledger.release(resource, victim));

    let state = if pool.ledger.resources_of(victim).is_empty() {
        AllocState::Removed
    } else {
        AllocState::RestartNeeded
    };
    log::info!("Preempting allocation {victim} on resource {resource}, new state {state}");
    pool.set_state(victim, state);
}
