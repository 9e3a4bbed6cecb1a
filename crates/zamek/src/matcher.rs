use crate::journal::JournalEvent;
use crate::pool::Pool;
use crate::preempt;
use crate::{AllocationId, ResourceId};

/// Try to grant one of the allocation's alternative groups.
///
/// Groups are attempted in the order the requester declared them; the first
/// group whose every resource is free (or evictable, during an admission
/// pass) wins. The grant itself is a two-phase commit: phase 1 provisionally
/// claims the resources one by one in sorted lexicographic order (the fixed
/// global order that prevents circular waits between overlapping groups),
/// phase 2 either commits all claims or rolls every one of them back and
/// moves on to the next alternative.
///
/// `allow_evict` is set during admission of queued entries; a fresh request
/// never evicts, it has no wait-queue entry yet.
pub(crate) fn try_admit(pool: &mut Pool, id: AllocationId, allow_evict: bool) -> bool {
    let Some(record) = pool.records.get(&id) else {
        log::error!("Trying to admit unknown allocation {id}");
        return false;
    };
    let groups = record.groups.clone();
    let priority = record.priority;

    'groups: for group in &groups {
        let mut resources: Vec<ResourceId> = group.resources.iter().cloned().collect();
        resources.sort();
        resources.dedup();

        for resource in &resources {
            if let Some(holder) = pool.ledger.owner(resource) {
                if !(allow_evict && preempt::evictable(pool, resource, holder)) {
                    continue 'groups;
                }
            }
            // A grant that a better preempting waiter would undo right away
            // is no grant at all; leave the resource to that waiter.
            if preempt::would_be_evicted(pool, resource, id, priority) {
                continue 'groups;
            }
        }

        // Phase 1: provisional claims in the fixed global order.
        let mut claimed: Vec<ResourceId> = Vec::new();
        let mut conflict = false;
        for resource in &resources {
            if let Some(holder) = pool.ledger.owner(resource) {
                if allow_evict && preempt::evictable(pool, resource, holder) {
                    preempt::evict(pool, resource, holder);
                } else {
                    conflict = true;
                    break;
                }
            }
            pool.record_event(&JournalEvent::Claimed {
                resource: resource.clone(),
                id,
            });
            assert!(pool.ledger.claim(resource, id));
            claimed.push(resource.clone());
        }

        if conflict {
            pool.record_event(&JournalEvent::ClaimAborted { id });
            for resource in &claimed {
                pool.ledger.release(resource, id);
            }
            continue 'groups;
        }

        // Phase 2: commit.
        pool.record_event(&JournalEvent::ClaimCommitted { id });
        pool.queues.purge(id);
        pool.grant(id, group.name.clone());
        log::debug!("Allocation {id} granted group {}", group.name);
        return true;
    }
    false
}
