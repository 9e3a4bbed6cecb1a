use crate::common::{Map, Set};
use crate::pool::Pool;
use crate::{matcher, preempt};
use crate::{AllocationId, Priority, ResourceId};
use priority_queue::PriorityQueue;
use std::cmp::Ordering;

/// Ordering key of a wait-queue entry: priority first (0 wins), then
/// arrival sequence. Entries of equal priority are strictly FIFO.
#[derive(Debug, Clone, Copy)]
pub struct WaitKey {
    pub priority: Priority,
    pub seq: u64,
    pub preempt: bool,
}

impl Ord for WaitKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so that the "maximum" entry of the priority queue is the
        // one with the smallest (priority, seq).
        (other.priority, other.seq).cmp(&(self.priority, self.seq))
    }
}

impl PartialOrd for WaitKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for WaitKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for WaitKey {}

#[derive(Default)]
struct ResourceQueue {
    entries: PriorityQueue<AllocationId, WaitKey>,
    /// Number of entries that requested preemption. The queue is in
    /// preemptive mode whenever this is non-zero; the flag is derived from
    /// membership, never stored on the allocation.
    preempt_waiters: usize,
}

/// Per-resource wait queues.
#[derive(Default)]
pub struct WaitQueues {
    queues: Map<ResourceId, ResourceQueue>,
}

impl WaitQueues {
    pub fn enqueue(&mut self, resource: &ResourceId, id: AllocationId, key: WaitKey) {
        let queue = self.queues.entry(resource.clone()).or_default();
        assert!(queue.entries.push(id, key).is_none());
        if key.preempt {
            queue.preempt_waiters += 1;
        }
    }

    pub fn remove(&mut self, resource: &ResourceId, id: AllocationId) -> bool {
        let Some(queue) = self.queues.get_mut(resource) else {
            return false;
        };
        let Some((_, key)) = queue.entries.remove(&id) else {
            return false;
        };
        if key.preempt {
            queue.preempt_waiters -= 1;
        }
        if queue.entries.is_empty() {
            self.queues.remove(resource);
        }
        true
    }

    /// Drop every entry of the given allocation, over all resources.
    pub fn purge(&mut self, id: AllocationId) {
        let resources: Vec<ResourceId> = self
            .queues
            .iter()
            .filter(|(_, q)| q.entries.get(&id).is_some())
            .map(|(r, _)| r.clone())
            .collect();
        for resource in resources {
            self.remove(&resource, id);
        }
    }

    pub fn head(&self, resource: &ResourceId) -> Option<(AllocationId, WaitKey)> {
        self.queues
            .get(resource)
            .and_then(|q| q.entries.peek())
            .map(|(id, key)| (*id, *key))
    }

    pub fn entries(&self, resource: &ResourceId) -> impl Iterator<Item = (AllocationId, WaitKey)> {
        self.queues
            .get(resource)
            .into_iter()
            .flat_map(|q| q.entries.iter().map(|(id, key)| (*id, *key)))
    }

    /// True while any entry of this resource's queue requested preemption.
    pub fn preemptive(&self, resource: &ResourceId) -> bool {
        self.queues
            .get(resource)
            .is_some_and(|q| q.preempt_waiters > 0)
    }

    pub fn waits_on(&self, id: AllocationId) -> Vec<ResourceId> {
        let mut resources: Vec<ResourceId> = self
            .queues
            .iter()
            .filter(|(_, q)| q.entries.get(&id).is_some())
            .map(|(r, _)| r.clone())
            .collect();
        resources.sort();
        resources
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}

/// Offer a set of touched resources to their waiters.
///
/// Runs preemption resolution and admission to a fixpoint: the best waiting
/// entry across all touched resources is matched first; one that cannot
/// complete its group atomically stays queued and the resources are offered
/// to the next eligible entry.
pub(crate) fn offer_resources(pool: &mut Pool, resources: &[ResourceId]) {
    let mut touched: Vec<ResourceId> = resources.to_vec();
    touched.sort();
    touched.dedup();

    loop {
        let mut changed = false;
        for resource in &touched {
            changed |= preempt::resolve(pool, resource);
        }

        let mut tried: Set<AllocationId> = Set::default();
        while let Some(candidate) = next_candidate(pool, &touched, &tried) {
            if matcher::try_admit(pool, candidate, true) {
                changed = true;
            } else {
                tried.insert(candidate);
            }
        }

        if !changed {
            break;
        }
    }
}

/// The best not-yet-tried entry over the queues of the touched resources.
fn next_candidate(
    pool: &Pool,
    touched: &[ResourceId],
    tried: &Set<AllocationId>,
) -> Option<AllocationId> {
    touched
        .iter()
        .flat_map(|r| pool.queues.entries(r))
        .filter(|(id, _)| !tried.contains(id))
        .min_by_key(|(_, key)| (key.priority, key.seq))
        .map(|(id, _)| id)
}

#[cfg(test)]
mod tests {
    use super::{WaitKey, WaitQueues};
    use crate::AllocationId;

    fn key(priority: u32, seq: u64, preempt: bool) -> WaitKey {
        WaitKey {
            priority,
            seq,
            preempt,
        }
    }

    #[test]
    fn head_orders_by_priority_then_arrival() {
        let mut queues = WaitQueues::default();
        let r = "t1".into();
        queues.enqueue(&r, AllocationId::new(1), key(300, 1, false));
        queues.enqueue(&r, AllocationId::new(2), key(200, 2, false));
        queues.enqueue(&r, AllocationId::new(3), key(200, 3, false));

        assert_eq!(queues.head(&r).unwrap().0, AllocationId::new(2));
        queues.remove(&r, AllocationId::new(2));
        assert_eq!(queues.head(&r).unwrap().0, AllocationId::new(3));
        queues.remove(&r, AllocationId::new(3));
        assert_eq!(queues.head(&r).unwrap().0, AllocationId::new(1));
    }

    #[test]
    fn preemptive_mode_follows_membership() {
        let mut queues = WaitQueues::default();
        let r = "t1".into();
        queues.enqueue(&r, AllocationId::new(1), key(500, 1, false));
        assert!(!queues.preemptive(&r));

        queues.enqueue(&r, AllocationId::new(2), key(250, 2, true));
        assert!(queues.preemptive(&r));

        queues.remove(&r, AllocationId::new(2));
        assert!(!queues.preemptive(&r));
    }

    #[test]
    fn purge_removes_all_entries() {
        let mut queues = WaitQueues::default();
        let a = AllocationId::new(1);
        queues.enqueue(&"t1".into(), a, key(100, 1, false));
        queues.enqueue(&"t2".into(), a, key(100, 1, false));
        queues.purge(a);
        assert!(queues.is_empty());
    }
}
