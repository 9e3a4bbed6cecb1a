use crate::common::Map;
use crate::{AllocationId, ResourceId};

/// Mapping from resource to the allocation currently holding it.
///
/// The ledger is the single source of truth for ownership. All mutations go
/// through the compare-and-swap style [`claim`](Ledger::claim) and
/// [`release`](Ledger::release); both refuse to act when the stored owner
/// does not match the expectation, so a raced or replayed operation cannot
/// corrupt the mapping.
#[derive(Debug, Default)]
pub struct Ledger {
    owners: Map<ResourceId, AllocationId>,
}

impl Ledger {
    pub fn owner(&self, resource: &ResourceId) -> Option<AllocationId> {
        self.owners.get(resource).copied()
    }

    /// Claim a free resource. Fails (returns false) when the resource
    /// already has an owner, including the claimant itself.
    pub fn claim(&mut self, resource: &ResourceId, id: AllocationId) -> bool {
        match self.owners.entry(resource.clone()) {
            hashbrown::hash_map::Entry::Occupied(_) => false,
            hashbrown::hash_map::Entry::Vacant(e) => {
                e.insert(id);
                true
            }
        }
    }

    /// Release a resource held by `id`. Fails (returns false) when the
    /// resource is free or held by somebody else.
    pub fn release(&mut self, resource: &ResourceId, id: AllocationId) -> bool {
        match self.owners.get(resource) {
            Some(owner) if *owner == id => {
                self.owners.remove(resource);
                true
            }
            _ => false,
        }
    }

    /// All resources currently held by the given allocation.
    pub fn resources_of(&self, id: AllocationId) -> Vec<ResourceId> {
        let mut resources: Vec<ResourceId> = self
            .owners
            .iter()
            .filter(|(_, owner)| **owner == id)
            .map(|(r, _)| r.clone())
            .collect();
        resources.sort();
        resources
    }

    pub fn held_count(&self) -> usize {
        self.owners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::Ledger;
    use crate::{AllocationId, ResourceId};

    #[test]
    fn claim_is_compare_and_swap() {
        let mut ledger = Ledger::default();
        let r = ResourceId::from("t1");
        let a = AllocationId::new(1);
        let b = AllocationId::new(2);

        assert!(ledger.claim(&r, a));
        assert!(!ledger.claim(&r, b));
        assert!(!ledger.claim(&r, a));
        assert_eq!(ledger.owner(&r), Some(a));
    }

    #[test]
    fn release_checks_owner() {
        let mut ledger = Ledger::default();
        let r = ResourceId::from("t1");
        let a = AllocationId::new(1);
        let b = AllocationId::new(2);

        assert!(!ledger.release(&r, a));
        assert!(ledger.claim(&r, a));
        assert!(!ledger.release(&r, b));
        assert!(ledger.release(&r, a));
        assert_eq!(ledger.owner(&r), None);
    }

    #[test]
    fn resources_of_lists_all_holdings() {
        let mut ledger = Ledger::default();
        let a = AllocationId::new(7);
        assert!(ledger.claim(&"t2".into(), a));
        assert!(ledger.claim(&"t1".into(), a));
        assert!(ledger.claim(&"t3".into(), AllocationId::new(8)));

        let held = ledger.resources_of(a);
        assert_eq!(held, vec![ResourceId::from("t1"), ResourceId::from("t2")]);
    }
}
