use crate::allocation::{AllocState, Allocation, GroupName, ResourceGroup};
use crate::common::idcounter::IdCounter;
use crate::common::{Map, Set};
use crate::journal::{JournalEvent, JournalReader, JournalWriter};
use crate::ledger::Ledger;
use crate::monitor::SweepReport;
use crate::queue::{WaitKey, WaitQueues};
use crate::{matcher, monitor, queue};
use crate::{AllocationId, Priority, ResourceId, LOWEST_PRIORITY};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Static arbitration policy of a pool instance.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Known resource names; requests naming anything else are rejected.
    pub inventory: Set<ResourceId>,
    /// Users holding the admin role.
    pub admins: Set<String>,
    /// Strongest priority (numerically smallest) a non-admin may request.
    pub priority_floor: Priority,
    /// Idle window after which an allocation is reclaimed as `timedout`.
    pub idle_timeout: Duration,
    /// Maximum session length after which a holder is reclaimed as `overtime`.
    pub session_limit: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            inventory: Default::default(),
            admins: Default::default(),
            priority_floor: 0,
            idle_timeout: Duration::from_secs(30 * 60),
            session_limit: Duration::from_secs(12 * 60 * 60),
        }
    }
}

/// A request identity as derived by the identity/role provider.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user: String,
    pub admin: bool,
}

/// What a new allocation asks for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestSpec {
    /// Alternative groups in declared order; all of them must have the same
    /// number of resources.
    pub groups: Vec<ResourceGroup>,
    pub priority: Option<Priority>,
    pub preempt: bool,
    /// Register in wait queues when not immediately satisfiable.
    pub queue: bool,
    /// Create the allocation on behalf of another user.
    pub obo: Option<String>,
    pub guests: Vec<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestOutcome {
    pub id: AllocationId,
    pub state: AllocState,
    pub granted_group: Option<GroupName>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoveOutcome {
    /// Fully removed; resources freed.
    Removed,
    /// The caller was a guest: only their guest entry was dropped.
    GuestRemoved,
    /// Unknown or already dead allocation.
    Invalid,
    /// The caller is not a participant.
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuestOutcome {
    Done,
    Invalid,
    Denied,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PoolStats {
    pub resources: usize,
    pub resources_held: usize,
    pub queued: usize,
    pub active: usize,
    pub restart_needed: usize,
    pub records: usize,
}

/// The arbitration core: allocation records, the ownership ledger and the
/// wait queues, all kept mutually consistent and mirrored into the journal.
pub struct Pool {
    pub(crate) config: PoolConfig,
    pub(crate) records: Map<AllocationId, Allocation>,
    pub(crate) ledger: Ledger,
    pub(crate) queues: WaitQueues,
    pub(crate) journal: Option<JournalWriter>,
    id_counter: IdCounter,
    seq_counter: IdCounter,
}

impl Pool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            records: Default::default(),
            ledger: Default::default(),
            queues: Default::default(),
            journal: None,
            id_counter: IdCounter::new(1),
            seq_counter: IdCounter::new(1),
        }
    }

    /// Open a journal-backed pool: replays an existing journal (rolling back
    /// any group claim that was interrupted before its commit marker) and
    /// keeps appending to it.
    pub fn open(config: PoolConfig, journal_path: &Path) -> anyhow::Result<Self> {
        let mut pool = Self::new(config);
        if journal_path.exists() {
            log::info!("Restoring pool state from {}", journal_path.display());
            pool.replay(JournalReader::open(journal_path)?)?;
        }
        pool.journal = Some(JournalWriter::create_or_append(journal_path)?);
        Ok(pool)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Derive the caller identity for a user name.
    pub fn caller(&self, user: &str) -> Caller {
        Caller {
            user: user.to_string(),
            admin: self.config.admins.contains(user),
        }
    }

    /// Create an allocation and try to satisfy it right away.
    ///
    /// The outcome state is one of `active` (granted now), `queued`
    /// (registered and waiting), `busy` (unsatisfiable, queuing not
    /// requested) or `rejected` (insufficient privilege or unknown
    /// resources). A record is kept in all cases.
    pub fn request(&mut self, caller: &Caller, spec: RequestSpec) -> crate::Result<RequestOutcome> {
        let now = Utc::now();
        if spec.groups.is_empty() {
            return Err("Request contains no groups".into());
        }
        let width = spec.groups[0].resources.len();
        if width == 0 {
            return Err("Request contains an empty group".into());
        }
        if spec.groups.iter().any(|g| g.resources.len() != width) {
            return Err("All alternative groups must have the same number of resources".into());
        }
        let priority = spec.priority.unwrap_or(LOWEST_PRIORITY);
        if priority > LOWEST_PRIORITY {
            return Err(format!("Priority {priority} is out of range").into());
        }

        let rejection = self.check_privileges(caller, &spec, priority);

        let id = AllocationId::new(self.id_counter.increment() as u32);
        let owner = spec.obo.clone().unwrap_or_else(|| caller.user.clone());
        let record = Allocation {
            id,
            state: AllocState::Queued,
            creator: caller.user.clone(),
            owner,
            guests: spec.guests.iter().cloned().collect(),
            priority,
            preempt: spec.preempt,
            groups: spec.groups.clone(),
            granted_group: None,
            reason: spec.reason.clone(),
            created_at: now,
            last_activity: now,
        };
        self.record_event(&JournalEvent::AllocationCreated(Box::new(record.clone())));
        self.records.insert(id, record);

        if let Some(why) = rejection {
            log::debug!("Rejecting allocation {id} of {}: {why}", caller.user);
            self.set_state(id, AllocState::Rejected);
            self.flush_journal();
            return Ok(self.outcome(id));
        }

        if matcher::try_admit(self, id, false) {
            self.flush_journal();
            return Ok(self.outcome(id));
        }

        if spec.queue {
            let mut mentioned: Vec<ResourceId> = self
                .records
                .get(&id)
                .map(|r| r.mentioned_resources().into_iter().collect())
                .unwrap_or_default();
            mentioned.sort();
            let seq = self.seq_counter.increment();
            let key = WaitKey {
                priority,
                seq,
                preempt: spec.preempt,
            };
            for resource in &mentioned {
                self.queues.enqueue(resource, id, key);
            }
            log::debug!("Allocation {id} queued on {} resources", mentioned.len());
            // Entering the queues may flip resources into preemptive mode
            // and admit this or an older entry through an eviction.
            queue::offer_resources(self, &mentioned);
        } else {
            self.set_state(id, AllocState::Busy);
        }
        self.flush_journal();
        Ok(self.outcome(id))
    }

    fn check_privileges(
        &self,
        caller: &Caller,
        spec: &RequestSpec,
        priority: Priority,
    ) -> Option<String> {
        if !caller.admin {
            if spec.preempt {
                return Some("preemption requires the admin role".to_string());
            }
            if priority < self.config.priority_floor {
                return Some(format!(
                    "priority {priority} is stronger than the allowed floor {}",
                    self.config.priority_floor
                ));
            }
            if spec.obo.as_deref().is_some_and(|u| u != caller.user) {
                return Some("allocating on behalf of another user requires the admin role".into());
            }
        }
        for group in &spec.groups {
            if let Some(unknown) = group
                .resources
                .iter()
                .find(|r| !self.config.inventory.contains(*r))
            {
                return Some(format!("unknown resource {unknown}"));
            }
        }
        None
    }

    fn outcome(&self, id: AllocationId) -> RequestOutcome {
        match self.records.get(&id) {
            Some(record) => RequestOutcome {
                id,
                state: record.state,
                granted_group: record.granted_group.clone(),
            },
            None => RequestOutcome {
                id,
                state: AllocState::Invalid,
                granted_group: None,
            },
        }
    }

    /// Remove an allocation, or (for a guest caller) just their guest entry.
    pub fn remove(&mut self, caller: &Caller, id: AllocationId) -> RemoveOutcome {
        let Some(record) = self.records.get(&id) else {
            return RemoveOutcome::Invalid;
        };
        let removable = matches!(
            record.state,
            AllocState::Queued
                | AllocState::Active
                | AllocState::RestartNeeded
                | AllocState::Overtime
        );
        if !removable {
            return RemoveOutcome::Invalid;
        }
        let is_owner =
            caller.admin || record.owner == caller.user || record.creator == caller.user;
        let is_guest = record.guests.contains(&caller.user);

        if is_owner {
            log::info!("Removing allocation {id}");
            let freed = self.release_all(id);
            self.queues.purge(id);
            self.set_state(id, AllocState::Removed);
            if !freed.is_empty() {
                queue::offer_resources(self, &freed);
            }
            self.flush_journal();
            RemoveOutcome::Removed
        } else if is_guest {
            self.drop_guest(id, &caller.user);
            self.flush_journal();
            RemoveOutcome::GuestRemoved
        } else {
            RemoveOutcome::Denied
        }
    }

    /// Grant a user the use of the allocation's resources, without removal
    /// rights. Only the owner, the creator or an admin may add guests.
    pub fn guest_add(&mut self, caller: &Caller, id: AllocationId, user: &str) -> GuestOutcome {
        let Some(record) = self.records.get_mut(&id) else {
            return GuestOutcome::Invalid;
        };
        if !record.state.is_live() {
            return GuestOutcome::Invalid;
        }
        if !(caller.admin || record.owner == caller.user || record.creator == caller.user) {
            return GuestOutcome::Denied;
        }
        if record.guests.insert(user.to_string()) {
            self.record_event(&JournalEvent::GuestAdded {
                id,
                user: user.to_string(),
            });
            self.flush_journal();
        }
        GuestOutcome::Done
    }

    /// Drop a guest. Owners, creators and admins may drop anybody; a guest
    /// may drop only themselves.
    pub fn guest_remove(&mut self, caller: &Caller, id: AllocationId, user: &str) -> GuestOutcome {
        let Some(record) = self.records.get(&id) else {
            return GuestOutcome::Invalid;
        };
        if !record.guests.contains(user) {
            return GuestOutcome::Invalid;
        }
        let permitted = caller.admin
            || record.owner == caller.user
            || record.creator == caller.user
            || caller.user == user;
        if !permitted {
            return GuestOutcome::Denied;
        }
        self.drop_guest(id, user);
        self.flush_journal();
        GuestOutcome::Done
    }

    fn drop_guest(&mut self, id: AllocationId, user: &str) {
        if let Some(record) = self.records.get_mut(&id) {
            if record.guests.remove(user) {
                self.record_event(&JournalEvent::GuestRemoved {
                    id,
                    user: user.to_string(),
                });
            }
        }
    }

    /// The access gate consulted by resource drivers: true iff the caller
    /// participates in the allocation currently holding the resource, or is
    /// an admin. A successful participant check counts as activity.
    pub fn authorize(&mut self, caller: &Caller, resource: &ResourceId) -> bool {
        let Some(holder) = self.ledger.owner(resource) else {
            return caller.admin;
        };
        let participates = self
            .records
            .get(&holder)
            .is_some_and(|r| r.participant(&caller.user));
        if participates {
            self.touch(holder, Utc::now());
            self.flush_journal();
            return true;
        }
        caller.admin
    }

    /// Reconcile client-believed states against ground truth; returns only
    /// the divergent subset.
    pub fn keepalive(
        &mut self,
        caller: &Caller,
        beliefs: &[(AllocationId, AllocState)],
    ) -> Vec<(AllocationId, AllocState)> {
        monitor::reconcile(self, caller, beliefs, Utc::now())
    }

    /// One reclamation pass of the idleness monitor.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> SweepReport {
        monitor::sweep(self, now)
    }

    pub fn allocation(&self, id: AllocationId) -> Option<&Allocation> {
        self.records.get(&id)
    }

    /// All records the caller may see: everything for admins, otherwise the
    /// allocations the caller participates in.
    pub fn visible<'a>(&'a self, caller: &'a Caller) -> impl Iterator<Item = &'a Allocation> {
        self.records
            .values()
            .filter(move |r| caller.admin || r.participant(&caller.user))
    }

    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            resources: self.config.inventory.len(),
            resources_held: self.ledger.held_count(),
            records: self.records.len(),
            ..Default::default()
        };
        for record in self.records.values() {
            match record.state {
                AllocState::Queued => stats.queued += 1,
                AllocState::Active => stats.active += 1,
                AllocState::RestartNeeded => stats.restart_needed += 1,
                _ => {}
            }
        }
        stats
    }

    /// Offer every free resource of the inventory to its waiters. Called
    /// once after a restore.
    pub fn reoffer_free(&mut self) {
        let free: Vec<ResourceId> = self
            .config
            .inventory
            .iter()
            .filter(|r| self.ledger.owner(r).is_none())
            .cloned()
            .collect();
        if !free.is_empty() {
            queue::offer_resources(self, &free);
        }
        self.flush_journal();
    }

    pub(crate) fn touch(&mut self, id: AllocationId, now: DateTime<Utc>) {
        if let Some(record) = self.records.get_mut(&id) {
            record.touch(now);
            self.record_event(&JournalEvent::ActivityRefreshed { id, at: now });
        }
    }

    pub(crate) fn set_state(&mut self, id: AllocationId, state: AllocState) {
        let granted_group = match self.records.get_mut(&id) {
            Some(record) => {
                record.state = state;
                record.granted_group.clone()
            }
            None => {
                log::error!("Changing state of unknown allocation {id}");
                return;
            }
        };
        self.record_event(&JournalEvent::StateChanged {
            id,
            state,
            granted_group,
        });
    }

    pub(crate) fn grant(&mut self, id: AllocationId, group: GroupName) {
        let now = Utc::now();
        match self.records.get_mut(&id) {
            Some(record) => {
                record.granted_group = Some(group);
                record.touch(now);
            }
            None => {
                log::error!("Granting a group to unknown allocation {id}");
                return;
            }
        }
        self.set_state(id, AllocState::Active);
    }

    /// Release everything the allocation holds; returns the freed resources.
    pub(crate) fn release_all(&mut self, id: AllocationId) -> Vec<ResourceId> {
        let resources = self.ledger.resources_of(id);
        for resource in &resources {
            self.record_event(&JournalEvent::Released {
                resource: resource.clone(),
                id,
            });
            self.ledger.release(resource, id);
        }
        resources
    }

    pub(crate) fn record_event(&mut self, event: &JournalEvent) {
        if let Some(journal) = &mut self.journal {
            if let Err(error) = journal.store(event) {
                log::error!("Cannot write journal event: {error:?}");
            }
        }
    }

    pub(crate) fn flush_journal(&mut self) {
        if let Some(journal) = &mut self.journal {
            if let Err(error) = journal.flush() {
                log::error!("Cannot flush journal: {error:?}");
            }
        }
    }

    fn replay(&mut self, reader: JournalReader) -> anyhow::Result<()> {
        let mut pending: Map<AllocationId, Vec<ResourceId>> = Default::default();
        for event in reader {
            let event = event.map_err(|e| anyhow::anyhow!("Corrupted journal: {e:?}"))?;
            match event {
                JournalEvent::AllocationCreated(record) => {
                    self.id_counter.set_if_larger(record.id.as_num() as u64 + 1);
                    self.records.insert(record.id, *record);
                }
                JournalEvent::StateChanged {
                    id,
                    state,
                    granted_group,
                } => {
                    if let Some(record) = self.records.get_mut(&id) {
                        record.state = state;
                        record.granted_group = granted_group;
                    }
                }
                JournalEvent::GuestAdded { id, user } => {
                    if let Some(record) = self.records.get_mut(&id) {
                        record.guests.insert(user);
                    }
                }
                JournalEvent::GuestRemoved { id, user } => {
                    if let Some(record) = self.records.get_mut(&id) {
                        record.guests.remove(&user);
                    }
                }
                JournalEvent::ActivityRefreshed { id, at } => {
                    if let Some(record) = self.records.get_mut(&id) {
                        record.last_activity = at;
                    }
                }
                JournalEvent::Claimed { resource, id } => {
                    if !self.ledger.claim(&resource, id) {
                        anyhow::bail!("Journal claims {resource} twice");
                    }
                    pending.entry(id).or_default().push(resource);
                }
                JournalEvent::ClaimCommitted { id } => {
                    pending.remove(&id);
                }
                JournalEvent::ClaimAborted { id } => {
                    for resource in pending.remove(&id).unwrap_or_default() {
                        self.ledger.release(&resource, id);
                    }
                }
                JournalEvent::Released { resource, id } => {
                    if let Some(claims) = pending.get_mut(&id) {
                        claims.retain(|r| *r != resource);
                    }
                    self.ledger.release(&resource, id);
                }
            }
        }

        // Claims with no commit marker belong to a grant that was interrupted
        // half-way; undo them.
        for (id, resources) in pending {
            log::warn!("Rolling back interrupted group claim of allocation {id}");
            for resource in resources {
                self.ledger.release(&resource, id);
            }
        }

        // Wait-queue membership is derived state: rebuild it from the queued
        // records, in creation order.
        let mut queued: Vec<AllocationId> = self
            .records
            .values()
            .filter(|r| r.state == AllocState::Queued)
            .map(|r| r.id)
            .collect();
        queued.sort();
        for id in queued {
            let Some(record) = self.records.get(&id) else {
                continue;
            };
            let priority = record.priority;
            let preempt = record.preempt;
            let mut mentioned: Vec<ResourceId> =
                record.mentioned_resources().into_iter().collect();
            mentioned.sort();
            let seq = self.seq_counter.increment();
            let key = WaitKey {
                priority,
                seq,
                preempt,
            };
            for resource in &mentioned {
                self.queues.enqueue(resource, id, key);
            }
        }

        log::info!(
            "Restored {} allocation(s), {} held resource(s)",
            self.records.len(),
            self.ledger.held_count()
        );
        Ok(())
    }

    /// Verify the bidirectional ledger/record invariants; returns a list of
    /// violations (empty when consistent).
    pub fn check_consistency(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for resource in &self.config.inventory {
            if let Some(id) = self.ledger.owner(resource) {
                match self.records.get(&id) {
                    None => problems.push(format!("{resource} held by unknown allocation {id}")),
                    Some(record) => {
                        if !record.state.holds_resources() {
                            problems.push(format!(
                                "{resource} held by allocation {id} in state {}",
                                record.state
                            ));
                        }
                        if record.state == AllocState::Active
                            && !record
                                .granted_resources()
                                .is_some_and(|rs| rs.contains(resource))
                        {
                            problems.push(format!(
                                "{resource} held by allocation {id} outside its granted group"
                            ));
                        }
                    }
                }
            }
        }
        for record in self.records.values() {
            if record.state == AllocState::Active {
                match record.granted_resources() {
                    None => problems.push(format!("active allocation {} grants nothing", record.id)),
                    Some(resources) => {
                        for resource in resources {
                            if self.ledger.owner(resource) != Some(record.id) {
                                problems.push(format!(
                                    "active allocation {} does not own {resource}",
                                    record.id
                                ));
                            }
                        }
                    }
                }
            }
            let waits = self.queues.waits_on(record.id);
            if record.state == AllocState::Queued {
                let mut mentioned: Vec<ResourceId> =
                    record.mentioned_resources().into_iter().collect();
                mentioned.sort();
                if waits != mentioned {
                    problems.push(format!(
                        "queued allocation {} waits on {waits:?}, expected {mentioned:?}",
                        record.id
                    ));
                }
            } else if !waits.is_empty() {
                problems.push(format!(
                    "allocation {} in state {} has wait-queue entries",
                    record.id, record.state
                ));
            }
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::{Caller, GuestOutcome, Pool, PoolConfig, RemoveOutcome, RequestSpec};
    use crate::allocation::{AllocState, Allocation, ResourceGroup};
    use crate::journal::{JournalEvent, JournalWriter};
    use crate::{AllocationId, ResourceId};
    use chrono::Utc;

    fn config(targets: &[&str]) -> PoolConfig {
        PoolConfig {
            inventory: targets.iter().map(|t| ResourceId::from(*t)).collect(),
            admins: std::iter::once("root".to_string()).collect(),
            ..Default::default()
        }
    }

    fn pool(targets: &[&str]) -> Pool {
        Pool::new(config(targets))
    }

    fn user(name: &str) -> Caller {
        Caller {
            user: name.to_string(),
            admin: false,
        }
    }

    fn root() -> Caller {
        Caller {
            user: "root".to_string(),
            admin: true,
        }
    }

    fn groups(defs: &[(&str, &[&str])]) -> Vec<ResourceGroup> {
        defs.iter()
            .map(|(name, resources)| ResourceGroup {
                name: name.to_string(),
                resources: resources.iter().map(|r| ResourceId::from(*r)).collect(),
            })
            .collect()
    }

    fn queued_request(defs: &[(&str, &[&str])]) -> RequestSpec {
        RequestSpec {
            groups: groups(defs),
            queue: true,
            ..Default::default()
        }
    }

    fn assert_consistent(pool: &Pool) {
        let problems = pool.check_consistency();
        assert!(problems.is_empty(), "inconsistent pool: {problems:?}");
    }

    #[test]
    fn grant_then_busy_then_queued() {
        let mut pool = pool(&["r1", "r2"]);
        let alice = user("alice");

        let spec = RequestSpec {
            groups: groups(&[("g1", &["r1", "r2"])]),
            queue: false,
            ..Default::default()
        };
        let first = pool.request(&alice, spec.clone()).unwrap();
        assert_eq!(first.state, AllocState::Active);
        assert_eq!(first.granted_group.as_deref(), Some("g1"));

        let second = pool.request(&alice, spec.clone()).unwrap();
        assert_eq!(second.state, AllocState::Busy);
        assert!(pool.queues.is_empty());

        let third = pool
            .request(&alice, RequestSpec { queue: true, ..spec })
            .unwrap();
        assert_eq!(third.state, AllocState::Queued);
        assert_consistent(&pool);
    }

    #[test]
    fn first_declared_group_wins() {
        let mut pool = pool(&["r1", "r2"]);
        let out = pool
            .request(
                &user("alice"),
                queued_request(&[("g1", &["r1"]), ("g2", &["r2"])]),
            )
            .unwrap();
        assert_eq!(out.state, AllocState::Active);
        assert_eq!(out.granted_group.as_deref(), Some("g1"));
    }

    #[test]
    fn falls_back_to_later_group() {
        let mut pool = pool(&["r1", "r2"]);
        let alice = user("alice");
        pool.request(&alice, queued_request(&[("hold", &["r1"])]))
            .unwrap();

        let out = pool
            .request(&alice, queued_request(&[("g1", &["r1"]), ("g2", &["r2"])]))
            .unwrap();
        assert_eq!(out.state, AllocState::Active);
        assert_eq!(out.granted_group.as_deref(), Some("g2"));
        assert_consistent(&pool);
    }

    #[test]
    fn group_is_granted_atomically_or_not_at_all() {
        let mut pool = pool(&["r1", "r2"]);
        let alice = user("alice");
        let holder = pool
            .request(&alice, queued_request(&[("g", &["r2"])]))
            .unwrap();
        assert_eq!(holder.state, AllocState::Active);

        let out = pool
            .request(&user("bob"), queued_request(&[("g", &["r1", "r2"])]))
            .unwrap();
        assert_eq!(out.state, AllocState::Queued);
        assert!(pool.ledger.resources_of(out.id).is_empty());
        assert_eq!(pool.ledger.owner(&"r1".into()), None);
        assert_consistent(&pool);
    }

    #[test]
    fn overlapping_groups_resolve_consistently() {
        let mut pool = pool(&["r1", "r2", "r3"]);
        let first = pool
            .request(&user("alice"), queued_request(&[("g", &["r1", "r2"])]))
            .unwrap();
        let second = pool
            .request(&user("bob"), queued_request(&[("g", &["r2", "r3"])]))
            .unwrap();
        assert_eq!(first.state, AllocState::Active);
        assert_eq!(second.state, AllocState::Queued);
        assert_consistent(&pool);

        assert_eq!(
            pool.remove(&user("alice"), first.id),
            RemoveOutcome::Removed
        );
        assert_eq!(
            pool.allocation(second.id).unwrap().state,
            AllocState::Active
        );
        assert_consistent(&pool);
    }

    #[test]
    fn priority_beats_arrival_order() {
        let mut pool = pool(&["r"]);
        let holder = pool
            .request(&user("h"), queued_request(&[("g", &["r"])]))
            .unwrap();

        let worse = pool
            .request(
                &user("y"),
                RequestSpec {
                    priority: Some(300),
                    ..queued_request(&[("g", &["r"])])
                },
            )
            .unwrap();
        let better = pool
            .request(
                &user("x"),
                RequestSpec {
                    priority: Some(200),
                    ..queued_request(&[("g", &["r"])])
                },
            )
            .unwrap();
        assert_eq!(worse.state, AllocState::Queued);
        assert_eq!(better.state, AllocState::Queued);

        pool.remove(&user("h"), holder.id);
        assert_eq!(pool.allocation(better.id).unwrap().state, AllocState::Active);
        assert_eq!(pool.allocation(worse.id).unwrap().state, AllocState::Queued);
        assert_consistent(&pool);
    }

    #[test]
    fn equal_priority_is_fifo() {
        let mut pool = pool(&["r"]);
        let holder = pool
            .request(&user("h"), queued_request(&[("g", &["r"])]))
            .unwrap();
        let first = pool
            .request(&user("x"), queued_request(&[("g", &["r"])]))
            .unwrap();
        let second = pool
            .request(&user("y"), queued_request(&[("g", &["r"])]))
            .unwrap();

        pool.remove(&user("h"), holder.id);
        assert_eq!(pool.allocation(first.id).unwrap().state, AllocState::Active);
        assert_eq!(
            pool.allocation(second.id).unwrap().state,
            AllocState::Queued
        );
    }

    #[test]
    fn preemption_worked_example() {
        let mut pool = pool(&["t"]);
        let a = pool
            .request(
                &user("a"),
                RequestSpec {
                    priority: Some(600),
                    ..queued_request(&[("g", &["t"])])
                },
            )
            .unwrap();
        assert_eq!(a.state, AllocState::Active);

        let b = pool
            .request(
                &user("b"),
                RequestSpec {
                    priority: Some(200),
                    ..queued_request(&[("g", &["t"])])
                },
            )
            .unwrap();
        let c = pool
            .request(
                &user("c"),
                RequestSpec {
                    priority: Some(300),
                    ..queued_request(&[("g", &["t"])])
                },
            )
            .unwrap();
        assert_eq!(b.state, AllocState::Queued);
        assert_eq!(c.state, AllocState::Queued);
        assert!(!pool.queues.preemptive(&"t".into()));

        // D arrives with preempt: the queue turns preemptive and A (600) is
        // evicted in favor of the best waiter B (200), not of D itself.
        let d = pool
            .request(
                &root(),
                RequestSpec {
                    priority: Some(250),
                    preempt: true,
                    ..queued_request(&[("g", &["t"])])
                },
            )
            .unwrap();

        assert_eq!(pool.allocation(a.id).unwrap().state, AllocState::Removed);
        assert_eq!(pool.allocation(b.id).unwrap().state, AllocState::Active);
        assert_eq!(d.state, AllocState::Queued);
        assert!(pool.queues.preemptive(&"t".into()));
        assert_consistent(&pool);

        // B releases voluntarily: D is admitted and the queue leaves
        // preemptive mode, C keeps waiting.
        pool.remove(&user("b"), b.id);
        assert_eq!(pool.allocation(d.id).unwrap().state, AllocState::Active);
        assert_eq!(pool.allocation(c.id).unwrap().state, AllocState::Queued);
        assert!(!pool.queues.preemptive(&"t".into()));
        assert_consistent(&pool);
    }

    #[test]
    fn preemptive_mode_exit_restores_normal_admission() {
        let mut pool = pool(&["t"]);
        let holder = pool
            .request(
                &user("h"),
                RequestSpec {
                    priority: Some(500),
                    ..queued_request(&[("g", &["t"])])
                },
            )
            .unwrap();
        assert_eq!(holder.state, AllocState::Active);

        // A stronger waiter without preempt never evicts.
        let waiter = pool
            .request(
                &user("w"),
                RequestSpec {
                    priority: Some(100),
                    ..queued_request(&[("g", &["t"])])
                },
            )
            .unwrap();
        assert_eq!(waiter.state, AllocState::Queued);
        assert_eq!(pool.allocation(holder.id).unwrap().state, AllocState::Active);
    }

    #[test]
    fn equal_priority_never_preempts() {
        let mut pool = pool(&["t"]);
        let holder = pool
            .request(
                &user("h"),
                RequestSpec {
                    priority: Some(250),
                    ..queued_request(&[("g", &["t"])])
                },
            )
            .unwrap();
        let preemptor = pool
            .request(
                &root(),
                RequestSpec {
                    priority: Some(250),
                    preempt: true,
                    ..queued_request(&[("g", &["t"])])
                },
            )
            .unwrap();
        assert_eq!(pool.allocation(holder.id).unwrap().state, AllocState::Active);
        assert_eq!(preemptor.state, AllocState::Queued);
    }

    #[test]
    fn partial_preemption_leaves_restart_needed() {
        let mut pool = pool(&["t1", "t2"]);
        let victim = pool
            .request(
                &user("v"),
                RequestSpec {
                    priority: Some(600),
                    ..queued_request(&[("g", &["t1", "t2"])])
                },
            )
            .unwrap();
        assert_eq!(victim.state, AllocState::Active);

        let taker = pool
            .request(
                &root(),
                RequestSpec {
                    priority: Some(100),
                    preempt: true,
                    ..queued_request(&[("g", &["t1"])])
                },
            )
            .unwrap();
        assert_eq!(taker.state, AllocState::Active);

        let record = pool.allocation(victim.id).unwrap();
        assert_eq!(record.state, AllocState::RestartNeeded);
        assert_eq!(pool.ledger.owner(&"t2".into()), Some(victim.id));
        assert_eq!(pool.ledger.owner(&"t1".into()), Some(taker.id));
        assert_consistent(&pool);
    }

    #[test]
    fn freed_resource_is_offered_to_next_eligible_entry() {
        let mut pool = pool(&["r", "s"]);
        let r_holder = pool
            .request(&user("hr"), queued_request(&[("g", &["r"])]))
            .unwrap();
        let _s_holder = pool
            .request(&user("hs"), queued_request(&[("g", &["s"])]))
            .unwrap();

        let both = pool
            .request(
                &user("x"),
                RequestSpec {
                    priority: Some(100),
                    ..queued_request(&[("g", &["r", "s"])])
                },
            )
            .unwrap();
        let single = pool
            .request(
                &user("y"),
                RequestSpec {
                    priority: Some(200),
                    ..queued_request(&[("g", &["r"])])
                },
            )
            .unwrap();
        assert_eq!(both.state, AllocState::Queued);
        assert_eq!(single.state, AllocState::Queued);

        // x cannot complete its group atomically (s is still held), so the
        // freed r goes to the next eligible entry y.
        pool.remove(&user("hr"), r_holder.id);
        assert_eq!(pool.allocation(both.id).unwrap().state, AllocState::Queued);
        assert_eq!(pool.allocation(single.id).unwrap().state, AllocState::Active);
        assert_consistent(&pool);
    }

    #[test]
    fn resource_is_reserved_for_a_blocked_preemptor() {
        let mut pool = pool(&["r", "s"]);
        let r_holder = pool
            .request(&user("hr"), queued_request(&[("g", &["r"])]))
            .unwrap();
        let s_holder = pool
            .request(
                &user("hs"),
                RequestSpec {
                    priority: Some(100),
                    ..queued_request(&[("g", &["s"])])
                },
            )
            .unwrap();

        // The preemptor needs both resources. It evicts the default-priority
        // holder of r, but s's holder outranks it, so the group stays
        // incomplete and the preemptor keeps waiting.
        let preemptor = pool
            .request(
                &root(),
                RequestSpec {
                    priority: Some(250),
                    preempt: true,
                    ..queued_request(&[("g", &["r", "s"])])
                },
            )
            .unwrap();
        assert_eq!(preemptor.state, AllocState::Queued);
        assert_eq!(pool.allocation(r_holder.id).unwrap().state, AllocState::Removed);
        assert_eq!(pool.ledger.owner(&"r".into()), None);

        // A worse-priority request must not be granted the freed r: the
        // waiting preemptor would evict it right away. It stays queued and r
        // stays reserved.
        let worse = pool
            .request(
                &user("c"),
                RequestSpec {
                    priority: Some(300),
                    ..queued_request(&[("g", &["r"])])
                },
            )
            .unwrap();
        assert_eq!(worse.state, AllocState::Queued);
        assert_eq!(pool.ledger.owner(&"r".into()), None);
        assert_consistent(&pool);

        // Once s frees up the preemptor completes its whole group at once.
        pool.remove(&user("hs"), s_holder.id);
        let record = pool.allocation(preemptor.id).unwrap();
        assert_eq!(record.state, AllocState::Active);
        assert_eq!(pool.ledger.owner(&"r".into()), Some(preemptor.id));
        assert_eq!(pool.ledger.owner(&"s".into()), Some(preemptor.id));
        assert_eq!(pool.allocation(worse.id).unwrap().state, AllocState::Queued);
        assert_consistent(&pool);
    }

    #[test]
    fn privilege_checks_reject() {
        let mut pool = Pool::new(PoolConfig {
            priority_floor: 100,
            ..config(&["r"])
        });
        let alice = user("alice");

        let strong = pool
            .request(
                &alice,
                RequestSpec {
                    priority: Some(50),
                    ..queued_request(&[("g", &["r"])])
                },
            )
            .unwrap();
        assert_eq!(strong.state, AllocState::Rejected);

        let preempting = pool
            .request(
                &alice,
                RequestSpec {
                    preempt: true,
                    ..queued_request(&[("g", &["r"])])
                },
            )
            .unwrap();
        assert_eq!(preempting.state, AllocState::Rejected);

        let obo = pool
            .request(
                &alice,
                RequestSpec {
                    obo: Some("bob".to_string()),
                    ..queued_request(&[("g", &["r"])])
                },
            )
            .unwrap();
        assert_eq!(obo.state, AllocState::Rejected);

        let unknown = pool
            .request(&alice, queued_request(&[("g", &["nonsense"])]))
            .unwrap();
        assert_eq!(unknown.state, AllocState::Rejected);

        // An admin passes all three privilege gates.
        let admin = pool
            .request(
                &root(),
                RequestSpec {
                    priority: Some(50),
                    obo: Some("bob".to_string()),
                    ..queued_request(&[("g", &["r"])])
                },
            )
            .unwrap();
        assert_eq!(admin.state, AllocState::Active);
        let record = pool.allocation(admin.id).unwrap();
        assert_eq!(record.owner, "bob");
        assert_eq!(record.creator, "root");
        assert_consistent(&pool);
    }

    #[test]
    fn malformed_requests_fail() {
        let mut pool = pool(&["r1", "r2"]);
        let alice = user("alice");

        assert!(pool.request(&alice, RequestSpec::default()).is_err());
        assert!(
            pool.request(&alice, queued_request(&[("g", &[])]))
                .is_err()
        );
        assert!(
            pool.request(
                &alice,
                queued_request(&[("g1", &["r1", "r2"]), ("g2", &["r1"])])
            )
            .is_err()
        );
        assert!(
            pool.request(
                &alice,
                RequestSpec {
                    priority: Some(5000),
                    ..queued_request(&[("g", &["r1"])])
                }
            )
            .is_err()
        );
    }

    #[test]
    fn guest_lifecycle() {
        let mut pool = pool(&["r"]);
        let alice = user("alice");
        let bob = user("bob");
        let eve = user("eve");

        let out = pool.request(&alice, queued_request(&[("g", &["r"])])).unwrap();
        let id = out.id;

        assert_eq!(pool.guest_add(&bob, id, "bob"), GuestOutcome::Denied);
        assert_eq!(pool.guest_add(&alice, id, "bob"), GuestOutcome::Done);
        assert!(pool.allocation(id).unwrap().participant("bob"));

        // A guest deleting the allocation only drops their own guest entry.
        assert_eq!(pool.remove(&bob, id), RemoveOutcome::GuestRemoved);
        assert_eq!(pool.allocation(id).unwrap().state, AllocState::Active);
        assert!(!pool.allocation(id).unwrap().participant("bob"));

        assert_eq!(pool.guest_add(&alice, id, "bob"), GuestOutcome::Done);
        assert_eq!(pool.guest_remove(&eve, id, "bob"), GuestOutcome::Denied);
        assert_eq!(pool.guest_remove(&bob, id, "bob"), GuestOutcome::Done);
        assert_eq!(pool.guest_remove(&alice, id, "bob"), GuestOutcome::Invalid);

        assert_eq!(pool.remove(&eve, id), RemoveOutcome::Denied);
        assert_eq!(pool.remove(&alice, id), RemoveOutcome::Removed);
        assert_eq!(pool.remove(&alice, id), RemoveOutcome::Invalid);
        assert_consistent(&pool);
    }

    #[test]
    fn authorize_gates_resource_access() {
        let mut pool = pool(&["r1", "r2"]);
        let alice = user("alice");
        let out = pool.request(&alice, queued_request(&[("g", &["r1"])])).unwrap();
        pool.guest_add(&alice, out.id, "bob");

        assert!(pool.authorize(&alice, &"r1".into()));
        assert!(pool.authorize(&user("bob"), &"r1".into()));
        assert!(!pool.authorize(&user("eve"), &"r1".into()));
        assert!(pool.authorize(&root(), &"r1".into()));

        // Free resources are usable only with the admin role.
        assert!(!pool.authorize(&alice, &"r2".into()));
        assert!(pool.authorize(&root(), &"r2".into()));

        // An authorized use counts as activity.
        let past = Utc::now() - chrono::Duration::hours(1);
        pool.records.get_mut(&out.id).unwrap().last_activity = past;
        assert!(pool.authorize(&alice, &"r1".into()));
        assert!(pool.allocation(out.id).unwrap().last_activity > past);
    }

    #[test]
    fn keepalive_returns_only_divergences() {
        let mut pool = pool(&["r"]);
        let alice = user("alice");
        let active = pool.request(&alice, queued_request(&[("g", &["r"])])).unwrap();
        let waiting = pool.request(&alice, queued_request(&[("g", &["r"])])).unwrap();

        let all_correct = pool.keepalive(
            &alice,
            &[
                (active.id, AllocState::Active),
                (waiting.id, AllocState::Queued),
            ],
        );
        assert!(all_correct.is_empty());

        let one_wrong = pool.keepalive(
            &alice,
            &[
                (active.id, AllocState::Active),
                (waiting.id, AllocState::Active),
            ],
        );
        assert_eq!(one_wrong, vec![(waiting.id, AllocState::Queued)]);

        let unknown = pool.keepalive(&alice, &[(AllocationId::new(99), AllocState::Active)]);
        assert_eq!(unknown, vec![(AllocationId::new(99), AllocState::Invalid)]);

        // Non-participants learn nothing beyond "invalid".
        let foreign = pool.keepalive(&user("eve"), &[(active.id, AllocState::Active)]);
        assert_eq!(foreign, vec![(active.id, AllocState::Invalid)]);
    }

    #[test]
    fn keepalive_surfaces_preemption() {
        let mut pool = pool(&["t"]);
        let victim = pool
            .request(
                &user("v"),
                RequestSpec {
                    priority: Some(600),
                    ..queued_request(&[("g", &["t"])])
                },
            )
            .unwrap();
        pool.request(
            &root(),
            RequestSpec {
                priority: Some(100),
                preempt: true,
                ..queued_request(&[("g", &["t"])])
            },
        )
        .unwrap();

        let delta = pool.keepalive(&user("v"), &[(victim.id, AllocState::Active)]);
        assert_eq!(delta, vec![(victim.id, AllocState::Removed)]);
    }

    #[test]
    fn idle_allocation_times_out_and_waiter_is_promoted() {
        let mut pool = pool(&["r"]);
        let alice = user("alice");
        let holder = pool.request(&alice, queued_request(&[("g", &["r"])])).unwrap();
        let waiter = pool.request(&user("bob"), queued_request(&[("g", &["r"])])).unwrap();

        pool.records.get_mut(&holder.id).unwrap().last_activity =
            Utc::now() - chrono::Duration::hours(2);

        let report = pool.sweep(Utc::now());
        assert_eq!(report.timed_out, vec![holder.id]);
        assert_eq!(pool.allocation(holder.id).unwrap().state, AllocState::Timedout);
        assert_eq!(pool.allocation(waiter.id).unwrap().state, AllocState::Active);
        assert_consistent(&pool);
    }

    #[test]
    fn queued_allocation_times_out_and_leaves_the_queues() {
        let mut pool = pool(&["r"]);
        pool.request(&user("h"), queued_request(&[("g", &["r"])])).unwrap();
        let waiter = pool.request(&user("w"), queued_request(&[("g", &["r"])])).unwrap();

        pool.records.get_mut(&waiter.id).unwrap().last_activity =
            Utc::now() - chrono::Duration::hours(2);

        let report = pool.sweep(Utc::now());
        assert_eq!(report.timed_out, vec![waiter.id]);
        assert!(pool.queues.is_empty());
        assert_consistent(&pool);
    }

    #[test]
    fn long_session_goes_overtime_and_can_be_removed() {
        let mut pool = pool(&["r"]);
        let alice = user("alice");
        let holder = pool.request(&alice, queued_request(&[("g", &["r"])])).unwrap();
        let waiter = pool.request(&user("bob"), queued_request(&[("g", &["r"])])).unwrap();

        let record = pool.records.get_mut(&holder.id).unwrap();
        record.created_at = Utc::now() - chrono::Duration::days(2);

        let report = pool.sweep(Utc::now());
        assert_eq!(report.overtime, vec![holder.id]);
        assert_eq!(pool.allocation(holder.id).unwrap().state, AllocState::Overtime);
        assert_eq!(pool.allocation(waiter.id).unwrap().state, AllocState::Active);

        // Overtime is not terminal: the owner may still remove the record.
        assert_eq!(pool.remove(&alice, holder.id), RemoveOutcome::Removed);
        assert_consistent(&pool);
    }

    #[test]
    fn visibility_is_limited_to_participants() {
        let mut pool = pool(&["r1", "r2"]);
        let alice = user("alice");
        let bob = user("bob");
        pool.request(&alice, queued_request(&[("g", &["r1"])])).unwrap();
        pool.request(&bob, queued_request(&[("g", &["r2"])])).unwrap();

        assert_eq!(pool.visible(&alice).count(), 1);
        assert_eq!(pool.visible(&bob).count(), 1);
        assert_eq!(pool.visible(&root()).count(), 2);
    }

    #[test]
    fn journal_restore_rebuilds_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal");
        let alice = user("alice");

        let (active_id, queued_id) = {
            let mut pool = Pool::open(config(&["r1", "r2"]), &path).unwrap();
            let active = pool
                .request(&alice, queued_request(&[("g1", &["r1", "r2"])]))
                .unwrap();
            let waiting = pool
                .request(&user("bob"), queued_request(&[("g", &["r1"])]))
                .unwrap();
            pool.guest_add(&alice, active.id, "carol");
            (active.id, waiting.id)
        };

        let mut pool = Pool::open(config(&["r1", "r2"]), &path).unwrap();
        let record = pool.allocation(active_id).unwrap();
        assert_eq!(record.state, AllocState::Active);
        assert!(record.participant("carol"));
        assert_eq!(pool.ledger.owner(&"r1".into()), Some(active_id));
        assert_eq!(pool.ledger.owner(&"r2".into()), Some(active_id));
        assert_eq!(pool.allocation(queued_id).unwrap().state, AllocState::Queued);
        assert_consistent(&pool);

        // The restored pool keeps operating and journaling.
        assert_eq!(pool.remove(&alice, active_id), RemoveOutcome::Removed);
        assert_eq!(pool.allocation(queued_id).unwrap().state, AllocState::Active);
        assert_consistent(&pool);
    }

    #[test]
    fn restore_rolls_back_interrupted_claims() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal");
        let id = AllocationId::new(1);

        {
            let mut writer = JournalWriter::create_or_append(&path).unwrap();
            let now = Utc::now();
            let record = Allocation {
                id,
                state: AllocState::Queued,
                creator: "alice".to_string(),
                owner: "alice".to_string(),
                guests: Default::default(),
                priority: 500,
                preempt: false,
                groups: groups(&[("g", &["r1", "r2"])]),
                granted_group: None,
                reason: String::new(),
                created_at: now,
                last_activity: now,
            };
            writer
                .store(&JournalEvent::AllocationCreated(Box::new(record)))
                .unwrap();
            // Phase 1 claimed only r1 before the crash; no commit marker.
            writer
                .store(&JournalEvent::Claimed {
                    resource: "r1".into(),
                    id,
                })
                .unwrap();
            writer.flush().unwrap();
        }

        let mut pool = Pool::open(config(&["r1", "r2"]), &path).unwrap();
        assert_eq!(pool.ledger.owner(&"r1".into()), None);
        assert_eq!(pool.allocation(id).unwrap().state, AllocState::Queued);
        assert_consistent(&pool);

        // Once resources are re-offered the rolled-back request completes.
        pool.reoffer_free();
        assert_eq!(pool.allocation(id).unwrap().state, AllocState::Active);
        assert_consistent(&pool);
    }

    #[test]
    fn stats_count_states() {
        let mut pool = pool(&["r1", "r2"]);
        pool.request(&user("a"), queued_request(&[("g", &["r1"])])).unwrap();
        pool.request(&user("b"), queued_request(&[("g", &["r1"])])).unwrap();

        let stats = pool.stats();
        assert_eq!(stats.resources, 2);
        assert_eq!(stats.resources_held, 1);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.records, 2);
    }
}
