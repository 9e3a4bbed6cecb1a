use crate::common::Set;
use crate::{AllocationId, Priority, ResourceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt::{Display, Formatter};

pub type GroupName = String;
pub type GroupResources = SmallVec<[ResourceId; 4]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AllocState {
    /// Registered in the wait queues of its resources, owns nothing.
    Queued,
    /// Owns every resource of exactly one of its groups.
    Active,
    /// Immediately unsatisfiable and queuing was not requested.
    Busy,
    /// Unknown or already dead when referenced.
    Invalid,
    /// Exceeded the maximum session length; resources were reclaimed.
    Overtime,
    /// The caller lacked privilege for the request.
    Rejected,
    /// Fully removed, either by its owner or after preemption took its last
    /// resource.
    Removed,
    /// Lost a part of its granted group to preemption but still holds the
    /// rest.
    RestartNeeded,
    /// Idle for longer than the configured window; resources were reclaimed.
    Timedout,
}

impl AllocState {
    /// Terminal states never transition any further.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AllocState::Removed | AllocState::Rejected | AllocState::Invalid | AllocState::Timedout
        )
    }

    /// States that participate in arbitration: they hold resources and/or
    /// wait-queue entries and are subject to aging.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            AllocState::Queued | AllocState::Active | AllocState::RestartNeeded
        )
    }

    pub fn holds_resources(&self) -> bool {
        matches!(self, AllocState::Active | AllocState::RestartNeeded)
    }
}

impl Display for AllocState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AllocState::Queued => "queued",
            AllocState::Active => "active",
            AllocState::Busy => "busy",
            AllocState::Invalid => "invalid",
            AllocState::Overtime => "overtime",
            AllocState::Rejected => "rejected",
            AllocState::Removed => "removed",
            AllocState::RestartNeeded => "restart-needed",
            AllocState::Timedout => "timedout",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for AllocState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "queued" => AllocState::Queued,
            "active" => AllocState::Active,
            "busy" => AllocState::Busy,
            "invalid" => AllocState::Invalid,
            "overtime" => AllocState::Overtime,
            "rejected" => AllocState::Rejected,
            "removed" => AllocState::Removed,
            "restart-needed" => AllocState::RestartNeeded,
            "timedout" => AllocState::Timedout,
            _ => return Err(format!("Unknown allocation state '{s}'")),
        })
    }
}

/// One alternative set of resources the requester is willing to accept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceGroup {
    pub name: GroupName,
    pub resources: GroupResources,
}

/// The central record of the pool: a request for, and possibly a grant of,
/// a group of resources.
///
/// `priority` and `preempt` are fixed for the whole life of the allocation;
/// only `state`, `granted_group`, `guests` and `last_activity` mutate after
/// creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    pub id: AllocationId,
    pub state: AllocState,
    pub creator: String,
    pub owner: String,
    pub guests: Set<String>,
    pub priority: Priority,
    pub preempt: bool,
    /// Alternative groups in the order the requester declared them.
    pub groups: Vec<ResourceGroup>,
    pub granted_group: Option<GroupName>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Allocation {
    /// True for the creator, the owner and every guest.
    pub fn participant(&self, user: &str) -> bool {
        self.creator == user || self.owner == user || self.guests.contains(user)
    }

    pub fn group(&self, name: &str) -> Option<&ResourceGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// Resources of the granted group, if any group was granted.
    pub fn granted_resources(&self) -> Option<&GroupResources> {
        self.granted_group
            .as_deref()
            .and_then(|name| self.group(name))
            .map(|g| &g.resources)
    }

    /// Every resource named in any of the alternative groups, deduplicated.
    pub fn mentioned_resources(&self) -> Set<ResourceId> {
        self.groups
            .iter()
            .flat_map(|g| g.resources.iter().cloned())
            .collect()
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
    }
}
