use crate::define_id_type;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

define_id_type!(AllocationId, u32);

/// Name of a single unit of exclusive access.
///
/// The pool does not interpret the name; the only structure imposed on it is
/// the lexicographic order used as the global claim order.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    #[inline]
    pub fn new<T: Into<String>>(name: T) -> Self {
        Self(name.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ResourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ResourceId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ResourceId {
    fn from(name: String) -> Self {
        Self(name)
    }
}
