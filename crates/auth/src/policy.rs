use serde::{Deserialize, Serialize};

use warden_core::RoleId;

use crate::{Action, ObjectPattern};

/// A single `(subject, object, action)` grant.
///
/// The object is always stored normalized, so two tuples naming
/// `/user/{id}` and `/user/{user_id}` are the same grant. Ordering is
/// lexicographic on the triple, which keeps policy sets deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PolicyTuple {
    pub subject: RoleId,
    pub object: ObjectPattern,
    pub action: Action,
}

impl PolicyTuple {
    pub fn new(subject: RoleId, object: impl Into<ObjectPattern>, action: Action) -> Self {
        Self {
            subject,
            object: object.into(),
            action,
        }
    }
}

impl core::fmt::Display for PolicyTuple {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "({}, {}, {})", self.subject, self.object, self.action)
    }
}
