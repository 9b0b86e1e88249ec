//! User accounts as seen by the authorization layer.
//!
//! Only the active role participates in enforcement; the assigned role set
//! bounds which role may be activated.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_core::{Entity, RoleId, UserId};

use crate::Principal;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub is_superuser: bool,
    pub is_staff: bool,
    pub active_role: Option<RoleId>,
    pub roles: BTreeSet<RoleId>,
    pub avatar: Option<String>,
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    /// A staff account with no roles yet.
    pub fn staff(id: UserId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            is_superuser: false,
            is_staff: true,
            active_role: None,
            roles: BTreeSet::new(),
            avatar: None,
            last_login: None,
        }
    }

    pub fn superuser(id: UserId, username: impl Into<String>) -> Self {
        Self {
            is_superuser: true,
            ..Self::staff(id, username)
        }
    }

    pub fn has_role(&self, role: RoleId) -> bool {
        self.roles.contains(&role)
    }

    /// Replace the assigned role set.
    ///
    /// The active role is cleared when it is no longer assigned.
    pub fn set_roles(&mut self, roles: BTreeSet<RoleId>) {
        self.roles = roles;
        if let Some(active) = self.active_role {
            if !self.roles.contains(&active) {
                self.active_role = None;
            }
        }
    }

    pub fn principal(&self) -> Principal {
        Principal::from(self)
    }
}

impl Entity for User {
    type Id = UserId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

impl From<&User> for Principal {
    fn from(user: &User) -> Self {
        Principal {
            user_id: user.id,
            username: user.username.clone(),
            is_superuser: user.is_superuser,
            is_staff: user.is_staff,
            active_role: user.active_role,
        }
    }
}

/// Partial update for a user.
///
/// The superuser flag is not patchable through this path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UserPatch {
    pub avatar: Option<String>,
    #[serde(alias = "isStaff")]
    pub is_staff: Option<bool>,
}

impl UserPatch {
    pub fn apply(&self, user: &mut User) {
        if let Some(avatar) = &self.avatar {
            user.avatar = Some(avatar.clone());
        }
        if let Some(is_staff) = self.is_staff {
            user.is_staff = is_staff;
        }
    }
}
