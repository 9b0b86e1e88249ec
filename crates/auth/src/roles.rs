use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use warden_core::{DomainError, Entity, MenuId, RoleId};

const MAX_NAME_LEN: usize = 32;

/// A role: the subject of every policy tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    #[serde(default)]
    pub remark: Option<String>,
    #[serde(default)]
    pub menus: BTreeSet<MenuId>,
}

impl Role {
    pub fn new(id: RoleId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            remark: None,
            menus: BTreeSet::new(),
        }
    }
}

impl Entity for Role {
    type Id = RoleId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RolePatch {
    pub name: Option<String>,
    pub remark: Option<String>,
}

impl RolePatch {
    pub fn validate(&self) -> Result<(), DomainError> {
        if let Some(name) = &self.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(DomainError::validation("role name cannot be empty"));
            }
            if name.chars().count() > MAX_NAME_LEN {
                return Err(DomainError::validation(format!(
                    "role name longer than {MAX_NAME_LEN} characters"
                )));
            }
        }
        Ok(())
    }

    pub fn apply(&self, role: &mut Role) {
        if let Some(name) = &self.name {
            role.name = name.trim().to_string();
        }
        if let Some(remark) = &self.remark {
            role.remark = Some(remark.clone());
        }
    }
}
