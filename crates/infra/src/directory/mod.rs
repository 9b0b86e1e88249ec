//! Users, roles and menus.
//!
//! Assignment writes (`set_user_roles`, `set_role_menus`) are clear-then-insert
//! and atomic: a reader sees the old set or the new one.

pub mod in_memory;
pub mod postgres;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use warden_auth::{Menu, MenuKind, MenuMeta, MenuPatch, Role, RolePatch, User, UserPatch};
use warden_core::{MenuId, RoleId, UserId};

pub use in_memory::InMemoryDirectory;
pub use postgres::PostgresDirectory;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("directory storage failure: {0}")]
    Storage(String),
}

/// A user to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub is_superuser: bool,
    pub is_staff: bool,
}

/// A menu to create; the id is assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NewMenu {
    pub name: String,
    pub parent_id: Option<MenuId>,
    pub path: Option<String>,
    pub component: Option<String>,
    pub redirect: Option<String>,
    pub permission: Option<String>,
    pub kind: MenuKind,
    pub meta: MenuMeta,
}

impl NewMenu {
    pub fn into_menu(self, id: MenuId) -> Menu {
        Menu {
            id,
            name: self.name,
            parent_id: self.parent_id,
            path: self.path,
            component: self.component,
            redirect: self.redirect,
            permission: self.permission,
            kind: self.kind,
            meta: self.meta,
        }
    }
}

#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn create_user(&self, user: NewUser) -> Result<User, DirectoryError>;
    async fn create_role(&self, name: &str, remark: Option<&str>) -> Result<Role, DirectoryError>;
    async fn create_menu(&self, menu: NewMenu) -> Result<Menu, DirectoryError>;

    async fn get_user(&self, id: UserId) -> Result<Option<User>, DirectoryError>;
    async fn user_by_username(&self, username: &str) -> Result<Option<User>, DirectoryError>;
    async fn get_role(&self, id: RoleId) -> Result<Option<Role>, DirectoryError>;

    /// The subset of `ids` that exist.
    async fn existing_roles(&self, ids: &BTreeSet<RoleId>) -> Result<BTreeSet<RoleId>, DirectoryError>;
    async fn existing_menus(&self, ids: &BTreeSet<MenuId>) -> Result<BTreeSet<MenuId>, DirectoryError>;

    /// Replace a user's roles. Clears the active role when it is not kept.
    async fn set_user_roles(&self, user: UserId, roles: BTreeSet<RoleId>) -> Result<User, DirectoryError>;
    async fn set_role_menus(&self, role: RoleId, menus: BTreeSet<MenuId>) -> Result<Role, DirectoryError>;
    async fn set_active_role(&self, user: UserId, role: Option<RoleId>) -> Result<User, DirectoryError>;

    async fn update_user(&self, id: UserId, patch: &UserPatch) -> Result<User, DirectoryError>;
    async fn update_role(&self, id: RoleId, patch: &RolePatch) -> Result<Role, DirectoryError>;
    async fn update_menu(&self, id: MenuId, patch: &MenuPatch) -> Result<Menu, DirectoryError>;

    /// All menus ordered by id.
    async fn list_menus(&self) -> Result<Vec<Menu>, DirectoryError>;
    /// Menus assigned to `role`, ordered by id.
    async fn role_menus(&self, role: RoleId) -> Result<Vec<Menu>, DirectoryError>;
}

#[async_trait]
impl<S> DirectoryStore for Arc<S>
where
    S: DirectoryStore + ?Sized,
{
    async fn create_user(&self, user: NewUser) -> Result<User, DirectoryError> {
        (**self).create_user(user).await
    }

    async fn create_role(&self, name: &str, remark: Option<&str>) -> Result<Role, DirectoryError> {
        (**self).create_role(name, remark).await
    }

    async fn create_menu(&self, menu: NewMenu) -> Result<Menu, DirectoryError> {
        (**self).create_menu(menu).await
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, DirectoryError> {
        (**self).get_user(id).await
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<User>, DirectoryError> {
        (**self).user_by_username(username).await
    }

    async fn get_role(&self, id: RoleId) -> Result<Option<Role>, DirectoryError> {
        (**self).get_role(id).await
    }

    async fn existing_roles(&self, ids: &BTreeSet<RoleId>) -> Result<BTreeSet<RoleId>, DirectoryError> {
        (**self).existing_roles(ids).await
    }

    async fn existing_menus(&self, ids: &BTreeSet<MenuId>) -> Result<BTreeSet<MenuId>, DirectoryError> {
        (**self).existing_menus(ids).await
    }

    async fn set_user_roles(&self, user: UserId, roles: BTreeSet<RoleId>) -> Result<User, DirectoryError> {
        (**self).set_user_roles(user, roles).await
    }

    async fn set_role_menus(&self, role: RoleId, menus: BTreeSet<MenuId>) -> Result<Role, DirectoryError> {
        (**self).set_role_menus(role, menus).await
    }

    async fn set_active_role(&self, user: UserId, role: Option<RoleId>) -> Result<User, DirectoryError> {
        (**self).set_active_role(user, role).await
    }

    async fn update_user(&self, id: UserId, patch: &UserPatch) -> Result<User, DirectoryError> {
        (**self).update_user(id, patch).await
    }

    async fn update_role(&self, id: RoleId, patch: &RolePatch) -> Result<Role, DirectoryError> {
        (**self).update_role(id, patch).await
    }

    async fn update_menu(&self, id: MenuId, patch: &MenuPatch) -> Result<Menu, DirectoryError> {
        (**self).update_menu(id, patch).await
    }

    async fn list_menus(&self) -> Result<Vec<Menu>, DirectoryError> {
        (**self).list_menus().await
    }

    async fn role_menus(&self, role: RoleId) -> Result<Vec<Menu>, DirectoryError> {
        (**self).role_menus(role).await
    }
}
