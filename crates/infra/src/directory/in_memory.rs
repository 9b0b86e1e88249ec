use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use warden_auth::{Menu, MenuPatch, Role, RolePatch, User, UserPatch};
use warden_core::{Entity, MenuId, RoleId, UserId};

use super::{DirectoryError, DirectoryStore, NewMenu, NewUser};

#[derive(Debug, Default)]
struct State {
    users: BTreeMap<UserId, User>,
    roles: BTreeMap<RoleId, Role>,
    menus: BTreeMap<MenuId, Menu>,
    last_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn user_mut(&mut self, id: UserId) -> Result<&mut User, DirectoryError> {
        self.users.get_mut(&id).ok_or(DirectoryError::NotFound("user"))
    }

    fn role_mut(&mut self, id: RoleId) -> Result<&mut Role, DirectoryError> {
        self.roles.get_mut(&id).ok_or(DirectoryError::NotFound("role"))
    }
}

/// Store `entity` under its own id and hand back a copy.
fn keep<E: Entity + Clone>(table: &mut BTreeMap<E::Id, E>, entity: E) -> E {
    table.insert(entity.id(), entity.clone());
    entity
}

/// In-memory directory for tests/dev. Ids come from one shared counter.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    inner: RwLock<State>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, DirectoryError> {
        self.inner
            .read()
            .map_err(|_| DirectoryError::Storage("directory lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, DirectoryError> {
        self.inner
            .write()
            .map_err(|_| DirectoryError::Storage("directory lock poisoned".to_string()))
    }
}

#[async_trait]
impl DirectoryStore for InMemoryDirectory {
    async fn create_user(&self, user: NewUser) -> Result<User, DirectoryError> {
        let mut state = self.write()?;
        if state.users.values().any(|u| u.username == user.username) {
            return Err(DirectoryError::Conflict(format!(
                "username {} already taken",
                user.username
            )));
        }
        let id = UserId::new(state.next_id());
        let mut created = User::staff(id, user.username);
        created.is_superuser = user.is_superuser;
        created.is_staff = user.is_staff;
        Ok(keep(&mut state.users, created))
    }

    async fn create_role(&self, name: &str, remark: Option<&str>) -> Result<Role, DirectoryError> {
        let mut state = self.write()?;
        let id = RoleId::new(state.next_id());
        let mut role = Role::new(id, name);
        role.remark = remark.map(str::to_string);
        Ok(keep(&mut state.roles, role))
    }

    async fn create_menu(&self, menu: NewMenu) -> Result<Menu, DirectoryError> {
        let mut state = self.write()?;
        if let Some(parent) = menu.parent_id {
            if !state.menus.contains_key(&parent) {
                return Err(DirectoryError::NotFound("parent menu"));
            }
        }
        let id = MenuId::new(state.next_id());
        Ok(keep(&mut state.menus, menu.into_menu(id)))
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, DirectoryError> {
        Ok(self.read()?.users.get(&id).cloned())
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<User>, DirectoryError> {
        Ok(self
            .read()?
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn get_role(&self, id: RoleId) -> Result<Option<Role>, DirectoryError> {
        Ok(self.read()?.roles.get(&id).cloned())
    }

    async fn existing_roles(&self, ids: &BTreeSet<RoleId>) -> Result<BTreeSet<RoleId>, DirectoryError> {
        let state = self.read()?;
        Ok(ids
            .iter()
            .filter(|id| state.roles.contains_key(id))
            .copied()
            .collect())
    }

    async fn existing_menus(&self, ids: &BTreeSet<MenuId>) -> Result<BTreeSet<MenuId>, DirectoryError> {
        let state = self.read()?;
        Ok(ids
            .iter()
            .filter(|id| state.menus.contains_key(id))
            .copied()
            .collect())
    }

    async fn set_user_roles(&self, user: UserId, roles: BTreeSet<RoleId>) -> Result<User, DirectoryError> {
        let mut state = self.write()?;
        let user = state.user_mut(user)?;
        user.set_roles(roles);
        Ok(user.clone())
    }

    async fn set_role_menus(&self, role: RoleId, menus: BTreeSet<MenuId>) -> Result<Role, DirectoryError> {
        let mut state = self.write()?;
        let role = state.role_mut(role)?;
        role.menus = menus;
        Ok(role.clone())
    }

    async fn set_active_role(&self, user: UserId, role: Option<RoleId>) -> Result<User, DirectoryError> {
        let mut state = self.write()?;
        let user = state.user_mut(user)?;
        user.active_role = role;
        Ok(user.clone())
    }

    async fn update_user(&self, id: UserId, patch: &UserPatch) -> Result<User, DirectoryError> {
        let mut state = self.write()?;
        let user = state.user_mut(id)?;
        patch.apply(user);
        Ok(user.clone())
    }

    async fn update_role(&self, id: RoleId, patch: &RolePatch) -> Result<Role, DirectoryError> {
        let mut state = self.write()?;
        let role = state.role_mut(id)?;
        patch.apply(role);
        Ok(role.clone())
    }

    async fn update_menu(&self, id: MenuId, patch: &MenuPatch) -> Result<Menu, DirectoryError> {
        let mut state = self.write()?;
        let menu = state.menus.get_mut(&id).ok_or(DirectoryError::NotFound("menu"))?;
        patch.apply(menu);
        Ok(menu.clone())
    }

    async fn list_menus(&self) -> Result<Vec<Menu>, DirectoryError> {
        Ok(self.read()?.menus.values().cloned().collect())
    }

    async fn role_menus(&self, role: RoleId) -> Result<Vec<Menu>, DirectoryError> {
        let state = self.read()?;
        let role = state.roles.get(&role).ok_or(DirectoryError::NotFound("role"))?;
        Ok(role
            .menus
            .iter()
            .filter_map(|id| state.menus.get(id).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(name: &str) -> NewUser {
        NewUser {
            username: name.to_string(),
            is_superuser: false,
            is_staff: true,
        }
    }

    #[tokio::test]
    async fn usernames_are_unique() {
        let dir = InMemoryDirectory::new();
        dir.create_user(new_user("alice")).await.unwrap();
        let err = dir.create_user(new_user("alice")).await.unwrap_err();
        assert!(matches!(err, DirectoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn set_user_roles_clears_dropped_active_role() {
        let dir = InMemoryDirectory::new();
        let user = dir.create_user(new_user("bob")).await.unwrap();
        let a = dir.create_role("a", None).await.unwrap();
        let b = dir.create_role("b", None).await.unwrap();

        dir.set_user_roles(user.id, [a.id, b.id].into_iter().collect())
            .await
            .unwrap();
        dir.set_active_role(user.id, Some(b.id)).await.unwrap();

        let updated = dir
            .set_user_roles(user.id, [a.id].into_iter().collect())
            .await
            .unwrap();
        assert_eq!(updated.active_role, None);
        assert_eq!(updated.roles, [a.id].into_iter().collect());
    }

    #[tokio::test]
    async fn existing_filters_unknown_ids() {
        let dir = InMemoryDirectory::new();
        let role = dir.create_role("auditor", Some("read only")).await.unwrap();
        let asked: BTreeSet<_> = [role.id, RoleId::new(999)].into_iter().collect();
        let found = dir.existing_roles(&asked).await.unwrap();
        assert_eq!(found, [role.id].into_iter().collect());
    }

    #[tokio::test]
    async fn role_menus_follow_assignment() {
        let dir = InMemoryDirectory::new();
        let root = dir
            .create_menu(NewMenu {
                name: "system".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let child = dir
            .create_menu(NewMenu {
                name: "users".to_string(),
                parent_id: Some(root.id),
                ..Default::default()
            })
            .await
            .unwrap();
        let role = dir.create_role("ops", None).await.unwrap();

        dir.set_role_menus(role.id, [child.id].into_iter().collect())
            .await
            .unwrap();
        let menus = dir.role_menus(role.id).await.unwrap();
        assert_eq!(menus.len(), 1);
        assert_eq!(menus[0].id, child.id);
        assert_eq!(dir.list_menus().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn menu_with_unknown_parent_is_rejected() {
        let dir = InMemoryDirectory::new();
        let err = dir
            .create_menu(NewMenu {
                name: "stray".to_string(),
                parent_id: Some(MenuId::new(77)),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err, DirectoryError::NotFound("parent menu"));
    }
}
