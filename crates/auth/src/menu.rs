//! Menu model and tree assembly.
//!
//! Menus are stored flat with a parent pointer. The tree is built from an
//! arena of parent indices: one pass resolves parents, one pass groups
//! children, then roots are assembled depth-first.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use warden_core::{DomainError, Entity, MenuId};

/// Menu node kind. Serialized as the integers `1`, `2`, `3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MenuKind {
    #[default]
    Directory,
    Menu,
    /// UI action; carries a permission string instead of a route.
    Button,
}

impl TryFrom<u8> for MenuKind {
    type Error = DomainError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MenuKind::Directory),
            2 => Ok(MenuKind::Menu),
            3 => Ok(MenuKind::Button),
            other => Err(DomainError::validation(format!("unknown menu type {other}"))),
        }
    }
}

impl From<MenuKind> for u8 {
    fn from(value: MenuKind) -> Self {
        match value {
            MenuKind::Directory => 1,
            MenuKind::Menu => 2,
            MenuKind::Button => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuMeta {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default = "default_show")]
    pub show: bool,
    #[serde(default)]
    pub link: Option<String>,
}

fn default_show() -> bool {
    true
}

impl Default for MenuMeta {
    fn default() -> Self {
        Self {
            title: None,
            icon: None,
            show: true,
            link: None,
        }
    }
}

impl MenuMeta {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Menu {
    pub id: MenuId,
    pub name: String,
    #[serde(default, alias = "parentId")]
    pub parent_id: Option<MenuId>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub component: Option<String>,
    #[serde(default)]
    pub redirect: Option<String>,
    #[serde(default)]
    pub permission: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: MenuKind,
    #[serde(default)]
    pub meta: MenuMeta,
}

impl Entity for Menu {
    type Id = MenuId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

/// Partial update for a menu. Absent fields are left untouched.
///
/// `parent_id: 0` detaches the menu (makes it a root).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MenuPatch {
    pub name: Option<String>,
    #[serde(alias = "parentId")]
    pub parent_id: Option<MenuId>,
    pub path: Option<String>,
    pub component: Option<String>,
    pub redirect: Option<String>,
    pub permission: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<MenuKind>,
    pub meta: Option<MenuMeta>,
}

impl MenuPatch {
    /// `None`: parent unchanged. `Some(None)`: detach. `Some(Some(p))`: move under `p`.
    pub fn parent_change(&self) -> Option<Option<MenuId>> {
        self.parent_id
            .map(|parent| (parent.get() != 0).then_some(parent))
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(DomainError::validation("menu name cannot be empty"));
            }
        }
        Ok(())
    }

    pub fn apply(&self, menu: &mut Menu) {
        if let Some(name) = &self.name {
            menu.name = name.clone();
        }
        if let Some(parent) = self.parent_change() {
            menu.parent_id = parent;
        }
        if let Some(path) = &self.path {
            menu.path = Some(path.clone());
        }
        if let Some(component) = &self.component {
            menu.component = Some(component.clone());
        }
        if let Some(redirect) = &self.redirect {
            menu.redirect = Some(redirect.clone());
        }
        if let Some(permission) = &self.permission {
            menu.permission = Some(permission.clone());
        }
        if let Some(kind) = self.kind {
            menu.kind = kind;
        }
        if let Some(meta) = &self.meta {
            menu.meta = meta.clone();
        }
    }
}

/// A menu with its nested children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuNode {
    #[serde(flatten)]
    pub menu: Menu,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<MenuNode>,
}

/// Build a forest from a flat menu list.
///
/// Input order is preserved among siblings. Menus whose parent is not in the
/// list are dropped along with their subtree.
pub fn build_tree(menus: Vec<Menu>) -> Vec<MenuNode> {
    let mut index: HashMap<MenuId, usize> = HashMap::with_capacity(menus.len());
    for (i, menu) in menus.iter().enumerate() {
        index.entry(menu.id).or_insert(i);
    }

    let mut roots = Vec::new();
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); menus.len()];
    for (i, menu) in menus.iter().enumerate() {
        match menu.parent_id {
            None => roots.push(i),
            Some(parent) => match index.get(&parent) {
                Some(&p) => children[p].push(i),
                None => tracing::debug!(menu = %menu.id, parent = %parent, "dropping orphan menu"),
            },
        }
    }

    let mut slots: Vec<Option<Menu>> = menus.into_iter().map(Some).collect();
    roots
        .into_iter()
        .filter_map(|i| assemble(i, &mut slots, &children))
        .collect()
}

fn assemble(i: usize, slots: &mut [Option<Menu>], children: &[Vec<usize>]) -> Option<MenuNode> {
    let menu = slots[i].take()?;
    let children = children[i]
        .iter()
        .filter_map(|&c| assemble(c, slots, children))
        .collect();
    Some(MenuNode { menu, children })
}

/// Would moving `id` under `new_parent` create a cycle?
///
/// `parents` maps every known menu to its current parent.
pub fn creates_cycle(
    parents: &HashMap<MenuId, Option<MenuId>>,
    id: MenuId,
    new_parent: Option<MenuId>,
) -> bool {
    let mut current = new_parent;
    let mut steps = 0usize;
    while let Some(ancestor) = current {
        if ancestor == id {
            return true;
        }
        steps += 1;
        if steps > parents.len() {
            // The existing chain already loops.
            return true;
        }
        current = parents.get(&ancestor).copied().flatten();
    }
    false
}

/// Split menus into navigation entries and button permission strings.
pub fn split_navigation(menus: Vec<Menu>) -> (Vec<Menu>, Vec<String>) {
    let mut navigation = Vec::with_capacity(menus.len());
    let mut permissions = Vec::new();
    for menu in menus {
        if menu.kind == MenuKind::Button {
            if let Some(permission) = menu.permission.filter(|p| !p.is_empty()) {
                permissions.push(permission);
            }
        } else {
            navigation.push(menu);
        }
    }
    (navigation, permissions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn menu(id: i64, parent: Option<i64>, kind: MenuKind) -> Menu {
        Menu {
            id: MenuId::new(id),
            name: format!("m{id}"),
            parent_id: parent.map(MenuId::new),
            path: None,
            component: None,
            redirect: None,
            permission: None,
            kind,
            meta: MenuMeta::default(),
        }
    }

    fn ids(nodes: &[MenuNode]) -> Vec<i64> {
        nodes.iter().map(|n| n.menu.id.get()).collect()
    }

    #[test]
    fn builds_nested_tree_preserving_order() {
        let tree = build_tree(vec![
            menu(3, Some(1), MenuKind::Menu),
            menu(1, None, MenuKind::Directory),
            menu(2, Some(1), MenuKind::Menu),
            menu(4, Some(2), MenuKind::Menu),
            menu(5, None, MenuKind::Directory),
        ]);
        assert_eq!(ids(&tree), vec![1, 5]);
        assert_eq!(ids(&tree[0].children), vec![3, 2]);
        assert_eq!(ids(&tree[0].children[1].children), vec![4]);
        assert!(tree[1].children.is_empty());
    }

    #[test]
    fn orphans_and_their_subtrees_are_dropped() {
        let tree = build_tree(vec![
            menu(1, None, MenuKind::Directory),
            menu(2, Some(99), MenuKind::Menu),
            menu(3, Some(2), MenuKind::Menu),
        ]);
        assert_eq!(ids(&tree), vec![1]);
        assert!(tree[0].children.is_empty());
    }

    #[test]
    fn corrupt_cycles_do_not_hang() {
        let tree = build_tree(vec![
            menu(1, Some(2), MenuKind::Menu),
            menu(2, Some(1), MenuKind::Menu),
            menu(3, None, MenuKind::Directory),
        ]);
        assert_eq!(ids(&tree), vec![3]);
    }

    #[test]
    fn cycle_detection_rejects_self_and_descendants() {
        let parents: HashMap<MenuId, Option<MenuId>> = [
            (MenuId::new(1), None),
            (MenuId::new(2), Some(MenuId::new(1))),
            (MenuId::new(3), Some(MenuId::new(2))),
        ]
        .into_iter()
        .collect();

        assert!(creates_cycle(&parents, MenuId::new(1), Some(MenuId::new(1))));
        assert!(creates_cycle(&parents, MenuId::new(1), Some(MenuId::new(3))));
        assert!(!creates_cycle(&parents, MenuId::new(3), Some(MenuId::new(1))));
        assert!(!creates_cycle(&parents, MenuId::new(2), None));
    }

    #[test]
    fn zero_parent_detaches() {
        let patch: MenuPatch = serde_json::from_str(r#"{"parentId": 0}"#).unwrap();
        assert_eq!(patch.parent_change(), Some(None));

        let mut m = menu(4, Some(2), MenuKind::Menu);
        patch.apply(&mut m);
        assert_eq!(m.parent_id, None);

        let untouched = MenuPatch::default();
        assert_eq!(untouched.parent_change(), None);
    }

    #[test]
    fn buttons_become_permissions() {
        let mut button = menu(9, Some(2), MenuKind::Button);
        button.permission = Some("user:create".to_string());
        let mut blank = menu(10, Some(2), MenuKind::Button);
        blank.permission = Some(String::new());

        let (nav, perms) = split_navigation(vec![menu(2, None, MenuKind::Menu), button, blank]);
        assert_eq!(nav.len(), 1);
        assert_eq!(perms, vec!["user:create".to_string()]);
    }

    #[test]
    fn kind_uses_integer_wire_values() {
        let json = serde_json::to_value(menu(1, None, MenuKind::Button)).unwrap();
        assert_eq!(json["type"], 3);
        assert_eq!(json["meta"]["show"], true);

        let err = serde_json::from_str::<MenuKind>("7");
        assert!(err.is_err());
    }
}
