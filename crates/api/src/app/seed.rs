//! First-start bootstrap: the superuser account and the system menu tree.

use warden_auth::{MenuKind, MenuMeta, User};
use warden_core::MenuId;
use warden_infra::{DirectoryError, DirectoryStore, NewMenu, NewUser};

/// `(name, path, component, [(button name, permission)])` per system page.
const SYSTEM_PAGES: [(&str, &str, &str, &[(&str, &str)]); 3] = [
    (
        "user",
        "/system/user",
        "/views/system/user/index.vue",
        &[
            ("user create", "user:create"),
            ("user delete", "user:delete"),
            ("user update", "user:update"),
            ("user query", "user:query"),
        ],
    ),
    (
        "role",
        "/system/role",
        "/views/system/role/index.vue",
        &[
            ("role create", "role:create"),
            ("role delete", "role:delete"),
            ("role update", "role:update"),
            ("role query", "role:query"),
        ],
    ),
    (
        "menu",
        "/system/menu",
        "/views/system/menu/index.vue",
        &[
            ("menu create", "menu:create"),
            ("menu delete", "menu:delete"),
            ("menu update", "menu:update"),
            ("menu query", "sys:menu:query"),
        ],
    ),
];

/// Create the superuser `username` if missing.
///
/// The system menu tree is only seeded into an empty menu table, so an
/// operator who deleted the admin account does not get duplicate menus.
pub async fn ensure_admin(
    directory: &dyn DirectoryStore,
    username: &str,
) -> Result<User, DirectoryError> {
    if let Some(existing) = directory.user_by_username(username).await? {
        return Ok(existing);
    }

    let admin = directory
        .create_user(NewUser {
            username: username.to_string(),
            is_superuser: true,
            is_staff: true,
        })
        .await?;
    tracing::info!(user = %admin.id, %username, "created superuser");

    if directory.list_menus().await?.is_empty() {
        seed_system_menus(directory).await?;
    }
    Ok(admin)
}

async fn seed_system_menus(directory: &dyn DirectoryStore) -> Result<(), DirectoryError> {
    let root = directory
        .create_menu(NewMenu {
            name: "system".to_string(),
            path: Some("/system".to_string()),
            kind: MenuKind::Directory,
            meta: MenuMeta {
                icon: Some("Management".to_string()),
                ..MenuMeta::titled("System")
            },
            ..NewMenu::default()
        })
        .await?;

    let mut created = 1usize;
    for (name, path, component, buttons) in SYSTEM_PAGES {
        let page = directory
            .create_menu(NewMenu {
                name: name.to_string(),
                parent_id: Some(root.id),
                path: Some(path.to_string()),
                component: Some(component.to_string()),
                kind: MenuKind::Menu,
                meta: MenuMeta::titled(name),
                ..NewMenu::default()
            })
            .await?;
        created += 1;

        for (label, permission) in buttons {
            directory.create_menu(button(page.id, label, permission)).await?;
            created += 1;
        }
    }

    tracing::info!(menus = created, "seeded system menu tree");
    Ok(())
}

fn button(parent: MenuId, label: &str, permission: &str) -> NewMenu {
    NewMenu {
        name: label.to_string(),
        parent_id: Some(parent),
        permission: Some(permission.to_string()),
        kind: MenuKind::Button,
        meta: MenuMeta::titled(label),
        ..NewMenu::default()
    }
}
