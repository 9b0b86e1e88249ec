//! Postgres-backed directory.
//!
//! Assignment writes lock the owning row (`FOR UPDATE`) and run
//! clear-then-insert inside one transaction.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use warden_auth::{Menu, MenuKind, MenuMeta, MenuPatch, Role, RolePatch, User, UserPatch};
use warden_core::{MenuId, RoleId, UserId};

use super::{DirectoryError, DirectoryStore, NewMenu, NewUser};

const USER_COLUMNS: &str = r#"
    u.id, u.username, u.is_superuser, u.is_staff, u.active_role_id, u.avatar, u.last_login,
    ARRAY(SELECT ur.role_id FROM rbac_user_roles ur WHERE ur.user_id = u.id ORDER BY ur.role_id) AS roles
"#;

const ROLE_COLUMNS: &str = r#"
    r.id, r.name, r.remark,
    ARRAY(SELECT rm.menu_id FROM rbac_role_menus rm WHERE rm.role_id = r.id ORDER BY rm.menu_id) AS menus
"#;

const MENU_COLUMNS: &str =
    "m.id, m.name, m.parent_id, m.path, m.component, m.redirect, m.permission, m.kind, m.meta";

#[derive(Debug, Clone)]
pub struct PostgresDirectory {
    pool: Arc<PgPool>,
}

impl PostgresDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, DirectoryError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }

    async fn fetch_user(&self, id: UserId) -> Result<Option<User>, DirectoryError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM rbac_users u WHERE u.id = $1"))
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_user", e))?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn fetch_role(&self, id: RoleId) -> Result<Option<Role>, DirectoryError> {
        let row = sqlx::query(&format!("SELECT {ROLE_COLUMNS} FROM rbac_roles r WHERE r.id = $1"))
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_role", e))?;
        row.as_ref().map(role_from_row).transpose()
    }

    async fn require_user(&self, id: UserId) -> Result<User, DirectoryError> {
        self.fetch_user(id).await?.ok_or(DirectoryError::NotFound("user"))
    }

    async fn require_role(&self, id: RoleId) -> Result<Role, DirectoryError> {
        self.fetch_role(id).await?.ok_or(DirectoryError::NotFound("role"))
    }
}

#[async_trait]
impl DirectoryStore for PostgresDirectory {
    #[instrument(skip(self, user), fields(username = %user.username), err)]
    async fn create_user(&self, user: NewUser) -> Result<User, DirectoryError> {
        let row = sqlx::query(
            r#"
            INSERT INTO rbac_users (username, is_superuser, is_staff)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(&user.username)
        .bind(user.is_superuser)
        .bind(user.is_staff)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_user", e))?;
        let id: i64 = read(&row, "id")?;
        self.require_user(UserId::new(id)).await
    }

    #[instrument(skip(self), err)]
    async fn create_role(&self, name: &str, remark: Option<&str>) -> Result<Role, DirectoryError> {
        let row = sqlx::query("INSERT INTO rbac_roles (name, remark) VALUES ($1, $2) RETURNING id")
            .bind(name)
            .bind(remark)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_role", e))?;
        let id: i64 = read(&row, "id")?;
        self.require_role(RoleId::new(id)).await
    }

    #[instrument(skip(self, menu), fields(name = %menu.name), err)]
    async fn create_menu(&self, menu: NewMenu) -> Result<Menu, DirectoryError> {
        let row = sqlx::query(
            r#"
            INSERT INTO rbac_menus (name, parent_id, path, component, redirect, permission, kind, meta)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(&menu.name)
        .bind(menu.parent_id.map(|p| p.get()))
        .bind(&menu.path)
        .bind(&menu.component)
        .bind(&menu.redirect)
        .bind(&menu.permission)
        .bind(i16::from(u8::from(menu.kind)))
        .bind(Json(&menu.meta))
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_menu", e))?;
        let id: i64 = read(&row, "id")?;
        Ok(menu.into_menu(MenuId::new(id)))
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn get_user(&self, id: UserId) -> Result<Option<User>, DirectoryError> {
        self.fetch_user(id).await
    }

    #[instrument(skip(self), err)]
    async fn user_by_username(&self, username: &str) -> Result<Option<User>, DirectoryError> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM rbac_users u WHERE u.username = $1"
        ))
        .bind(username)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("user_by_username", e))?;
        row.as_ref().map(user_from_row).transpose()
    }

    #[instrument(skip(self), fields(role_id = %id), err)]
    async fn get_role(&self, id: RoleId) -> Result<Option<Role>, DirectoryError> {
        self.fetch_role(id).await
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn existing_roles(&self, ids: &BTreeSet<RoleId>) -> Result<BTreeSet<RoleId>, DirectoryError> {
        let ids: Vec<i64> = ids.iter().map(|id| id.get()).collect();
        let rows = sqlx::query("SELECT id FROM rbac_roles WHERE id = ANY($1)")
            .bind(&ids)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("existing_roles", e))?;
        rows.iter()
            .map(|row| read::<i64>(row, "id").map(RoleId::new))
            .collect()
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn existing_menus(&self, ids: &BTreeSet<MenuId>) -> Result<BTreeSet<MenuId>, DirectoryError> {
        let ids: Vec<i64> = ids.iter().map(|id| id.get()).collect();
        let rows = sqlx::query("SELECT id FROM rbac_menus WHERE id = ANY($1)")
            .bind(&ids)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("existing_menus", e))?;
        rows.iter()
            .map(|row| read::<i64>(row, "id").map(MenuId::new))
            .collect()
    }

    #[instrument(skip(self, roles), fields(user_id = %user, count = roles.len()), err)]
    async fn set_user_roles(&self, user: UserId, roles: BTreeSet<RoleId>) -> Result<User, DirectoryError> {
        let roles: Vec<i64> = roles.iter().map(|id| id.get()).collect();
        let mut tx = self.begin().await?;

        lock_row(&mut tx, "SELECT id FROM rbac_users WHERE id = $1 FOR UPDATE", user.get(), "user").await?;

        sqlx::query("DELETE FROM rbac_user_roles WHERE user_id = $1")
            .bind(user.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("clear_user_roles", e))?;

        sqlx::query(
            r#"
            INSERT INTO rbac_user_roles (user_id, role_id)
            SELECT $1, UNNEST($2::bigint[])
            "#,
        )
        .bind(user.get())
        .bind(&roles)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_user_roles", e))?;

        sqlx::query(
            r#"
            UPDATE rbac_users SET active_role_id = NULL
            WHERE id = $1 AND active_role_id IS NOT NULL AND NOT (active_role_id = ANY($2))
            "#,
        )
        .bind(user.get())
        .bind(&roles)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("reset_active_role", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        self.require_user(user).await
    }

    #[instrument(skip(self, menus), fields(role_id = %role, count = menus.len()), err)]
    async fn set_role_menus(&self, role: RoleId, menus: BTreeSet<MenuId>) -> Result<Role, DirectoryError> {
        let menus: Vec<i64> = menus.iter().map(|id| id.get()).collect();
        let mut tx = self.begin().await?;

        lock_row(&mut tx, "SELECT id FROM rbac_roles WHERE id = $1 FOR UPDATE", role.get(), "role").await?;

        sqlx::query("DELETE FROM rbac_role_menus WHERE role_id = $1")
            .bind(role.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("clear_role_menus", e))?;

        sqlx::query(
            r#"
            INSERT INTO rbac_role_menus (role_id, menu_id)
            SELECT $1, UNNEST($2::bigint[])
            "#,
        )
        .bind(role.get())
        .bind(&menus)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_role_menus", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        self.require_role(role).await
    }

    #[instrument(skip(self), fields(user_id = %user), err)]
    async fn set_active_role(&self, user: UserId, role: Option<RoleId>) -> Result<User, DirectoryError> {
        let result = sqlx::query("UPDATE rbac_users SET active_role_id = $2 WHERE id = $1")
            .bind(user.get())
            .bind(role.map(|r| r.get()))
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_active_role", e))?;
        if result.rows_affected() == 0 {
            return Err(DirectoryError::NotFound("user"));
        }
        self.require_user(user).await
    }

    #[instrument(skip(self, patch), fields(user_id = %id), err)]
    async fn update_user(&self, id: UserId, patch: &UserPatch) -> Result<User, DirectoryError> {
        let mut tx = self.begin().await?;
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM rbac_users u WHERE u.id = $1 FOR UPDATE"
        ))
        .bind(id.get())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("load_user", e))?
        .ok_or(DirectoryError::NotFound("user"))?;

        let mut user = user_from_row(&row)?;
        patch.apply(&mut user);

        sqlx::query("UPDATE rbac_users SET avatar = $2, is_staff = $3 WHERE id = $1")
            .bind(id.get())
            .bind(&user.avatar)
            .bind(user.is_staff)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_user", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(user)
    }

    #[instrument(skip(self, patch), fields(role_id = %id), err)]
    async fn update_role(&self, id: RoleId, patch: &RolePatch) -> Result<Role, DirectoryError> {
        let mut tx = self.begin().await?;
        let row = sqlx::query(&format!(
            "SELECT {ROLE_COLUMNS} FROM rbac_roles r WHERE r.id = $1 FOR UPDATE"
        ))
        .bind(id.get())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("load_role", e))?
        .ok_or(DirectoryError::NotFound("role"))?;

        let mut role = role_from_row(&row)?;
        patch.apply(&mut role);

        sqlx::query("UPDATE rbac_roles SET name = $2, remark = $3 WHERE id = $1")
            .bind(id.get())
            .bind(&role.name)
            .bind(&role.remark)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_role", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(role)
    }

    #[instrument(skip(self, patch), fields(menu_id = %id), err)]
    async fn update_menu(&self, id: MenuId, patch: &MenuPatch) -> Result<Menu, DirectoryError> {
        let mut tx = self.begin().await?;
        let row = sqlx::query(&format!(
            "SELECT {MENU_COLUMNS} FROM rbac_menus m WHERE m.id = $1 FOR UPDATE"
        ))
        .bind(id.get())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("load_menu", e))?
        .ok_or(DirectoryError::NotFound("menu"))?;

        let mut menu = menu_from_row(&row)?;
        patch.apply(&mut menu);

        sqlx::query(
            r#"
            UPDATE rbac_menus
            SET name = $2, parent_id = $3, path = $4, component = $5,
                redirect = $6, permission = $7, kind = $8, meta = $9
            WHERE id = $1
            "#,
        )
        .bind(id.get())
        .bind(&menu.name)
        .bind(menu.parent_id.map(|p| p.get()))
        .bind(&menu.path)
        .bind(&menu.component)
        .bind(&menu.redirect)
        .bind(&menu.permission)
        .bind(i16::from(u8::from(menu.kind)))
        .bind(Json(&menu.meta))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_menu", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(menu)
    }

    #[instrument(skip(self), err)]
    async fn list_menus(&self) -> Result<Vec<Menu>, DirectoryError> {
        let rows = sqlx::query(&format!("SELECT {MENU_COLUMNS} FROM rbac_menus m ORDER BY m.id"))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_menus", e))?;
        rows.iter().map(menu_from_row).collect()
    }

    #[instrument(skip(self), fields(role_id = %role), err)]
    async fn role_menus(&self, role: RoleId) -> Result<Vec<Menu>, DirectoryError> {
        self.require_role(role).await?;
        let rows = sqlx::query(&format!(
            r#"
            SELECT {MENU_COLUMNS}
            FROM rbac_menus m
            JOIN rbac_role_menus rm ON rm.menu_id = m.id
            WHERE rm.role_id = $1
            ORDER BY m.id
            "#
        ))
        .bind(role.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("role_menus", e))?;
        rows.iter().map(menu_from_row).collect()
    }
}

async fn lock_row(
    tx: &mut Transaction<'_, Postgres>,
    sql: &str,
    id: i64,
    what: &'static str,
) -> Result<(), DirectoryError> {
    sqlx::query(sql)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_row", e))?
        .map(|_| ())
        .ok_or(DirectoryError::NotFound(what))
}

fn read<'r, T>(row: &'r PgRow, column: &str) -> Result<T, DirectoryError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| DirectoryError::Storage(format!("failed to read {column}: {e}")))
}

fn user_from_row(row: &PgRow) -> Result<User, DirectoryError> {
    let roles: Vec<i64> = read(row, "roles")?;
    Ok(User {
        id: UserId::new(read(row, "id")?),
        username: read(row, "username")?,
        is_superuser: read(row, "is_superuser")?,
        is_staff: read(row, "is_staff")?,
        active_role: read::<Option<i64>>(row, "active_role_id")?.map(RoleId::new),
        roles: roles.into_iter().map(RoleId::new).collect(),
        avatar: read(row, "avatar")?,
        last_login: read(row, "last_login")?,
    })
}

fn role_from_row(row: &PgRow) -> Result<Role, DirectoryError> {
    let menus: Vec<i64> = read(row, "menus")?;
    Ok(Role {
        id: RoleId::new(read(row, "id")?),
        name: read(row, "name")?,
        remark: read(row, "remark")?,
        menus: menus.into_iter().map(MenuId::new).collect(),
    })
}

fn menu_from_row(row: &PgRow) -> Result<Menu, DirectoryError> {
    let kind: i16 = read(row, "kind")?;
    let kind = u8::try_from(kind)
        .ok()
        .and_then(|k| MenuKind::try_from(k).ok())
        .ok_or_else(|| DirectoryError::Storage(format!("stored menu has unknown kind {kind}")))?;
    let Json(meta): Json<MenuMeta> = read(row, "meta")?;
    Ok(Menu {
        id: MenuId::new(read(row, "id")?),
        name: read(row, "name")?,
        parent_id: read::<Option<i64>>(row, "parent_id")?.map(MenuId::new),
        path: read(row, "path")?,
        component: read(row, "component")?,
        redirect: read(row, "redirect")?,
        permission: read(row, "permission")?,
        kind,
        meta,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> DirectoryError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                // unique violation
                Some("23505") => DirectoryError::Conflict(msg),
                // foreign key violation
                Some("23503") => DirectoryError::NotFound("referenced row"),
                _ => DirectoryError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            DirectoryError::Storage(format!("connection pool closed in {operation}"))
        }
        other => DirectoryError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}

#[cfg(all(test, feature = "pg-tests"))]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    async fn directory() -> PostgresDirectory {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for pg-tests");
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(&url)
            .await
            .expect("connect");
        crate::migrations::run_migrations(&pool).await.expect("migrate");
        PostgresDirectory::new(pool)
    }

    fn unique(prefix: &str) -> String {
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        format!("{prefix}{}", nanos.rem_euclid(1_000_000_000))
    }

    #[tokio::test]
    async fn role_assignment_round_trip() {
        let dir = directory().await;
        let user = dir
            .create_user(NewUser {
                username: unique("u"),
                is_superuser: false,
                is_staff: true,
            })
            .await
            .unwrap();
        let a = dir.create_role("a", None).await.unwrap();
        let b = dir.create_role("b", Some("second")).await.unwrap();

        dir.set_user_roles(user.id, [a.id, b.id].into_iter().collect())
            .await
            .unwrap();
        dir.set_active_role(user.id, Some(b.id)).await.unwrap();
        let user = dir
            .set_user_roles(user.id, [a.id].into_iter().collect())
            .await
            .unwrap();

        assert_eq!(user.roles, [a.id].into_iter().collect());
        assert_eq!(user.active_role, None);
    }

    #[tokio::test]
    async fn menus_keep_meta_and_kind() {
        let dir = directory().await;
        let root = dir
            .create_menu(NewMenu {
                name: unique("m"),
                kind: MenuKind::Directory,
                meta: MenuMeta::titled("System"),
                ..Default::default()
            })
            .await
            .unwrap();
        let patch = MenuPatch {
            kind: Some(MenuKind::Menu),
            ..Default::default()
        };
        let updated = dir.update_menu(root.id, &patch).await.unwrap();
        assert_eq!(updated.kind, MenuKind::Menu);
        assert_eq!(updated.meta.title.as_deref(), Some("System"));
    }

    #[tokio::test]
    async fn concurrent_patches_do_not_lose_fields() {
        let dir = directory().await;
        let user = dir
            .create_user(NewUser {
                username: unique("p"),
                is_superuser: false,
                is_staff: false,
            })
            .await
            .unwrap();
        let role = dir.create_role(&unique("r"), None).await.unwrap();

        let avatar = UserPatch {
            avatar: Some("a.png".to_string()),
            ..Default::default()
        };
        let staff = UserPatch {
            is_staff: Some(true),
            ..Default::default()
        };
        let rename = RolePatch {
            name: Some(unique("renamed")),
            remark: None,
        };
        let remark = RolePatch {
            name: None,
            remark: Some("kept".to_string()),
        };
        let (a, b, c, d) = tokio::join!(
            dir.update_user(user.id, &avatar),
            dir.update_user(user.id, &staff),
            dir.update_role(role.id, &rename),
            dir.update_role(role.id, &remark),
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();
        d.unwrap();

        let user = dir.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(user.avatar.as_deref(), Some("a.png"));
        assert!(user.is_staff);
        let role = dir.get_role(role.id).await.unwrap().unwrap();
        assert_eq!(role.name, rename.name.unwrap());
        assert_eq!(role.remark.as_deref(), Some("kept"));

        assert!(matches!(
            dir.update_role(RoleId::new(i64::MAX), &remark).await,
            Err(DirectoryError::NotFound("role"))
        ));
    }
}
