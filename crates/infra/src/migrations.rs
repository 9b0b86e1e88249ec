//! Embedded schema migrations for the Postgres stores.
//!
//! Applied versions are tracked in `schema_migrations`; each pending
//! migration runs in its own transaction.

use sqlx::{PgPool, Row};
use tracing::{debug, info};

#[derive(Debug)]
pub struct Migration {
    pub version: i32,
    pub name: &'static str,
    pub up_sql: &'static str,
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    let current: i32 = sqlx::query("SELECT COALESCE(MAX(version), 0) AS version FROM schema_migrations")
        .fetch_one(pool)
        .await?
        .try_get("version")?;
    debug!(current, "current schema version");

    for migration in migrations() {
        if migration.version <= current {
            continue;
        }
        info!(version = migration.version, name = migration.name, "applying migration");
        let mut tx = pool.begin().await?;
        sqlx::raw_sql(migration.up_sql).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
            .bind(migration.version)
            .bind(migration.name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
    }
    Ok(())
}

pub fn migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            name: "create_directory_tables",
            up_sql: r#"
                CREATE TABLE rbac_roles (
                    id BIGSERIAL PRIMARY KEY,
                    name VARCHAR(32) NOT NULL,
                    remark VARCHAR(128)
                );

                CREATE TABLE rbac_users (
                    id BIGSERIAL PRIMARY KEY,
                    username VARCHAR(32) NOT NULL UNIQUE,
                    is_superuser BOOLEAN NOT NULL DEFAULT FALSE,
                    is_staff BOOLEAN NOT NULL DEFAULT TRUE,
                    active_role_id BIGINT REFERENCES rbac_roles(id) ON DELETE SET NULL,
                    avatar TEXT,
                    last_login TIMESTAMPTZ
                );

                CREATE TABLE rbac_user_roles (
                    user_id BIGINT NOT NULL REFERENCES rbac_users(id) ON DELETE CASCADE,
                    role_id BIGINT NOT NULL REFERENCES rbac_roles(id) ON DELETE CASCADE,
                    PRIMARY KEY (user_id, role_id)
                );

                CREATE TABLE rbac_menus (
                    id BIGSERIAL PRIMARY KEY,
                    name VARCHAR(32) NOT NULL,
                    parent_id BIGINT REFERENCES rbac_menus(id) ON DELETE CASCADE,
                    path VARCHAR(128),
                    component VARCHAR(128),
                    redirect VARCHAR(128),
                    permission VARCHAR(128),
                    kind SMALLINT NOT NULL DEFAULT 1,
                    meta JSONB NOT NULL DEFAULT '{}'::jsonb
                );

                CREATE TABLE rbac_role_menus (
                    role_id BIGINT NOT NULL REFERENCES rbac_roles(id) ON DELETE CASCADE,
                    menu_id BIGINT NOT NULL REFERENCES rbac_menus(id) ON DELETE CASCADE,
                    PRIMARY KEY (role_id, menu_id)
                );
            "#,
        },
        Migration {
            version: 2,
            name: "create_policy_table",
            up_sql: r#"
                CREATE TABLE rbac_policies (
                    subject BIGINT NOT NULL,
                    object TEXT NOT NULL,
                    action TEXT NOT NULL,
                    PRIMARY KEY (subject, object, action)
                );
            "#,
        },
    ]
}
