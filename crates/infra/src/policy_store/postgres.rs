//! Postgres-backed policy store.
//!
//! Table `rbac_policies(subject, object, action)` with the whole triple as
//! primary key, so duplicate inserts collapse via `ON CONFLICT DO NOTHING`.
//!
//! `replace_subject` runs in one transaction and first takes
//! `pg_advisory_xact_lock(subject)`: writers for the same role serialize
//! across processes, writers for different roles do not block each other.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use warden_auth::{Action, PolicyTuple};
use warden_core::RoleId;

use super::{check_subject, PolicyStore, PolicyStoreError};

#[derive(Debug, Clone)]
pub struct PostgresPolicyStore {
    pool: Arc<PgPool>,
}

impl PostgresPolicyStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl PolicyStore for PostgresPolicyStore {
    #[instrument(skip(self, tuples), fields(count = tuples.len()), err)]
    async fn add_policies(&self, tuples: Vec<PolicyTuple>) -> Result<(), PolicyStoreError> {
        if tuples.is_empty() {
            return Ok(());
        }
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        insert_tuples(&mut tx, tuples.iter()).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), fields(subject = %subject), err)]
    async fn remove_by_subject(&self, subject: RoleId) -> Result<(), PolicyStoreError> {
        sqlx::query("DELETE FROM rbac_policies WHERE subject = $1")
            .bind(subject.get())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("remove_by_subject", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(subject = %subject), err)]
    async fn get_by_subject(&self, subject: RoleId) -> Result<BTreeSet<PolicyTuple>, PolicyStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT subject, object, action
            FROM rbac_policies
            WHERE subject = $1
            "#,
        )
        .bind(subject.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_by_subject", e))?;

        rows.iter().map(tuple_from_row).collect()
    }

    #[instrument(skip(self, tuples), fields(subject = %subject, count = tuples.len()), err)]
    async fn replace_subject(
        &self,
        subject: RoleId,
        tuples: BTreeSet<PolicyTuple>,
    ) -> Result<(), PolicyStoreError> {
        check_subject(subject, &tuples)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(subject.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("advisory_lock", e))?;

        sqlx::query("DELETE FROM rbac_policies WHERE subject = $1")
            .bind(subject.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("clear_subject", e))?;

        // Dropping `tx` on the error path rolls the transaction back.
        insert_tuples(&mut tx, tuples.iter()).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self), err)]
    async fn load_all(&self) -> Result<Vec<PolicyTuple>, PolicyStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT subject, object, action
            FROM rbac_policies
            ORDER BY subject, object, action
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_all", e))?;

        rows.iter().map(tuple_from_row).collect()
    }
}

async fn insert_tuples<'a>(
    tx: &mut Transaction<'_, Postgres>,
    tuples: impl Iterator<Item = &'a PolicyTuple>,
) -> Result<(), PolicyStoreError> {
    let mut subjects = Vec::new();
    let mut objects = Vec::new();
    let mut actions = Vec::new();
    for tuple in tuples {
        subjects.push(tuple.subject.get());
        objects.push(tuple.object.as_str().to_string());
        actions.push(tuple.action.as_str().to_string());
    }
    if subjects.is_empty() {
        return Ok(());
    }

    sqlx::query(
        r#"
        INSERT INTO rbac_policies (subject, object, action)
        SELECT * FROM UNNEST($1::bigint[], $2::text[], $3::text[])
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(&subjects)
    .bind(&objects)
    .bind(&actions)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_policies", e))?;
    Ok(())
}

fn tuple_from_row(row: &PgRow) -> Result<PolicyTuple, PolicyStoreError> {
    let subject: i64 = row
        .try_get("subject")
        .map_err(|e| PolicyStoreError::Storage(format!("failed to read subject: {e}")))?;
    let object: String = row
        .try_get("object")
        .map_err(|e| PolicyStoreError::Storage(format!("failed to read object: {e}")))?;
    let action: String = row
        .try_get("action")
        .map_err(|e| PolicyStoreError::Storage(format!("failed to read action: {e}")))?;
    let action = Action::parse(&action)
        .map_err(|e| PolicyStoreError::Storage(format!("stored policy has {e}")))?;
    Ok(PolicyTuple::new(RoleId::new(subject), object, action))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> PolicyStoreError {
    match err {
        sqlx::Error::Database(db_err) => PolicyStoreError::Storage(format!(
            "database error in {operation}: {}",
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            PolicyStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        other => PolicyStoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}
