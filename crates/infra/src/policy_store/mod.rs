//! Durable policy storage boundary.
//!
//! The store is the source of truth for `(role, object, action)` tuples; the
//! in-process enforcer snapshot is rebuilt from it at startup and updated
//! after each successful write.

pub mod in_memory;
pub mod postgres;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use warden_auth::{PolicyTuple, SnapshotEnforcer};
use warden_core::RoleId;

pub use in_memory::InMemoryPolicyStore;
pub use postgres::PostgresPolicyStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyStoreError {
    #[error("policy storage failure: {0}")]
    Storage(String),

    #[error("policy for subject {found} in a batch for subject {expected}")]
    SubjectMismatch { expected: RoleId, found: RoleId },
}

#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Insert tuples; already present tuples are ignored.
    async fn add_policies(&self, tuples: Vec<PolicyTuple>) -> Result<(), PolicyStoreError>;

    /// Delete every tuple of `subject`. No-op when it has none.
    async fn remove_by_subject(&self, subject: RoleId) -> Result<(), PolicyStoreError>;

    async fn get_by_subject(&self, subject: RoleId) -> Result<BTreeSet<PolicyTuple>, PolicyStoreError>;

    /// Atomically replace the tuples of `subject` with `tuples`.
    ///
    /// Either both the removal and the insert are applied or neither is.
    async fn replace_subject(
        &self,
        subject: RoleId,
        tuples: BTreeSet<PolicyTuple>,
    ) -> Result<(), PolicyStoreError>;

    async fn load_all(&self) -> Result<Vec<PolicyTuple>, PolicyStoreError>;
}

#[async_trait]
impl<S> PolicyStore for Arc<S>
where
    S: PolicyStore + ?Sized,
{
    async fn add_policies(&self, tuples: Vec<PolicyTuple>) -> Result<(), PolicyStoreError> {
        (**self).add_policies(tuples).await
    }

    async fn remove_by_subject(&self, subject: RoleId) -> Result<(), PolicyStoreError> {
        (**self).remove_by_subject(subject).await
    }

    async fn get_by_subject(&self, subject: RoleId) -> Result<BTreeSet<PolicyTuple>, PolicyStoreError> {
        (**self).get_by_subject(subject).await
    }

    async fn replace_subject(
        &self,
        subject: RoleId,
        tuples: BTreeSet<PolicyTuple>,
    ) -> Result<(), PolicyStoreError> {
        (**self).replace_subject(subject, tuples).await
    }

    async fn load_all(&self) -> Result<Vec<PolicyTuple>, PolicyStoreError> {
        (**self).load_all().await
    }
}

/// Every tuple in a replacement batch must belong to `subject`.
pub(crate) fn check_subject<'a>(
    subject: RoleId,
    tuples: impl IntoIterator<Item = &'a PolicyTuple>,
) -> Result<(), PolicyStoreError> {
    match tuples.into_iter().find(|t| t.subject != subject) {
        Some(stray) => Err(PolicyStoreError::SubjectMismatch {
            expected: subject,
            found: stray.subject,
        }),
        None => Ok(()),
    }
}

/// Build an enforcer holding everything currently persisted.
pub async fn load_enforcer<S>(store: &S) -> Result<SnapshotEnforcer, PolicyStoreError>
where
    S: PolicyStore + ?Sized,
{
    let tuples = store.load_all().await?;
    tracing::info!(policies = tuples.len(), "loaded policy snapshot");
    Ok(SnapshotEnforcer::from_tuples(tuples))
}
