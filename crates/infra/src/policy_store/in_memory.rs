use std::collections::BTreeSet;

use async_trait::async_trait;
use dashmap::DashMap;

use warden_auth::PolicyTuple;
use warden_core::RoleId;

use super::{check_subject, PolicyStore, PolicyStoreError};

/// In-memory policy store for tests/dev.
///
/// Subjects live in separate shards, so writers on different roles do not
/// contend.
#[derive(Debug, Default)]
pub struct InMemoryPolicyStore {
    inner: DashMap<RoleId, BTreeSet<PolicyTuple>>,
}

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn add_policies(&self, tuples: Vec<PolicyTuple>) -> Result<(), PolicyStoreError> {
        for tuple in tuples {
            self.inner.entry(tuple.subject).or_default().insert(tuple);
        }
        Ok(())
    }

    async fn remove_by_subject(&self, subject: RoleId) -> Result<(), PolicyStoreError> {
        self.inner.remove(&subject);
        Ok(())
    }

    async fn get_by_subject(&self, subject: RoleId) -> Result<BTreeSet<PolicyTuple>, PolicyStoreError> {
        Ok(self
            .inner
            .get(&subject)
            .map(|set| set.clone())
            .unwrap_or_default())
    }

    async fn replace_subject(
        &self,
        subject: RoleId,
        tuples: BTreeSet<PolicyTuple>,
    ) -> Result<(), PolicyStoreError> {
        check_subject(subject, &tuples)?;
        if tuples.is_empty() {
            self.inner.remove(&subject);
        } else {
            self.inner.insert(subject, tuples);
        }
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<PolicyTuple>, PolicyStoreError> {
        let mut all: Vec<PolicyTuple> = self
            .inner
            .iter()
            .flat_map(|entry| entry.value().iter().cloned().collect::<Vec<_>>())
            .collect();
        all.sort();
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_auth::{Action, PolicyEnforcer};

    fn grant(role: i64, path: &str, action: Action) -> PolicyTuple {
        PolicyTuple::new(RoleId::new(role), path, action)
    }

    #[tokio::test]
    async fn duplicates_are_ignored() {
        let store = InMemoryPolicyStore::new();
        let tuple = grant(1, "/User/{id}", Action::GET);
        store
            .add_policies(vec![tuple.clone(), tuple.clone()])
            .await
            .unwrap();
        store.add_policies(vec![tuple]).await.unwrap();

        assert_eq!(store.get_by_subject(RoleId::new(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn remove_missing_subject_is_a_no_op() {
        let store = InMemoryPolicyStore::new();
        store.remove_by_subject(RoleId::new(42)).await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replace_swaps_one_subject_only() {
        let store = InMemoryPolicyStore::new();
        store
            .add_policies(vec![
                grant(1, "/a", Action::GET),
                grant(2, "/b", Action::GET),
            ])
            .await
            .unwrap();

        let next: BTreeSet<_> = [grant(1, "/c", Action::POST)].into_iter().collect();
        store.replace_subject(RoleId::new(1), next.clone()).await.unwrap();

        assert_eq!(store.get_by_subject(RoleId::new(1)).await.unwrap(), next);
        assert_eq!(store.get_by_subject(RoleId::new(2)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn replace_rejects_foreign_tuples_without_mutating() {
        let store = InMemoryPolicyStore::new();
        store.add_policies(vec![grant(1, "/a", Action::GET)]).await.unwrap();

        let batch: BTreeSet<_> = [grant(1, "/b", Action::GET), grant(2, "/c", Action::GET)]
            .into_iter()
            .collect();
        let err = store.replace_subject(RoleId::new(1), batch).await.unwrap_err();

        assert_eq!(
            err,
            PolicyStoreError::SubjectMismatch {
                expected: RoleId::new(1),
                found: RoleId::new(2)
            }
        );
        let kept = store.get_by_subject(RoleId::new(1)).await.unwrap();
        assert_eq!(kept.len(), 1);
        assert!(kept.contains(&grant(1, "/a", Action::GET)));
    }

    #[tokio::test]
    async fn empty_replacement_clears_subject() {
        let store = InMemoryPolicyStore::new();
        store.add_policies(vec![grant(3, "/a", Action::GET)]).await.unwrap();
        store
            .replace_subject(RoleId::new(3), BTreeSet::new())
            .await
            .unwrap();
        assert!(store.get_by_subject(RoleId::new(3)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn enforcer_loads_from_store() {
        let store = InMemoryPolicyStore::new();
        store
            .add_policies(vec![grant(7, "/user/{id}", Action::GET)])
            .await
            .unwrap();

        let enforcer = crate::policy_store::load_enforcer(&store).await.unwrap();
        assert!(enforcer.enforce(RoleId::new(7), "/user/42", &Action::GET));
    }
}
