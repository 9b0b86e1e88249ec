//! Role-level policy enforcement.
//!
//! [`SnapshotEnforcer`] keeps the whole policy set in an immutable
//! [`PolicySnapshot`] behind an `ArcSwap`. Readers load the current snapshot
//! without taking a lock; writers derive a new snapshot and publish it in one
//! pointer swap. A reader therefore sees either the previous or the next
//! policy set of a role, never a half-applied replace.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use arc_swap::ArcSwap;

use warden_core::RoleId;

use crate::{Action, PathTemplate, PolicyTuple};

/// Policy decision point over `(role, request path, method)`.
pub trait PolicyEnforcer: Send + Sync {
    /// First stored grant of `subject` matching the request, if any.
    fn find_match(&self, subject: RoleId, request_path: &str, method: &Action) -> Option<PolicyTuple>;

    /// Default-deny check: true iff some grant of `subject` matches.
    fn enforce(&self, subject: RoleId, request_path: &str, method: &Action) -> bool {
        self.find_match(subject, request_path, method).is_some()
    }

    /// Add grants; already-present tuples are ignored.
    fn add_policies(&self, tuples: Vec<PolicyTuple>);

    /// Drop every grant held by `subject`.
    fn remove_filtered(&self, subject: RoleId);

    /// Atomically replace the grants of `subject` with `tuples`.
    ///
    /// Tuples naming a different subject are ignored.
    fn replace_subject(&self, subject: RoleId, tuples: BTreeSet<PolicyTuple>);

    /// Current grants of `subject`.
    fn policies_for(&self, subject: RoleId) -> BTreeSet<PolicyTuple>;
}

impl<E> PolicyEnforcer for Arc<E>
where
    E: PolicyEnforcer + ?Sized,
{
    fn find_match(&self, subject: RoleId, request_path: &str, method: &Action) -> Option<PolicyTuple> {
        (**self).find_match(subject, request_path, method)
    }

    fn enforce(&self, subject: RoleId, request_path: &str, method: &Action) -> bool {
        (**self).enforce(subject, request_path, method)
    }

    fn add_policies(&self, tuples: Vec<PolicyTuple>) {
        (**self).add_policies(tuples)
    }

    fn remove_filtered(&self, subject: RoleId) {
        (**self).remove_filtered(subject)
    }

    fn replace_subject(&self, subject: RoleId, tuples: BTreeSet<PolicyTuple>) {
        (**self).replace_subject(subject, tuples)
    }

    fn policies_for(&self, subject: RoleId) -> BTreeSet<PolicyTuple> {
        (**self).policies_for(subject)
    }
}

/// Compiled grants of one subject.
#[derive(Debug)]
struct SubjectPolicies {
    tuples: BTreeSet<PolicyTuple>,
    compiled: Vec<PathTemplate>,
}

impl SubjectPolicies {
    fn new(tuples: BTreeSet<PolicyTuple>) -> Self {
        let compiled = tuples
            .iter()
            .map(|t| PathTemplate::compile(&t.object))
            .collect();
        Self { tuples, compiled }
    }

    fn find(&self, request_path: &str, method: &Action) -> Option<&PolicyTuple> {
        self.tuples
            .iter()
            .zip(self.compiled.iter())
            .find(|(tuple, template)| tuple.action == *method && template.matches(request_path))
            .map(|(tuple, _)| tuple)
    }
}

/// Immutable view of every subject's grants.
#[derive(Debug, Default, Clone)]
pub struct PolicySnapshot {
    by_subject: HashMap<RoleId, Arc<SubjectPolicies>>,
}

impl PolicySnapshot {
    pub fn from_tuples(tuples: impl IntoIterator<Item = PolicyTuple>) -> Self {
        let mut grouped: HashMap<RoleId, BTreeSet<PolicyTuple>> = HashMap::new();
        for tuple in tuples {
            grouped.entry(tuple.subject).or_default().insert(tuple);
        }
        let by_subject = grouped
            .into_iter()
            .map(|(subject, set)| (subject, Arc::new(SubjectPolicies::new(set))))
            .collect();
        Self { by_subject }
    }

    /// Number of subjects holding at least one grant.
    pub fn subject_count(&self) -> usize {
        self.by_subject.len()
    }

    /// Total number of grants across subjects.
    pub fn len(&self) -> usize {
        self.by_subject.values().map(|p| p.tuples.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_subject.is_empty()
    }

    fn set_subject(&mut self, subject: RoleId, tuples: BTreeSet<PolicyTuple>) {
        if tuples.is_empty() {
            self.by_subject.remove(&subject);
        } else {
            self.by_subject
                .insert(subject, Arc::new(SubjectPolicies::new(tuples)));
        }
    }

    fn with_subject(&self, subject: RoleId, tuples: BTreeSet<PolicyTuple>) -> Self {
        let mut next = self.clone();
        next.set_subject(subject, tuples);
        next
    }

    fn tuples_of(&self, subject: RoleId) -> BTreeSet<PolicyTuple> {
        self.by_subject
            .get(&subject)
            .map(|p| p.tuples.clone())
            .unwrap_or_default()
    }
}

/// Lock-free-read enforcer backed by an atomically swapped snapshot.
#[derive(Debug, Default)]
pub struct SnapshotEnforcer {
    snapshot: ArcSwap<PolicySnapshot>,
}

impl SnapshotEnforcer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an enforcer from a full policy load (e.g. at startup).
    pub fn from_tuples(tuples: impl IntoIterator<Item = PolicyTuple>) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(PolicySnapshot::from_tuples(tuples)),
        }
    }

    /// Replace the entire policy set (e.g. after a reload from storage).
    pub fn reload(&self, tuples: impl IntoIterator<Item = PolicyTuple>) {
        self.snapshot
            .store(Arc::new(PolicySnapshot::from_tuples(tuples)));
    }

    /// Current snapshot; stays valid even if a writer swaps a new one in.
    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        self.snapshot.load_full()
    }
}

impl PolicyEnforcer for SnapshotEnforcer {
    fn find_match(&self, subject: RoleId, request_path: &str, method: &Action) -> Option<PolicyTuple> {
        let snapshot = self.snapshot.load();
        snapshot
            .by_subject
            .get(&subject)
            .and_then(|p| p.find(request_path, method))
            .cloned()
    }

    fn enforce(&self, subject: RoleId, request_path: &str, method: &Action) -> bool {
        let snapshot = self.snapshot.load();
        snapshot
            .by_subject
            .get(&subject)
            .is_some_and(|p| p.find(request_path, method).is_some())
    }

    fn add_policies(&self, tuples: Vec<PolicyTuple>) {
        if tuples.is_empty() {
            return;
        }
        self.snapshot.rcu(|current| {
            let mut grouped: HashMap<RoleId, BTreeSet<PolicyTuple>> = HashMap::new();
            for tuple in &tuples {
                grouped
                    .entry(tuple.subject)
                    .or_insert_with(|| current.tuples_of(tuple.subject))
                    .insert(tuple.clone());
            }
            let mut next = PolicySnapshot::clone(current);
            for (subject, set) in grouped {
                next.set_subject(subject, set);
            }
            next
        });
    }

    fn remove_filtered(&self, subject: RoleId) {
        self.snapshot
            .rcu(|current| current.with_subject(subject, BTreeSet::new()));
    }

    fn replace_subject(&self, subject: RoleId, tuples: BTreeSet<PolicyTuple>) {
        let (own, foreign): (BTreeSet<_>, BTreeSet<_>) =
            tuples.into_iter().partition(|t| t.subject == subject);
        if !foreign.is_empty() {
            tracing::warn!(
                subject = %subject,
                ignored = foreign.len(),
                "replace_subject received tuples for other subjects"
            );
        }
        self.snapshot
            .rcu(|current| current.with_subject(subject, own.clone()));
    }

    fn policies_for(&self, subject: RoleId) -> BTreeSet<PolicyTuple> {
        self.snapshot.load().tuples_of(subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;

    fn role(id: i64) -> RoleId {
        RoleId::new(id)
    }

    fn grant(r: i64, path: &str, action: Action) -> PolicyTuple {
        PolicyTuple::new(role(r), path, action)
    }

    #[test]
    fn role_without_policies_is_denied() {
        let enforcer = SnapshotEnforcer::new();
        assert!(!enforcer.enforce(role(1), "/user/1", &Action::GET));
        assert!(!enforcer.enforce(role(1), "/", &Action::POST));
    }

    #[test]
    fn template_grant_scenario() {
        let enforcer = SnapshotEnforcer::from_tuples([grant(7, "/user/:id", Action::GET)]);

        assert!(enforcer.enforce(role(7), "/user/42", &Action::GET));
        assert!(!enforcer.enforce(role(7), "/user/42", &Action::DELETE));
        assert!(!enforcer.enforce(role(7), "/role/1", &Action::GET));
        assert!(!enforcer.enforce(role(8), "/user/42", &Action::GET));
    }

    #[test]
    fn find_match_reports_the_matching_grant() {
        let enforcer = SnapshotEnforcer::from_tuples([
            grant(2, "/Menu", Action::GET),
            grant(2, "/Menu/{id}", Action::PATCH),
        ]);
        let hit = enforcer.find_match(role(2), "/Menu/5", &Action::PATCH).unwrap();
        assert_eq!(hit.object.as_str(), "/Menu/:id");
    }

    #[test]
    fn add_policies_is_idempotent() {
        let enforcer = SnapshotEnforcer::new();
        enforcer.add_policies(vec![grant(1, "/a", Action::GET), grant(1, "/a", Action::GET)]);
        enforcer.add_policies(vec![grant(1, "/a", Action::GET), grant(1, "/b", Action::POST)]);
        assert_eq!(enforcer.policies_for(role(1)).len(), 2);
    }

    #[test]
    fn remove_filtered_only_touches_one_subject() {
        let enforcer = SnapshotEnforcer::from_tuples([
            grant(1, "/a", Action::GET),
            grant(2, "/a", Action::GET),
        ]);
        enforcer.remove_filtered(role(1));
        assert!(!enforcer.enforce(role(1), "/a", &Action::GET));
        assert!(enforcer.enforce(role(2), "/a", &Action::GET));
        enforcer.remove_filtered(role(99));
        assert_eq!(enforcer.snapshot().len(), 1);
    }

    #[test]
    fn replace_subject_swaps_the_whole_set() {
        let enforcer = SnapshotEnforcer::from_tuples([grant(3, "/old", Action::GET)]);
        let next: BTreeSet<_> = [grant(3, "/new/{id}", Action::POST), grant(4, "/stray", Action::GET)]
            .into_iter()
            .collect();
        enforcer.replace_subject(role(3), next);

        assert!(!enforcer.enforce(role(3), "/old", &Action::GET));
        assert!(enforcer.enforce(role(3), "/new/9", &Action::POST));
        assert!(!enforcer.enforce(role(4), "/stray", &Action::GET));
    }

    #[test]
    fn replacing_with_empty_set_clears_the_subject() {
        let enforcer = SnapshotEnforcer::from_tuples([grant(5, "/x", Action::GET)]);
        enforcer.replace_subject(role(5), BTreeSet::new());
        assert!(enforcer.policies_for(role(5)).is_empty());
        assert!(enforcer.snapshot().is_empty());
    }

    #[test]
    fn concurrent_reads_agree_with_single_threaded_evaluation() {
        let tuples = vec![
            grant(1, "/user/:id", Action::GET),
            grant(1, "/user/:id", Action::PATCH),
            grant(2, "/role/:id/menu", Action::POST),
        ];
        let enforcer = Arc::new(SnapshotEnforcer::from_tuples(tuples));
        let requests: Vec<(i64, &str, Action)> = vec![
            (1, "/user/1", Action::GET),
            (1, "/user/1", Action::DELETE),
            (2, "/role/3/menu", Action::POST),
            (2, "/role/3", Action::POST),
            (3, "/user/1", Action::GET),
        ];
        let expected: Vec<bool> = requests
            .iter()
            .map(|(r, p, m)| enforcer.enforce(role(*r), p, m))
            .collect();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let enforcer = enforcer.clone();
                let requests = requests.clone();
                thread::spawn(move || {
                    (0..500)
                        .map(|_| {
                            requests
                                .iter()
                                .map(|(r, p, m)| enforcer.enforce(role(*r), p, m))
                                .collect::<Vec<_>>()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        for handle in handles {
            for observed in handle.join().unwrap() {
                assert_eq!(observed, expected);
            }
        }
    }

    #[test]
    fn readers_never_observe_an_empty_role_during_replace() {
        let a: BTreeSet<_> = [grant(1, "/a", Action::GET), grant(1, "/shared", Action::GET)]
            .into_iter()
            .collect();
        let b: BTreeSet<_> = [grant(1, "/b", Action::GET), grant(1, "/shared", Action::GET)]
            .into_iter()
            .collect();
        let enforcer = Arc::new(SnapshotEnforcer::from_tuples(a.clone()));

        let writer = {
            let enforcer = enforcer.clone();
            thread::spawn(move || {
                for i in 0..2_000 {
                    let next = if i % 2 == 0 { b.clone() } else { a.clone() };
                    enforcer.replace_subject(role(1), next);
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let enforcer = enforcer.clone();
                thread::spawn(move || {
                    for _ in 0..5_000 {
                        assert!(enforcer.enforce(role(1), "/shared", &Action::GET));
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }

    fn methods() -> Vec<Action> {
        vec![
            Action::GET,
            Action::POST,
            Action::PUT,
            Action::PATCH,
            Action::DELETE,
            Action::HEAD,
            Action::OPTIONS,
        ]
    }

    proptest! {
        /// A grant on one method never authorizes the same path under another.
        #[test]
        fn grants_are_method_exact(
            segments in prop::collection::vec(
                prop_oneof!["[a-z0-9]{1,4}", Just("{id}".to_string())],
                1..5,
            ),
            fill in "[a-z0-9]{1,4}",
            granted in prop::sample::select(methods()),
        ) {
            let template = format!("/{}", segments.join("/"));
            let request = format!(
                "/{}",
                segments
                    .iter()
                    .map(|s| if s == "{id}" { fill.as_str() } else { s.as_str() })
                    .collect::<Vec<_>>()
                    .join("/")
            );
            let enforcer = SnapshotEnforcer::from_tuples([grant(1, &template, granted.clone())]);

            prop_assert!(enforcer.enforce(role(1), &request, &granted));
            for other in methods().into_iter().filter(|m| *m != granted) {
                prop_assert!(!enforcer.enforce(role(1), &request, &other));
            }
        }
    }
}
