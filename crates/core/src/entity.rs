//! Entities: records with a stable store-assigned identity.

/// A record keyed by a copyable id.
pub trait Entity {
    type Id: Copy + Ord + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> Self::Id;
}
