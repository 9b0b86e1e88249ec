//! Infrastructure layer: policy and directory persistence, migrations and
//! the assignment service that keeps the store and the enforcer in step.

pub mod access;
pub mod directory;
pub mod migrations;
pub mod policy_store;

pub use access::{AccessControl, AccessError, RouteGrant};
pub use directory::{
    DirectoryError, DirectoryStore, InMemoryDirectory, NewMenu, NewUser, PostgresDirectory,
};
pub use migrations::run_migrations;
pub use policy_store::{
    load_enforcer, InMemoryPolicyStore, PolicyStore, PolicyStoreError, PostgresPolicyStore,
};
