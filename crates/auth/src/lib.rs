//! `warden-auth`: pure authentication/authorization boundary.
//!
//! This crate is intentionally decoupled from HTTP and storage: it owns the
//! policy model, the path-template matcher, the enforcer snapshot, the route
//! registry and the decision pipeline. Persistence lives in `warden-infra`.

pub mod action;
pub mod authorize;
pub mod claims;
pub mod enforcer;
pub mod jwt;
pub mod menu;
pub mod path;
pub mod policy;
pub mod roles;
pub mod routes;
pub mod user;

pub use action::{Action, ActionError};
pub use authorize::{
    authorize, enforce, explain, AuthorizationExplanation, AuthzError, DenialKind, Principal,
};
pub use claims::{validate_claims, JwtClaims, TokenValidationError};
pub use enforcer::{PolicyEnforcer, PolicySnapshot, SnapshotEnforcer};
pub use jwt::{Hs256JwtValidator, Hs256TokenIssuer, JwtValidator, TokenIssueError};
pub use menu::{build_tree, creates_cycle, split_navigation, Menu, MenuKind, MenuMeta, MenuNode, MenuPatch};
pub use path::{normalize_path, ObjectPattern, PathTemplate, PLACEHOLDER};
pub use policy::PolicyTuple;
pub use roles::{Role, RolePatch};
pub use routes::{RouteEntry, RouteRegistry, RouteSpec};
pub use user::{User, UserPatch};
