//! Request/response bodies.
//!
//! Field names are snake_case on the wire; the camelCase spellings older
//! clients send are accepted as aliases.

use serde::{Deserialize, Serialize};

use warden_auth::{MenuNode, Role, User};
use warden_core::{MenuId, RoleId, UserId};

#[derive(Debug, Deserialize)]
pub struct AssignRolesRequest {
    #[serde(alias = "userId")]
    pub user_id: UserId,
    #[serde(alias = "roleIds", default)]
    pub role_ids: Vec<RoleId>,
}

#[derive(Debug, Deserialize)]
pub struct ActivateRoleRequest {
    #[serde(alias = "userId")]
    pub user_id: UserId,
    #[serde(alias = "roleId")]
    pub role_id: RoleId,
}

#[derive(Debug, Deserialize)]
pub struct AssignMenusRequest {
    #[serde(alias = "roleId")]
    pub role_id: RoleId,
    #[serde(alias = "menuIds", default)]
    pub menu_ids: Vec<MenuId>,
}

/// Method stays a string here so a bad method maps to 400, not a body rejection.
#[derive(Debug, Deserialize)]
pub struct RouteRequest {
    pub path: String,
    pub method: String,
}

#[derive(Debug, Deserialize)]
pub struct AssignRoutesRequest {
    #[serde(alias = "roleId")]
    pub role_id: RoleId,
    #[serde(default)]
    pub routes: Vec<RouteRequest>,
}

#[derive(Debug, Deserialize)]
pub struct ExplainQuery {
    pub path: String,
    pub method: String,
    /// Explain for another user; defaults to the caller.
    #[serde(alias = "userId")]
    pub user_id: Option<UserId>,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: User,
    pub roles: Vec<Role>,
    pub active_role: Option<RoleId>,
    pub menus: Vec<MenuNode>,
    /// Button permission strings granted through the active role.
    pub permissions: Vec<String>,
}
