use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use warden_auth::{build_tree, split_navigation, Menu, Role};
use warden_infra::DirectoryStore;

use crate::app::dto::MeResponse;
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// GET /me - Current user, roles, menu tree and button permissions
///
/// Superusers see every menu; everyone else sees the menus of their active
/// role (none without one).
pub async fn me(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Response {
    let user = principal.user().clone();

    let menus = if user.is_superuser {
        services.directory.list_menus().await
    } else if let Some(role) = user.active_role {
        services.directory.role_menus(role).await
    } else {
        Ok(Vec::<Menu>::new())
    };
    let menus = match menus {
        Ok(menus) => menus,
        Err(e) => return errors::directory_error_to_response(e),
    };

    let mut roles: Vec<Role> = Vec::with_capacity(user.roles.len());
    for id in &user.roles {
        match services.directory.get_role(*id).await {
            Ok(Some(role)) => roles.push(role),
            Ok(None) => {}
            Err(e) => return errors::directory_error_to_response(e),
        }
    }

    let (navigation, permissions) = split_navigation(menus);
    let body = MeResponse {
        active_role: user.active_role,
        user,
        roles,
        menus: build_tree(navigation),
        permissions,
    };
    (StatusCode::OK, Json(body)).into_response()
}

/// GET /routes - Endpoints that can be granted to a role
pub async fn list_routes(Extension(services): Extension<Arc<AppServices>>) -> Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "routes": services.registry.all_routes() })),
    )
        .into_response()
}
