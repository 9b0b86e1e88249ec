use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use warden_auth::UserPatch;
use warden_core::UserId;
use warden_infra::DirectoryStore;

use crate::app::dto::{ActivateRoleRequest, AssignRolesRequest};
use crate::app::errors;
use crate::app::routes::common::run_detached;
use crate::app::services::AppServices;

/// GET /User/:id - User detail
pub async fn get_user(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<UserId>,
) -> Response {
    match services.directory.get_user(id).await {
        Ok(Some(user)) => (StatusCode::OK, Json(json!({ "user": user }))).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "user not found"),
        Err(e) => errors::directory_error_to_response(e),
    }
}

/// PATCH /User/:id - Update avatar or staff flag
pub async fn update_user(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<UserId>,
    Json(patch): Json<UserPatch>,
) -> Result<Response, Response> {
    let user = run_detached(async move { services.access.update_user(id, patch).await }).await?;
    Ok((StatusCode::OK, Json(json!({ "user": user }))).into_response())
}

/// POST /User/assign/role - Replace the roles of a user
pub async fn assign_roles(
    Extension(services): Extension<Arc<AppServices>>,
    Json(req): Json<AssignRolesRequest>,
) -> Result<Response, Response> {
    let user = run_detached(async move {
        services
            .access
            .assign_roles(req.user_id, req.role_ids)
            .await
    })
    .await?;
    Ok((StatusCode::OK, Json(json!({ "user": user }))).into_response())
}

/// POST /User/activate/role - Switch the active role
pub async fn activate_role(
    Extension(services): Extension<Arc<AppServices>>,
    Json(req): Json<ActivateRoleRequest>,
) -> Result<Response, Response> {
    let user = run_detached(async move {
        services
            .access
            .activate_role(req.user_id, req.role_id)
            .await
    })
    .await?;
    Ok((StatusCode::OK, Json(json!({ "user": user }))).into_response())
}
