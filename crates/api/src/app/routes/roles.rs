use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use warden_auth::{explain as explain_decision, RolePatch};
use warden_core::RoleId;
use warden_infra::{DirectoryStore, RouteGrant};

use crate::app::dto::{AssignMenusRequest, AssignRoutesRequest, ExplainQuery};
use crate::app::errors;
use crate::app::routes::common::{parse_method, run_detached};
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

// ─────────────────────────────────────────────────────────────────────────────
// Policies
// ─────────────────────────────────────────────────────────────────────────────

/// GET /Role/:id/routes - Route policies held by a role
pub async fn role_routes(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<RoleId>,
) -> Response {
    match services.access.role_policies(id).await {
        Ok(policies) => (StatusCode::OK, Json(json!({ "policies": policies }))).into_response(),
        Err(e) => errors::access_error_to_response(e),
    }
}

/// POST /Role/assign/route - Replace the route policies of a role
///
/// An empty `routes` list clears the role.
pub async fn assign_routes(
    Extension(services): Extension<Arc<AppServices>>,
    Json(req): Json<AssignRoutesRequest>,
) -> Result<Response, Response> {
    let grants = req
        .routes
        .into_iter()
        .map(|route| Ok(RouteGrant::new(route.path, parse_method(&route.method)?)))
        .collect::<Result<Vec<_>, Response>>()?;

    let role = req.role_id;
    let policies =
        run_detached(async move { services.access.assign_routes(role, grants).await }).await?;
    Ok((StatusCode::OK, Json(json!({ "policies": policies }))).into_response())
}

/// GET /Role/explain - Why would a request be allowed or denied?
///
/// Explains for the caller. Only superusers may name another user via `user_id`.
pub async fn explain(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(caller): Extension<PrincipalContext>,
    Query(query): Query<ExplainQuery>,
) -> Result<Response, Response> {
    let method = parse_method(&query.method)?;

    let principal = match query.user_id {
        None => caller.principal(),
        Some(id) if id == caller.user().id => caller.principal(),
        Some(_) if !caller.user().is_superuser => {
            return Err(errors::json_error(
                StatusCode::FORBIDDEN,
                "forbidden",
                "only superusers may explain decisions for other users",
            ));
        }
        Some(id) => services
            .directory
            .get_user(id)
            .await
            .map_err(errors::directory_error_to_response)?
            .ok_or_else(|| errors::json_error(StatusCode::NOT_FOUND, "not_found", "user not found"))?
            .principal(),
    };

    let explanation = explain_decision(&principal, services.enforcer.as_ref(), &query.path, &method);
    Ok((StatusCode::OK, Json(explanation)).into_response())
}

// ─────────────────────────────────────────────────────────────────────────────
// Role data
// ─────────────────────────────────────────────────────────────────────────────

/// PATCH /Role/:id - Rename a role or change its remark
pub async fn update_role(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<RoleId>,
    Json(patch): Json<RolePatch>,
) -> Result<Response, Response> {
    let role = run_detached(async move { services.access.update_role(id, patch).await }).await?;
    Ok((StatusCode::OK, Json(json!({ "role": role }))).into_response())
}

/// POST /Role/assign/menu - Replace the menus of a role
pub async fn assign_menus(
    Extension(services): Extension<Arc<AppServices>>,
    Json(req): Json<AssignMenusRequest>,
) -> Result<Response, Response> {
    let role = run_detached(async move {
        services
            .access
            .assign_menus(req.role_id, req.menu_ids)
            .await
    })
    .await?;
    Ok((StatusCode::OK, Json(json!({ "role": role }))).into_response())
}
