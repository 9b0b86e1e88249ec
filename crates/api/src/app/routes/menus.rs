use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use warden_auth::{build_tree, MenuPatch};
use warden_core::MenuId;
use warden_infra::DirectoryStore;

use crate::app::errors;
use crate::app::routes::common::run_detached;
use crate::app::services::AppServices;

/// GET /Menu - Full menu tree, buttons included
pub async fn menu_tree(Extension(services): Extension<Arc<AppServices>>) -> Response {
    match services.directory.list_menus().await {
        Ok(menus) => (StatusCode::OK, Json(json!({ "menus": build_tree(menus) }))).into_response(),
        Err(e) => errors::directory_error_to_response(e),
    }
}

/// PATCH /Menu/:id - Update a menu; moves are cycle checked
pub async fn update_menu(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<MenuId>,
    Json(patch): Json<MenuPatch>,
) -> Result<Response, Response> {
    let menu = run_detached(async move { services.access.update_menu(id, patch).await }).await?;
    Ok((StatusCode::OK, Json(json!({ "menu": menu }))).into_response())
}
