use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use warden_auth::{authorize, Action, JwtValidator, PolicyEnforcer};
use warden_infra::DirectoryStore;

use crate::app::errors::{authz_error_to_response, json_error};
use crate::context::PrincipalContext;

#[derive(Clone)]
pub struct AuthState {
    pub jwt: Arc<dyn JwtValidator>,
    pub directory: Arc<dyn DirectoryStore>,
}

/// Bearer token → claims → user lookup. Inserts a [`PrincipalContext`].
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Result<Response, Response> {
    let token = extract_bearer(req.headers()).map_err(|_| unauthenticated("missing bearer token"))?;

    let claims = state.jwt.validate(token, Utc::now()).map_err(|e| {
        tracing::debug!(error = %e, "rejected token");
        unauthenticated("invalid token")
    })?;

    let user = state
        .directory
        .user_by_username(&claims.sub)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "user lookup failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", e.to_string())
        })?
        .ok_or_else(|| unauthenticated("unknown user"))?;

    req.extensions_mut().insert(PrincipalContext::new(user));

    Ok(next.run(req).await)
}

/// Policy check on the literal request path and method.
///
/// Must run inside [`auth_middleware`].
pub async fn authz_middleware(
    State(enforcer): State<Arc<dyn PolicyEnforcer>>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    let principal = req
        .extensions()
        .get::<PrincipalContext>()
        .map(PrincipalContext::principal)
        .ok_or_else(|| unauthenticated("missing principal"))?;

    let method = Action::parse(req.method().as_str())
        .map_err(|e| json_error(StatusCode::BAD_REQUEST, "bad_method", e.to_string()))?;
    let path = req.uri().path();

    if let Err(e) = authorize(&principal, enforcer.as_ref(), path, &method) {
        tracing::debug!(user = %principal.username, %path, %method, reason = %e, "request denied");
        return Err(authz_error_to_response(e));
    }

    Ok(next.run(req).await)
}

fn unauthenticated(message: &str) -> Response {
    json_error(StatusCode::UNAUTHORIZED, "unauthenticated", message)
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, StatusCode> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let header = header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;

    let header = header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = header.trim();
    if token.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(token)
}
