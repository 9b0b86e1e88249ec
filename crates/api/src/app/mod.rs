//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: stores, enforcer and assignment service wiring
//! - `seed.rs`: first-start superuser and menu tree
//! - `routes/`: the endpoint table and its handlers
//! - `dto.rs`: request/response bodies
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{middleware::from_fn_with_state, Extension, Router};
use chrono::Utc;
use tower::ServiceBuilder;

use warden_auth::{Hs256JwtValidator, Hs256TokenIssuer, JwtValidator};

use crate::config::ApiConfig;
use crate::middleware::{self, AuthState};

pub mod dto;
pub mod errors;
pub mod routes;
pub mod seed;
pub mod services;

use routes::Guard;
use services::{AppServices, StartupError};

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub async fn build_app(config: &ApiConfig) -> Result<Router, StartupError> {
    let services = Arc::new(services::build_services(config).await?);

    if config.issue_admin_token {
        let issuer = Hs256TokenIssuer::new(config.jwt_secret.as_bytes(), config.token_ttl);
        match issuer.issue(&config.admin_username, Utc::now()) {
            Ok(token) => tracing::info!(user = %config.admin_username, %token, "issued admin token"),
            Err(e) => tracing::error!(error = %e, "failed to issue admin token"),
        }
    }

    let jwt: Arc<dyn JwtValidator> = Arc::new(Hs256JwtValidator::new(config.jwt_secret.as_bytes()));
    Ok(router(services, jwt))
}

/// Router over already wired services.
///
/// Policy-guarded endpoints run authentication first, then authorization
/// against the live enforcer. Unmatched paths fall through to 404 without
/// touching either middleware.
pub fn router(services: Arc<AppServices>, jwt: Arc<dyn JwtValidator>) -> Router {
    let auth_state = AuthState {
        jwt,
        directory: services.directory.clone(),
    };

    let mut public = Router::new();
    let mut authenticated = Router::new();
    let mut guarded = Router::new();
    for endpoint in routes::endpoints() {
        let path = routes::axum_path(&endpoint.route.path);
        match endpoint.guard {
            Guard::Public => public = public.route(&path, endpoint.handler),
            Guard::Authenticated => authenticated = authenticated.route(&path, endpoint.handler),
            Guard::Policy => guarded = guarded.route(&path, endpoint.handler),
        }
    }

    // route_layer wraps outermost last: auth runs before authz.
    let guarded = guarded.route_layer(from_fn_with_state(
        services.enforcer.clone(),
        middleware::authz_middleware,
    ));
    let protected = authenticated
        .merge(guarded)
        .route_layer(from_fn_with_state(auth_state, middleware::auth_middleware));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
