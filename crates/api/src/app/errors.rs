use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use warden_auth::AuthzError;
use warden_core::DomainError;
use warden_infra::{AccessError, DirectoryError};

pub fn authz_error_to_response(err: AuthzError) -> axum::response::Response {
    match err {
        AuthzError::NotStaff => json_error(StatusCode::UNAUTHORIZED, "not_staff", err.to_string()),
        AuthzError::NoActiveRole => {
            json_error(StatusCode::UNAUTHORIZED, "no_active_role", err.to_string())
        }
        AuthzError::Forbidden { .. } => json_error(StatusCode::FORBIDDEN, "forbidden", err.to_string()),
    }
}

pub fn access_error_to_response(err: AccessError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        AccessError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", message),
        AccessError::InvalidReference { .. } => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_reference", message)
        }
        AccessError::InvalidRoute { .. } => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_route", message)
        }
        AccessError::RoleNotAssigned { .. } => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "role_not_assigned", message)
        }
        AccessError::Cycle { .. } => json_error(StatusCode::UNPROCESSABLE_ENTITY, "menu_cycle", message),
        AccessError::Invalid(e) => domain_error_to_response(e),
        AccessError::Policy(e) => {
            tracing::error!(error = %e, "policy store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", message)
        }
        AccessError::Directory(e) => directory_error_to_response(e),
    }
}

pub fn directory_error_to_response(err: DirectoryError) -> axum::response::Response {
    match err {
        DirectoryError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", err.to_string()),
        DirectoryError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DirectoryError::Storage(msg) => {
            tracing::error!(error = %msg, "directory failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", msg)
        }
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "validation_error", msg)
        }
        DomainError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
