use std::future::Future;

use axum::http::StatusCode;
use axum::response::Response;

use warden_auth::Action;
use warden_infra::AccessError;

use crate::app::errors::{access_error_to_response, json_error};

/// Run a mutation on its own task.
///
/// A client that disconnects drops the handler future; the spawned task
/// still runs the store transaction and snapshot publish to completion.
pub async fn run_detached<F, T>(mutation: F) -> Result<T, Response>
where
    F: Future<Output = Result<T, AccessError>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(mutation).await {
        Ok(result) => result.map_err(access_error_to_response),
        Err(e) => {
            tracing::error!(error = %e, "mutation task failed");
            Err(json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "mutation task failed",
            ))
        }
    }
}

pub fn parse_method(raw: &str) -> Result<Action, Response> {
    Action::parse(raw).map_err(|e| json_error(StatusCode::BAD_REQUEST, "bad_method", e.to_string()))
}
