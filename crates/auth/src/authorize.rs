use serde::Serialize;
use thiserror::Error;

use warden_core::{RoleId, UserId};

use crate::{Action, PolicyEnforcer, PolicyTuple};

/// A fully resolved principal for authorization decisions.
///
/// Construction of this object is intentionally decoupled from storage and
/// transport: the API derives it from token claims plus a user lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub user_id: UserId,
    pub username: String,
    pub is_superuser: bool,
    pub is_staff: bool,
    pub active_role: Option<RoleId>,
}

/// Why a request was denied.
///
/// "No active role" and "no matching policy" stay distinct kinds even where
/// the HTTP surface maps them to similar responses.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("account is not allowed to use the admin api")]
    NotStaff,

    #[error("user has no active role")]
    NoActiveRole,

    #[error("forbidden: role {role} may not {method} {path}")]
    Forbidden {
        role: RoleId,
        path: String,
        method: Action,
    },
}

/// Authorize a principal for a concrete request.
///
/// - No IO
/// - No panics
/// - Superusers bypass policy evaluation entirely
pub fn authorize<E>(
    principal: &Principal,
    enforcer: &E,
    request_path: &str,
    method: &Action,
) -> Result<(), AuthzError>
where
    E: PolicyEnforcer + ?Sized,
{
    if principal.is_superuser {
        return Ok(());
    }
    if !principal.is_staff {
        return Err(AuthzError::NotStaff);
    }
    let role = principal.active_role.ok_or(AuthzError::NoActiveRole)?;

    if enforcer.enforce(role, request_path, method) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden {
            role,
            path: request_path.to_string(),
            method: method.clone(),
        })
    }
}

/// Boolean form of [`authorize`].
pub fn enforce<E>(principal: &Principal, enforcer: &E, request_path: &str, method: &Action) -> bool
where
    E: PolicyEnforcer + ?Sized,
{
    authorize(principal, enforcer, request_path, method).is_ok()
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization Explanation (Audit Trail)
// ─────────────────────────────────────────────────────────────────────────────

/// Detailed explanation of an authorization decision.
///
/// Answers "why was this request allowed or denied?" for debugging
/// endpoints and audit logs.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub path: String,
    pub method: Action,
    pub granted: bool,
    pub reason: String,
    pub principal: Principal,
    /// The grant that allowed the request, when a policy decided it.
    pub matched_policy: Option<PolicyTuple>,
    /// Grants held by the active role (empty for superusers).
    pub role_policies: Vec<PolicyTuple>,
    pub denial: Option<DenialKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    NotStaff,
    NoActiveRole,
    MissingPolicy,
}

impl From<&AuthzError> for DenialKind {
    fn from(value: &AuthzError) -> Self {
        match value {
            AuthzError::NotStaff => DenialKind::NotStaff,
            AuthzError::NoActiveRole => DenialKind::NoActiveRole,
            AuthzError::Forbidden { .. } => DenialKind::MissingPolicy,
        }
    }
}

/// Explain the decision [`authorize`] would make for this request.
pub fn explain<E>(
    principal: &Principal,
    enforcer: &E,
    request_path: &str,
    method: &Action,
) -> AuthorizationExplanation
where
    E: PolicyEnforcer + ?Sized,
{
    let role_policies: Vec<PolicyTuple> = match (principal.is_superuser, principal.active_role) {
        (false, Some(role)) => enforcer.policies_for(role).into_iter().collect(),
        _ => Vec::new(),
    };

    let mut explanation = AuthorizationExplanation {
        path: request_path.to_string(),
        method: method.clone(),
        granted: false,
        reason: String::new(),
        principal: principal.clone(),
        matched_policy: None,
        role_policies,
        denial: None,
    };

    match authorize(principal, enforcer, request_path, method) {
        Ok(()) if principal.is_superuser => {
            explanation.granted = true;
            explanation.reason = "superuser bypasses policy evaluation".to_string();
        }
        Ok(()) => {
            let matched = principal
                .active_role
                .and_then(|role| enforcer.find_match(role, request_path, method));
            explanation.granted = true;
            explanation.reason = match &matched {
                Some(tuple) => format!("granted by policy {tuple}"),
                None => "granted".to_string(),
            };
            explanation.matched_policy = matched;
        }
        Err(err) => {
            explanation.denial = Some(DenialKind::from(&err));
            explanation.reason = match &err {
                AuthzError::Forbidden { role, .. } => format!(
                    "role {role} holds {} policies, none matches {method} {request_path}",
                    explanation.role_policies.len()
                ),
                other => other.to_string(),
            };
        }
    }

    explanation
}
