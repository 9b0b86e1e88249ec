use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// JWT claims model (transport-agnostic).
///
/// The subject is the username; role resolution happens after the user is
/// looked up, so tokens stay valid across role changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject: the authenticated username.
    pub sub: String,

    /// Issued-at timestamp (`iat`, seconds since epoch on the wire).
    ///
    /// Optional: some issuers only emit `sub` and `exp`.
    #[serde(
        rename = "iat",
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_seconds_option"
    )]
    pub issued_at: Option<DateTime<Utc>>,

    /// Expiration timestamp (`exp`, seconds since epoch on the wire).
    #[serde(rename = "exp", with = "chrono::serde::ts_seconds")]
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,

    #[error("token subject is empty")]
    MissingSubject,

    #[error("malformed token: {0}")]
    Malformed(String),
}

/// Deterministically validate JWT claims.
///
/// Note: this validates the *claims* only. Signature verification is done by
/// [`crate::JwtValidator`] implementations.
pub fn validate_claims(claims: &JwtClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    if claims.sub.trim().is_empty() {
        return Err(TokenValidationError::MissingSubject);
    }
    if let Some(issued_at) = claims.issued_at {
        if claims.expires_at <= issued_at {
            return Err(TokenValidationError::InvalidTimeWindow);
        }
        if now < issued_at {
            return Err(TokenValidationError::NotYetValid);
        }
    }
    if now >= claims.expires_at {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}
