//! HS256 token verification and issuance.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;

use crate::{validate_claims, JwtClaims, TokenValidationError};

/// Bearer token verifier used by the authentication middleware.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError>;
}

/// Shared-secret HS256 verifier.
pub struct Hs256JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256JwtValidator {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Time checks run in `validate_claims` against the caller's clock.
        validation.validate_exp = false;
        validation.required_spec_claims = HashSet::new();
        Self {
            key: DecodingKey::from_secret(secret.as_ref()),
            validation,
        }
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, TokenValidationError> {
        let data = decode::<JwtClaims>(token, &self.key, &self.validation)
            .map_err(|e| TokenValidationError::Malformed(e.to_string()))?;
        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

#[derive(Debug, Error)]
pub enum TokenIssueError {
    #[error("token lifetime {0} overflows the expiry timestamp")]
    TtlOverflow(Duration),

    #[error("failed to encode token: {0}")]
    Encode(#[from] jsonwebtoken::errors::Error),
}

/// Shared-secret HS256 issuer.
pub struct Hs256TokenIssuer {
    key: EncodingKey,
    ttl: Duration,
}

impl Hs256TokenIssuer {
    pub fn new(secret: impl AsRef<[u8]>, ttl: Duration) -> Self {
        Self {
            key: EncodingKey::from_secret(secret.as_ref()),
            ttl,
        }
    }

    pub fn issue(&self, username: &str, now: DateTime<Utc>) -> Result<String, TokenIssueError> {
        let expires_at = now
            .checked_add_signed(self.ttl)
            .ok_or(TokenIssueError::TtlOverflow(self.ttl))?;
        let claims = JwtClaims {
            sub: username.to_string(),
            issued_at: Some(now),
            expires_at,
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.key)?)
    }
}
