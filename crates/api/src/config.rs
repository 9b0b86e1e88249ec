//! Process configuration read from the environment.

use std::net::SocketAddr;

use chrono::Duration;
use thiserror::Error;

const DEV_SECRET: &str = "dev-secret";
const DEFAULT_BIND: &str = "0.0.0.0:8080";
const DEFAULT_TTL_MINUTES: i64 = 60 * 24 * 7;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub jwt_secret: String,
    pub bind_addr: SocketAddr,
    /// Postgres when set; in-memory stores otherwise.
    pub database_url: Option<String>,
    pub token_ttl: Duration,
    pub admin_username: String,
    /// Print a freshly issued admin token on startup.
    pub issue_admin_token: bool,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let jwt_secret = lookup("JWT_SECRET").unwrap_or_else(|| {
            tracing::warn!("JWT_SECRET not set; using insecure dev default");
            DEV_SECRET.to_string()
        });

        let bind_raw = lookup("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind_addr = bind_raw.parse().map_err(|_| ConfigError::Invalid {
            key: "BIND_ADDR",
            value: bind_raw.clone(),
        })?;

        let token_ttl = match lookup("TOKEN_TTL_MINUTES") {
            None => Duration::minutes(DEFAULT_TTL_MINUTES),
            Some(raw) => match raw
                .trim()
                .parse::<i64>()
                .ok()
                .filter(|minutes| *minutes > 0)
                .and_then(Duration::try_minutes)
            {
                Some(ttl) => ttl,
                None => {
                    return Err(ConfigError::Invalid {
                        key: "TOKEN_TTL_MINUTES",
                        value: raw,
                    });
                }
            },
        };

        let admin_username = lookup("ADMIN_USERNAME")
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| "admin".to_string());

        let issue_admin_token = matches!(
            lookup("ISSUE_ADMIN_TOKEN").as_deref().map(str::trim),
            Some("1") | Some("true")
        );

        Ok(Self {
            jwt_secret,
            bind_addr,
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            token_ttl,
            admin_username,
            issue_admin_token,
        })
    }
}
