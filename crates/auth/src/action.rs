use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Policy action: an upper-case HTTP method name.
///
/// Comparison is exact and case-sensitive; there is no wildcard action.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Action(Cow<'static, str>);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("unsupported http method '{0}' (expected one of GET, POST, PUT, PATCH, DELETE, HEAD, OPTIONS)")]
    Unsupported(String),
}

const KNOWN: [&str; 7] = ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

impl Action {
    pub const GET: Action = Action(Cow::Borrowed("GET"));
    pub const POST: Action = Action(Cow::Borrowed("POST"));
    pub const PUT: Action = Action(Cow::Borrowed("PUT"));
    pub const PATCH: Action = Action(Cow::Borrowed("PATCH"));
    pub const DELETE: Action = Action(Cow::Borrowed("DELETE"));
    pub const HEAD: Action = Action(Cow::Borrowed("HEAD"));
    pub const OPTIONS: Action = Action(Cow::Borrowed("OPTIONS"));

    /// Parse a method name. Lower-case spellings are rejected rather than
    /// folded, so `"get"` never silently becomes a `GET` grant.
    pub fn parse(raw: &str) -> Result<Self, ActionError> {
        KNOWN
            .iter()
            .find(|known| **known == raw)
            .map(|known| Action(Cow::Borrowed(*known)))
            .ok_or_else(|| ActionError::Unsupported(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Action {
    type Error = ActionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Action::parse(&value)
    }
}

impl From<Action> for String {
    fn from(value: Action) -> Self {
        value.0.into_owned()
    }
}

impl core::str::FromStr for Action {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::parse(s)
    }
}

impl core::fmt::Display for Action {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
