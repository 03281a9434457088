//! Token claim types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What a token holder may do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Read-only access to status, jobs and health
    #[default]
    Viewer,
    /// Worker control, cancellation and lock deletion
    Operator,
}

impl Role {
    /// Whether this role covers `required`
    pub fn grants(self, required: Role) -> bool {
        match required {
            Role::Viewer => true,
            Role::Operator => self == Role::Operator,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Viewer => write!(f, "viewer"),
            Self::Operator => write!(f, "operator"),
        }
    }
}

impl FromStr for Role {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "viewer" => Ok(Self::Viewer),
            "operator" => Ok(Self::Operator),
            other => Err(crate::error::Error::config(format!("Unknown role: {other}"))),
        }
    }
}

/// JWT claims of an operator token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub sub: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}
