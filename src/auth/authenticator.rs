//! Token minting and verification

use super::types::{Claims, Role};
use crate::error::{Error, Result};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

/// `iss` claim of every token
pub const TOKEN_ISSUER: &str = "solidafy-sync";

/// Twelve hours
pub const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 12 * 60 * 60;

/// Shared-secret HS256 token authority
#[derive(Clone)]
pub struct TokenAuthority {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    lifetime_secs: u64,
}

impl std::fmt::Debug for TokenAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthority")
            .field("lifetime_secs", &self.lifetime_secs)
            .finish_non_exhaustive()
    }
}

impl TokenAuthority {
    /// Create an authority from the API secret
    pub fn new(secret: &str) -> Result<Self> {
        if secret.trim().is_empty() {
            return Err(Error::config("API secret must not be empty"));
        }
        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            lifetime_secs: DEFAULT_TOKEN_LIFETIME_SECS,
        })
    }

    /// Set the lifetime of minted tokens
    #[must_use]
    pub fn with_lifetime(mut self, secs: u64) -> Self {
        self.lifetime_secs = secs;
        self
    }

    /// Mint a token for `subject`
    pub fn mint(&self, subject: &str, role: Role) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            iss: TOKEN_ISSUER.to_string(),
            sub: subject.to_string(),
            role,
            iat: now,
            exp: now + self.lifetime_secs as i64,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| Error::unauthorized(format!("Failed to encode token: {e}")))
    }

    /// Check signature, issuer and expiry
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[TOKEN_ISSUER]);
        validation.leeway = 0;

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| Error::unauthorized(format!("Invalid token: {e}")))
    }

    /// Verify an `Authorization` header value and require a role
    pub fn authorize(&self, header: Option<&str>, required: Role) -> Result<Claims> {
        let token = header
            .and_then(bearer_token)
            .ok_or_else(|| Error::unauthorized("Missing bearer token"))?;
        let claims = self.verify(token)?;
        if !claims.role.grants(required) {
            return Err(Error::unauthorized(format!(
                "Role '{}' may not perform this action",
                claims.role
            )));
        }
        Ok(claims)
    }
}

/// Token of a `Bearer <token>` header value
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
