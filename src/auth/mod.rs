//! Authentication module
//!
//! HS256 bearer tokens for the operator REST API.
//!
//! The `TokenAuthority` mints tokens for operators and verifies the bearer
//! header of privileged requests (worker control, lock deletion).

mod authenticator;
mod types;

pub use authenticator::{bearer_token, TokenAuthority, DEFAULT_TOKEN_LIFETIME_SECS, TOKEN_ISSUER};
pub use types::{Claims, Role};
