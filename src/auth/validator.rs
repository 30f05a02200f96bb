//! Caller token validation
//!
//! A caller authenticates with the uid of the package it runs as. The token
//! is checked for basic sanity before it is resolved against the registry.

use crate::auth::capabilities::CallerIdentity;
use crate::auth::registry::GrantRegistry;
use crate::error::AuthError;

const MAX_TOKEN_LENGTH: usize = 10;

/// Validates a caller token and resolves it to an identity.
pub fn validate_caller(token: &str, registry: &GrantRegistry) -> Result<CallerIdentity, AuthError> {
    let token = token.trim();
    if token.is_empty()
        || token.len() > MAX_TOKEN_LENGTH
        || !token.chars().all(|c| c.is_ascii_digit())
    {
        return Err(AuthError::MalformedToken(token.to_string()));
    }

    let uid = token
        .parse::<u32>()
        .map_err(|_| AuthError::MalformedToken(token.to_string()))?;

    registry.resolve(uid)
}
