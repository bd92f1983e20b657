//! Token authentication: `Authorization: <scheme> <key>` → `SecurityContext`.
//!
//! 1. No header → anonymous (the permission gate decides what that may do)
//! 2. Header present but not `<scheme> <key>` → `Malformed`
//! 3. Unknown key → `InvalidToken`
//! 4. Owner inactive → `InactiveUser`
//!
//! Lookups are exact and case-sensitive on the key; the scheme is matched
//! case-insensitively.

use std::sync::Arc;

use axum::http::{header, HeaderMap};

use super::context::SecurityContext;
use crate::errors::{AppError, AuthenticationError};
use crate::models::token::mask_key;
use crate::store::Backend;

#[derive(Debug, Clone)]
pub struct TokenResolver {
    scheme: String,
}

impl TokenResolver {
    pub fn new(scheme: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Extract the key from a raw header value.
    pub fn parse_credentials<'a>(&self, value: &'a str) -> Result<&'a str, AuthenticationError> {
        let mut parts = value.split_whitespace();

        match parts.next() {
            Some(scheme) if scheme.eq_ignore_ascii_case(&self.scheme) => {}
            Some(_) => return Err(AuthenticationError::Malformed("unsupported authorization scheme")),
            None => return Err(AuthenticationError::Malformed("no credentials provided")),
        }

        let key = parts
            .next()
            .ok_or(AuthenticationError::Malformed("no credentials provided"))?;

        if parts.next().is_some() {
            return Err(AuthenticationError::Malformed("token string should not contain spaces"));
        }

        Ok(key)
    }

    /// Authenticate a request from its headers.
    ///
    /// `Ok(None)` means the request carried no credentials at all.
    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
        store: &Arc<dyn Backend>,
    ) -> Result<Option<SecurityContext>, AppError> {
        let Some(raw) = headers.get(header::AUTHORIZATION) else {
            return Ok(None);
        };

        let value = raw.to_str().map_err(|_| {
            AuthenticationError::Malformed("token string should not contain invalid characters")
        })?;

        let key = self.parse_credentials(value).map_err(|e| {
            tracing::warn!(reason = %e, "token auth: malformed Authorization header");
            e
        })?;

        self.resolve(key, store).await.map(Some)
    }

    /// Look up a key and check its owner is still active.
    pub async fn resolve(
        &self,
        key: &str,
        store: &Arc<dyn Backend>,
    ) -> Result<SecurityContext, AppError> {
        let Some(token) = store.find_by_key(key).await? else {
            tracing::warn!(token = %mask_key(key), "token auth: unknown token");
            return Err(AuthenticationError::InvalidToken.into());
        };

        let Some(principal) = store.find_principal(token.owner).await? else {
            tracing::warn!(token = %token.masked_key(), "token auth: owner no longer exists");
            return Err(AuthenticationError::InvalidToken.into());
        };

        if !principal.is_active {
            tracing::warn!(
                token = %token.masked_key(),
                user = %principal.username,
                "token auth: owner is inactive"
            );
            return Err(AuthenticationError::InactiveUser.into());
        }

        tracing::debug!(token = %token.masked_key(), user = %principal.username, "token authenticated");
        Ok(SecurityContext::new(principal, token, store.clone()))
    }
}
