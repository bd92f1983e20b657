//! permtoken: token-scoped permissions for HTTP APIs.
//!
//! Each access token carries its own permission grants, independent of the
//! account that owns it. Requests are authenticated by token and authorized
//! against the token's grants only.

pub mod api;
pub mod config;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod store;

use std::sync::Arc;

use axum::Router;

use errors::ConfigurationError;
use middleware::authentication::TokenResolver;
use middleware::permissions::PermissionGate;
use store::Backend;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub store: Arc<dyn Backend>,
    pub resolver: TokenResolver,
    pub gate: PermissionGate,
    pub config: config::Config,
}

impl AppState {
    pub fn new(config: config::Config, store: Arc<dyn Backend>) -> Self {
        Self {
            store,
            resolver: TokenResolver::new(config.auth_scheme.clone()),
            gate: PermissionGate::new(config.perms_map.clone(), config.authenticated_users_only),
            config,
        }
    }
}

/// Full HTTP application: health check plus the API under `/api/v1`.
///
/// Fails if any protected route cannot be evaluated by the permission gate.
pub fn app(state: Arc<AppState>) -> Result<Router, ConfigurationError> {
    Ok(Router::new()
        .route("/healthz", axum::routing::get(|| async { "ok" }))
        .nest("/api/v1", api::api_router(state.clone())?)
        // A nested "/" only matches the bare prefix.
        .route("/api/v1/", api::api_root(&state)?)
        .with_state(state))
}
