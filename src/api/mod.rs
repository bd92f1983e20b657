use std::sync::Arc;

use axum::{
    http::{Method, StatusCode},
    middleware,
    routing::{get, MethodRouter},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::errors::ConfigurationError;
use crate::middleware::guard::{token_guard, GuardState};
use crate::middleware::permissions::Endpoint;
use crate::AppState;

pub mod handlers;

/// Build the API router.
/// All routes are relative; the caller mounts this under `/api/v1`.
///
/// Every route is registered together with its `Endpoint`; a route the
/// permission gate cannot evaluate fails here instead of at request time.
pub fn api_router(state: Arc<AppState>) -> Result<Router<Arc<AppState>>, ConfigurationError> {
    let users = Endpoint::resource("auth", "user");

    Ok(Router::new()
        .route("/", api_root(&state)?)
        .route(
            "/users",
            protected(
                &state,
                users.clone(),
                &[Method::GET, Method::HEAD, Method::POST],
                get(handlers::list_users).post(handlers::create_user),
            )?,
        )
        .route(
            "/users/:id",
            protected(
                &state,
                users,
                &[Method::GET, Method::HEAD, Method::PUT, Method::PATCH, Method::DELETE],
                get(handlers::get_user)
                    .put(handlers::update_user)
                    .patch(handlers::update_user)
                    .delete(handlers::delete_user),
            )?,
        )
        .layer(TraceLayer::new_for_http())
        .fallback(fallback_404))
}

/// The API index. Exempt from permission checks, but a supplied token is
/// still authenticated.
pub fn api_root(state: &Arc<AppState>) -> Result<MethodRouter<Arc<AppState>>, ConfigurationError> {
    protected(
        state,
        Endpoint::ignoring_permissions(),
        &[Method::GET, Method::HEAD],
        get(handlers::api_root),
    )
}

/// Check `endpoint` against the gate for `methods`, then wrap `route` in the token guard.
pub fn protected(
    state: &Arc<AppState>,
    endpoint: Endpoint,
    methods: &[Method],
    route: MethodRouter<Arc<AppState>>,
) -> Result<MethodRouter<Arc<AppState>>, ConfigurationError> {
    state.gate.check_endpoint(&endpoint, methods)?;
    Ok(route.route_layer(middleware::from_fn_with_state(
        GuardState::new(state.clone(), endpoint),
        token_guard,
    )))
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}
