//! Route layer tying the resolver and the permission gate together.
//!
//! Attached per route at registration time with the route's `Endpoint`, so
//! the resource descriptor never has to be discovered per request.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::permissions::{Decision, Endpoint};
use crate::errors::AppError;
use crate::AppState;

#[derive(Clone)]
pub struct GuardState {
    pub app: Arc<AppState>,
    pub endpoint: Arc<Endpoint>,
}

impl GuardState {
    pub fn new(app: Arc<AppState>, endpoint: Endpoint) -> Self {
        Self {
            app,
            endpoint: Arc::new(endpoint),
        }
    }
}

/// Middleware: authenticate the token, then authorize the method against the
/// route's resource. On success the `SecurityContext` is available to handlers
/// as `Extension<Arc<SecurityContext>>`.
pub async fn token_guard(State(guard): State<GuardState>, mut req: Request, next: Next) -> Response {
    let app = &guard.app;

    let ctx = match app.resolver.authenticate(req.headers(), &app.store).await {
        Ok(ctx) => ctx.map(Arc::new),
        Err(e) => return challenge(e, app.resolver.scheme()),
    };

    let decision = app
        .gate
        .authorize(ctx.as_deref(), req.method(), &guard.endpoint)
        .await;

    match decision {
        Ok(Decision::Allow) => {
            if let Some(ctx) = ctx {
                req.extensions_mut().insert(ctx);
            }
            next.run(req).await
        }
        Ok(Decision::Deny) if ctx.is_none() => {
            challenge(AppError::NotAuthenticated, app.resolver.scheme())
        }
        Ok(Decision::Deny) => AppError::PermissionDenied.into_response(),
        Err(e) => challenge(e, app.resolver.scheme()),
    }
}

/// Render an error; 401s advertise the configured scheme.
fn challenge(err: AppError, scheme: &str) -> Response {
    let mut resp = err.into_response();
    if resp.status() == StatusCode::UNAUTHORIZED {
        if let Ok(value) = HeaderValue::from_str(scheme) {
            resp.headers_mut().insert(header::WWW_AUTHENTICATE, value);
        }
    }
    resp
}
