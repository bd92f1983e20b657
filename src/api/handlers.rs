use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::errors::AppError;
use crate::middleware::context::SecurityContext;
use crate::models::principal::{Principal, PrincipalUpdate};
use crate::AppState;

// ── Request DTOs ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: Option<String>,
}

// ── Handlers ─────────────────────────────────────────────────

/// GET /api/v1/: index of resources. Not permission-checked.
pub async fn api_root(ctx: Option<Extension<Arc<SecurityContext>>>) -> Json<Value> {
    let mut body = json!({
        "users": "/api/v1/users",
    });
    if let Some(Extension(ctx)) = ctx {
        body["authenticated_as"] = json!(ctx.principal().username);
    }
    Json(body)
}

/// GET /api/v1/users
pub async fn list_users(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Principal>>, AppError> {
    Ok(Json(state.store.list_principals().await?))
}

/// POST /api/v1/users: requires `auth.add_user` on the calling token.
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    ctx: Option<Extension<Arc<SecurityContext>>>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<Principal>), AppError> {
    let username = payload.username.trim();
    if username.is_empty() {
        return Err(AppError::BadRequest("username is required".into()));
    }
    if state.store.find_principal_by_username(username).await?.is_some() {
        return Err(AppError::BadRequest(format!(
            "a user with username '{}' already exists",
            username
        )));
    }

    let user = state
        .store
        .create_principal(username, payload.email.as_deref())
        .await?;

    match ctx {
        Some(Extension(ctx)) => tracing::info!(
            user = %user.username,
            by = %ctx.principal().username,
            token = %ctx.token().masked_key(),
            "user created"
        ),
        None => tracing::info!(user = %user.username, "user created anonymously"),
    }
    Ok((StatusCode::CREATED, Json(user)))
}

/// GET /api/v1/users/:id
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Principal>, AppError> {
    state
        .store
        .find_principal(id)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound)
}

/// PUT|PATCH /api/v1/users/:id: requires `auth.change_user`.
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(update): Json<PrincipalUpdate>,
) -> Result<Json<Principal>, AppError> {
    if let Some(username) = update.username.as_deref() {
        if username.trim().is_empty() {
            return Err(AppError::BadRequest("username cannot be blank".into()));
        }
        let holder = state.store.find_principal_by_username(username).await?;
        if holder.is_some_and(|p| p.id != id) {
            return Err(AppError::BadRequest(format!(
                "a user with username '{}' already exists",
                username
            )));
        }
    }
    state
        .store
        .update_principal(id, &update)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound)
}

/// DELETE /api/v1/users/:id: requires `auth.delete_user`. Removes the user's tokens too.
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.store.delete_principal(id).await? {
        tracing::info!(user_id = %id, "user deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound)
    }
}
