//! Storage backends for tokens, principals and the permission catalog.
//!
//! - `MemoryStore`: DashMap-backed, used for development and tests.
//! - `PgStore`: PostgreSQL via sqlx, the source of truth in production.
//!
//! The backend owns uniqueness and consistency; callers never lock.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::permission::{GrantedPermissions, Permission};
use crate::models::principal::{Principal, PrincipalUpdate};
use crate::models::token::Token;

/// Token persistence and permission membership.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Persist a new token for `owner` with no permissions.
    /// A key is generated unless one is supplied.
    async fn create_token(&self, owner: Uuid, key: Option<String>) -> anyhow::Result<Token>;

    /// Exact-match lookup. `None` is a normal outcome.
    async fn find_by_key(&self, key: &str) -> anyhow::Result<Option<Token>>;

    /// Current permission codes granted to the token.
    async fn permissions_for(&self, key: &str) -> anyhow::Result<GrantedPermissions>;

    /// Grant a catalog permission. Fails for unknown tokens or codes.
    /// Granting an already-held code is a no-op.
    async fn grant_permission(&self, key: &str, code: &str) -> anyhow::Result<()>;

    /// Revoke a permission. Returns false if it was not granted.
    async fn revoke_permission(&self, key: &str, code: &str) -> anyhow::Result<bool>;

    async fn list_tokens(&self, owner: Uuid) -> anyhow::Result<Vec<Token>>;

    /// Returns false if no such token existed.
    async fn delete_token(&self, key: &str) -> anyhow::Result<bool>;
}

/// Identity provider and user directory.
#[async_trait]
pub trait PrincipalStore: Send + Sync {
    async fn find_principal(&self, id: Uuid) -> anyhow::Result<Option<Principal>>;

    async fn find_principal_by_username(&self, username: &str) -> anyhow::Result<Option<Principal>>;

    async fn list_principals(&self) -> anyhow::Result<Vec<Principal>>;

    /// Fails if the username is taken.
    async fn create_principal(&self, username: &str, email: Option<&str>) -> anyhow::Result<Principal>;

    async fn update_principal(
        &self,
        id: Uuid,
        update: &PrincipalUpdate,
    ) -> anyhow::Result<Option<Principal>>;

    /// Deletes the principal and every token it owns.
    async fn delete_principal(&self, id: Uuid) -> anyhow::Result<bool>;
}

/// Read access to the permission catalog.
#[async_trait]
pub trait PermissionCatalog: Send + Sync {
    /// Look up an entry by its `app_label.codename` code.
    async fn find_permission(&self, code: &str) -> anyhow::Result<Option<Permission>>;

    async fn list_permissions(&self) -> anyhow::Result<Vec<Permission>>;
}

/// Everything the service needs from a backend.
pub trait Backend: TokenStore + PrincipalStore + PermissionCatalog {}

impl<T: TokenStore + PrincipalStore + PermissionCatalog> Backend for T {}
