use std::fmt;
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::models::permission::GrantedPermissions;
use crate::models::principal::Principal;
use crate::models::token::Token;
use crate::store::Backend;

/// The authenticated principal and token for one request.
///
/// Created by the resolver, dropped with the request. The token's permission
/// set is loaded at most once per context; a new request builds a new
/// context and therefore sees the latest grants.
pub struct SecurityContext {
    principal: Principal,
    token: Token,
    store: Arc<dyn Backend>,
    permissions: OnceCell<GrantedPermissions>,
}

impl SecurityContext {
    pub fn new(principal: Principal, token: Token, store: Arc<dyn Backend>) -> Self {
        Self {
            principal,
            token,
            store,
            permissions: OnceCell::new(),
        }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    /// The token's granted codes, memoized for the lifetime of this context.
    pub async fn permissions(&self) -> anyhow::Result<&GrantedPermissions> {
        self.permissions
            .get_or_try_init(|| async { self.store.permissions_for(&self.token.key).await })
            .await
    }

    pub async fn has_permission(&self, code: &str) -> anyhow::Result<bool> {
        Ok(self.permissions().await?.has_permission(code))
    }

    pub async fn has_all_permissions<I, S>(&self, codes: I) -> anyhow::Result<bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(self.permissions().await?.has_all_permissions(codes))
    }
}

impl fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityContext")
            .field("principal", &self.principal.username)
            .field("token", &self.token.masked_key())
            .field("permissions", &self.permissions.get())
            .finish()
    }
}
