use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::{PermissionCatalog, PrincipalStore, TokenStore};
use crate::models::permission::{self, GrantedPermissions, Permission};
use crate::models::principal::{Principal, PrincipalUpdate};
use crate::models::token::{validate_key, Token};

struct TokenEntry {
    token: Token,
    permissions: BTreeSet<String>,
}

/// In-process backend.
///
/// Every read returns a snapshot; nothing handed out aliases the maps, so a
/// grant made after a read is only seen by the next read.
#[derive(Clone)]
pub struct MemoryStore {
    tokens: Arc<DashMap<String, TokenEntry>>,
    principals: Arc<DashMap<Uuid, Principal>>,
    catalog: Arc<DashMap<String, Permission>>,
}

impl MemoryStore {
    /// Empty store seeded with the default permission catalog.
    pub fn new() -> Self {
        Self::with_catalog(permission::default_catalog())
    }

    pub fn with_catalog(catalog: impl IntoIterator<Item = Permission>) -> Self {
        let store = Self {
            tokens: Arc::new(DashMap::new()),
            principals: Arc::new(DashMap::new()),
            catalog: Arc::new(DashMap::new()),
        };
        for p in catalog {
            store.catalog.insert(p.code(), p);
        }
        store
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn create_token(&self, owner: Uuid, key: Option<String>) -> anyhow::Result<Token> {
        if !self.principals.contains_key(&owner) {
            bail!("principal {} does not exist", owner);
        }
        if let Some(key) = key.as_deref() {
            validate_key(key)?;
        }
        let token = Token::new(owner, key);
        match self.tokens.entry(token.key.clone()) {
            Entry::Occupied(_) => bail!("token key already exists"),
            Entry::Vacant(slot) => {
                slot.insert(TokenEntry {
                    token: token.clone(),
                    permissions: BTreeSet::new(),
                });
            }
        }
        Ok(token)
    }

    async fn find_by_key(&self, key: &str) -> anyhow::Result<Option<Token>> {
        Ok(self.tokens.get(key).map(|e| e.token.clone()))
    }

    async fn permissions_for(&self, key: &str) -> anyhow::Result<GrantedPermissions> {
        Ok(self
            .tokens
            .get(key)
            .map(|e| e.permissions.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn grant_permission(&self, key: &str, code: &str) -> anyhow::Result<()> {
        if !self.catalog.contains_key(code) {
            bail!("unknown permission '{}'", code);
        }
        let mut entry = self
            .tokens
            .get_mut(key)
            .ok_or_else(|| anyhow!("token not found"))?;
        entry.permissions.insert(code.to_string());
        Ok(())
    }

    async fn revoke_permission(&self, key: &str, code: &str) -> anyhow::Result<bool> {
        let mut entry = self
            .tokens
            .get_mut(key)
            .ok_or_else(|| anyhow!("token not found"))?;
        Ok(entry.permissions.remove(code))
    }

    async fn list_tokens(&self, owner: Uuid) -> anyhow::Result<Vec<Token>> {
        let mut tokens: Vec<Token> = self
            .tokens
            .iter()
            .filter(|e| e.token.owner == owner)
            .map(|e| e.token.clone())
            .collect();
        tokens.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tokens)
    }

    async fn delete_token(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.tokens.remove(key).is_some())
    }
}

#[async_trait]
impl PrincipalStore for MemoryStore {
    async fn find_principal(&self, id: Uuid) -> anyhow::Result<Option<Principal>> {
        Ok(self.principals.get(&id).map(|p| p.clone()))
    }

    async fn find_principal_by_username(&self, username: &str) -> anyhow::Result<Option<Principal>> {
        Ok(self
            .principals
            .iter()
            .find(|p| p.username == username)
            .map(|p| p.clone()))
    }

    async fn list_principals(&self) -> anyhow::Result<Vec<Principal>> {
        let mut all: Vec<Principal> = self.principals.iter().map(|p| p.clone()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }

    async fn create_principal(&self, username: &str, email: Option<&str>) -> anyhow::Result<Principal> {
        if self.principals.iter().any(|p| p.username == username) {
            bail!("username '{}' is already taken", username);
        }
        let principal = Principal::new(username, email.map(String::from));
        self.principals.insert(principal.id, principal.clone());
        Ok(principal)
    }

    async fn update_principal(
        &self,
        id: Uuid,
        update: &PrincipalUpdate,
    ) -> anyhow::Result<Option<Principal>> {
        if let Some(name) = &update.username {
            if self.principals.iter().any(|p| &p.username == name && p.id != id) {
                bail!("username '{}' is already taken", name);
            }
        }
        Ok(self.principals.get_mut(&id).map(|mut p| {
            update.apply(&mut p);
            p.clone()
        }))
    }

    async fn delete_principal(&self, id: Uuid) -> anyhow::Result<bool> {
        let removed = self.principals.remove(&id).is_some();
        if removed {
            self.tokens.retain(|_, e| e.token.owner != id);
        }
        Ok(removed)
    }
}

#[async_trait]
impl PermissionCatalog for MemoryStore {
    async fn find_permission(&self, code: &str) -> anyhow::Result<Option<Permission>> {
        Ok(self.catalog.get(code).map(|p| p.clone()))
    }

    async fn list_permissions(&self) -> anyhow::Result<Vec<Permission>> {
        let mut all: Vec<Permission> = self.catalog.iter().map(|p| p.clone()).collect();
        all.sort_by_key(Permission::code);
        Ok(all)
    }
}
