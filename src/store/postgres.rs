use anyhow::bail;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{PermissionCatalog, PrincipalStore, TokenStore};
use crate::models::permission::{split_code, GrantedPermissions, Permission};
use crate::models::principal::{Principal, PrincipalUpdate};
use crate::models::token::{validate_key, Token};

const TOKEN_COLUMNS: &str = "key, principal_id AS owner, created_at";
const PRINCIPAL_COLUMNS: &str = "id, username, email, is_active, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

// -- Token Operations --

#[async_trait]
impl TokenStore for PgStore {
    async fn create_token(&self, owner: Uuid, key: Option<String>) -> anyhow::Result<Token> {
        if let Some(key) = key.as_deref() {
            validate_key(key)?;
        }
        let token = Token::new(owner, key);
        let row = sqlx::query_as::<_, Token>(&format!(
            "INSERT INTO tokens (key, principal_id, created_at) VALUES ($1, $2, $3) RETURNING {}",
            TOKEN_COLUMNS
        ))
        .bind(&token.key)
        .bind(token.owner)
        .bind(token.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn find_by_key(&self, key: &str) -> anyhow::Result<Option<Token>> {
        let row = sqlx::query_as::<_, Token>(&format!(
            "SELECT {} FROM tokens WHERE key = $1",
            TOKEN_COLUMNS
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn permissions_for(&self, key: &str) -> anyhow::Result<GrantedPermissions> {
        let codes = sqlx::query_scalar::<_, String>(
            r#"SELECT p.app_label || '.' || p.codename
               FROM token_permissions tp
               JOIN permissions p ON p.id = tp.permission_id
               WHERE tp.token_key = $1"#,
        )
        .bind(key)
        .fetch_all(&self.pool)
        .await?;

        Ok(codes.into_iter().collect())
    }

    async fn grant_permission(&self, key: &str, code: &str) -> anyhow::Result<()> {
        let Some((app_label, codename)) = split_code(code) else {
            bail!("unknown permission '{}'", code);
        };
        if self.find_by_key(key).await?.is_none() {
            bail!("token not found");
        }

        let result = sqlx::query(
            r#"INSERT INTO token_permissions (token_key, permission_id)
               SELECT $1, id FROM permissions WHERE app_label = $2 AND codename = $3
               ON CONFLICT DO NOTHING"#,
        )
        .bind(key)
        .bind(app_label)
        .bind(codename)
        .execute(&self.pool)
        .await?;

        // Zero rows means either an unknown code or an existing grant.
        if result.rows_affected() == 0 && self.find_permission(code).await?.is_none() {
            bail!("unknown permission '{}'", code);
        }
        Ok(())
    }

    async fn revoke_permission(&self, key: &str, code: &str) -> anyhow::Result<bool> {
        let Some((app_label, codename)) = split_code(code) else {
            return Ok(false);
        };
        let result = sqlx::query(
            r#"DELETE FROM token_permissions tp
               USING permissions p
               WHERE tp.permission_id = p.id
                 AND tp.token_key = $1 AND p.app_label = $2 AND p.codename = $3"#,
        )
        .bind(key)
        .bind(app_label)
        .bind(codename)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_tokens(&self, owner: Uuid) -> anyhow::Result<Vec<Token>> {
        let rows = sqlx::query_as::<_, Token>(&format!(
            "SELECT {} FROM tokens WHERE principal_id = $1 ORDER BY created_at DESC",
            TOKEN_COLUMNS
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn delete_token(&self, key: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM tokens WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

// -- Principal Operations --

#[async_trait]
impl PrincipalStore for PgStore {
    async fn find_principal(&self, id: Uuid) -> anyhow::Result<Option<Principal>> {
        let row = sqlx::query_as::<_, Principal>(&format!(
            "SELECT {} FROM principals WHERE id = $1",
            PRINCIPAL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn find_principal_by_username(&self, username: &str) -> anyhow::Result<Option<Principal>> {
        let row = sqlx::query_as::<_, Principal>(&format!(
            "SELECT {} FROM principals WHERE username = $1",
            PRINCIPAL_COLUMNS
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn list_principals(&self) -> anyhow::Result<Vec<Principal>> {
        let rows = sqlx::query_as::<_, Principal>(&format!(
            "SELECT {} FROM principals ORDER BY created_at ASC",
            PRINCIPAL_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn create_principal(&self, username: &str, email: Option<&str>) -> anyhow::Result<Principal> {
        let row = sqlx::query_as::<_, Principal>(&format!(
            "INSERT INTO principals (username, email) VALUES ($1, $2) RETURNING {}",
            PRINCIPAL_COLUMNS
        ))
        .bind(username)
        .bind(email)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn update_principal(
        &self,
        id: Uuid,
        update: &PrincipalUpdate,
    ) -> anyhow::Result<Option<Principal>> {
        let row = sqlx::query_as::<_, Principal>(&format!(
            r#"UPDATE principals
               SET username = COALESCE($2, username),
                   email = COALESCE($3, email),
                   is_active = COALESCE($4, is_active)
               WHERE id = $1
               RETURNING {}"#,
            PRINCIPAL_COLUMNS
        ))
        .bind(id)
        .bind(&update.username)
        .bind(&update.email)
        .bind(update.is_active)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn delete_principal(&self, id: Uuid) -> anyhow::Result<bool> {
        // tokens and token_permissions go with it via ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM principals WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

// -- Catalog Operations --

#[async_trait]
impl PermissionCatalog for PgStore {
    async fn find_permission(&self, code: &str) -> anyhow::Result<Option<Permission>> {
        let Some((app_label, codename)) = split_code(code) else {
            return Ok(None);
        };
        let row = sqlx::query_as::<_, Permission>(
            "SELECT app_label, codename, name FROM permissions WHERE app_label = $1 AND codename = $2",
        )
        .bind(app_label)
        .bind(codename)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn list_permissions(&self) -> anyhow::Result<Vec<Permission>> {
        let rows = sqlx::query_as::<_, Permission>(
            "SELECT app_label, codename, name FROM permissions ORDER BY app_label, codename",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
