use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user account that can own tokens.
///
/// Credentials for the account itself live with the identity provider; this
/// service only needs to know who the owner is and whether it is still active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Principal {
    pub id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Principal {
    pub fn new(username: impl Into<String>, email: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            email,
            is_active: true,
            created_at: Utc::now(),
        }
    }
}

/// Partial update applied by `PUT`/`PATCH` on a principal.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrincipalUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub is_active: Option<bool>,
}

impl PrincipalUpdate {
    pub fn apply(&self, principal: &mut Principal) {
        if let Some(username) = &self.username {
            principal.username = username.clone();
        }
        if let Some(email) = &self.email {
            principal.email = Some(email.clone());
        }
        if let Some(active) = self.is_active {
            principal.is_active = active;
        }
    }
}
