//! Access tokens bound to a principal and to their own permission grants.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Length of a generated key, in hex characters.
pub const KEY_LENGTH: usize = 40;

/// A bearer credential. Its authority comes only from the permissions granted
/// to the token itself, never from its owner's account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Token {
    pub key: String,
    pub owner: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Token {
    /// Build a token for `owner`, generating a key unless one is supplied.
    pub fn new(owner: Uuid, key: Option<String>) -> Self {
        Self {
            key: key.unwrap_or_else(generate_key),
            owner,
            created_at: Utc::now(),
        }
    }

    /// Key safe to put in logs.
    pub fn masked_key(&self) -> String {
        mask_key(&self.key)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

/// Generate a fresh token key.
///
/// A random UUID v4 keys an HMAC-SHA256; the hex digest is cut to
/// `KEY_LENGTH` characters. Uniqueness is enforced by the store, not here.
pub fn generate_key() -> String {
    let unique = Uuid::new_v4();
    let mac = HmacSha256::new_from_slice(unique.as_bytes()).expect("HMAC can take key of any size");
    let digest = hex::encode(mac.finalize().into_bytes());
    digest[..KEY_LENGTH].to_string()
}

/// Check a caller-supplied key: 1 to `KEY_LENGTH` visible ASCII characters,
/// so it fits the column and survives the `Authorization` header split.
pub fn validate_key(key: &str) -> anyhow::Result<()> {
    if key.is_empty() || key.len() > KEY_LENGTH {
        anyhow::bail!("token key must be 1 to {} characters", KEY_LENGTH);
    }
    if !key.bytes().all(|b| b.is_ascii_graphic()) {
        anyhow::bail!("token key must be printable ASCII without whitespace");
    }
    Ok(())
}

pub fn mask_key(key: &str) -> String {
    if key.len() > 8 && key.is_ascii() {
        format!("{}…{}", &key[..4], &key[key.len() - 4..])
    } else {
        "****".to_string()
    }
}
