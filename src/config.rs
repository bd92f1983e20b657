use anyhow::Context;

use crate::middleware::permissions::PermsMap;

pub const DEFAULT_AUTH_SCHEME: &str = "Token";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Unset means the in-memory backend (development only: nothing survives a restart).
    pub database_url: Option<String>,
    /// Scheme expected in `Authorization: <scheme> <key>`. Compared case-insensitively.
    pub auth_scheme: String,
    /// When true, requests without credentials are always denied.
    /// Set PERMTOKEN_ALLOW_ANONYMOUS=true to let them through read-only endpoints.
    pub authenticated_users_only: bool,
    /// Method → permission templates. Overridable via PERMTOKEN_PERMS_MAP (YAML file).
    pub perms_map: PermsMap,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            database_url: None,
            auth_scheme: DEFAULT_AUTH_SCHEME.to_string(),
            authenticated_users_only: true,
            perms_map: PermsMap::default(),
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let perms_map = match std::env::var("PERMTOKEN_PERMS_MAP") {
        Ok(path) if !path.trim().is_empty() => {
            let raw = std::fs::read_to_string(path.trim())
                .with_context(|| format!("reading permission map from {}", path))?;
            PermsMap::from_yaml(&raw).with_context(|| format!("parsing permission map {}", path))?
        }
        _ => PermsMap::default(),
    };

    let auth_scheme = std::env::var("PERMTOKEN_AUTH_SCHEME")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_AUTH_SCHEME.into());
    if auth_scheme.contains(char::is_whitespace) {
        anyhow::bail!("PERMTOKEN_AUTH_SCHEME must be a single word, got '{}'", auth_scheme);
    }

    Ok(Config {
        port: std::env::var("PERMTOKEN_PORT")
            .unwrap_or_else(|_| "8000".into())
            .parse()
            .unwrap_or(8000),
        database_url: std::env::var("DATABASE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty()),
        auth_scheme,
        authenticated_users_only: !std::env::var("PERMTOKEN_ALLOW_ANONYMOUS")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false),
        perms_map,
    })
}
