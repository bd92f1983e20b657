use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use permtoken::config::{self, Config};
use permtoken::store::memory::MemoryStore;
use permtoken::store::postgres::PgStore;
use permtoken::store::{Backend, PermissionCatalog, TokenStore};
use permtoken::AppState;

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // Export spans over OTLP only when an endpoint is configured.
    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "permtoken"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "permtoken=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve {
            port,
            bootstrap_user,
        }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port, bootstrap_user).await
        }
        Some(cli::Commands::User { command }) => {
            let store = persistent_store(&cfg).await?;
            handle_user_command(command, store.as_ref()).await
        }
        Some(cli::Commands::Token { command }) => {
            let store = persistent_store(&cfg).await?;
            handle_token_command(command, store.as_ref()).await
        }
        Some(cli::Commands::Permission { command }) => {
            let store = persistent_store(&cfg).await?;
            handle_permission_command(command, store.as_ref()).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port, None).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

/// Backend for the server: Postgres when DATABASE_URL is set, memory otherwise.
async fn connect_store(cfg: &Config) -> anyhow::Result<Arc<dyn Backend>> {
    match &cfg.database_url {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let db = PgStore::connect(url).await?;

            tracing::info!("Running migrations...");
            db.migrate().await?;
            Ok(Arc::new(db))
        }
        None => {
            tracing::warn!("DATABASE_URL is not set; using the in-memory backend (nothing persists)");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Management commands only make sense against a real database.
async fn persistent_store(cfg: &Config) -> anyhow::Result<Arc<dyn Backend>> {
    if cfg.database_url.is_none() {
        anyhow::bail!("DATABASE_URL must be set for management commands");
    }
    connect_store(cfg).await
}

async fn run_server(cfg: Config, port: u16, bootstrap_user: Option<String>) -> anyhow::Result<()> {
    let store = connect_store(&cfg).await?;

    if let Some(username) = bootstrap_user {
        bootstrap(store.as_ref(), &username, &cfg.auth_scheme).await?;
    }

    let state = Arc::new(AppState::new(cfg, store));

    let app = permtoken::app(state.clone())
        .context("route configuration rejected by the permission gate")?
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(axum::middleware::from_fn(security_headers_middleware));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        scheme = %state.config.auth_scheme,
        authenticated_users_only = state.config.authenticated_users_only,
        "permtoken listening on {}",
        addr
    );
    axum::serve(listener, app).await?;

    Ok(())
}

/// Ensure `username` exists and mint a token holding the whole catalog.
async fn bootstrap(store: &dyn Backend, username: &str, scheme: &str) -> anyhow::Result<()> {
    let user = match store.find_principal_by_username(username).await? {
        Some(u) => u,
        None => store.create_principal(username, None).await?,
    };
    let token = store.create_token(user.id, None).await?;
    for perm in store.list_permissions().await? {
        store.grant_permission(&token.key, &perm.code()).await?;
    }
    tracing::info!(user = %user.username, token = %token.masked_key(), "bootstrap token created");
    println!(
        "Bootstrap token for '{}':\n  Use:   Authorization: {} {}",
        user.username, scheme, token.key
    );
    Ok(())
}

/// Middleware: injects a unique X-Request-Id into every response.
/// This allows clients to correlate errors with server logs.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = axum::http::HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: security headers on every response.
async fn security_headers_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    use axum::http::HeaderValue;

    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    // Responses may echo token metadata.
    headers.insert("Cache-Control", HeaderValue::from_static("no-store"));
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.remove("Server");

    resp
}

async fn find_user(store: &dyn Backend, username: &str) -> anyhow::Result<permtoken::models::principal::Principal> {
    store
        .find_principal_by_username(username)
        .await?
        .ok_or_else(|| anyhow::anyhow!("User not found: {}", username))
}

async fn handle_user_command(cmd: cli::UserCommands, store: &dyn Backend) -> anyhow::Result<()> {
    use permtoken::models::principal::PrincipalUpdate;

    match cmd {
        cli::UserCommands::Create { username, email } => {
            let user = store.create_principal(&username, email.as_deref()).await?;
            println!("User created:\n  ID: {}\n  Username: {}", user.id, user.username);
        }
        cli::UserCommands::List => {
            for user in store.list_principals().await? {
                println!(
                    "{}  {:<20} {}",
                    user.id,
                    user.username,
                    if user.is_active { "active" } else { "inactive" }
                );
            }
        }
        cli::UserCommands::Deactivate { username } => {
            let user = find_user(store, &username).await?;
            let update = PrincipalUpdate {
                is_active: Some(false),
                ..Default::default()
            };
            store.update_principal(user.id, &update).await?;
            println!("User '{}' deactivated; their tokens will be rejected", username);
        }
        cli::UserCommands::Activate { username } => {
            let user = find_user(store, &username).await?;
            let update = PrincipalUpdate {
                is_active: Some(true),
                ..Default::default()
            };
            store.update_principal(user.id, &update).await?;
            println!("User '{}' activated", username);
        }
        cli::UserCommands::Delete { username } => {
            let user = find_user(store, &username).await?;
            store.delete_principal(user.id).await?;
            println!("User '{}' and their tokens deleted", username);
        }
    }
    Ok(())
}

async fn handle_token_command(cmd: cli::TokenCommands, store: &dyn Backend) -> anyhow::Result<()> {
    match cmd {
        cli::TokenCommands::Create {
            username,
            key,
            permissions,
        } => {
            let user = find_user(store, &username).await?;
            let token = store.create_token(user.id, key).await?;
            for code in permissions.unwrap_or_default() {
                store
                    .grant_permission(&token.key, code.trim())
                    .await
                    .with_context(|| format!("granting {}", code))?;
            }
            println!("Token created:\n  Key: {}\n  Owner: {}", token.key, user.username);
        }
        cli::TokenCommands::Grant { key, permissions } => {
            for code in &permissions {
                store
                    .grant_permission(&key, code.trim())
                    .await
                    .with_context(|| format!("granting {}", code))?;
            }
            println!("Granted {} permission(s)", permissions.len());
        }
        cli::TokenCommands::Revoke { key, permissions } => {
            let mut revoked = 0;
            for code in &permissions {
                if store.revoke_permission(&key, code.trim()).await? {
                    revoked += 1;
                }
            }
            println!("Revoked {} permission(s)", revoked);
        }
        cli::TokenCommands::Show { key } => {
            let token = store
                .find_by_key(&key)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Token not found"))?;
            let owner = store.find_principal(token.owner).await?;
            println!("Token {}", token.masked_key());
            println!(
                "  Owner:   {}",
                owner.map(|o| o.username).unwrap_or_else(|| "<deleted>".into())
            );
            println!("  Created: {}", token.created_at);
            let perms = store.permissions_for(&token.key).await?;
            if perms.is_empty() {
                println!("  Permissions: (none)");
            } else {
                println!("  Permissions:");
                for code in perms.iter() {
                    println!("    {}", code);
                }
            }
        }
        cli::TokenCommands::List { username } => {
            let user = find_user(store, &username).await?;
            for token in store.list_tokens(user.id).await? {
                let perms = store.permissions_for(&token.key).await?;
                println!(
                    "{}  created {}  {} permission(s)",
                    token.masked_key(),
                    token.created_at,
                    perms.len()
                );
            }
        }
        cli::TokenCommands::Delete { key } => {
            if store.delete_token(&key).await? {
                println!("Token deleted");
            } else {
                anyhow::bail!("Token not found");
            }
        }
    }
    Ok(())
}

async fn handle_permission_command(
    cmd: cli::PermissionCommands,
    store: &dyn Backend,
) -> anyhow::Result<()> {
    match cmd {
        cli::PermissionCommands::List => {
            for perm in store.list_permissions().await? {
                println!("{}", perm);
            }
        }
    }
    Ok(())
}
