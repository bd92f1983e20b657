//! End-to-end tests for token-scoped permissions over the HTTP surface.
//!
//! Everything runs against the in-memory backend; no database required.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use permtoken::config::Config;
use permtoken::errors::ConfigurationError;
use permtoken::middleware::permissions::{Endpoint, PermsMap};
use permtoken::models::principal::PrincipalUpdate;
use permtoken::models::token::Token;
use permtoken::store::memory::MemoryStore;
use permtoken::store::{PrincipalStore, TokenStore};
use permtoken::AppState;

// ── Helpers ──────────────────────────────────────────────────

fn app_with(config: Config, store: &MemoryStore) -> Router {
    let state = Arc::new(AppState::new(config, Arc::new(store.clone())));
    permtoken::app(state).unwrap()
}

fn app(store: &MemoryStore) -> Router {
    app_with(Config::default(), store)
}

async fn token_for(store: &MemoryStore, username: &str, grants: &[&str]) -> Token {
    let owner = store.create_principal(username, None).await.unwrap();
    let token = store.create_token(owner.id, None).await.unwrap();
    for code in grants {
        store.grant_permission(&token.key, code).await.unwrap();
    }
    token
}

fn request(method: Method, uri: &str, auth: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn create_user_request(auth: Option<&str>, username: &str) -> Request<Body> {
    request(
        Method::POST,
        "/api/v1/users",
        auth,
        Some(json!({ "username": username })),
    )
}

async fn json_body(resp: axum::response::Response) -> Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ── Core scenarios ───────────────────────────────────────────

#[tokio::test]
async fn test_granted_token_can_create_user() {
    let store = MemoryStore::new();
    let token = token_for(
        &store,
        "permitted",
        &["auth.add_user", "auth.change_user", "auth.delete_user"],
    )
    .await;

    let resp = app(&store)
        .oneshot(create_user_request(Some(&format!("Token {}", token.key)), "newuser"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = json_body(resp).await;
    assert_eq!(body["username"], "newuser");
    assert!(store.find_principal_by_username("newuser").await.unwrap().is_some());
}

#[tokio::test]
async fn test_token_without_add_grant_is_forbidden() {
    let store = MemoryStore::new();
    let token = token_for(&store, "permitted", &["auth.change_user"]).await;

    let resp = app(&store)
        .oneshot(create_user_request(Some(&format!("Token {}", token.key)), "newuser"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(resp.headers().get(header::WWW_AUTHENTICATE).is_none());
    let body = json_body(resp).await;
    assert_eq!(body["error"]["code"], "permission_denied");
    assert!(store.find_principal_by_username("newuser").await.unwrap().is_none());
}

#[tokio::test]
async fn test_owner_permissions_do_not_leak_to_token() {
    // Only the token's own grants count; a second token held by the same
    // owner does not lend its permissions.
    let store = MemoryStore::new();
    let granted = token_for(&store, "permitted", &["auth.add_user"]).await;
    let bare = store.create_token(granted.owner, None).await.unwrap();

    let resp = app(&store)
        .oneshot(create_user_request(Some(&format!("Token {}", bare.key)), "newuser"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_inactive_owner_is_unauthorized() {
    let store = MemoryStore::new();
    let token = token_for(&store, "permitted", &["auth.add_user"]).await;
    store
        .update_principal(
            token.owner,
            &PrincipalUpdate {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let resp = app(&store)
        .oneshot(create_user_request(Some(&format!("Token {}", token.key)), "newuser"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(resp.headers()[header::WWW_AUTHENTICATE], "Token");
    let body = json_body(resp).await;
    assert_eq!(body["error"]["code"], "inactive_user");
}

#[tokio::test]
async fn test_malformed_header_is_unauthorized() {
    let store = MemoryStore::new();
    token_for(&store, "permitted", &["auth.add_user"]).await;

    for auth in ["Token", "Token a b", "Bearer abc"] {
        let resp = app(&store)
            .oneshot(create_user_request(Some(auth), "newuser"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "header {:?}", auth);
        let body = json_body(resp).await;
        assert_eq!(body["error"]["code"], "malformed_credentials");
    }
}

#[tokio::test]
async fn test_unknown_token_is_unauthorized() {
    let store = MemoryStore::new();
    let resp = app(&store)
        .oneshot(create_user_request(Some("Token 0000000000"), "newuser"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(resp).await;
    assert_eq!(body["error"]["code"], "invalid_token");
}

#[tokio::test]
async fn test_missing_header_is_unauthorized() {
    let store = MemoryStore::new();
    let resp = app(&store)
        .oneshot(request(Method::GET, "/api/v1/users", None, None))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(resp.headers()[header::WWW_AUTHENTICATE], "Token");
    let body = json_body(resp).await;
    assert_eq!(body["error"]["code"], "not_authenticated");
}

// ── Method mapping ───────────────────────────────────────────

#[tokio::test]
async fn test_read_needs_no_grant_but_write_does() {
    let store = MemoryStore::new();
    let token = token_for(&store, "reader", &[]).await;
    let auth = format!("Token {}", token.key);
    let app = app(&store);

    let resp = app
        .clone()
        .oneshot(request(Method::GET, "/api/v1/users", Some(&auth), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .oneshot(create_user_request(Some(&auth), "newuser"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_each_write_method_checks_its_own_code() {
    let store = MemoryStore::new();
    let target = store.create_principal("target", None).await.unwrap();
    let token = token_for(&store, "editor", &["auth.change_user"]).await;
    let auth = format!("Token {}", token.key);
    let uri = format!("/api/v1/users/{}", target.id);
    let app = app(&store);

    let resp = app
        .clone()
        .oneshot(request(
            Method::PATCH,
            &uri,
            Some(&auth),
            Some(json!({ "email": "t@example.com" })),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["email"], "t@example.com");

    let resp = app
        .oneshot(request(Method::DELETE, &uri, Some(&auth), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert!(store.find_principal(target.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_delete_user_cascades_to_tokens() {
    let store = MemoryStore::new();
    let victim = token_for(&store, "victim", &[]).await;
    let token = token_for(&store, "admin", &["auth.delete_user"]).await;

    let resp = app(&store)
        .oneshot(request(
            Method::DELETE,
            &format!("/api/v1/users/{}", victim.owner),
            Some(&format!("Token {}", token.key)),
            None,
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(store.find_by_key(&victim.key).await.unwrap().is_none());
}

#[tokio::test]
async fn test_rename_onto_taken_username_is_bad_request() {
    let store = MemoryStore::new();
    let alice = store.create_principal("alice", None).await.unwrap();
    store.create_principal("bob", None).await.unwrap();
    let token = token_for(&store, "editor", &["auth.change_user"]).await;
    let auth = format!("Token {}", token.key);
    let uri = format!("/api/v1/users/{}", alice.id);
    let app = app(&store);

    for method in [Method::PATCH, Method::PUT] {
        let resp = app
            .clone()
            .oneshot(request(method.clone(), &uri, Some(&auth), Some(json!({ "username": "bob" }))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{}", method);
        assert_eq!(json_body(resp).await["error"]["code"], "bad_request");
    }

    // Keeping one's own name is not a clash.
    let resp = app
        .oneshot(request(Method::PATCH, &uri, Some(&auth), Some(json!({ "username": "alice" }))))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        store.find_principal(alice.id).await.unwrap().unwrap().username,
        "alice"
    );
}

// ── Grant lifecycle ──────────────────────────────────────────

#[tokio::test]
async fn test_grant_and_revoke_take_effect_on_next_request() {
    let store = MemoryStore::new();
    let token = token_for(&store, "permitted", &[]).await;
    let auth = format!("Token {}", token.key);
    let app = app(&store);

    let resp = app
        .clone()
        .oneshot(create_user_request(Some(&auth), "first"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    store.grant_permission(&token.key, "auth.add_user").await.unwrap();
    let resp = app
        .clone()
        .oneshot(create_user_request(Some(&auth), "first"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    assert!(store.revoke_permission(&token.key, "auth.add_user").await.unwrap());
    let resp = app
        .oneshot(create_user_request(Some(&auth), "second"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

// ── Configuration ────────────────────────────────────────────

#[tokio::test]
async fn test_api_root_ignores_permissions() {
    let store = MemoryStore::new();
    let token = token_for(&store, "nobody", &[]).await;
    let app = app(&store);

    for uri in ["/api/v1", "/api/v1/"] {
        let resp = app
            .clone()
            .oneshot(request(
                Method::GET,
                uri,
                Some(&format!("Token {}", token.key)),
                None,
            ))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK, "{}", uri);
        assert_eq!(json_body(resp).await["authenticated_as"], "nobody");
    }
}

#[tokio::test]
async fn test_api_root_still_rejects_bad_credentials() {
    let store = MemoryStore::new();
    let resp = app(&store)
        .oneshot(request(Method::GET, "/api/v1/", Some("Token unknown"), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_custom_perms_map_requires_view_grant() {
    let store = MemoryStore::new();
    let viewer = token_for(&store, "viewer", &["auth.view_user"]).await;
    let blind = token_for(&store, "blind", &[]).await;

    let config = Config {
        perms_map: PermsMap::default()
            .with_method("GET", &["{app_label}.view_{model_name}"])
            .unwrap(),
        ..Config::default()
    };
    let app = app_with(config, &store);

    let resp = app
        .clone()
        .oneshot(request(
            Method::GET,
            "/api/v1/users",
            Some(&format!("Token {}", viewer.key)),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .oneshot(request(
            Method::GET,
            "/api/v1/users",
            Some(&format!("Token {}", blind.key)),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_anonymous_allowed_only_where_nothing_is_required() {
    let store = MemoryStore::new();
    let config = Config {
        authenticated_users_only: false,
        ..Config::default()
    };
    let app = app_with(config, &store);

    let resp = app
        .clone()
        .oneshot(request(Method::GET, "/api/v1/users", None, None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .oneshot(create_user_request(None, "newuser"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_custom_scheme_is_advertised() {
    let store = MemoryStore::new();
    let token = token_for(&store, "permitted", &["auth.add_user"]).await;
    let config = Config {
        auth_scheme: "Bearer".into(),
        ..Config::default()
    };
    let app = app_with(config, &store);

    let resp = app
        .clone()
        .oneshot(create_user_request(Some(&format!("Token {}", token.key)), "newuser"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(resp.headers()[header::WWW_AUTHENTICATE], "Bearer");

    let resp = app
        .oneshot(create_user_request(Some(&format!("bearer {}", token.key)), "newuser"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
}

#[test]
fn test_endpoint_without_descriptor_is_rejected_at_registration() {
    let state = Arc::new(AppState::new(Config::default(), Arc::new(MemoryStore::new())));
    let result = permtoken::api::protected(
        &state,
        Endpoint::default(),
        &[Method::GET],
        axum::routing::get(|| async { "unreachable" }),
    );
    match result {
        Err(err) => assert_eq!(err, ConfigurationError::MissingResourceDescriptor),
        Ok(_) => panic!("route without a resource descriptor was accepted"),
    }
}

#[test]
fn test_unmapped_method_is_rejected_at_registration() {
    let config = Config {
        perms_map: PermsMap::from_table([("GET", Vec::<&str>::new())]).unwrap(),
        ..Config::default()
    };
    let state = Arc::new(AppState::new(config, Arc::new(MemoryStore::new())));
    match permtoken::app(state) {
        Err(err) => assert!(matches!(err, ConfigurationError::UnmappedMethod(_))),
        Ok(_) => panic!("router built with an unmapped method"),
    }
}

#[test]
fn test_shipped_perms_map_covers_every_route() {
    let perms_map = PermsMap::from_yaml(include_str!("../perms_map.example.yaml")).unwrap();
    let config = Config {
        perms_map,
        ..Config::default()
    };
    let state = Arc::new(AppState::new(config, Arc::new(MemoryStore::new())));
    assert!(permtoken::app(state).is_ok());
}
