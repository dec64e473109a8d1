//! End-to-end tests for the HTTP surface.
//!
//! Drives the full router (CORS gate, bearer guard, handlers) with
//! in-process requests against a fake directory.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    routing::get,
    Json, Router,
};
use base64::Engine;
use serde_json::Value;
use tower::ServiceExt;

use ldap_oauth::clients::{Client, GrantType};
use ldap_oauth::config::Config;
use ldap_oauth::cors::CorsPolicy;
use ldap_oauth::directory::{CredentialValidator, Principal};
use ldap_oauth::error::AuthError;
use ldap_oauth::http::{self, Authenticated};
use ldap_oauth::{password, AppState};

struct FakeDirectory;

#[async_trait]
impl CredentialValidator for FakeDirectory {
    async fn validate(&self, username: &str, password: &str) -> Result<Principal, AuthError> {
        match (username, password) {
            ("alice", "correct-pw") => Ok(Principal {
                subject: "alice".to_string(),
                dn: "uid=alice,ou=people,dc=springframework,dc=org".to_string(),
                groups: vec!["developers".to_string()],
            }),
            ("outage", _) => Err(AuthError::DirectoryUnavailable("connection refused".into())),
            _ => Err(AuthError::InvalidCredentials),
        }
    }
}

fn client(id: &str, auto_approve: bool) -> Client {
    Client {
        client_id: id.to_string(),
        secret_hash: password::hash_secret("s3cr3t", 4).unwrap(),
        scopes: BTreeSet::from(["read".to_string(), "write".to_string()]),
        grant_types: BTreeSet::from([GrantType::Password, GrantType::RefreshToken]),
        access_token_ttl_secs: 3600,
        refresh_token_ttl_secs: 7200,
        auto_approve,
    }
}

fn config() -> Config {
    let mut config = Config::default();
    config.clients = vec![client("acme", true), client("third-party", false)];
    config.cors = CorsPolicy {
        allowed_origins: vec!["https://app.example.com".to_string()],
        ..CorsPolicy::default()
    };
    config
}

async fn me(Authenticated(claims): Authenticated) -> Json<Value> {
    Json(serde_json::json!({ "user": claims.sub, "authorities": claims.authorities }))
}

fn app(config: Config) -> Router {
    let state = Arc::new(AppState::new(config, Arc::new(FakeDirectory)).unwrap());
    http::with_resources(state, Router::new().route("/api/me", get(me)))
}

fn basic(id: &str, secret: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{id}:{secret}"));
    format!("Basic {encoded}")
}

fn form_post(uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
}

fn token_request(client_id: &str, body: &str) -> Request<Body> {
    form_post("/oauth/token")
        .header(header::AUTHORIZATION, basic(client_id, "s3cr3t"))
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn password_request(client_id: &str, extra: &str) -> Request<Body> {
    token_request(
        client_id,
        &format!("grant_type=password&username=alice&password=correct-pw{extra}"),
    )
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, headers, body)
}

fn bearer_get(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_password_grant_issues_token_pair() {
    let app = app(config());

    let (status, headers, body) = send(&app, password_request("acme", "")).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(headers[header::CACHE_CONTROL], "no-store");
    assert_eq!(body["token_type"], "bearer");
    assert_eq!(body["expires_in"], 3600);
    assert_eq!(body["scope"], "read write");
    assert!(body["access_token"].as_str().is_some());
    assert!(body["refresh_token"].as_str().is_some());
    assert!(body["jti"].as_str().is_some());
}

#[tokio::test]
async fn test_client_credentials_in_form_body() {
    let app = app(config());
    let request = form_post("/oauth/token")
        .body(Body::from(
            "grant_type=password&client_id=acme&client_secret=s3cr3t&username=alice&password=correct-pw&scope=read",
        ))
        .unwrap();

    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["scope"], "read");
}

#[tokio::test]
async fn test_grant_failures() {
    let app = app(config());

    let (status, _, body) = send(
        &app,
        token_request(
            "acme",
            "grant_type=password&username=alice&password=wrong",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_grant");

    let (status, headers, body) = send(&app, password_request("nobody", "")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_client");
    assert!(headers[header::WWW_AUTHENTICATE]
        .to_str()
        .unwrap()
        .starts_with("Basic"));

    let (status, _, body) = send(&app, password_request("acme", "&scope=admin")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_scope");

    let (status, _, body) = send(&app, token_request("acme", "grant_type=client_credentials")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "unsupported_grant_type");

    let (status, _, body) = send(&app, token_request("acme", "grant_type=password&username=alice")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn test_directory_outage_is_503() {
    let app = app(config());
    let (status, _, body) = send(
        &app,
        token_request("acme", "grant_type=password&username=outage&password=x"),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "temporarily_unavailable");
    assert!(!body["error_description"]
        .as_str()
        .unwrap()
        .contains("connection refused"));
}

#[tokio::test]
async fn test_consent_required_for_third_party_client() {
    let app = app(config());

    let (status, _, body) = send(&app, password_request("third-party", "&scope=read")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "access_denied");

    let approve = form_post("/oauth/approvals")
        .body(Body::from(
            "username=alice&password=correct-pw&client_id=third-party&scope=read&decision=approved",
        ))
        .unwrap();
    let (status, _, body) = send(&app, approve).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body[0]["scope"], "read");
    assert_eq!(body[0]["decision"], "approved");

    let (status, _, body) = send(&app, password_request("third-party", "&scope=read")).await;
    assert_eq!(status, StatusCode::OK, "{body}");

    // write was never approved
    let (status, _, _) = send(&app, password_request("third-party", "")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_approval_needs_valid_user() {
    let app = app(config());
    let approve = form_post("/oauth/approvals")
        .body(Body::from(
            "username=alice&password=nope&client_id=third-party&scope=read&decision=approved",
        ))
        .unwrap();
    let (status, _, _) = send(&app, approve).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = send(&app, password_request("third-party", "&scope=read")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_refresh_token_is_single_use() {
    let app = app(config());
    let (_, _, body) = send(&app, password_request("acme", "")).await;
    let refresh = body["refresh_token"].as_str().unwrap().to_string();

    let exchange = format!("grant_type=refresh_token&refresh_token={refresh}&scope=read");
    let (status, _, body) = send(&app, token_request("acme", &exchange)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["scope"], "read");

    let (status, _, body) = send(&app, token_request("acme", &exchange)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_token");
}

#[tokio::test]
async fn test_refresh_by_another_client_is_rejected() {
    let app = app(config());
    let (_, _, body) = send(&app, password_request("acme", "")).await;
    let refresh = body["refresh_token"].as_str().unwrap();

    let (status, _, body) = send(
        &app,
        token_request(
            "third-party",
            &format!("grant_type=refresh_token&refresh_token={refresh}"),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_grant");
}

#[tokio::test]
async fn test_bearer_guard() {
    let app = app(config());

    let unauthenticated = Request::builder()
        .uri("/api/me")
        .body(Body::empty())
        .unwrap();
    let (status, headers, _) = send(&app, unauthenticated).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(headers[header::WWW_AUTHENTICATE], "Bearer");

    let (status, headers, _) = send(&app, bearer_get("/api/me", "not-a-jwt")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        headers[header::WWW_AUTHENTICATE],
        "Bearer error=\"invalid_token\""
    );

    let (_, _, tokens) = send(&app, password_request("acme", "")).await;

    let refresh = tokens["refresh_token"].as_str().unwrap();
    let (status, _, _) = send(&app, bearer_get("/api/me", refresh)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let access = tokens["access_token"].as_str().unwrap();
    let (status, _, body) = send(&app, bearer_get("/api/me", access)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"], "alice");
    assert_eq!(body["authorities"][0], "ROLE_DEVELOPERS");

    // Unknown paths are guarded too
    let (status, _, _) = send(&app, bearer_get("/nowhere", "not-a-jwt")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_token_from_other_server_is_rejected() {
    let other = app(config());
    let app = app(config());
    let (_, _, tokens) = send(&other, password_request("acme", "")).await;

    let access = tokens["access_token"].as_str().unwrap();
    let (status, _, body) = send(&app, bearer_get("/api/me", access)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_token");
}

#[tokio::test]
async fn test_own_approvals_listing_and_revoke() {
    let app = app(config());
    let (_, _, tokens) = send(&app, password_request("acme", "")).await;
    let access = tokens["access_token"].as_str().unwrap();

    let (status, _, body) = send(&app, bearer_get("/approvals", access)).await;
    assert_eq!(status, StatusCode::OK);
    let scopes: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["scope"].as_str().unwrap())
        .collect();
    assert_eq!(scopes, vec!["read", "write"]);

    let revoke = || {
        Request::builder()
            .method(Method::DELETE)
            .uri("/approvals/write")
            .header(header::AUTHORIZATION, format!("Bearer {access}"))
            .body(Body::empty())
            .unwrap()
    };
    let (status, _, _) = send(&app, revoke()).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _, _) = send(&app, revoke()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_check_token() {
    let app = app(config());
    let (_, _, tokens) = send(&app, password_request("acme", "")).await;
    let access = tokens["access_token"].as_str().unwrap();

    let check = |authorization: Option<String>, body: String| {
        let mut builder = form_post("/oauth/check_token");
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::from(body)).unwrap()
    };

    let (status, _, body) = send(
        &app,
        check(Some(basic("third-party", "s3cr3t")), format!("token={access}")),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["active"], true);
    assert_eq!(body["sub"], "alice");
    assert_eq!(body["client_id"], "acme");
    assert_eq!(body["token_use"], "access");

    let (status, _, body) = send(&app, check(None, format!("token={access}"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_client");

    let (status, _, body) = send(
        &app,
        check(Some(basic("acme", "wrong")), format!("token={access}")),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_client");

    let (status, _, body) = send(
        &app,
        check(Some(basic("acme", "s3cr3t")), "token=garbage".to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_token");
}

#[tokio::test]
async fn test_token_key_is_not_published_for_shared_secret() {
    let app = app(config());
    let request = Request::builder()
        .uri("/oauth/token_key")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_cors_rejects_unknown_origin_on_every_method() {
    let app = app(config());

    for method in [Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS] {
        let request = Request::builder()
            .method(method.clone())
            .uri("/oauth/token_key")
            .header(header::ORIGIN, "https://evil.example.com")
            .body(Body::empty())
            .unwrap();
        let (status, headers, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{method}");
        assert_eq!(body, "Invalid CORS request");
        assert!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    // Rejected before credentials are even looked at
    let mut request = password_request("acme", "");
    request
        .headers_mut()
        .insert(header::ORIGIN, "https://evil.example.com".parse().unwrap());
    let (status, _, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_cors_allowed_origin() {
    let app = app(config());

    let preflight = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/me")
        .header(header::ORIGIN, "https://app.example.com")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "authorization")
        .body(Body::empty())
        .unwrap();
    let (status, headers, _) = send(&app, preflight).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "https://app.example.com"
    );
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], "authorization");

    let mut request = password_request("acme", "");
    request
        .headers_mut()
        .insert(header::ORIGIN, "https://app.example.com".parse().unwrap());
    let (status, headers, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "https://app.example.com"
    );
    assert_eq!(headers[header::VARY], "Origin");
}

#[tokio::test]
async fn test_malformed_form_is_invalid_request() {
    let app = app(config());

    let no_content_type = Request::builder()
        .method(Method::POST)
        .uri("/oauth/token")
        .header(header::AUTHORIZATION, basic("acme", "s3cr3t"))
        .body(Body::from(
            "grant_type=password&username=alice&password=correct-pw",
        ))
        .unwrap();
    let (status, headers, body) = send(&app, no_content_type).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(body["error"], "invalid_request");
    assert!(body["error_description"].as_str().is_some());
    assert_eq!(headers[header::CACHE_CONTROL], "no-store");

    let json_approval = Request::builder()
        .method(Method::POST)
        .uri("/oauth/approvals")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"username":"alice"}"#))
        .unwrap();
    let (status, _, body) = send(&app, json_approval).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");
}
