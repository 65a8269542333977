#![cfg(feature = "web")]

use axum::extract::State;
use axum::routing::post;
use axum::{Form, Json, Router};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use tokio::net::TcpListener;

use rusty_todo::oauth::{AssertionClaims, OAuthError, SPREADSHEETS_SCOPE, ServiceAccount, TOKEN_URL, TokenSource};

const CLIENT_EMAIL: &str = "todo-writer@rusty-todo-test.iam.gserviceaccount.com";

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn verify(assertion: &str) -> AssertionClaims {
    let public_key = std::fs::read(fixture("service_account_public.pem")).unwrap();
    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_audience(&[TOKEN_URL]);
    decode::<AssertionClaims>(assertion, &DecodingKey::from_rsa_pem(&public_key).unwrap(), &validation)
        .unwrap()
        .claims
}

struct TokenEndpoint {
    hits: AtomicUsize,
    expires_in: i64,
    status: StatusCode,
}

async fn issue_token(
    State(endpoint): State<Arc<TokenEndpoint>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let hit = endpoint.hits.fetch_add(1, Ordering::SeqCst) + 1;
    if endpoint.status != StatusCode::OK {
        return (endpoint.status, Json(json!({ "error": "invalid_grant" }))).into_response();
    }

    assert_eq!(form["grant_type"], "urn:ietf:params:oauth:grant-type:jwt-bearer");
    let claims = verify(&form["assertion"]);
    assert_eq!(claims.iss, CLIENT_EMAIL);

    Json(json!({
        "access_token": format!("minted-{}", hit),
        "expires_in": endpoint.expires_in,
        "token_type": "Bearer"
    }))
    .into_response()
}

async fn start_token_endpoint(expires_in: i64, status: StatusCode) -> (String, Arc<TokenEndpoint>) {
    let endpoint = Arc::new(TokenEndpoint {
        hits: AtomicUsize::new(0),
        expires_in,
        status,
    });
    let app = Router::new()
        .route("/token", post(issue_token))
        .with_state(endpoint.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}/token", addr), endpoint)
}

fn account(token_url: &str) -> ServiceAccount {
    ServiceAccount::from_key_file(None, &fixture("service_account.json"), reqwest::Client::new())
        .unwrap()
        .with_token_url(token_url)
}

#[test]
fn test_assertion_claims() {
    let account = ServiceAccount::from_key_file(
        None,
        &fixture("service_account.json"),
        reqwest::Client::new(),
    )
    .unwrap();
    assert_eq!(account.email(), CLIENT_EMAIL);

    let now = Utc::now().timestamp();
    let claims = verify(&account.assertion(now).unwrap());
    assert_eq!(claims.iss, CLIENT_EMAIL);
    assert_eq!(claims.scope, SPREADSHEETS_SCOPE);
    assert_eq!(claims.aud, TOKEN_URL);
    assert_eq!(claims.iat, now);
    assert_eq!(claims.exp, now + 3600);
}

#[test]
fn test_email_override_and_missing_email() {
    let account = ServiceAccount::from_key_file(
        Some("other@example.iam.gserviceaccount.com".to_string()),
        &fixture("service_account.json"),
        reqwest::Client::new(),
    )
    .unwrap();
    assert_eq!(account.email(), "other@example.iam.gserviceaccount.com");

    let mut key: Value = serde_json::from_str(&std::fs::read_to_string(fixture("service_account.json")).unwrap()).unwrap();
    key.as_object_mut().unwrap().remove("client_email");
    let temp = TempDir::new().unwrap();
    let key_path = temp.path().join("key.json");
    std::fs::write(&key_path, key.to_string()).unwrap();

    assert!(matches!(
        ServiceAccount::from_key_file(None, &key_path, reqwest::Client::new()),
        Err(OAuthError::MissingEmail)
    ));
    assert!(matches!(
        ServiceAccount::from_key_file(None, &temp.path().join("absent.json"), reqwest::Client::new()),
        Err(OAuthError::KeyFile(_))
    ));
}

#[tokio::test]
async fn test_token_is_cached() {
    let (token_url, endpoint) = start_token_endpoint(3600, StatusCode::OK).await;
    let tokens = TokenSource::ServiceAccount(account(&token_url));

    assert_eq!(tokens.access_token().await.unwrap(), "minted-1");
    assert_eq!(tokens.access_token().await.unwrap(), "minted-1");
    assert_eq!(endpoint.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_short_lived_token_is_refreshed() {
    let (token_url, endpoint) = start_token_endpoint(30, StatusCode::OK).await;
    let account = account(&token_url);

    assert_eq!(account.access_token().await.unwrap(), "minted-1");
    assert_eq!(account.access_token().await.unwrap(), "minted-2");
    assert_eq!(endpoint.hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_rejected_token_request() {
    let (token_url, _) = start_token_endpoint(3600, StatusCode::BAD_REQUEST).await;
    let account = account(&token_url);

    assert!(matches!(
        account.access_token().await,
        Err(OAuthError::Rejected(400))
    ));
}

#[tokio::test]
async fn test_static_token() {
    let tokens = TokenSource::Static("fixed".to_string());
    assert_eq!(tokens.access_token().await.unwrap(), "fixed");
}
