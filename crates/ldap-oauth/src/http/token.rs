//! Token endpoint
//!
//! Handles:
//! - Resource-owner password grants
//! - Refresh token grants

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::clients::GrantType;
use crate::error::{GrantError, OAuthError};
use crate::http::{client_auth, required, GrantForm};
use crate::issuer::{PasswordGrant, RefreshGrant, TokenPair};
use crate::token::{join_scopes, parse_scopes};
use crate::AppState;

/// Token request (form-encoded)
#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    /// Grant type: "password" or "refresh_token"
    #[serde(default)]
    pub grant_type: Option<String>,

    /// Client ID, when not sent with HTTP Basic
    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub client_secret: Option<String>,

    /// Resource owner (for password grant)
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Refresh token (for refresh_token grant)
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Space separated scopes
    #[serde(default)]
    pub scope: Option<String>,
}

/// Successful token response
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_in: u64,
    pub scope: String,
    pub jti: String,
}

impl From<TokenPair> for TokenResponse {
    fn from(pair: TokenPair) -> Self {
        Self {
            scope: join_scopes(&pair.scope),
            access_token: pair.access_token,
            token_type: pair.token_type.to_string(),
            refresh_token: pair.refresh_token,
            expires_in: pair.expires_in,
            jti: pair.jti,
        }
    }
}

/// Handler for `POST /oauth/token`
pub async fn handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    GrantForm(request): GrantForm<TokenRequest>,
) -> Response {
    match exchange(&state, &headers, request).await {
        Ok(pair) => {
            let mut response = (StatusCode::OK, Json(TokenResponse::from(pair))).into_response();
            let headers = response.headers_mut();
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
            headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
            response
        }
        Err(e) => e.into_response(),
    }
}

async fn exchange(
    state: &AppState,
    headers: &HeaderMap,
    request: TokenRequest,
) -> Result<TokenPair, OAuthError> {
    let grant_type: GrantType = request
        .grant_type
        .as_deref()
        .ok_or_else(|| GrantError::InvalidRequest("grant_type is required".to_string()))?
        .parse()?;

    let credentials = client_auth::extract(
        headers,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    )?;
    let scopes = parse_scopes(request.scope.as_deref());

    tracing::debug!(
        "Token request: grant_type={} client_id={}",
        grant_type,
        credentials.client_id
    );

    match grant_type {
        GrantType::Password => {
            let username = required(request.username, "username")?;
            let password = required(request.password, "password")?;
            state
                .issuer
                .issue_password_grant(PasswordGrant {
                    client_id: credentials.client_id,
                    client_secret: credentials.client_secret,
                    username,
                    password,
                    scopes,
                })
                .await
        }
        GrantType::RefreshToken => {
            let refresh_token = required(request.refresh_token, "refresh_token")?;
            state
                .issuer
                .refresh(RefreshGrant {
                    client_id: credentials.client_id,
                    client_secret: credentials.client_secret,
                    refresh_token,
                    scopes,
                })
                .await
        }
    }
}
