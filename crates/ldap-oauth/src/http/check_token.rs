//! `POST /oauth/check_token`
//!
//! Introspection for resource servers. The caller must authenticate as a
//! registered client with HTTP Basic; the token is then verified the same way
//! the bearer guard verifies it.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::clients::authenticate_client;
use crate::error::{ClientError, ErrorBody, OAuthError};
use crate::http::{client_auth, GrantForm};
use crate::token::Claims;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CheckTokenRequest {
    #[serde(default)]
    pub token: Option<String>,
}

/// Decoded claims of an active token
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckTokenResponse {
    pub active: bool,
    #[serde(flatten)]
    pub claims: Claims,
}

pub async fn handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    GrantForm(request): GrantForm<CheckTokenRequest>,
) -> Response {
    let Some(credentials) = client_auth::parse_basic_auth(&headers) else {
        return OAuthError::from(ClientError::NotFound).into_response();
    };
    let client = match authenticate_client(
        state.issuer.clients(),
        &credentials.client_id,
        &credentials.client_secret,
    )
    .await
    {
        Ok(client) => client,
        Err(e) => return OAuthError::from(e).into_response(),
    };

    let Some(token) = request.token else {
        return invalid_token("token is required".to_string());
    };

    match state.verifier.verify(&token) {
        Ok(claims) => {
            tracing::debug!(
                "Client {} checked token {} of user {}",
                client.client_id,
                claims.jti,
                claims.sub
            );
            Json(CheckTokenResponse {
                active: true,
                claims,
            })
            .into_response()
        }
        Err(e) => invalid_token(e.to_string()),
    }
}

fn invalid_token(description: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            error: "invalid_token".to_string(),
            error_description: description,
        }),
    )
        .into_response()
}
