//! `GET /oauth/token_key`
//!
//! Lets resource servers verify tokens offline. Only asymmetric keys are
//! published; an HMAC secret is never served.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::error::ErrorBody;
use crate::AppState;

pub async fn handler(State(state): State<Arc<AppState>>) -> Response {
    match state.signer.verification_key() {
        Some(key) => {
            tracing::debug!("Serving {} verification key", key.alg);
            Json(key).into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: "not_found".to_string(),
                error_description: "Tokens are signed with a shared secret; no public key is available"
                    .to_string(),
            }),
        )
            .into_response(),
    }
}
