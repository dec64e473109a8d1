//! HTTP surface
//!
//! Implements:
//! - `POST /oauth/token`: password and refresh_token grants
//! - `GET /oauth/token_key`: public verification key
//! - `POST /oauth/check_token`: token introspection for resource servers
//! - `POST /oauth/approvals`: record a user's scope decisions
//! - `GET /approvals`, `DELETE /approvals/{scope}`: bearer-protected view of
//!   the caller's own approvals

pub mod approvals;
pub mod check_token;
pub mod client_auth;
pub mod guard;
pub mod token;
pub mod token_key;

use std::sync::Arc;

use axum::{
    extract::{FromRequest, Request},
    middleware,
    routing::{delete, get, post},
    Form, Router,
};
use serde::de::DeserializeOwned;
use tower_http::trace::TraceLayer;

use crate::cors;
use crate::error::{GrantError, OAuthError};
use crate::AppState;

pub use guard::Authenticated;

/// Router with the built-in endpoints only.
pub fn router(state: Arc<AppState>) -> Router {
    with_resources(state, Router::new())
}

/// Router with additional protected resource routes merged in. Every route
/// outside the configured public paths passes the bearer guard, and every
/// request passes the CORS gate first.
pub fn with_resources(state: Arc<AppState>, resources: Router<Arc<AppState>>) -> Router {
    Router::new()
        .route("/oauth/token", post(token::handler))
        .route("/oauth/token_key", get(token_key::handler))
        .route("/oauth/check_token", post(check_token::handler))
        .route("/oauth/approvals", post(approvals::record_handler))
        .route("/approvals", get(approvals::list_handler))
        .route("/approvals/{scope}", delete(approvals::revoke_handler))
        .merge(resources)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            guard::require_bearer,
        ))
        .layer(middleware::from_fn_with_state(
            state.cors.clone(),
            cors::enforce,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A form field the grant cannot do without
pub(crate) fn required(value: Option<String>, name: &str) -> Result<String, GrantError> {
    value.ok_or_else(|| GrantError::InvalidRequest(format!("{} is required", name)))
}

/// Form body whose rejection is an OAuth `invalid_request` rather than
/// axum's plain-text response
pub struct GrantForm<T>(pub T);

impl<T, S> FromRequest<S> for GrantForm<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = OAuthError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Form::<T>::from_request(req, state).await {
            Ok(Form(value)) => Ok(GrantForm(value)),
            Err(rejection) => Err(GrantError::InvalidRequest(rejection.body_text()).into()),
        }
    }
}
