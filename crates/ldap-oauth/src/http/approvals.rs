//! Scope approval endpoints
//!
//! `POST /oauth/approvals` is where a user, authenticating with their
//! directory credentials, approves or denies scopes for a client. The
//! bearer-protected `/approvals` routes let a token holder review and revoke
//! what they granted to the client that holds the token.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use crate::approvals::{Approval, ApprovalDecision};
use crate::error::{GrantError, OAuthError};
use crate::http::{required, Authenticated, GrantForm};
use crate::token::parse_scopes;
use crate::AppState;

/// Approval form (form-encoded)
#[derive(Debug, Deserialize)]
pub struct ApprovalRequest {
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub client_id: Option<String>,

    /// Space separated scopes the decision applies to
    #[serde(default)]
    pub scope: Option<String>,

    /// "approved" or "denied"
    #[serde(default)]
    pub decision: Option<String>,
}

/// Handler for `POST /oauth/approvals`
pub async fn record_handler(
    State(state): State<Arc<AppState>>,
    GrantForm(request): GrantForm<ApprovalRequest>,
) -> Result<Json<Vec<Approval>>, OAuthError> {
    let client_id = required(request.client_id, "client_id")?;
    let decision: ApprovalDecision = required(request.decision, "decision")?.parse()?;
    let scopes = parse_scopes(request.scope.as_deref());
    if scopes.is_empty() {
        return Err(GrantError::InvalidRequest("scope is required".to_string()).into());
    }

    // Unknown clients and scopes are rejected before the directory is asked.
    let client = state.issuer.clients().lookup(&client_id)?;
    if let Some(unknown) = scopes.iter().find(|s| !client.scopes.contains(*s)) {
        return Err(GrantError::InvalidScope(unknown.clone()).into());
    }

    let username = required(request.username, "username")?;
    let password = required(request.password, "password")?;
    let principal = state.validator.validate(&username, &password).await?;

    for scope in &scopes {
        state
            .approvals
            .record_approval(&principal.subject, &client.client_id, scope, decision);
    }
    tracing::info!(
        "User {} recorded {:?} for client {} on {} scope(s)",
        principal.subject,
        decision,
        client.client_id,
        scopes.len()
    );

    Ok(Json(
        state
            .approvals
            .approvals_for(&principal.subject, &client.client_id),
    ))
}

/// Handler for `GET /approvals`
pub async fn list_handler(
    State(state): State<Arc<AppState>>,
    Authenticated(claims): Authenticated,
) -> Json<Vec<Approval>> {
    Json(state.approvals.approvals_for(&claims.sub, &claims.client_id))
}

/// Handler for `DELETE /approvals/{scope}`
pub async fn revoke_handler(
    State(state): State<Arc<AppState>>,
    Authenticated(claims): Authenticated,
    Path(scope): Path<String>,
) -> Response {
    if state.approvals.revoke(&claims.sub, &claims.client_id, &scope) {
        tracing::info!(
            "User {} revoked scope {} for client {}",
            claims.sub,
            scope,
            claims.client_id
        );
        StatusCode::NO_CONTENT.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}
