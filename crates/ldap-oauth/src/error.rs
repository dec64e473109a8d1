//! Error kinds for every stage of a grant or a protected request, and
//! their mapping onto OAuth2 error responses.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Failure to authenticate a resource owner against the directory.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Bad credentials")]
    InvalidCredentials,

    /// The directory could not be reached or did not answer in time.
    /// Kept apart from `InvalidCredentials` so outages are not reported as
    /// wrong passwords.
    #[error("Directory unavailable: {0}")]
    DirectoryUnavailable(String),
}

/// Failure to authenticate the OAuth client itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("Unknown client")]
    NotFound,

    #[error("Bad client credentials")]
    SecretMismatch,
}

/// The grant request is well-formed HTTP but cannot be honoured.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrantError {
    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    #[error("User has not approved scope: {0}")]
    UnapprovedConsent(String),

    #[error("Unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    InvalidGrant(String),
}

/// A bearer or refresh token was rejected, or could not be minted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("Full authentication is required to access this resource")]
    Missing,

    #[error("Token has expired")]
    Expired,

    #[error("Token signature does not match")]
    BadSignature,

    #[error("Token is malformed")]
    Malformed,

    #[error("Refresh token has already been used")]
    AlreadyUsed,

    #[error("Failed to sign token: {0}")]
    Signing(String),
}

/// Any error the token endpoint can return.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OAuthError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Grant(#[from] GrantError),

    #[error(transparent)]
    Token(#[from] TokenError),
}

/// JSON body of every OAuth error response
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub error_description: String,
}

impl OAuthError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            OAuthError::Auth(AuthError::InvalidCredentials) => StatusCode::UNAUTHORIZED,
            OAuthError::Auth(AuthError::DirectoryUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            OAuthError::Client(_) => StatusCode::UNAUTHORIZED,
            OAuthError::Grant(_) => StatusCode::BAD_REQUEST,
            OAuthError::Token(TokenError::Signing(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            OAuthError::Token(_) => StatusCode::UNAUTHORIZED,
        }
    }

    /// Machine-readable OAuth2 error code (RFC 6749 section 5.2 where one applies).
    pub fn code(&self) -> &'static str {
        match self {
            OAuthError::Auth(AuthError::InvalidCredentials) => "invalid_grant",
            OAuthError::Auth(AuthError::DirectoryUnavailable(_)) => "temporarily_unavailable",
            OAuthError::Client(_) => "invalid_client",
            OAuthError::Grant(GrantError::InvalidScope(_)) => "invalid_scope",
            OAuthError::Grant(GrantError::UnapprovedConsent(_)) => "access_denied",
            OAuthError::Grant(GrantError::UnsupportedGrantType(_)) => "unsupported_grant_type",
            OAuthError::Grant(GrantError::InvalidRequest(_)) => "invalid_request",
            OAuthError::Grant(GrantError::InvalidGrant(_)) => "invalid_grant",
            OAuthError::Token(TokenError::Signing(_)) => "server_error",
            OAuthError::Token(_) => "invalid_token",
        }
    }

    pub fn body(&self) -> ErrorBody {
        let error_description = match self {
            // Internal detail stays in the logs.
            OAuthError::Auth(AuthError::DirectoryUnavailable(_)) => {
                "Authentication service is temporarily unavailable".to_string()
            }
            OAuthError::Token(TokenError::Signing(_)) => "Failed to generate token".to_string(),
            other => other.to_string(),
        };
        ErrorBody {
            error: self.code().to_string(),
            error_description,
        }
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = self.body();

        match &self {
            OAuthError::Auth(AuthError::DirectoryUnavailable(reason)) => {
                tracing::error!("Directory unavailable: {}", reason)
            }
            OAuthError::Token(TokenError::Signing(reason)) => {
                tracing::error!("Token signing failed: {}", reason)
            }
            other => tracing::debug!("Request rejected: {}", other),
        }

        let mut response = (status, Json(body)).into_response();
        let headers = response.headers_mut();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        if status == StatusCode::UNAUTHORIZED {
            let challenge = match &self {
                OAuthError::Client(_) => "Basic realm=\"oauth2/client\"".to_string(),
                OAuthError::Token(TokenError::Missing) => "Bearer".to_string(),
                _ => format!("Bearer error=\"{}\"", self.code()),
            };
            if let Ok(value) = HeaderValue::from_str(&challenge) {
                headers.insert(header::WWW_AUTHENTICATE, value);
            }
        }
        response
    }
}

impl IntoResponse for TokenError {
    fn into_response(self) -> Response {
        OAuthError::from(self).into_response()
    }
}
