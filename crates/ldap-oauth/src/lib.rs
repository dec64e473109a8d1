//! OAuth2 authorization and resource server backed by an LDAP directory.
//!
//! Provides:
//! - Resource-owner password and refresh-token grants, issuing signed JWTs
//! - LDAP credential validation (bind, then bcrypt password compare)
//! - Per-user scope approvals with expiry
//! - Single-use refresh tokens
//! - A CORS gate that refuses disallowed origins
//! - A bearer-token guard for every non-public route

pub mod approvals;
pub mod clients;
pub mod config;
pub mod cors;
pub mod directory;
pub mod error;
pub mod http;
pub mod issuer;
pub mod password;
pub mod replay;
pub mod token;
pub mod verifier;

use std::sync::Arc;
use std::time::Duration;

use crate::approvals::ApprovalStore;
use crate::clients::InMemoryClientRegistry;
use crate::config::Config;
use crate::cors::CorsGate;
use crate::directory::CredentialValidator;
use crate::error::TokenError;
use crate::issuer::TokenIssuer;
use crate::replay::UsedTokenSet;
use crate::token::{JwtSigner, TokenSigner};
use crate::verifier::TokenVerifier;

pub use crate::http::router;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub issuer: TokenIssuer,
    pub verifier: TokenVerifier,
    pub signer: Arc<dyn TokenSigner>,
    pub validator: Arc<dyn CredentialValidator>,
    pub approvals: Arc<ApprovalStore>,
    pub used_refresh_tokens: Arc<UsedTokenSet>,
    pub cors: Arc<CorsGate>,
}

impl AppState {
    /// Wire every component from configuration and a credential validator.
    pub fn new(config: Config, validator: Arc<dyn CredentialValidator>) -> Result<Self, TokenError> {
        let signer: Arc<dyn TokenSigner> = Arc::new(JwtSigner::from_config(
            &config.tokens.signing,
            &config.tokens.issuer,
        )?);
        let clients = Arc::new(InMemoryClientRegistry::new(config.clients.iter().cloned()));
        let approvals = Arc::new(ApprovalStore::new(Duration::from_secs(
            config.approvals.approval_lifetime_secs,
        )));
        let used_refresh_tokens = Arc::new(UsedTokenSet::new());

        let issuer = TokenIssuer::new(
            clients,
            validator.clone(),
            approvals.clone(),
            signer.clone(),
            used_refresh_tokens.clone(),
            config.tokens.issuer.clone(),
        );

        Ok(Self {
            verifier: TokenVerifier::new(signer.clone()),
            cors: Arc::new(CorsGate::new(config.cors.clone())),
            config,
            issuer,
            signer,
            validator,
            approvals,
            used_refresh_tokens,
        })
    }

    /// Drop expired approvals and spent refresh token ids.
    pub fn sweep(&self) {
        let approvals = self.approvals.purge_expired();
        let used = self.used_refresh_tokens.purge_expired();
        if approvals > 0 || used > 0 {
            tracing::debug!(
                "Swept {} expired approvals and {} used refresh token ids",
                approvals,
                used
            );
        }
    }
}
