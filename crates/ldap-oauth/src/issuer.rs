//! Password and refresh-token grants.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::approvals::{ApprovalDecision, ApprovalStore};
use crate::clients::{authenticate_client, Client, ClientRegistry, GrantType};
use crate::directory::CredentialValidator;
use crate::error::{GrantError, OAuthError, TokenError};
use crate::replay::UsedTokenSet;
use crate::token::{join_scopes, Claims, TokenSigner, TokenUse};

/// `grant_type=password` request
#[derive(Debug, Clone)]
pub struct PasswordGrant {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    /// Empty means every scope registered to the client
    pub scopes: BTreeSet<String>,
}

/// `grant_type=refresh_token` request
#[derive(Debug, Clone)]
pub struct RefreshGrant {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    /// Empty keeps the original scope; otherwise must narrow it
    pub scopes: BTreeSet<String>,
}

/// Newly minted tokens
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    /// Only minted for clients allowed the refresh_token grant
    pub refresh_token: Option<String>,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub scope: BTreeSet<String>,
    /// Id of the access token
    pub jti: String,
}

/// Mints token pairs after checking the client, the user and consent.
pub struct TokenIssuer {
    clients: Arc<dyn ClientRegistry>,
    validator: Arc<dyn CredentialValidator>,
    approvals: Arc<ApprovalStore>,
    signer: Arc<dyn TokenSigner>,
    used_refresh_tokens: Arc<UsedTokenSet>,
    issuer: String,
}

impl TokenIssuer {
    pub fn new(
        clients: Arc<dyn ClientRegistry>,
        validator: Arc<dyn CredentialValidator>,
        approvals: Arc<ApprovalStore>,
        signer: Arc<dyn TokenSigner>,
        used_refresh_tokens: Arc<UsedTokenSet>,
        issuer: impl Into<String>,
    ) -> Self {
        Self {
            clients,
            validator,
            approvals,
            signer,
            used_refresh_tokens,
            issuer: issuer.into(),
        }
    }

    pub fn clients(&self) -> &dyn ClientRegistry {
        self.clients.as_ref()
    }

    pub async fn issue_password_grant(&self, grant: PasswordGrant) -> Result<TokenPair, OAuthError> {
        let client =
            authenticate_client(self.clients.as_ref(), &grant.client_id, &grant.client_secret)
                .await?;
        if !client.allows(GrantType::Password) {
            return Err(GrantError::UnsupportedGrantType(GrantType::Password.to_string()).into());
        }

        let principal = self
            .validator
            .validate(&grant.username, &grant.password)
            .await?;

        let scopes = resolve_scopes(&client, grant.scopes)?;
        self.check_approval(&client, &principal.subject, &scopes)?;

        let pair = self.mint(
            &client,
            &principal.subject,
            principal.authorities(),
            scopes,
            Utc::now(),
        )?;
        tracing::info!(
            "Issued access token for user {} via client {} (scope: {})",
            principal.subject,
            client.client_id,
            join_scopes(&pair.scope)
        );
        Ok(pair)
    }

    /// Exchange a refresh token for a new pair. Each refresh token works once.
    pub async fn refresh(&self, grant: RefreshGrant) -> Result<TokenPair, OAuthError> {
        let client =
            authenticate_client(self.clients.as_ref(), &grant.client_id, &grant.client_secret)
                .await?;
        if !client.allows(GrantType::RefreshToken) {
            return Err(
                GrantError::UnsupportedGrantType(GrantType::RefreshToken.to_string()).into(),
            );
        }

        let now = Utc::now();
        let claims = self.signer.decode(&grant.refresh_token)?;
        if claims.token_use != TokenUse::Refresh {
            return Err(TokenError::Malformed.into());
        }
        if claims.is_expired_at(now) {
            return Err(TokenError::Expired.into());
        }
        if claims.client_id != client.client_id {
            return Err(
                GrantError::InvalidGrant("Refresh token was issued to another client".into())
                    .into(),
            );
        }

        let scopes = if grant.scopes.is_empty() {
            claims.scope.clone()
        } else if grant.scopes.is_subset(&claims.scope) {
            grant.scopes
        } else {
            let extra = join_scopes(
                &grant
                    .scopes
                    .difference(&claims.scope)
                    .cloned()
                    .collect::<BTreeSet<_>>(),
            );
            return Err(GrantError::InvalidScope(extra).into());
        };

        // Last check before minting so a rejected request spends nothing.
        if !self
            .used_refresh_tokens
            .mark_used(&claims.jti, claims.expires_at())
        {
            tracing::warn!(
                "Refresh token {} for user {} presented again",
                claims.jti,
                claims.sub
            );
            return Err(TokenError::AlreadyUsed.into());
        }

        let pair = self.mint(&client, &claims.sub, claims.authorities, scopes, now)?;
        tracing::info!(
            "Refreshed access token for user {} via client {}",
            claims.sub,
            client.client_id
        );
        Ok(pair)
    }

    fn check_approval(
        &self,
        client: &Client,
        user_id: &str,
        scopes: &BTreeSet<String>,
    ) -> Result<(), GrantError> {
        if client.auto_approve {
            for scope in scopes {
                self.approvals.record_approval(
                    user_id,
                    &client.client_id,
                    scope,
                    ApprovalDecision::Approved,
                );
            }
            return Ok(());
        }

        let missing: Vec<&str> = scopes
            .iter()
            .filter(|scope| !self.approvals.is_approved(user_id, &client.client_id, scope))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(GrantError::UnapprovedConsent(missing.join(" ")))
        }
    }

    fn mint(
        &self,
        client: &Client,
        subject: &str,
        authorities: Vec<String>,
        scope: BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> Result<TokenPair, TokenError> {
        let iat = now.timestamp();
        let access_jti = Uuid::new_v4().to_string();

        let access = Claims {
            sub: subject.to_string(),
            client_id: client.client_id.clone(),
            scope: scope.clone(),
            authorities: authorities.clone(),
            iss: self.issuer.clone(),
            iat,
            exp: expiry(iat, client.access_token_ttl_secs),
            jti: access_jti.clone(),
            token_use: TokenUse::Access,
            ati: None,
        };
        let access_token = self.signer.sign(&access)?;

        let refresh_token = if client.allows(GrantType::RefreshToken) {
            let refresh = Claims {
                exp: expiry(iat, client.refresh_token_ttl_secs),
                jti: Uuid::new_v4().to_string(),
                token_use: TokenUse::Refresh,
                ati: Some(access_jti.clone()),
                ..access
            };
            Some(self.signer.sign(&refresh)?)
        } else {
            None
        };

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "bearer",
            expires_in: client.access_token_ttl_secs,
            scope,
            jti: access_jti,
        })
    }
}

fn expiry(iat: i64, ttl_secs: u64) -> i64 {
    iat.saturating_add(i64::try_from(ttl_secs).unwrap_or(i64::MAX))
}

/// Empty request means all registered scopes; anything unregistered is an error.
fn resolve_scopes(client: &Client, requested: BTreeSet<String>) -> Result<BTreeSet<String>, GrantError> {
    if requested.is_empty() {
        return Ok(client.scopes.clone());
    }
    let unknown: BTreeSet<String> = requested.difference(&client.scopes).cloned().collect();
    if unknown.is_empty() {
        Ok(requested)
    } else {
        Err(GrantError::InvalidScope(join_scopes(&unknown)))
    }
}
