//! JWT claims and signing.
//!
//! Access and refresh tokens share one claim set and differ in `token_use`.
//! Tokens are self-contained: nothing about an issued token is stored
//! server-side except the ids of refresh tokens that have been spent.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::SigningConfig;
use crate::error::TokenError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenUse {
    Access,
    Refresh,
}

/// JWT payload of both access and refresh tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Authenticated user
    pub sub: String,
    pub client_id: String,
    #[serde(default)]
    pub scope: BTreeSet<String>,
    /// Directory groups as `ROLE_<NAME>`
    #[serde(default)]
    pub authorities: Vec<String>,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    pub token_use: TokenUse,
    /// On refresh tokens: id of the access token minted alongside
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ati: Option<String>,
}

impl Claims {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scope.contains(scope)
    }

    /// Space-delimited scope list as used on the wire
    pub fn scope_string(&self) -> String {
        join_scopes(&self.scope)
    }

    /// A token is valid only while `exp` is strictly in the future.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.exp <= now.timestamp()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

pub fn join_scopes(scopes: &BTreeSet<String>) -> String {
    scopes.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
}

/// Split a space-delimited `scope` parameter
pub fn parse_scopes(raw: Option<&str>) -> BTreeSet<String> {
    raw.map(|s| s.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Public half of the signing key, as served by `/oauth/token_key`
#[derive(Debug, Clone, Serialize)]
pub struct VerificationKey {
    pub alg: String,
    pub value: String,
}

/// Signs and decodes tokens with the server's key
pub trait TokenSigner: Send + Sync {
    fn sign(&self, claims: &Claims) -> Result<String, TokenError>;

    /// Check signature, issuer and structure. Expiry is left to the caller
    /// so that it can be judged against a caller-supplied instant.
    fn decode(&self, token: &str) -> Result<Claims, TokenError>;

    /// `None` when the key is a shared secret that must not be published.
    fn verification_key(&self) -> Option<VerificationKey>;
}

/// `jsonwebtoken`-backed signer for HS256 secrets and Ed25519 key pairs
pub struct JwtSigner {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    public_key_pem: Option<String>,
}

impl JwtSigner {
    /// HMAC signer using a shared secret.
    pub fn hs256(secret: &[u8], issuer: impl Into<String>) -> Self {
        Self {
            algorithm: Algorithm::HS256,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: issuer.into(),
            public_key_pem: None,
        }
    }

    /// EdDSA signer from a PEM-encoded Ed25519 key pair.
    pub fn ed25519(
        private_key_pem: &str,
        public_key_pem: &str,
        issuer: impl Into<String>,
    ) -> Result<Self, TokenError> {
        let encoding_key = EncodingKey::from_ed_pem(private_key_pem.as_bytes())
            .map_err(|e| TokenError::Signing(format!("bad private key: {e}")))?;
        let decoding_key = DecodingKey::from_ed_pem(public_key_pem.as_bytes())
            .map_err(|e| TokenError::Signing(format!("bad public key: {e}")))?;
        Ok(Self {
            algorithm: Algorithm::EdDSA,
            encoding_key,
            decoding_key,
            issuer: issuer.into(),
            public_key_pem: Some(public_key_pem.to_string()),
        })
    }

    pub fn from_config(signing: &SigningConfig, issuer: &str) -> Result<Self, TokenError> {
        match signing {
            SigningConfig::Hs256 { secret } => Ok(Self::hs256(secret.as_bytes(), issuer)),
            SigningConfig::EdDsa {
                private_key_pem,
                public_key_pem,
            } => Self::ed25519(private_key_pem, public_key_pem, issuer),
        }
    }
}

impl TokenSigner for JwtSigner {
    fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        let header = Header::new(self.algorithm);
        jsonwebtoken::encode(&header, claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["sub", "exp", "iss"]);

        jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    TokenError::BadSignature
                }
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => {
                    tracing::debug!("Undecodable token: {}", e);
                    TokenError::Malformed
                }
            })
    }

    fn verification_key(&self) -> Option<VerificationKey> {
        self.public_key_pem.as_ref().map(|pem| VerificationKey {
            alg: "EdDSA".to_string(),
            value: pem.clone(),
        })
    }
}
