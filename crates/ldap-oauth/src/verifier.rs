//! Bearer token verification for protected resources.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::TokenError;
use crate::token::{Claims, TokenSigner, TokenUse};

/// Stateless check of inbound access tokens. Performs no I/O.
#[derive(Clone)]
pub struct TokenVerifier {
    signer: Arc<dyn TokenSigner>,
}

impl TokenVerifier {
    pub fn new(signer: Arc<dyn TokenSigner>) -> Self {
        Self { signer }
    }

    pub fn verify(&self, bearer: &str) -> Result<Claims, TokenError> {
        self.verify_at(bearer, Utc::now())
    }

    /// Verify as of `now`: signature first, then token use, then expiry.
    pub fn verify_at(&self, bearer: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let claims = self.signer.decode(bearer.trim())?;
        if claims.token_use != TokenUse::Access {
            return Err(TokenError::Malformed);
        }
        if claims.is_expired_at(now) {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Duration;

    use super::*;
    use crate::token::JwtSigner;

    fn signer() -> Arc<JwtSigner> {
        Arc::new(JwtSigner::hs256(b"0123456789abcdef0123456789abcdef", "test"))
    }

    fn claims(token_use: TokenUse, iat: i64, ttl: i64) -> Claims {
        Claims {
            sub: "alice".to_string(),
            client_id: "acme".to_string(),
            scope: BTreeSet::from(["read".to_string()]),
            authorities: Vec::new(),
            iss: "test".to_string(),
            iat,
            exp: iat + ttl,
            jti: uuid::Uuid::new_v4().to_string(),
            token_use,
            ati: None,
        }
    }

    #[test]
    fn test_valid_until_expiry_then_expired() {
        let signer = signer();
        let verifier = TokenVerifier::new(signer.clone());
        let issued = Utc::now();
        let token = signer
            .sign(&claims(TokenUse::Access, issued.timestamp(), 3600))
            .unwrap();

        assert!(verifier.verify_at(&token, issued).is_ok());
        assert!(verifier
            .verify_at(&token, issued + Duration::seconds(3599))
            .is_ok());
        for offset in [3600, 3601, 86_400] {
            assert_eq!(
                verifier
                    .verify_at(&token, issued + Duration::seconds(offset))
                    .unwrap_err(),
                TokenError::Expired
            );
        }
    }

    #[test]
    fn test_refresh_token_is_not_a_bearer() {
        let signer = signer();
        let verifier = TokenVerifier::new(signer.clone());
        let token = signer
            .sign(&claims(TokenUse::Refresh, Utc::now().timestamp(), 3600))
            .unwrap();
        assert_eq!(verifier.verify(&token).unwrap_err(), TokenError::Malformed);
    }

    #[test]
    fn test_tampered_payload_is_bad_signature() {
        let signer = signer();
        let verifier = TokenVerifier::new(signer.clone());
        let token = signer
            .sign(&claims(TokenUse::Access, Utc::now().timestamp(), 3600))
            .unwrap();

        // Re-sign nothing; swap in a payload granting another subject.
        let mut parts: Vec<&str> = token.split('.').collect();
        let mut forged = claims(TokenUse::Access, Utc::now().timestamp(), 3600);
        forged.sub = "mallory".to_string();
        let forged_payload = base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            serde_json::to_vec(&forged).unwrap(),
        );
        parts[1] = &forged_payload;
        let forged_token = parts.join(".");

        assert_eq!(
            verifier.verify(&forged_token).unwrap_err(),
            TokenError::BadSignature
        );
    }
}
