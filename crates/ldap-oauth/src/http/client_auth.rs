//! Client credentials from `Authorization: Basic` or form fields.

use axum::http::{header, HeaderMap};
use base64::Engine;

use crate::error::ClientError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Decode `Basic base64(id:secret)`. Returns `None` when the header is
/// absent or is not a Basic credential.
pub fn parse_basic_auth(headers: &HeaderMap) -> Option<ClientCredentials> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value
        .strip_prefix("Basic ")
        .or_else(|| value.strip_prefix("basic "))?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (client_id, client_secret) = decoded.split_once(':')?;
    Some(ClientCredentials {
        client_id: client_id.to_string(),
        client_secret: client_secret.to_string(),
    })
}

/// Basic auth wins over form fields. Neither present is an unknown client.
pub fn extract(
    headers: &HeaderMap,
    form_id: Option<&str>,
    form_secret: Option<&str>,
) -> Result<ClientCredentials, ClientError> {
    if let Some(credentials) = parse_basic_auth(headers) {
        return Ok(credentials);
    }
    match (form_id, form_secret) {
        (Some(client_id), Some(client_secret)) => Ok(ClientCredentials {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        }),
        _ => Err(ClientError::NotFound),
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn basic(raw: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let encoded = base64::engine::general_purpose::STANDARD.encode(raw);
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {encoded}")).unwrap(),
        );
        headers
    }

    #[test]
    fn test_basic_auth() {
        let credentials = parse_basic_auth(&basic("acme:s3cr3t")).unwrap();
        assert_eq!(credentials.client_id, "acme");
        assert_eq!(credentials.client_secret, "s3cr3t");
    }

    #[test]
    fn test_secret_may_contain_colon() {
        let credentials = parse_basic_auth(&basic("acme:a:b")).unwrap();
        assert_eq!(credentials.client_secret, "a:b");
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_basic_auth(&basic("no-colon")).is_none());

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic !!!"));
        assert!(parse_basic_auth(&headers).is_none());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert!(parse_basic_auth(&headers).is_none());
    }

    #[test]
    fn test_header_preferred_over_form() {
        let credentials = extract(&basic("acme:s3cr3t"), Some("other"), Some("x")).unwrap();
        assert_eq!(credentials.client_id, "acme");

        let credentials = extract(&HeaderMap::new(), Some("other"), Some("x")).unwrap();
        assert_eq!(credentials.client_id, "other");

        assert_eq!(
            extract(&HeaderMap::new(), Some("other"), None),
            Err(ClientError::NotFound)
        );
    }
}
