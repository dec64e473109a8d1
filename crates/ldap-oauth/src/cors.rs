//! Cross-origin request gate.
//!
//! Runs before every handler. A request with an `Origin` outside the policy
//! is refused outright rather than merely left without CORS headers. The
//! decision is made per request and never cached.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

/// Process-wide cross-origin policy, immutable after startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsPolicy {
    /// Exact origins, or `*` for any
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    #[serde(default = "default_allowed_methods")]
    pub allowed_methods: Vec<String>,

    /// Request headers a browser may send, or `*` for any
    #[serde(default = "default_allowed_headers")]
    pub allowed_headers: Vec<String>,

    #[serde(default = "default_true")]
    pub allow_credentials: bool,

    /// How long browsers may cache a preflight answer (default: 30 minutes)
    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,
}

impl Default for CorsPolicy {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
            allowed_methods: default_allowed_methods(),
            allowed_headers: default_allowed_headers(),
            allow_credentials: default_true(),
            max_age_secs: default_max_age(),
        }
    }
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_allowed_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "DELETE", "OPTIONS"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_allowed_headers() -> Vec<String> {
    vec!["Content-Type".to_string(), "Authorization".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_max_age() -> u64 {
    1800
}

/// Outcome of evaluating one request against the policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsDecision {
    /// No `Origin` header; not a cross-origin request
    NotCors,
    /// Answer the preflight directly with these headers
    Preflight(HeaderMap),
    /// Run the handler, then add these headers to its response
    Allowed(HeaderMap),
    /// Refuse the request
    Denied(&'static str),
}

pub struct CorsGate {
    policy: CorsPolicy,
}

impl CorsGate {
    pub fn new(policy: CorsPolicy) -> Self {
        if policy.allow_credentials && policy.allowed_origins.iter().any(|o| o == "*") {
            tracing::warn!(
                "CORS allows any origin with credentials; the request origin will be echoed back"
            );
        }
        Self { policy }
    }

    pub fn evaluate(&self, origin: Option<&str>, method: &Method, headers: &HeaderMap) -> CorsDecision {
        let Some(origin) = origin else {
            return CorsDecision::NotCors;
        };
        if !self.origin_allowed(origin) {
            return CorsDecision::Denied("origin not allowed");
        }
        let Ok(allow_origin) = HeaderValue::from_str(&self.allow_origin_value(origin)) else {
            return CorsDecision::Denied("invalid origin");
        };

        let mut response_headers = HeaderMap::new();
        response_headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin);
        response_headers.insert(header::VARY, HeaderValue::from_static("Origin"));
        if self.policy.allow_credentials {
            response_headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }

        let requested_method = headers
            .get(header::ACCESS_CONTROL_REQUEST_METHOD)
            .and_then(|v| v.to_str().ok());

        match requested_method {
            Some(requested) if method == Method::OPTIONS => {
                if !self.method_allowed(requested) {
                    return CorsDecision::Denied("method not allowed");
                }
                let requested_headers = requested_headers(headers);
                if let Some(rejected) = requested_headers.iter().find(|h| !self.header_allowed(h)) {
                    tracing::debug!("CORS preflight requested disallowed header {}", rejected);
                    return CorsDecision::Denied("header not allowed");
                }

                if let Ok(methods) = HeaderValue::from_str(&self.policy.allowed_methods.join(", ")) {
                    response_headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, methods);
                }
                if !requested_headers.is_empty() {
                    if let Ok(allowed) = HeaderValue::from_str(&requested_headers.join(", ")) {
                        response_headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, allowed);
                    }
                }
                response_headers.insert(
                    header::ACCESS_CONTROL_MAX_AGE,
                    HeaderValue::from(self.policy.max_age_secs),
                );
                CorsDecision::Preflight(response_headers)
            }
            _ => {
                if !self.method_allowed(method.as_str()) {
                    return CorsDecision::Denied("method not allowed");
                }
                CorsDecision::Allowed(response_headers)
            }
        }
    }

    fn origin_allowed(&self, origin: &str) -> bool {
        let origin = origin.trim_end_matches('/');
        self.policy
            .allowed_origins
            .iter()
            .any(|allowed| allowed == "*" || allowed.trim_end_matches('/').eq_ignore_ascii_case(origin))
    }

    fn method_allowed(&self, method: &str) -> bool {
        self.policy
            .allowed_methods
            .iter()
            .any(|allowed| allowed == "*" || allowed == method)
    }

    fn header_allowed(&self, name: &str) -> bool {
        self.policy
            .allowed_headers
            .iter()
            .any(|allowed| allowed == "*" || allowed.eq_ignore_ascii_case(name))
    }

    fn allow_origin_value(&self, origin: &str) -> String {
        let any = self.policy.allowed_origins.iter().any(|o| o == "*");
        if any && !self.policy.allow_credentials {
            "*".to_string()
        } else {
            origin.to_string()
        }
    }
}

fn requested_headers(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::ACCESS_CONTROL_REQUEST_HEADERS)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|h| h.trim().to_ascii_lowercase())
        .filter(|h| !h.is_empty())
        .collect()
}

/// Middleware applying the gate to every request
pub async fn enforce(State(gate): State<Arc<CorsGate>>, request: Request, next: Next) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    match gate.evaluate(origin.as_deref(), request.method(), request.headers()) {
        CorsDecision::NotCors => next.run(request).await,
        CorsDecision::Preflight(headers) => (StatusCode::OK, headers).into_response(),
        CorsDecision::Allowed(headers) => {
            let mut response = next.run(request).await;
            let target = response.headers_mut();
            for (name, value) in headers.iter() {
                if name == header::VARY {
                    target.append(name.clone(), value.clone());
                } else {
                    target.insert(name.clone(), value.clone());
                }
            }
            response
        }
        CorsDecision::Denied(reason) => {
            tracing::debug!(
                "Rejected cross-origin request from {:?}: {}",
                origin,
                reason
            );
            (StatusCode::FORBIDDEN, "Invalid CORS request").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strict() -> CorsGate {
        CorsGate::new(CorsPolicy {
            allowed_origins: vec!["https://app.example.com".to_string()],
            ..CorsPolicy::default()
        })
    }

    fn preflight(method: &str, request_headers: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCESS_CONTROL_REQUEST_METHOD,
            HeaderValue::from_str(method).unwrap(),
        );
        if let Some(h) = request_headers {
            headers.insert(
                header::ACCESS_CONTROL_REQUEST_HEADERS,
                HeaderValue::from_str(h).unwrap(),
            );
        }
        headers
    }

    #[test]
    fn test_no_origin_is_not_cors() {
        assert_eq!(
            strict().evaluate(None, &Method::GET, &HeaderMap::new()),
            CorsDecision::NotCors
        );
    }

    #[test]
    fn test_unknown_origin_denied_for_every_method() {
        let gate = strict();
        for method in [
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
            Method::PATCH,
            Method::HEAD,
        ] {
            assert!(matches!(
                gate.evaluate(Some("https://evil.example.com"), &method, &HeaderMap::new()),
                CorsDecision::Denied(_)
            ));
        }
        assert!(matches!(
            gate.evaluate(
                Some("https://evil.example.com"),
                &Method::OPTIONS,
                &preflight("GET", None)
            ),
            CorsDecision::Denied(_)
        ));
    }

    #[test]
    fn test_allowed_origin_actual_request() {
        let decision = strict().evaluate(
            Some("https://app.example.com"),
            &Method::POST,
            &HeaderMap::new(),
        );
        let CorsDecision::Allowed(headers) = decision else {
            panic!("expected Allowed, got {decision:?}");
        };
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://app.example.com"
        );
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    }

    #[test]
    fn test_disallowed_method() {
        assert!(matches!(
            strict().evaluate(Some("https://app.example.com"), &Method::PATCH, &HeaderMap::new()),
            CorsDecision::Denied(_)
        ));
    }

    #[test]
    fn test_preflight() {
        let gate = strict();
        let decision = gate.evaluate(
            Some("https://app.example.com"),
            &Method::OPTIONS,
            &preflight("PUT", Some("Authorization, content-type")),
        );
        let CorsDecision::Preflight(headers) = decision else {
            panic!("expected Preflight, got {decision:?}");
        };
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_METHODS],
            "GET, POST, PUT, DELETE, OPTIONS"
        );
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_HEADERS],
            "authorization, content-type"
        );
        assert_eq!(headers[header::ACCESS_CONTROL_MAX_AGE], "1800");

        assert!(matches!(
            gate.evaluate(
                Some("https://app.example.com"),
                &Method::OPTIONS,
                &preflight("PUT", Some("X-Custom"))
            ),
            CorsDecision::Denied(_)
        ));
        assert!(matches!(
            gate.evaluate(
                Some("https://app.example.com"),
                &Method::OPTIONS,
                &preflight("PATCH", None)
            ),
            CorsDecision::Denied(_)
        ));
    }

    #[test]
    fn test_wildcard_origin() {
        let with_credentials = CorsGate::new(CorsPolicy::default());
        let CorsDecision::Allowed(headers) = with_credentials.evaluate(
            Some("https://anything.test"),
            &Method::GET,
            &HeaderMap::new(),
        ) else {
            panic!("expected Allowed");
        };
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://anything.test"
        );

        let anonymous = CorsGate::new(CorsPolicy {
            allow_credentials: false,
            ..CorsPolicy::default()
        });
        let CorsDecision::Allowed(headers) =
            anonymous.evaluate(Some("https://anything.test"), &Method::GET, &HeaderMap::new())
        else {
            panic!("expected Allowed");
        };
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert!(headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).is_none());
    }
}
