//! Transport trait and implementations for talking to the secrets store.
//!
//! [`HttpTransport`] speaks the Vault HTTP API through `ureq`. Use
//! [`MockTransport`] for testing without a running store:
//!
//! ```
//! use vaultkit::transport::{Method, MockTransport, Transport};
//! use serde_json::json;
//!
//! let mock = MockTransport::new();
//! mock.respond(Method::Get, "secret/data/app", 200, json!({"data": {"data": {"k": "v"}}}));
//!
//! let response = mock.request(Method::Get, "secret/data/app", None, None).unwrap();
//! assert_eq!(response.status, 200);
//! ```

use crate::error::Result;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

/// Header carrying the session token.
const TOKEN_HEADER: &str = "X-Vault-Token";

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

/// Raw response: status code and JSON body (`Null` when empty).
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub body: Value,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First entry of the store's `errors` array, if any.
    pub fn error_message(&self) -> String {
        self.body
            .get("errors")
            .and_then(Value::as_array)
            .and_then(|errors| errors.first())
            .and_then(Value::as_str)
            .map_or_else(|| format!("HTTP {}", self.status), str::to_string)
    }
}

/// Abstraction over the store's HTTP API.
///
/// `path` is relative to `/v1/`, e.g. `auth/token/lookup-self`.
pub trait Transport {
    fn request(
        &self,
        method: Method,
        path: &str,
        token: Option<&SecretString>,
        body: Option<&Value>,
    ) -> Result<Response>;
}

/// Blocking HTTP transport.
pub struct HttpTransport {
    agent: ureq::Agent,
    base: Url,
}

impl HttpTransport {
    pub fn new(address: &Url) -> Result<Self> {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build()
            .into();
        // `join` replaces the last segment unless the path ends in a slash
        let mut root = address.clone();
        if !root.path().ends_with('/') {
            let path = format!("{}/", root.path());
            root.set_path(&path);
        }
        let base = root.join("v1/")?;
        Ok(Self { agent, base })
    }
}

impl Transport for HttpTransport {
    fn request(
        &self,
        method: Method,
        path: &str,
        token: Option<&SecretString>,
        body: Option<&Value>,
    ) -> Result<Response> {
        let url = self.base.join(path.trim_start_matches('/'))?;
        log::debug!("{method:?} {url}");

        let mut response = match method {
            Method::Get => {
                let mut req = self.agent.get(url.as_str());
                if let Some(token) = token {
                    req = req.header(TOKEN_HEADER, token.expose_secret());
                }
                req.call()?
            }
            Method::Post => {
                let mut req = self.agent.post(url.as_str());
                if let Some(token) = token {
                    req = req.header(TOKEN_HEADER, token.expose_secret());
                }
                match body {
                    Some(body) => req.send_json(body)?,
                    None => req.send_empty()?,
                }
            }
        };

        let status = response.status().as_u16();
        let text = response.body_mut().read_to_string()?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(Response { status, body })
    }
}

/// In-memory transport for tests.
///
/// Responses are keyed by method and path. Every request is recorded so
/// tests can assert how many times the store was hit.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    routes: Arc<Mutex<HashMap<(Method, String), Vec<Response>>>>,
    calls: Arc<Mutex<Vec<(Method, String, Option<String>)>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response. Multiple responses for one route are returned in
    /// order; the last one repeats.
    pub fn respond(&self, method: Method, path: &str, status: u16, body: Value) {
        let mut routes = self.routes.lock().unwrap_or_else(|p| p.into_inner());
        routes
            .entry((method, path.to_string()))
            .or_default()
            .push(Response { status, body });
    }

    /// Recorded `(method, path, token)` triples.
    pub fn calls(&self) -> Vec<(Method, String, Option<String>)> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn call_count(&self, path: &str) -> usize {
        self.calls().iter().filter(|(_, p, _)| p == path).count()
    }
}

impl Transport for MockTransport {
    fn request(
        &self,
        method: Method,
        path: &str,
        token: Option<&SecretString>,
        _body: Option<&Value>,
    ) -> Result<Response> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).push((
            method,
            path.to_string(),
            token.map(|t| t.expose_secret().to_string()),
        ));

        let mut routes = self.routes.lock().unwrap_or_else(|p| p.into_inner());
        let response = match routes.get_mut(&(method, path.to_string())) {
            Some(queue) if queue.len() > 1 => queue.remove(0),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => Response {
                status: 404,
                body: Value::Null,
            },
        };
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_message_from_errors_array() {
        let response = Response {
            status: 403,
            body: json!({"errors": ["permission denied"]}),
        };
        assert_eq!(response.error_message(), "permission denied");

        let empty = Response {
            status: 502,
            body: Value::Null,
        };
        assert_eq!(empty.error_message(), "HTTP 502");
    }

    #[test]
    fn test_mock_queue_then_repeat() {
        let mock = MockTransport::new();
        mock.respond(Method::Get, "a", 403, Value::Null);
        mock.respond(Method::Get, "a", 200, Value::Null);

        assert_eq!(mock.request(Method::Get, "a", None, None).unwrap().status, 403);
        assert_eq!(mock.request(Method::Get, "a", None, None).unwrap().status, 200);
        assert_eq!(mock.request(Method::Get, "a", None, None).unwrap().status, 200);
        assert_eq!(mock.call_count("a"), 3);
    }

    #[test]
    fn test_mock_unknown_route_is_404() {
        let mock = MockTransport::new();
        let response = mock.request(Method::Post, "nope", None, None).unwrap();
        assert_eq!(response.status, 404);
    }

    #[test]
    fn test_http_transport_joins_v1() {
        let address = Url::parse("https://vault.lan:8200").unwrap();
        let transport = HttpTransport::new(&address).unwrap();
        assert_eq!(transport.base.as_str(), "https://vault.lan:8200/v1/");
    }

    #[test]
    fn test_http_transport_keeps_path_prefix() {
        for address in ["https://gw.lan/vault", "https://gw.lan/vault/"] {
            let transport = HttpTransport::new(&Url::parse(address).unwrap()).unwrap();
            assert_eq!(transport.base.as_str(), "https://gw.lan/vault/v1/");
        }
    }
}
