//! Authenticated session against the secrets store.
//!
//! A session authenticates once and is reused for every read in a run. It
//! remembers how it logged in so it can log in again when the token's TTL
//! elapses or the store answers "permission denied".

use crate::error::{Error, Result};
use crate::lease::DynamicLease;
use crate::transport::{HttpTransport, Method, Response, Transport};
use chrono::{DateTime, TimeDelta, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Treat tokens as expired this long before their real expiry.
const EXPIRY_MARGIN_SECS: i64 = 5;

/// How to obtain a token.
pub enum Login {
    /// Reuse an existing token (e.g. `VAULT_TOKEN` or `~/.vault-token`)
    Token(SecretString),
    /// Username/password login against a userpass mount
    UserPass {
        mount: String,
        username: String,
        password: SecretString,
    },
}

impl Login {
    pub fn userpass(username: impl Into<String>, password: SecretString) -> Self {
        Self::UserPass {
            mount: "userpass".to_string(),
            username: username.into(),
            password,
        }
    }

    fn describe(&self) -> String {
        match self {
            Login::Token(_) => "existing token".to_string(),
            Login::UserPass {
                mount, username, ..
            } => format!("{mount} login as {username}"),
        }
    }
}

/// KV secrets engine version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KvVersion {
    V1,
    #[default]
    V2,
}

/// Mount layout of the store.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub kv_mount: String,
    pub kv_version: KvVersion,
    /// Mount of the dynamic secrets engine (e.g. `aws`)
    pub dynamic_mount: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            kv_mount: "secret".to_string(),
            kv_version: KvVersion::V2,
            dynamic_mount: "aws".to_string(),
        }
    }
}

pub struct Session {
    address: Url,
    token: Option<SecretString>,
    expires_at: Option<DateTime<Utc>>,
    authenticated: bool,
    login: Login,
    options: SessionOptions,
    transport: Box<dyn Transport>,
}

impl Session {
    /// Authenticate over HTTP.
    pub fn authenticate(address: &str, login: Login, options: SessionOptions) -> Result<Self> {
        let address = Url::parse(address)?;
        let transport = HttpTransport::new(&address)?;
        Self::with_transport(address, login, options, Box::new(transport))
    }

    /// Authenticate through a custom transport (useful for testing).
    pub fn with_transport(
        address: Url,
        login: Login,
        options: SessionOptions,
        transport: Box<dyn Transport>,
    ) -> Result<Self> {
        let mut session = Self {
            address,
            token: None,
            expires_at: None,
            authenticated: false,
            login,
            options,
            transport,
        };
        session.login()?;
        Ok(session)
    }

    pub fn address(&self) -> &Url {
        &self.address
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated && !self.is_expired()
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Whether the token is expired at `now`. Tokens without TTL never expire.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_some_and(|expires| now + TimeDelta::seconds(EXPIRY_MARGIN_SECS) >= expires)
    }

    /// Drop the token; the next call re-authenticates.
    pub fn invalidate(&mut self) {
        self.token = None;
        self.authenticated = false;
        self.expires_at = None;
    }

    /// Re-authenticate if the session was invalidated or its TTL elapsed.
    pub fn ensure_valid(&mut self) -> Result<()> {
        if !self.is_authenticated() {
            log::debug!("session not valid, re-authenticating");
            self.login()?;
        }
        Ok(())
    }

    fn login(&mut self) -> Result<()> {
        log::info!("authenticating to {} ({})", self.address, self.login.describe());
        let (token, ttl) = match &self.login {
            Login::Token(token) => {
                let response = self.transport.request(
                    Method::Get,
                    "auth/token/lookup-self",
                    Some(token),
                    None,
                )?;
                if !response.is_success() {
                    return Err(Error::AuthFailed {
                        message: format!("token rejected: {}", response.error_message()),
                    });
                }
                let ttl = response.body["data"]["ttl"].as_u64().unwrap_or(0);
                (SecretString::from(token.expose_secret().to_string()), ttl)
            }
            Login::UserPass {
                mount,
                username,
                password,
            } => {
                let path = format!("auth/{mount}/login/{}", path_segment(&self.address, username));
                let body = json!({ "password": password.expose_secret() });
                let response = self
                    .transport
                    .request(Method::Post, &path, None, Some(&body))?;
                if !response.is_success() {
                    return Err(Error::AuthFailed {
                        message: response.error_message(),
                    });
                }
                let token = response.body["auth"]["client_token"]
                    .as_str()
                    .ok_or_else(|| Error::InvalidResponse {
                        path: path.clone(),
                        message: "missing auth.client_token".to_string(),
                    })?;
                let ttl = response.body["auth"]["lease_duration"].as_u64().unwrap_or(0);
                (SecretString::from(token.to_string()), ttl)
            }
        };

        self.token = Some(token);
        self.authenticated = true;
        self.expires_at = (ttl > 0).then(|| Utc::now() + TimeDelta::seconds(ttl as i64));
        log::debug!(
            "authenticated, token {}",
            self.expires_at
                .map_or_else(|| "does not expire".to_string(), |t| format!("expires {t}"))
        );
        Ok(())
    }

    fn get(&mut self, path: &str) -> Result<Response> {
        self.ensure_valid()?;
        let token = self.token.as_ref().ok_or(Error::NotAuthenticated)?;
        self.transport.request(Method::Get, path, Some(token), None)
    }

    fn kv_path(&self, path: &str) -> String {
        let path = path.trim_matches('/');
        match self.options.kv_version {
            KvVersion::V1 => format!("{}/{}", self.options.kv_mount, path),
            KvVersion::V2 => format!("{}/data/{}", self.options.kv_mount, path),
        }
    }

    /// Read every field of a KV secret.
    pub fn read_kv_all(&mut self, path: &str) -> Result<BTreeMap<String, SecretString>> {
        let api_path = self.kv_path(path);
        let response = self.get(&api_path)?;

        match response.status {
            200 => {}
            403 => {
                self.authenticated = false;
                return Err(Error::PermissionDenied { path: api_path });
            }
            404 => return Err(Error::NotFound { path: api_path }),
            status => {
                return Err(Error::Http {
                    status,
                    path: api_path,
                    message: response.error_message(),
                });
            }
        }

        let data = match self.options.kv_version {
            KvVersion::V1 => &response.body["data"],
            KvVersion::V2 => &response.body["data"]["data"],
        };
        let object = data.as_object().ok_or_else(|| Error::InvalidResponse {
            path: api_path.clone(),
            message: "secret data is not an object".to_string(),
        })?;

        Ok(object
            .iter()
            .filter_map(|(k, v)| scalar(v).map(|s| (k.clone(), SecretString::from(s))))
            .collect())
    }

    /// Read one field of a KV secret.
    pub fn read_kv(&mut self, path: &str, field: &str) -> Result<SecretString> {
        let mut fields = self.read_kv_all(path)?;
        fields.remove(field).ok_or_else(|| Error::FieldMissing {
            path: self.kv_path(path),
            field: field.to_string(),
        })
    }

    /// Read a KV field, re-authenticating and retrying exactly once when the
    /// store answers "permission denied".
    pub fn read_kv_reauth(&mut self, path: &str, field: &str) -> Result<SecretString> {
        match self.read_kv(path, field) {
            Err(e) if e.needs_reauth() => {
                log::warn!("{e}; re-authenticating and retrying once");
                self.invalidate();
                self.login()?;
                self.read_kv(path, field)
            }
            other => other,
        }
    }

    /// Issue dynamic credentials for `role`.
    ///
    /// The caller must honor the propagation delay before handing the lease
    /// to a dependent system.
    pub fn issue_dynamic(&mut self, role: &str) -> Result<DynamicLease> {
        let path = format!("{}/creds/{}", self.options.dynamic_mount, role);
        let response = self.get(&path).map_err(|e| Error::Issue {
            role: role.to_string(),
            message: e.to_string(),
        })?;

        if !response.is_success() {
            if response.status == 403 {
                self.authenticated = false;
            }
            return Err(Error::Issue {
                role: role.to_string(),
                message: response.error_message(),
            });
        }

        let lease_id = response.body["lease_id"].as_str().unwrap_or_default();
        let duration = response.body["lease_duration"].as_u64().unwrap_or(0);
        let renewable = response.body["renewable"].as_bool().unwrap_or(false);
        let data = response.body["data"]
            .as_object()
            .map(|object| {
                object
                    .iter()
                    .filter_map(|(k, v)| scalar(v).map(|s| (k.clone(), SecretString::from(s))))
                    .collect()
            })
            .unwrap_or_default();

        log::info!("issued dynamic credentials for role '{role}' (lease {duration}s)");
        Ok(DynamicLease::new(
            lease_id,
            role,
            Duration::from_secs(duration),
            renewable,
            data,
        ))
    }

    /// Revoke a lease early. Unknown leases are not an error.
    pub fn revoke_lease(&mut self, lease_id: &str) -> Result<()> {
        self.ensure_valid()?;
        let token = self.token.as_ref().ok_or(Error::NotAuthenticated)?;
        let body = json!({ "lease_id": lease_id });
        let response =
            self.transport
                .request(Method::Post, "sys/leases/revoke", Some(token), Some(&body))?;
        match response.status {
            200..=299 | 404 => Ok(()),
            status => Err(Error::Http {
                status,
                path: "sys/leases/revoke".to_string(),
                message: response.error_message(),
            }),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.address.as_str())
            .field("authenticated", &self.authenticated)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Strings pass through; numbers and booleans are rendered.
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Token left behind by `vault login` in `~/.vault-token`.
pub fn token_helper_file() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".vault-token"))
}

/// Percent-encode `value` as a single path segment.
fn path_segment(address: &Url, value: &str) -> String {
    let mut url = address.clone();
    match url.path_segments_mut() {
        Ok(mut segments) => {
            segments.clear().push(value);
        }
        Err(()) => return value.to_string(),
    }
    url.path().trim_start_matches('/').to_string()
}

/// Read a token from the helper file, ignoring empty files.
pub fn read_token_file(path: &std::path::Path) -> Option<SecretString> {
    let content = std::fs::read_to_string(path).ok()?;
    let token = content.trim();
    (!token.is_empty()).then(|| SecretString::from(token.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use crate::transport::MockTransport;
    use std::io::Write;

    const LOGIN: &str = "auth/userpass/login/deployer";
    const KV: &str = "secret/data/netbox/db";

    fn address() -> Url {
        Url::parse("https://vault.lan:8200").unwrap()
    }

    fn login_ok(mock: &MockTransport, token: &str, ttl: u64) {
        mock.respond(
            Method::Post,
            LOGIN,
            200,
            json!({"auth": {"client_token": token, "lease_duration": ttl}}),
        );
    }

    fn kv_ok(mock: &MockTransport) {
        mock.respond(
            Method::Get,
            KV,
            200,
            json!({"data": {"data": {"username": "netbox", "password": "s3cret", "port": 5432}}}),
        );
    }

    fn userpass_session(mock: &MockTransport) -> Result<Session> {
        Session::with_transport(
            address(),
            Login::userpass("deployer", SecretString::from("pw".to_string())),
            SessionOptions::default(),
            Box::new(mock.clone()),
        )
    }

    #[test]
    fn test_userpass_login_stores_token_and_ttl() {
        let mock = MockTransport::new();
        login_ok(&mock, "s.abc", 3600);

        let session = userpass_session(&mock).unwrap();
        assert!(session.is_authenticated());
        let expires = session.expires_at().unwrap();
        assert!(expires > Utc::now() + TimeDelta::seconds(3500));
    }

    #[test]
    fn test_userpass_login_rejected() {
        let mock = MockTransport::new();
        mock.respond(
            Method::Post,
            LOGIN,
            400,
            json!({"errors": ["invalid username or password"]}),
        );

        let err = userpass_session(&mock).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Auth);
        assert!(err.to_string().contains("invalid username or password"));
    }

    #[test]
    fn test_userpass_username_is_one_segment() {
        let mock = MockTransport::new();
        mock.respond(
            Method::Post,
            "auth/userpass/login/ops%2Fadmin%20team",
            200,
            json!({"auth": {"client_token": "s.ops", "lease_duration": 60}}),
        );

        let session = Session::with_transport(
            address(),
            Login::userpass("ops/admin team", SecretString::from("pw".to_string())),
            SessionOptions::default(),
            Box::new(mock.clone()),
        )
        .unwrap();

        assert!(session.is_authenticated());
        assert_eq!(mock.call_count("auth/userpass/login/ops%2Fadmin%20team"), 1);
        assert_eq!(path_segment(&address(), "deployer"), "deployer");
    }

    #[test]
    fn test_existing_token_skips_userpass_login() {
        let mock = MockTransport::new();
        mock.respond(
            Method::Get,
            "auth/token/lookup-self",
            200,
            json!({"data": {"ttl": 0}}),
        );

        let session = Session::with_transport(
            address(),
            Login::Token(SecretString::from("s.existing".to_string())),
            SessionOptions::default(),
            Box::new(mock.clone()),
        )
        .unwrap();

        assert!(session.is_authenticated());
        assert!(session.expires_at().is_none());
        assert_eq!(mock.call_count(LOGIN), 0);
    }

    #[test]
    fn test_read_kv_field() {
        let mock = MockTransport::new();
        login_ok(&mock, "s.abc", 3600);
        kv_ok(&mock);

        let mut session = userpass_session(&mock).unwrap();
        let password = session.read_kv("netbox/db", "password").unwrap();
        assert_eq!(password.expose_secret(), "s3cret");

        let port = session.read_kv("netbox/db", "port").unwrap();
        assert_eq!(port.expose_secret(), "5432");

        let calls = mock.calls();
        let (_, _, token) = calls.iter().find(|(_, p, _)| p == KV).unwrap();
        assert_eq!(token.as_deref(), Some("s.abc"));
    }

    #[test]
    fn test_not_found_vs_field_missing_vs_denied() {
        let mock = MockTransport::new();
        login_ok(&mock, "s.abc", 3600);
        kv_ok(&mock);
        mock.respond(Method::Get, "secret/data/locked", 403, json!({"errors": ["permission denied"]}));

        let mut session = userpass_session(&mock).unwrap();

        let missing_path = session.read_kv("nope", "x").unwrap_err();
        assert!(matches!(missing_path, Error::NotFound { .. }));

        let missing_field = session.read_kv("netbox/db", "api_token").unwrap_err();
        assert!(matches!(missing_field, Error::FieldMissing { .. }));

        let denied = session.read_kv("locked", "x").unwrap_err();
        assert!(matches!(denied, Error::PermissionDenied { .. }));
        assert!(denied.needs_reauth());
    }

    #[test]
    fn test_reauth_once_on_permission_denied() {
        let mock = MockTransport::new();
        login_ok(&mock, "s.old", 3600);
        login_ok(&mock, "s.new", 3600);
        mock.respond(Method::Get, KV, 403, json!({"errors": ["permission denied"]}));
        kv_ok(&mock);

        let mut session = userpass_session(&mock).unwrap();
        let value = session.read_kv_reauth("netbox/db", "username").unwrap();

        assert_eq!(value.expose_secret(), "netbox");
        assert_eq!(mock.call_count(LOGIN), 2);
        assert_eq!(mock.call_count(KV), 2);
    }

    #[test]
    fn test_reauth_gives_up_after_one_retry() {
        let mock = MockTransport::new();
        login_ok(&mock, "s.abc", 3600);
        mock.respond(Method::Get, KV, 403, json!({"errors": ["permission denied"]}));

        let mut session = userpass_session(&mock).unwrap();
        let err = session.read_kv_reauth("netbox/db", "username").unwrap_err();

        assert!(matches!(err, Error::PermissionDenied { .. }));
        assert_eq!(mock.call_count(KV), 2);
    }

    #[test]
    fn test_expired_session_relogs_before_read() {
        let mock = MockTransport::new();
        login_ok(&mock, "s.short", 1);
        kv_ok(&mock);

        let mut session = userpass_session(&mock).unwrap();
        // TTL of 1s is inside the expiry margin
        assert!(session.is_expired());

        session.read_kv("netbox/db", "username").unwrap();
        assert_eq!(mock.call_count(LOGIN), 2);
    }

    #[test]
    fn test_is_expired_at() {
        let mock = MockTransport::new();
        login_ok(&mock, "s.abc", 600);
        let session = userpass_session(&mock).unwrap();

        assert!(!session.is_expired_at(Utc::now()));
        assert!(session.is_expired_at(Utc::now() + TimeDelta::seconds(601)));
    }

    #[test]
    fn test_issue_dynamic() {
        let mock = MockTransport::new();
        login_ok(&mock, "s.abc", 3600);
        mock.respond(
            Method::Get,
            "aws/creds/pbs-backup",
            200,
            json!({
                "lease_id": "aws/creds/pbs-backup/xyz",
                "lease_duration": 900,
                "renewable": true,
                "data": {"access_key": "AKIA123", "secret_key": "wJalr", "security_token": null}
            }),
        );

        let mut session = userpass_session(&mock).unwrap();
        let lease = session.issue_dynamic("pbs-backup").unwrap();

        assert_eq!(lease.lease_id, "aws/creds/pbs-backup/xyz");
        assert_eq!(lease.lease_duration, Duration::from_secs(900));
        assert_eq!(lease.field("access_key").unwrap().expose_secret(), "AKIA123");
        assert!(lease.field("security_token").is_none());
    }

    #[test]
    fn test_issue_dynamic_unknown_role() {
        let mock = MockTransport::new();
        login_ok(&mock, "s.abc", 3600);
        mock.respond(Method::Get, "aws/creds/nope", 400, json!({"errors": ["unknown role: nope"]}));

        let mut session = userpass_session(&mock).unwrap();
        let err = session.issue_dynamic("nope").unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Issue);
        assert!(err.to_string().contains("unknown role"));
    }

    #[test]
    fn test_kv_v1_layout() {
        let mock = MockTransport::new();
        login_ok(&mock, "s.abc", 3600);
        mock.respond(Method::Get, "kv/influx", 200, json!({"data": {"token": "tok"}}));

        let mut session = Session::with_transport(
            address(),
            Login::userpass("deployer", SecretString::from("pw".to_string())),
            SessionOptions {
                kv_mount: "kv".into(),
                kv_version: KvVersion::V1,
                ..Default::default()
            },
            Box::new(mock.clone()),
        )
        .unwrap();

        assert_eq!(session.read_kv("/influx/", "token").unwrap().expose_secret(), "tok");
    }

    #[test]
    fn test_revoke_lease_tolerates_unknown() {
        let mock = MockTransport::new();
        login_ok(&mock, "s.abc", 3600);
        let mut session = userpass_session(&mock).unwrap();
        // Unrouted -> 404
        assert!(session.revoke_lease("aws/creds/x/1").is_ok());
    }

    #[test]
    fn test_read_token_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "  s.fromfile  ").unwrap();
        let token = read_token_file(file.path()).unwrap();
        assert_eq!(token.expose_secret(), "s.fromfile");

        let empty = tempfile::NamedTempFile::new().unwrap();
        assert!(read_token_file(empty.path()).is_none());
    }

    #[test]
    fn test_debug_does_not_leak_token() {
        let mock = MockTransport::new();
        login_ok(&mock, "s.topsecret", 3600);
        let session = userpass_session(&mock).unwrap();
        assert!(!format!("{session:?}").contains("s.topsecret"));
    }
}
