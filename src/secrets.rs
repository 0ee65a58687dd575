//! Secrets store and terminal adapters for the credential resolver

use credentials::{DynamicLookup, EnvLookup, KvLookup, Lookup, LookupFailure, Prompter};
use dialoguer::{Input, Password};
use pipeline::{ErrorKind, PhaseError, PhaseResult};
use secrecy::{ExposeSecret, SecretString};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::time::Duration;
use vaultkit::{
    DynamicLease, ErrorCategory, HttpTransport, KvVersion, Login, Session, SessionOptions, Transport, Url,
};

use crate::schema::VaultConfig;

pub const ENV_ADDR: &str = "VAULT_ADDR";
pub const ENV_TOKEN: &str = "VAULT_TOKEN";
pub const ENV_USERNAME: &str = "VAULT_USERNAME";
pub const ENV_DYNAMIC_ROLE: &str = "VAULT_DYNAMIC_ROLE";

/// Map a store error onto the run's error taxonomy
pub fn store_error(err: &vaultkit::Error) -> PhaseError {
    let category = err.category();
    let kind = match category {
        ErrorCategory::Network => ErrorKind::Connectivity,
        ErrorCategory::Auth | ErrorCategory::PermissionDenied => ErrorKind::AuthenticationFailed,
        _ => ErrorKind::CredentialUnavailable,
    };
    PhaseError::new(kind, err.to_string()).with_hint(category.advice())
}

// ============================================================================
// Store
// ============================================================================

/// The run's secrets store session plus the leases it issued
pub struct SecretsStore {
    session: RefCell<Session>,
    leases: BTreeMap<String, DynamicLease>,
    role_override: Option<String>,
    default_role: Option<String>,
    propagation_delay: Duration,
}

impl SecretsStore {
    pub fn new(session: Session, config: &VaultConfig, env: &dyn EnvLookup) -> Self {
        Self {
            session: RefCell::new(session),
            leases: BTreeMap::new(),
            role_override: env.var(ENV_DYNAMIC_ROLE).filter(|r| !r.is_empty()),
            default_role: config.dynamic_role.clone(),
            propagation_delay: config.propagation_delay(),
        }
    }

    /// Authenticate once for the whole run
    ///
    /// An existing token (`VAULT_TOKEN`, then `~/.vault-token`) is tried
    /// first; when it is rejected and a username is known, a userpass login
    /// follows with the password from the prompter.
    pub fn open<'p>(
        config: &VaultConfig,
        env: &dyn EnvLookup,
        prompter: Option<&mut (dyn Prompter + 'p)>,
    ) -> PhaseResult<Self> {
        Self::open_with_transport(config, env, prompter, |address| {
            Ok(Box::new(HttpTransport::new(address)?) as Box<dyn Transport>)
        })
    }

    /// Same as [`open`](Self::open), with requests going through the
    /// transport `transport` builds for the store address
    pub fn open_with_transport<'p, F>(
        config: &VaultConfig,
        env: &dyn EnvLookup,
        prompter: Option<&mut (dyn Prompter + 'p)>,
        transport: F,
    ) -> PhaseResult<Self>
    where
        F: Fn(&Url) -> vaultkit::Result<Box<dyn Transport>>,
    {
        let address = env
            .var(ENV_ADDR)
            .filter(|a| !a.is_empty())
            .or_else(|| config.address.clone())
            .ok_or_else(|| {
                PhaseError::validation("no secrets store address")
                    .with_hint(format!("Export {ENV_ADDR} or set vault.address in the project file"))
            })?;
        let address = Url::parse(&address).map_err(|e| {
            PhaseError::validation(format!("invalid secrets store address '{address}': {e}"))
                .with_hint(format!("Export {ENV_ADDR} as a full URL, e.g. https://vault.lan:8200"))
        })?;
        let options = session_options(config);
        let connect = |login: Login| {
            transport(&address)
                .and_then(|t| Session::with_transport(address.clone(), login, options.clone(), t))
        };

        let token = env
            .var(ENV_TOKEN)
            .filter(|t| !t.is_empty())
            .map(SecretString::from)
            .or_else(|| vaultkit::token_helper_file().and_then(|p| vaultkit::read_token_file(&p)));

        if let Some(token) = token {
            match connect(Login::Token(token)) {
                Ok(session) => return Ok(Self::new(session, config, env)),
                Err(err) if err.category() == ErrorCategory::Auth => {
                    log::warn!("stored token rejected, falling back to userpass login: {err}");
                }
                Err(err) => return Err(store_error(&err)),
            }
        }

        let login = userpass_login(config, env, prompter)?;
        let session = connect(login).map_err(|e| store_error(&e))?;
        Ok(Self::new(session, config, env))
    }

    /// Resolver adapters sharing this session
    pub fn lookups(&mut self) -> (StoreKv<'_>, StoreLeases<'_>) {
        (
            StoreKv {
                session: &self.session,
            },
            StoreLeases {
                session: &self.session,
                leases: &mut self.leases,
                role_override: self.role_override.as_deref(),
                default_role: self.default_role.as_deref(),
            },
        )
    }

    pub fn lease_count(&self) -> usize {
        self.leases.len()
    }

    /// Block until every issued lease is usable by dependent systems
    pub fn wait_for_leases(&self) -> Duration {
        self.leases
            .values()
            .map(|lease| lease.wait_until_ready(self.propagation_delay))
            .max()
            .unwrap_or_default()
    }

    /// Revoke every lease issued by this run; failures are logged only
    pub fn revoke_all(&mut self) -> usize {
        let mut revoked = 0;
        let mut session = self.session.borrow_mut();
        for lease in std::mem::take(&mut self.leases).into_values() {
            if lease.lease_id.is_empty() {
                continue;
            }
            match session.revoke_lease(&lease.lease_id) {
                Ok(()) => revoked += 1,
                Err(err) => log::warn!("could not revoke lease {}: {err}", lease.lease_id),
            }
        }
        revoked
    }
}

fn session_options(config: &VaultConfig) -> SessionOptions {
    SessionOptions {
        kv_mount: config.kv_mount.clone(),
        kv_version: if config.kv_version == 1 {
            KvVersion::V1
        } else {
            KvVersion::V2
        },
        dynamic_mount: config.dynamic_mount.clone(),
    }
}

fn userpass_login<'p>(
    config: &VaultConfig,
    env: &dyn EnvLookup,
    prompter: Option<&mut (dyn Prompter + 'p)>,
) -> PhaseResult<Login> {
    let no_login = || {
        PhaseError::new(ErrorKind::AuthenticationFailed, "no usable secrets store login")
            .with_hint(format!("Export {ENV_TOKEN}, or {ENV_USERNAME} and run interactively"))
    };

    let username = env
        .var(ENV_USERNAME)
        .filter(|u| !u.is_empty())
        .or_else(|| config.username.clone())
        .ok_or_else(no_login)?;
    let prompter = prompter.ok_or_else(no_login)?;

    let password = prompter
        .prompt(&format!("Secrets store password for {username}"), true)
        .map_err(|e| PhaseError::new(ErrorKind::AuthenticationFailed, e.to_string()))?
        .ok_or_else(no_login)?;

    Ok(Login::UserPass {
        mount: config.userpass_mount.clone(),
        username,
        password,
    })
}

/// Static secrets read through the shared session
pub struct StoreKv<'a> {
    session: &'a RefCell<Session>,
}

impl KvLookup for StoreKv<'_> {
    fn read(&mut self, path: &str, field: &str) -> Lookup {
        match self.session.borrow_mut().read_kv_reauth(path, field) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_not_found() => {
                log::debug!("{err}");
                Ok(None)
            }
            Err(err) => Err(LookupFailure::new(err.to_string())),
        }
    }
}

/// Dynamic credentials, one lease per role for the whole run
pub struct StoreLeases<'a> {
    session: &'a RefCell<Session>,
    leases: &'a mut BTreeMap<String, DynamicLease>,
    role_override: Option<&'a str>,
    default_role: Option<&'a str>,
}

impl DynamicLookup for StoreLeases<'_> {
    fn issue(&mut self, role: Option<&str>, field: &str) -> Lookup {
        let role = self
            .role_override
            .or(role)
            .or(self.default_role)
            .ok_or_else(|| {
                LookupFailure::new(format!("no dynamic role configured (set {ENV_DYNAMIC_ROLE})"))
            })?;

        if !self.leases.contains_key(role) {
            let lease = self
                .session
                .borrow_mut()
                .issue_dynamic(role)
                .map_err(|e| LookupFailure::new(e.to_string()))?;
            self.leases.insert(role.to_string(), lease);
        }

        Ok(self
            .leases
            .get(role)
            .and_then(|lease| lease.field(field))
            .map(|value| SecretString::from(value.expose_secret().to_string())))
    }
}

// ============================================================================
// Terminal
// ============================================================================

/// Prompts on the controlling terminal; secret input is not echoed
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn prompt(&mut self, label: &str, secret: bool) -> Lookup {
        let value = if secret {
            Password::new()
                .with_prompt(label)
                .allow_empty_password(true)
                .interact()
        } else {
            Input::<String>::new()
                .with_prompt(label)
                .allow_empty(true)
                .interact_text()
        }
        .map_err(|e| LookupFailure::new(format!("Failed to read user input: {e}")))?;

        let value = value.trim().to_string();
        Ok((!value.is_empty()).then(|| SecretString::from(value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use vaultkit::MockTransport;
    use vaultkit::transport::Method;

    fn vault_config() -> VaultConfig {
        toml::from_str(
            r#"
            address = "https://vault.lan:8200"
            username = "deployer"
            dynamic_role = "backup"
            propagation_delay_secs = 0
            "#,
        )
        .unwrap()
    }

    fn store(mock: &MockTransport, env: &HashMap<String, String>) -> SecretsStore {
        mock.respond(Method::Get, "auth/token/lookup-self", 200, json!({"data": {"ttl": 0}}));
        let session = Session::with_transport(
            "https://vault.lan:8200".parse().unwrap(),
            Login::Token(SecretString::from("s.test".to_string())),
            session_options(&vault_config()),
            Box::new(mock.clone()),
        )
        .unwrap();
        SecretsStore::new(session, &vault_config(), env)
    }

    struct FixedPrompter(Option<&'static str>);

    impl Prompter for FixedPrompter {
        fn prompt(&mut self, _label: &str, _secret: bool) -> Lookup {
            Ok(self.0.map(|v| SecretString::from(v.to_string())))
        }
    }

    #[test]
    fn test_kv_not_found_is_unset() {
        let mock = MockTransport::new();
        mock.respond(
            Method::Get,
            "secret/data/netbox/db",
            200,
            json!({"data": {"data": {"password": "s3cret"}}}),
        );
        let mut store = store(&mock, &HashMap::new());
        let (mut kv, _) = store.lookups();

        let value = kv.read("netbox/db", "password").unwrap().unwrap();
        assert_eq!(value.expose_secret(), "s3cret");
        assert!(kv.read("netbox/db", "username").unwrap().is_none());
        assert!(kv.read("missing/path", "password").unwrap().is_none());
    }

    #[test]
    fn test_kv_denied_is_failure() {
        let mock = MockTransport::new();
        mock.respond(Method::Get, "secret/data/locked", 403, json!({"errors": ["permission denied"]}));
        let mut store = store(&mock, &HashMap::new());
        let (mut kv, _) = store.lookups();

        assert!(kv.read("locked", "password").is_err());
    }

    #[test]
    fn test_one_lease_per_role() {
        let mock = MockTransport::new();
        mock.respond(
            Method::Get,
            "aws/creds/backup",
            200,
            json!({
                "lease_id": "aws/creds/backup/abc",
                "lease_duration": 3600,
                "renewable": true,
                "data": {"access_key": "AKIA1", "secret_key": "sk1"}
            }),
        );
        mock.respond(Method::Post, "sys/leases/revoke", 204, serde_json::Value::Null);
        let mut store = store(&mock, &HashMap::new());

        {
            let (_, mut leases) = store.lookups();
            let access = leases.issue(None, "access_key").unwrap().unwrap();
            let secret = leases.issue(None, "secret_key").unwrap().unwrap();
            assert_eq!(access.expose_secret(), "AKIA1");
            assert_eq!(secret.expose_secret(), "sk1");
            assert!(leases.issue(None, "session_token").unwrap().is_none());
        }

        assert_eq!(mock.call_count("aws/creds/backup"), 1);
        assert_eq!(store.lease_count(), 1);
        assert_eq!(store.wait_for_leases(), Duration::ZERO);
        assert_eq!(store.revoke_all(), 1);
        assert_eq!(store.lease_count(), 0);
    }

    #[test]
    fn test_role_override_from_env() {
        let mock = MockTransport::new();
        mock.respond(
            Method::Get,
            "aws/creds/ops",
            200,
            json!({"lease_id": "l1", "lease_duration": 60, "data": {"access_key": "AKIA2"}}),
        );
        let env = HashMap::from([(ENV_DYNAMIC_ROLE.to_string(), "ops".to_string())]);
        let mut store = store(&mock, &env);
        let (_, mut leases) = store.lookups();

        let value = leases.issue(Some("backup"), "access_key").unwrap().unwrap();
        assert_eq!(value.expose_secret(), "AKIA2");
        assert_eq!(mock.call_count("aws/creds/backup"), 0);
    }

    #[test]
    fn test_userpass_login_needs_username_and_password() {
        let config = vault_config();
        let env = HashMap::from([(ENV_USERNAME.to_string(), "ops".to_string())]);

        let mut prompter = FixedPrompter(Some("pw"));
        match userpass_login(&config, &env, Some(&mut prompter)).unwrap() {
            Login::UserPass { mount, username, .. } => {
                assert_eq!(mount, "userpass");
                assert_eq!(username, "ops");
            }
            Login::Token(_) => panic!("expected userpass login"),
        }

        let err = userpass_login(&config, &env, None).err().unwrap();
        assert_eq!(err.kind, ErrorKind::AuthenticationFailed);

        let mut empty = FixedPrompter(None);
        assert!(userpass_login(&config, &env, Some(&mut empty)).is_err());
    }

    fn open_with(
        mock: &MockTransport,
        config: &VaultConfig,
        env: &HashMap<String, String>,
        prompter: Option<&mut FixedPrompter>,
    ) -> PhaseResult<SecretsStore> {
        let prompter = prompter.map(|p| p as &mut dyn Prompter);
        SecretsStore::open_with_transport(config, env, prompter, |_| {
            Ok(Box::new(mock.clone()) as Box<dyn Transport>)
        })
    }

    #[test]
    fn test_rejected_token_falls_back_to_userpass() {
        let mock = MockTransport::new();
        mock.respond(Method::Get, "auth/token/lookup-self", 403, json!({"errors": ["permission denied"]}));
        mock.respond(
            Method::Post,
            "auth/userpass/login/deployer",
            200,
            json!({"auth": {"client_token": "s.fresh", "lease_duration": 3600}}),
        );
        mock.respond(
            Method::Get,
            "secret/data/netbox/db",
            200,
            json!({"data": {"data": {"password": "s3cret"}}}),
        );
        let env = HashMap::from([(ENV_TOKEN.to_string(), "s.stale".to_string())]);
        let mut prompter = FixedPrompter(Some("pw"));

        let mut store = open_with(&mock, &vault_config(), &env, Some(&mut prompter)).unwrap();
        let (mut kv, _) = store.lookups();
        assert_eq!(kv.read("netbox/db", "password").unwrap().unwrap().expose_secret(), "s3cret");

        let calls = mock.calls();
        assert_eq!(calls[0].2.as_deref(), Some("s.stale"));
        assert_eq!(calls[1].1, "auth/userpass/login/deployer");
        let (_, path, token) = calls.last().unwrap();
        assert_eq!(path, "secret/data/netbox/db");
        assert_eq!(token.as_deref(), Some("s.fresh"));
    }

    #[test]
    fn test_rejected_token_without_username_fails_auth() {
        let mock = MockTransport::new();
        mock.respond(Method::Get, "auth/token/lookup-self", 403, serde_json::Value::Null);
        let config: VaultConfig = toml::from_str(r#"address = "https://vault.lan:8200""#).unwrap();
        let env = HashMap::from([(ENV_TOKEN.to_string(), "s.stale".to_string())]);
        let mut prompter = FixedPrompter(Some("pw"));

        let Err(err) = open_with(&mock, &config, &env, Some(&mut prompter)) else {
            panic!("expected a login failure");
        };
        assert_eq!(err.kind, ErrorKind::AuthenticationFailed);
        assert_eq!(mock.call_count("auth/token/lookup-self"), 1);
    }

    #[test]
    fn test_missing_address_is_validation_error() {
        let mock = MockTransport::new();
        let config: VaultConfig = toml::from_str(r#"username = "deployer""#).unwrap();
        let env = HashMap::from([(ENV_TOKEN.to_string(), "s.valid".to_string())]);

        let Err(err) = open_with(&mock, &config, &env, None) else {
            panic!("expected a validation error");
        };
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.hint.as_deref().unwrap_or_default().contains(ENV_ADDR));
        assert!(mock.calls().is_empty());

        let env = HashMap::from([(ENV_ADDR.to_string(), "vault.lan".to_string())]);
        let Err(err) = open_with(&mock, &config, &env, None) else {
            panic!("expected a validation error");
        };
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[test]
    fn test_store_error_kinds() {
        let net = vaultkit::Error::Unreachable {
            message: "refused".into(),
        };
        assert_eq!(store_error(&net).kind, ErrorKind::Connectivity);

        let auth = vaultkit::Error::AuthFailed {
            message: "bad".into(),
        };
        assert_eq!(store_error(&auth).kind, ErrorKind::AuthenticationFailed);
    }
}
