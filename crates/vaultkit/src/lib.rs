//! # vaultkit
//!
//! Blocking client for a HashiCorp Vault compatible secrets store, scoped to
//! what a deployment run needs:
//!
//! - Authenticate once (existing token or userpass login) and keep the token
//!   with its expiry
//! - Read static secrets from a KV mount (v1 or v2)
//! - Issue dynamically leased credentials and revoke them
//!
//! ## Example
//!
//! ```no_run
//! use vaultkit::{Login, Session, SessionOptions};
//! use secrecy::{ExposeSecret, SecretString};
//!
//! let login = Login::userpass("deployer", SecretString::from("hunter2".to_string()));
//! let mut session = Session::authenticate("https://vault.lan:8200", login, SessionOptions::default())?;
//!
//! let password = session.read_kv_reauth("netbox/db", "password")?;
//! assert!(!password.expose_secret().is_empty());
//! # Ok::<(), vaultkit::Error>(())
//! ```
//!
//! ## Error Handling
//!
//! [`Error::category`] separates a secret that does not exist
//! ([`ErrorCategory::NotFound`]) from a session that lost its permission
//! ([`ErrorCategory::PermissionDenied`]), so callers know when one
//! re-authentication is worth trying.

pub mod error;
pub mod lease;
pub mod session;
pub mod transport;

pub use error::{Error, ErrorCategory, Result};
pub use lease::{DEFAULT_PROPAGATION_DELAY, DynamicLease};
pub use session::{KvVersion, Login, Session, SessionOptions, read_token_file, token_helper_file};
pub use transport::{HttpTransport, MockTransport, Transport};
pub use url::Url;
