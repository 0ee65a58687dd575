//! # credentials
//!
//! Resolve named credentials from an ordered chain of sources:
//! environment, secrets-store KV, local file, interactive prompt and
//! dynamically leased credentials.
//!
//! ```
//! use credentials::{CredentialSource, Resolver, SecretSpec, Sources};
//! use std::collections::HashMap;
//!
//! let mut env = HashMap::new();
//! env.insert("PROXMOX_PASSWORD".to_string(), "pw".to_string());
//!
//! let spec = SecretSpec::new(
//!     "proxmox_password",
//!     &[CredentialSource::Environment, CredentialSource::InteractivePrompt],
//! );
//!
//! let mut resolver = Resolver::new(false);
//! let mut sources = Sources::new(&env, ".");
//! let cred = resolver.resolve(&spec, &mut sources)?;
//! assert_eq!(cred.source(), CredentialSource::Environment);
//! # Ok::<(), credentials::Error>(())
//! ```

pub mod error;
pub mod file;
pub mod lookup;
pub mod resolver;
pub mod types;

pub use error::{Error, Result};
pub use lookup::{DynamicLookup, EnvLookup, KvLookup, Lookup, LookupFailure, ProcessEnv, Prompter, Sources};
pub use resolver::Resolver;
pub use types::{Credential, CredentialSource, DynamicRef, FileRef, KvRef, SecretSpec};
