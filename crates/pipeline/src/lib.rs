//! # Pipeline
//!
//! Ordered, fail-fast execution of deployment phases.
//!
//! ## Core Concepts
//!
//! - **Phase**: a named action run against a shared context, optionally with
//!   a [`RetryPolicy`] and optionally best-effort
//! - **PhaseRunner**: runs phases strictly in declared order; the first
//!   required failure aborts the run, no rollback
//! - **PhaseError**: categorized failure; only connectivity failures retry
//! - **Preflight**: read-only checks for binaries and files that gate the run
//! - **Wait**: TCP reachability polling with a hard deadline
//!
//! ## Example
//!
//! ```
//! use pipeline::{NoObserver, Phase, PhaseError, PhaseRunner, RetryPolicy};
//! use std::time::Duration;
//!
//! struct Ctx { address: Option<String> }
//!
//! let mut runner = PhaseRunner::new()
//!     .phase(Phase::new("provision", |ctx: &mut Ctx| {
//!         ctx.address = Some("10.0.0.5".into());
//!         Ok(())
//!     }))
//!     .phase(
//!         Phase::new("wait", |ctx: &mut Ctx| match &ctx.address {
//!             Some(_) => Ok(()),
//!             None => Err(PhaseError::connectivity("no address yet")),
//!         })
//!         .with_retry(RetryPolicy::new(3, Duration::from_millis(1))),
//!     );
//!
//! let report = runner.run(&mut Ctx { address: None }, &mut NoObserver);
//! assert!(report.is_success());
//! ```
//!
//! ## Observer Trait
//!
//! [`PhaseObserver`] receives every phase transition, so the crate carries
//! no dependency on a terminal UI or log file format.

pub mod error;
pub mod observer;
pub mod phase;
pub mod preflight;
pub mod retry;
pub mod runner;
pub mod wait;

pub use error::{ErrorKind, PhaseError, PhaseResult};
pub use observer::{NoObserver, PhaseObserver, Tee};
pub use phase::{Phase, PhaseReport, PhaseStatus};
pub use preflight::{BinaryRequirement, CheckItem, FileRequirement, Report, check_binaries, check_files};
pub use retry::{RetryPolicy, with_retry};
pub use runner::{PhaseRunner, RunReport, RunStatus};
pub use wait::{Ready, WaitError, WaitOptions, probe, wait_for_port};
