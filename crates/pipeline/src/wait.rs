//! Reachability waiter - polls a TCP port until it accepts connections

use crate::error::PhaseError;
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default delay between connection attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Upper bound for a single connect attempt.
const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// The port accepted a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ready {
    pub addr: SocketAddr,
    pub attempts: u32,
    pub elapsed: Duration,
}

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("{host}:{port} did not accept connections within {timeout:?} ({attempts} attempts)")]
    Timeout {
        host: String,
        port: u16,
        timeout: Duration,
        attempts: u32,
    },

    #[error("could not resolve {host}:{port}: {message}")]
    Resolve {
        host: String,
        port: u16,
        message: String,
    },
}

impl From<WaitError> for PhaseError {
    fn from(err: WaitError) -> Self {
        let hint = match &err {
            WaitError::Timeout { .. } => {
                "The host may still be booting; re-run once it is up or raise reachability.timeout_secs"
            }
            WaitError::Resolve { .. } => "Check the address reported by the provisioning outputs",
        };
        PhaseError::connectivity(err.to_string()).with_hint(hint)
    }
}

/// Options for [`wait_for_port`].
#[derive(Debug, Clone, Copy)]
pub struct WaitOptions {
    pub timeout: Duration,
    pub interval: Duration,
}

impl WaitOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Poll `host:port` until a TCP connect succeeds or `timeout` elapses.
///
/// The deadline is never overshot: name lookups, connect attempts and
/// sleeps are all clamped to the remaining time. Resolution is retried until
/// it first succeeds since a fresh host may not be in DNS yet; the addresses
/// found are then reused for every later attempt.
pub fn wait_for_port(host: &str, port: u16, options: WaitOptions) -> Result<Ready, WaitError> {
    let started = Instant::now();
    let deadline = started + options.timeout;
    let mut attempts = 0;
    let mut addrs: Option<Vec<SocketAddr>> = None;
    let mut last_resolve_error = None;

    while Instant::now() < deadline {
        attempts += 1;

        if addrs.is_none() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match resolve_within(host, port, remaining) {
                Some(Ok(found)) if !found.is_empty() => {
                    last_resolve_error = None;
                    addrs = Some(found);
                }
                Some(Ok(_)) => last_resolve_error = Some("no addresses found".to_string()),
                Some(Err(message)) => last_resolve_error = Some(message),
                None => last_resolve_error = Some(format!("lookup did not finish within {:?}", options.timeout)),
            }
        }

        for addr in addrs.iter().flatten() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let connect_timeout = remaining.min(MAX_CONNECT_TIMEOUT);
            if TcpStream::connect_timeout(addr, connect_timeout).is_ok() {
                log::debug!("{addr} reachable after {attempts} attempt(s)");
                return Ok(Ready {
                    addr: *addr,
                    attempts,
                    elapsed: started.elapsed(),
                });
            }
        }

        log::trace!("{host}:{port} not reachable yet (attempt {attempts})");
        let remaining = deadline.saturating_duration_since(Instant::now());
        thread::sleep(options.interval.min(remaining));
    }

    if let Some(message) = last_resolve_error {
        return Err(WaitError::Resolve {
            host: host.to_string(),
            port,
            message,
        });
    }

    Err(WaitError::Timeout {
        host: host.to_string(),
        port,
        timeout: options.timeout,
        attempts,
    })
}

/// Single non-blocking-ish probe used by `status`.
pub fn probe(host: &str, port: u16, timeout: Duration) -> bool {
    resolve_within(host, port, timeout)
        .and_then(Result::ok)
        .is_some_and(|addrs| {
            addrs
                .iter()
                .any(|addr| TcpStream::connect_timeout(addr, timeout).is_ok())
        })
}

/// Resolve on a helper thread so a stalled lookup cannot outlive `limit`.
///
/// `None` means the lookup was still running when `limit` elapsed.
fn resolve_within(host: &str, port: u16, limit: Duration) -> Option<Result<Vec<SocketAddr>, String>> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Some(Ok(vec![SocketAddr::new(ip, port)]));
    }

    let (tx, rx) = mpsc::channel();
    let target = host.to_string();
    let spawned = thread::Builder::new()
        .name("resolve".into())
        .spawn(move || {
            // The receiver is gone once the caller gave up
            let _ = tx.send(resolve(&target, port));
        });
    if let Err(e) = spawned {
        log::debug!("could not spawn resolver thread ({e}), resolving inline");
        return Some(resolve(host, port));
    }
    rx.recv_timeout(limit).ok()
}

fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, String> {
    (host, port)
        .to_socket_addrs()
        .map(Iterator::collect)
        .map_err(|e| e.to_string())
}
