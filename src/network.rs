//! Network availability checks
//!
//! Best-effort and synchronous: callers consult this once before a delivery
//! and skip the attempt entirely when it reports offline. Checks may block
//! on DNS or TCP, so async callers run them on the blocking pool.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::debug;

pub trait NetworkCheck: Send + Sync {
    fn is_available(&self) -> bool;
}

/// Assumes connectivity; the transport surfaces real failures
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

impl NetworkCheck for AlwaysOnline {
    fn is_available(&self) -> bool {
        true
    }
}

/// Fixed answer, for tests and hosts that track connectivity themselves
#[derive(Debug, Clone, Copy)]
pub struct StaticNetwork(pub bool);

impl NetworkCheck for StaticNetwork {
    fn is_available(&self) -> bool {
        self.0
    }
}

/// TCP connect probe against the webhook host on port 443
#[derive(Debug, Clone)]
pub struct HostProbe {
    host: String,
    timeout: Duration,
}

impl HostProbe {
    pub fn new(host: impl Into<String>, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            timeout,
        }
    }
}

impl NetworkCheck for HostProbe {
    fn is_available(&self) -> bool {
        let addrs = match (self.host.as_str(), 443).to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                debug!("Probe lookup for {} failed: {}", self.host, e);
                return false;
            }
        };

        for addr in addrs {
            if TcpStream::connect_timeout(&addr, self.timeout).is_ok() {
                return true;
            }
        }
        debug!("Probe host {} unreachable", self.host);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_network() {
        assert!(StaticNetwork(true).is_available());
        assert!(!StaticNetwork(false).is_available());
        assert!(AlwaysOnline.is_available());
    }

    #[test]
    fn test_probe_unresolvable_host() {
        let probe = HostProbe::new("host.invalid", Duration::from_millis(50));
        assert!(!probe.is_available());
    }
}
