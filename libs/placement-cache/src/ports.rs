//! Host-port occupancy tracking.
//!
//! The scheduler needs to know which `(protocol, ip, port)` triples are
//! claimed on a host. The wildcard address `0.0.0.0` claims the port on
//! every interface, so it conflicts with any ip on the same protocol/port
//! pair, while distinct non-wildcard ips coexist.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The wildcard host ip.
pub const WILDCARD_IP: &str = "0.0.0.0";

/// Transport protocol of a host port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    #[default]
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "UDP")]
    Udp,
    #[serde(rename = "SCTP")]
    Sctp,
}

/// A container's claim on a host port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerPort {
    #[serde(default)]
    pub protocol: Protocol,

    /// Host ip the port binds to; empty means all interfaces.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host_ip: String,

    /// Host port number; zero means no host port is claimed.
    #[serde(default)]
    pub host_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PortKey {
    protocol: Protocol,
    ip: String,
    port: u16,
}

impl PortKey {
    fn new(protocol: Protocol, ip: &str, port: u16) -> Self {
        // An unspecified ip claims the port on all interfaces.
        let ip = if ip.is_empty() { WILDCARD_IP } else { ip };
        Self {
            protocol,
            ip: ip.to_string(),
            port,
        }
    }
}

/// Multiset of claimed host ports on a single host.
///
/// Multiple workloads may claim the same triple over time (remove is
/// counted), so a claim only disappears when its last owner does.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostPortSet {
    counts: HashMap<PortKey, u32>,
}

impl HostPortSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a claim on `(protocol, ip, port)`.
    pub fn add(&mut self, protocol: Protocol, ip: &str, port: u16) {
        *self.counts.entry(PortKey::new(protocol, ip, port)).or_insert(0) += 1;
    }

    /// Withdraw one claim on `(protocol, ip, port)`. Withdrawing a claim
    /// that was never recorded is a no-op.
    pub fn remove(&mut self, protocol: Protocol, ip: &str, port: u16) {
        let key = PortKey::new(protocol, ip, port);
        if let Some(count) = self.counts.get_mut(&key) {
            *count -= 1;
            if *count == 0 {
                self.counts.remove(&key);
            }
        }
    }

    /// True if claiming `(protocol, ip, port)` would collide with an
    /// existing claim: same triple, or the wildcard rule in either
    /// direction.
    pub fn conflicts_with(&self, protocol: Protocol, ip: &str, port: u16) -> bool {
        let key = PortKey::new(protocol, ip, port);
        if key.ip == WILDCARD_IP {
            return self
                .counts
                .keys()
                .any(|k| k.protocol == protocol && k.port == port);
        }
        self.counts.contains_key(&key)
            || self
                .counts
                .contains_key(&PortKey::new(protocol, WILDCARD_IP, port))
    }

    /// True if the exact triple is currently claimed.
    pub fn contains(&self, protocol: Protocol, ip: &str, port: u16) -> bool {
        self.counts.contains_key(&PortKey::new(protocol, ip, port))
    }

    /// Number of distinct claimed triples.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
