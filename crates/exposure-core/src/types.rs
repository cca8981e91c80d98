//! Inventory and host identity types.
//!
//! The inventory is produced by package/process discovery on the scanned
//! host. The port scanner only ever writes `ListenPort::scan_success_on`.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Address marker meaning "bound on every local interface".
pub const WILDCARD_ADDRESS: &str = "*";

// ── Inventory ─────────────────────────────────────────────────────

/// All packages discovered on a host, keyed by package name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Inventory {
    #[serde(default)]
    pub packages: BTreeMap<String, Package>,
}

/// An installed package and the running processes that load it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub release: String,
    #[serde(default)]
    pub affected_procs: Vec<AffectedProcess>,
}

/// A process that has the package loaded.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AffectedProcess {
    #[serde(default)]
    pub pid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub listen_ports: Vec<ListenPort>,
}

/// A declared listening endpoint of a process.
///
/// `address` is an IPv4 literal, a bracketed IPv6 literal (`[::1]`) or the
/// wildcard `*`. `scan_success_on` lists the addresses at which the port
/// was confirmed reachable by the last scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ListenPort {
    pub address: String,
    pub port: String,
    #[serde(default)]
    pub scan_success_on: Vec<String>,
}

impl ListenPort {
    pub fn new(address: &str, port: &str) -> Self {
        Self {
            address: address.to_string(),
            port: port.to_string(),
            scan_success_on: Vec::new(),
        }
    }

    /// Split an `address:port` string at its last colon.
    ///
    /// Returns `None` when there is no colon at all.
    pub fn parse(addr_port: &str) -> Option<Self> {
        let sep = addr_port.rfind(':')?;
        Some(Self::new(&addr_port[..sep], &addr_port[sep + 1..]))
    }

    pub fn is_wildcard(&self) -> bool {
        self.address == WILDCARD_ADDRESS
    }

    /// True once at least one address has been confirmed reachable.
    pub fn has_port_scan_success_on(&self) -> bool {
        !self.scan_success_on.is_empty()
    }
}

impl Inventory {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Walk package -> process -> listen port.
    pub fn listen_ports(&self) -> impl Iterator<Item = &ListenPort> {
        self.packages
            .values()
            .flat_map(|p| p.affected_procs.iter())
            .flat_map(|proc| proc.listen_ports.iter())
    }

    pub fn listen_ports_mut(&mut self) -> impl Iterator<Item = &mut ListenPort> {
        self.packages
            .values_mut()
            .flat_map(|p| p.affected_procs.iter_mut())
            .flat_map(|proc| proc.listen_ports.iter_mut())
    }
}

// ── Host identity ─────────────────────────────────────────────────

/// The server whose inventory is being scanned.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HostContext {
    /// Host name or address the server is reached at.
    pub host: String,
    /// Connection port; `local` means the scanner runs on the server itself.
    pub port: String,
    /// The server's own IPv4 addresses, used to expand `*`.
    #[serde(default)]
    pub ipv4_addrs: Vec<String>,
}

impl HostContext {
    /// A host scanned from itself.
    pub fn local(ipv4_addrs: Vec<String>) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: "local".to_string(),
            ipv4_addrs,
        }
    }

    /// A host scanned over the network.
    pub fn remote(host: &str, ipv4_addrs: Vec<String>) -> Self {
        Self {
            host: host.to_string(),
            port: "22".to_string(),
            ipv4_addrs,
        }
    }

    /// Whether the scan executes on the target host itself.
    pub fn is_local_exec(&self) -> bool {
        self.port == "local" && (self.host == "127.0.0.1" || self.host == "localhost")
    }
}

/// Whether `addr` is a loopback IP literal. Enclosing brackets are ignored.
pub fn is_loopback_address(addr: &str) -> bool {
    let bare = addr
        .strip_prefix('[')
        .and_then(|a| a.strip_suffix(']'))
        .unwrap_or(addr);
    bare.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}
