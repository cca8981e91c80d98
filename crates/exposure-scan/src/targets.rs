//! Scan destination resolution.
//!
//! Collapses every listen port in the inventory into one port list per
//! concrete address. Wildcard entries are expanded over the host's IPv4
//! addresses and duplicate ports are dropped.

use std::collections::BTreeMap;

use exposure_core::{HostContext, Inventory};

/// Concrete address -> distinct ports, in first-seen order per address.
///
/// Never contains the wildcard address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanTargets(BTreeMap<String, Vec<String>>);

impl ScanTargets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `port` under `address` unless it is already there.
    pub fn insert(&mut self, address: &str, port: &str) {
        let ports = self.0.entry(address.to_string()).or_default();
        if !ports.iter().any(|p| p == port) {
            ports.push(port.to_string());
        }
    }

    pub fn get(&self, address: &str) -> Option<&[String]> {
        self.0.get(address).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    /// Number of distinct addresses.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of (address, port) pairs.
    pub fn pair_count(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for ScanTargets {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        let mut targets = Self::new();
        for (address, port) in iter {
            targets.insert(address, port);
        }
        targets
    }
}

/// Build the scan targets for `inventory` on `host`.
///
/// Only IPv4 addresses are used to expand `*`; with no known addresses a
/// wildcard entry contributes nothing.
pub fn resolve_scan_targets(inventory: &Inventory, host: &HostContext) -> ScanTargets {
    let mut targets = ScanTargets::new();

    for listen_port in inventory.listen_ports() {
        if listen_port.is_wildcard() {
            for addr in &host.ipv4_addrs {
                targets.insert(addr, &listen_port.port);
            }
        } else {
            targets.insert(&listen_port.address, &listen_port.port);
        }
    }

    tracing::debug!(
        addresses = targets.len(),
        pairs = targets.pair_count(),
        "Resolved scan targets"
    );

    targets
}
