//! Write probe results back onto the inventory.

use exposure_core::{Inventory, ListenPort};

/// Overwrite `scan_success_on` on every listen port in `inventory`.
///
/// Duplicate entries across packages and processes are all updated.
pub fn update_port_status(inventory: &mut Inventory, open: &[String]) {
    let parsed: Vec<ListenPort> = open.iter().filter_map(|s| ListenPort::parse(s)).collect();

    let mut confirmed = 0;
    for listen_port in inventory.listen_ports_mut() {
        listen_port.scan_success_on = find_port_scan_success_on(&parsed, listen_port);
        if listen_port.has_port_scan_success_on() {
            confirmed += 1;
        }
    }

    tracing::debug!(confirmed, open = open.len(), "Reconciled listen ports");
}

/// Addresses in `open` at which `declared` was reachable.
///
/// A wildcard declaration matches on port alone.
pub fn find_port_scan_success_on(open: &[ListenPort], declared: &ListenPort) -> Vec<String> {
    open.iter()
        .filter(|found| {
            found.port == declared.port
                && (declared.is_wildcard() || found.address == declared.address)
        })
        .map(|found| found.address.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use exposure_core::{AffectedProcess, Package};

    fn open(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn parsed(list: &[&str]) -> Vec<ListenPort> {
        list.iter().filter_map(|s| ListenPort::parse(s)).collect()
    }

    #[test]
    fn test_wildcard_matches_on_port() {
        let found = parsed(&["10.0.0.5:80", "10.0.0.6:80", "10.0.0.5:443"]);
        assert_eq!(
            find_port_scan_success_on(&found, &ListenPort::new("*", "80")),
            vec!["10.0.0.5", "10.0.0.6"]
        );
    }

    #[test]
    fn test_explicit_address_needs_exact_match() {
        let found = parsed(&["10.0.0.5:80"]);
        assert!(find_port_scan_success_on(&found, &ListenPort::new("10.0.0.9", "80")).is_empty());
        assert_eq!(
            find_port_scan_success_on(&found, &ListenPort::new("10.0.0.5", "80")),
            vec!["10.0.0.5"]
        );
    }

    #[test]
    fn test_ipv6_match() {
        let found = parsed(&["[::1]:22"]);
        assert_eq!(
            find_port_scan_success_on(&found, &ListenPort::new("[::1]", "22")),
            vec!["[::1]"]
        );
    }

    #[test]
    fn test_update_touches_duplicates_and_clears_stale() {
        let mut stale = ListenPort::new("10.0.0.9", "80");
        stale.scan_success_on = vec!["10.0.0.9".to_string()];

        let proc_with = |ports: Vec<ListenPort>| AffectedProcess {
            pid: "1".to_string(),
            name: "httpd".to_string(),
            listen_ports: ports,
        };

        let mut inv = Inventory::default();
        inv.packages.insert(
            "httpd".to_string(),
            Package {
                name: "httpd".to_string(),
                affected_procs: vec![
                    proc_with(vec![ListenPort::new("*", "80"), stale]),
                    proc_with(vec![ListenPort::new("10.0.0.5", "80")]),
                ],
                ..Default::default()
            },
        );
        inv.packages.insert(
            "mod_ssl".to_string(),
            Package {
                name: "mod_ssl".to_string(),
                affected_procs: vec![proc_with(vec![ListenPort::new("10.0.0.5", "80")])],
                ..Default::default()
            },
        );

        update_port_status(&mut inv, &open(&["10.0.0.5:80"]));

        let results: Vec<Vec<String>> = inv
            .listen_ports()
            .map(|lp| lp.scan_success_on.clone())
            .collect();
        assert_eq!(
            results,
            vec![
                vec!["10.0.0.5".to_string()],
                vec![],
                vec!["10.0.0.5".to_string()],
                vec!["10.0.0.5".to_string()],
            ]
        );
    }

    #[test]
    fn test_update_with_nothing_open() {
        let mut inv = Inventory::default();
        inv.packages.insert(
            "sshd".to_string(),
            Package {
                name: "sshd".to_string(),
                affected_procs: vec![AffectedProcess {
                    listen_ports: vec![ListenPort::new("*", "22")],
                    ..Default::default()
                }],
                ..Default::default()
            },
        );

        update_port_status(&mut inv, &[]);
        assert!(inv.listen_ports().all(|lp| lp.scan_success_on.is_empty()));
    }
}
