//! exposure-scan: Listen-port reachability for package inventories.
//!
//! Takes the listen ports declared by processes on a host, checks which
//! of them answer from the scanning vantage point, and records the result
//! on the inventory so exposed services can be told apart from
//! unreachable ones.
//!
//! Pipeline: [`targets`] -> [`probe::select_prober`] -> [`native`] or
//! [`external`] -> [`reconcile`].

pub mod config;
pub mod error;
pub mod external;
pub mod native;
pub mod nmap_xml;
pub mod probe;
pub mod reconcile;
pub mod scanner;
pub mod targets;

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use exposure_core::{HostContext, Inventory};
use serde::Serialize;
use uuid::Uuid;

use crate::config::PortScanConfig;
use crate::error::Result;
use crate::probe::{EngineKind, PortProber};

/// Summary of one scan run.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub scan_id: Uuid,
    pub engine: EngineKind,
    /// Number of distinct (address, port) pairs resolved.
    pub targets: usize,
    /// Confirmed-open `address:port` strings.
    pub open: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

/// Scan the listen ports of `inventory` on `host` and record reachability.
///
/// On error the inventory is left untouched.
pub async fn scan_ports(
    inventory: &mut Inventory,
    host: &HostContext,
    config: &PortScanConfig,
) -> Result<ScanReport> {
    config.validate()?;
    let prober = probe::select_prober(config)?;
    scan_ports_with(prober.as_ref(), inventory, host).await
}

/// Same as [`scan_ports`] with an already selected prober.
pub async fn scan_ports_with(
    prober: &dyn PortProber,
    inventory: &mut Inventory,
    host: &HostContext,
) -> Result<ScanReport> {
    let scan_id = Uuid::new_v4();
    let started_at = Utc::now();
    let start = Instant::now();

    let targets = targets::resolve_scan_targets(inventory, host);

    tracing::info!(
        scan_id = %scan_id,
        host = %host.host,
        engine = ?prober.kind(),
        addresses = targets.len(),
        pairs = targets.pair_count(),
        "Starting port scan"
    );

    let open = match prober.probe(&targets, host).await {
        Ok(open) => open,
        Err(e) => {
            tracing::error!(scan_id = %scan_id, error = %e, "Port scan failed");
            return Err(e);
        }
    };

    reconcile::update_port_status(inventory, &open);

    let duration = start.elapsed();
    tracing::info!(
        scan_id = %scan_id,
        host = %host.host,
        open = open.len(),
        duration_ms = duration.as_millis(),
        "Port scan complete"
    );

    Ok(ScanReport {
        scan_id,
        engine: prober.kind(),
        targets: targets.pair_count(),
        open,
        started_at,
        duration,
    })
}
