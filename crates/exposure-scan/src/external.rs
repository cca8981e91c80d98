//! External engine probe.
//!
//! Runs the scanning engine once per address and keeps the ports it
//! reports as open. Results are keyed by the address as it appears in the
//! target map so they reconcile against the inventory verbatim.

use std::time::Duration;

use async_trait::async_trait;
use exposure_core::HostContext;

use crate::config::{PortScanConfig, ScanTechnique};
use crate::error::Result;
use crate::probe::{should_skip, EngineKind, PortProber};
use crate::scanner::{EngineInvocation, ScanEngine};
use crate::targets::ScanTargets;

pub struct ExternalProber {
    engine: Box<dyn ScanEngine>,
    technique: ScanTechnique,
    privileged: bool,
    source_port: Option<u16>,
    limit: Duration,
}

impl ExternalProber {
    /// Fails with `UnsupportedTechnique` for an unknown technique identifier.
    pub fn new(engine: impl ScanEngine + 'static, config: &PortScanConfig) -> Result<Self> {
        Ok(Self {
            engine: Box::new(engine),
            technique: config.technique()?,
            privileged: config.has_privileged,
            source_port: config.source_port,
            limit: config.external_timeout(),
        })
    }

    pub fn technique(&self) -> ScanTechnique {
        self.technique
    }
}

#[async_trait]
impl PortProber for ExternalProber {
    fn kind(&self) -> EngineKind {
        EngineKind::External
    }

    async fn probe(&self, targets: &ScanTargets, host: &HostContext) -> Result<Vec<String>> {
        let mut open = Vec::new();

        for (addr, ports) in targets.iter() {
            if should_skip(addr, host) {
                tracing::debug!(addr = %addr, "Skipping loopback address on remote host");
                continue;
            }

            let invocation = EngineInvocation::for_address(
                addr,
                ports,
                self.technique,
                self.privileged,
                self.source_port,
            );
            let output = self.engine.run(&invocation, self.limit).await?;

            if !output.warnings.is_empty() {
                tracing::warn!(addr = %addr, warnings = ?output.warnings, "nmap scan warnings");
            }

            for scanned in &output.nmap_run.hosts {
                if scanned.ports().is_empty() || scanned.addresses.is_empty() {
                    continue;
                }
                open.extend(scanned.open_ports().map(|port| format!("{addr}:{port}")));
            }
        }

        Ok(open)
    }
}
