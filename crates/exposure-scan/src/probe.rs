//! The probe strategy seam.
//!
//! Both engines turn a target map into a flat list of open `address:port`
//! strings, so the orchestrator never needs to know which one ran.

use async_trait::async_trait;
use exposure_core::types::is_loopback_address;
use exposure_core::HostContext;
use serde::Serialize;

use crate::config::PortScanConfig;
use crate::error::Result;
use crate::external::ExternalProber;
use crate::native::NativeProber;
use crate::scanner::NmapEngine;
use crate::targets::ScanTargets;

/// Which engine produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Native,
    External,
}

#[async_trait]
pub trait PortProber: Send + Sync {
    fn kind(&self) -> EngineKind;

    /// Probe every target and return the open ones as `address:port`.
    async fn probe(&self, targets: &ScanTargets, host: &HostContext) -> Result<Vec<String>>;
}

/// Pick the engine for `config`.
///
/// For the external engine this resolves the technique and locates the
/// binary, so a bad configuration fails before anything is probed.
pub fn select_prober(config: &PortScanConfig) -> Result<Box<dyn PortProber>> {
    if config.use_external_scanner() {
        let engine = NmapEngine::new(&config.scanner_bin_path)?;
        let prober = ExternalProber::new(engine, config)?;
        Ok(Box::new(prober))
    } else {
        Ok(Box::new(NativeProber::new(config.native.clone())))
    }
}

/// A remote host's loopback interface is never reachable from here.
pub(crate) fn should_skip(addr: &str, host: &HostContext) -> bool {
    !host.is_local_exec() && is_loopback_address(addr)
}
