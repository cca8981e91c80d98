//! Configuration for the listen-port scanner.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, ScanError};

/// Top-level port scan configuration.
///
/// Loaded from `exposure.toml` `[portscan]` section or
/// `EXPOSURE_PORTSCAN__` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct PortScanConfig {
    /// Path to the external scanner binary. Empty selects the native engine.
    #[serde(default)]
    pub scanner_bin_path: String,

    /// nmap technique identifier (`sS`, `sT`, ...). Empty picks one from
    /// the privilege mode.
    #[serde(default)]
    pub scan_technique: String,

    /// Whether the scanner may use raw sockets.
    #[serde(default)]
    pub has_privileged: bool,

    /// Fixed source port for the external scanner (`-g`).
    #[serde(default)]
    pub source_port: Option<u16>,

    /// Ceiling on a single external scanner run, in seconds.
    #[serde(default = "default_external_timeout")]
    pub external_timeout_secs: u64,

    /// Native engine tuning.
    #[serde(default)]
    pub native: NativeProbeConfig,
}

/// Settings for the built-in TCP connect engine.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct NativeProbeConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Pause before retrying a target after running out of file descriptors.
    #[serde(default = "default_exhaustion_backoff")]
    pub exhaustion_backoff_ms: u64,

    /// Retry cap on descriptor exhaustion. `None` retries until the
    /// descriptor pressure clears.
    #[serde(default)]
    pub max_exhaustion_retries: Option<u32>,

    /// Maximum number of addresses probed at the same time.
    #[serde(default = "default_max_concurrent_hosts")]
    pub max_concurrent_hosts: usize,
}

impl NativeProbeConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn exhaustion_backoff(&self) -> Duration {
        Duration::from_millis(self.exhaustion_backoff_ms)
    }
}

/// TCP probing methods supported by the external scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanTechnique {
    /// Half-open scan: `-sS`
    Syn,
    /// Full handshake: `-sT`
    Connect,
    /// No flags set: `-sN`
    Null,
    /// FIN only: `-sF`
    Fin,
    /// FIN, PSH and URG: `-sX`
    Xmas,
    /// ACK only: `-sA`
    Ack,
    /// ACK with window inspection: `-sW`
    Window,
    /// FIN/ACK: `-sM`
    Maimon,
}

impl ScanTechnique {
    /// Map a configured identifier to a technique.
    ///
    /// An empty identifier picks SYN when privileged and connect otherwise.
    pub fn resolve(identifier: &str, privileged: bool) -> Result<Self> {
        match identifier {
            "" if privileged => Ok(Self::Syn),
            "" => Ok(Self::Connect),
            "sS" => Ok(Self::Syn),
            "sT" => Ok(Self::Connect),
            "sN" => Ok(Self::Null),
            "sF" => Ok(Self::Fin),
            "sX" => Ok(Self::Xmas),
            "sA" => Ok(Self::Ack),
            "sW" => Ok(Self::Window),
            "sM" => Ok(Self::Maimon),
            other => Err(ScanError::UnsupportedTechnique {
                technique: other.to_string(),
            }),
        }
    }

    /// Return the nmap flag for this technique.
    pub fn nmap_flag(&self) -> &'static str {
        match self {
            Self::Syn => "-sS",
            Self::Connect => "-sT",
            Self::Null => "-sN",
            Self::Fin => "-sF",
            Self::Xmas => "-sX",
            Self::Ack => "-sA",
            Self::Window => "-sW",
            Self::Maimon => "-sM",
        }
    }
}

impl PortScanConfig {
    /// Whether probing is delegated to the external scanner.
    pub fn use_external_scanner(&self) -> bool {
        !self.scanner_bin_path.is_empty()
    }

    pub fn technique(&self) -> Result<ScanTechnique> {
        ScanTechnique::resolve(&self.scan_technique, self.has_privileged)
    }

    pub fn external_timeout(&self) -> Duration {
        Duration::from_secs(self.external_timeout_secs)
    }

    /// Reject combinations the scanner cannot honour.
    ///
    /// The technique and source port only matter for the external scanner
    /// and are not checked for a native configuration.
    pub fn validate(&self) -> Result<()> {
        if self.native.max_concurrent_hosts == 0 {
            return Err(ScanError::Config(
                "native.max_concurrent_hosts must be at least 1".to_string(),
            ));
        }

        if !self.use_external_scanner() {
            return Ok(());
        }

        let technique = self.technique()?;

        if let Some(port) = self.source_port {
            if port == 0 {
                return Err(ScanError::Config(
                    "source_port 0 is not a usable source port".to_string(),
                ));
            }
            if technique == ScanTechnique::Connect {
                return Err(ScanError::Config(
                    "source_port (-g) is incompatible with the TCP connect scan".to_string(),
                ));
            }
        }

        Ok(())
    }
}

fn default_external_timeout() -> u64 {
    300
}

fn default_connect_timeout() -> u64 {
    1000
}

fn default_exhaustion_backoff() -> u64 {
    1000
}

fn default_max_concurrent_hosts() -> usize {
    4
}

impl Default for NativeProbeConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            exhaustion_backoff_ms: default_exhaustion_backoff(),
            max_exhaustion_retries: None,
            max_concurrent_hosts: default_max_concurrent_hosts(),
        }
    }
}

impl Default for PortScanConfig {
    fn default() -> Self {
        Self {
            scanner_bin_path: String::new(),
            scan_technique: String::new(),
            has_privileged: false,
            source_port: None,
            external_timeout_secs: default_external_timeout(),
            native: NativeProbeConfig::default(),
        }
    }
}
