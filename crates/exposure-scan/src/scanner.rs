//! Nmap process wrapper.
//!
//! Executes nmap as a child process via `tokio::process::Command` and
//! parses the XML output into typed Rust structs. The child is killed if
//! the run outlives its time limit.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;

use crate::config::ScanTechnique;
use crate::error::{Result, ScanError};
use crate::nmap_xml::{self, NmapRun};

/// One engine run against a single address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineInvocation {
    /// Bare address, without IPv6 brackets.
    pub target: String,
    pub ports: Vec<String>,
    pub technique: ScanTechnique,
    pub privileged: bool,
    pub ipv6: bool,
    pub source_port: Option<u16>,
}

impl EngineInvocation {
    /// Build an invocation for an address as stored in the inventory.
    pub fn for_address(
        address: &str,
        ports: &[String],
        technique: ScanTechnique,
        privileged: bool,
        source_port: Option<u16>,
    ) -> Self {
        let ipv6 = address.contains(':');
        let target = address
            .strip_prefix('[')
            .and_then(|a| a.strip_suffix(']'))
            .unwrap_or(address);

        Self {
            target: target.to_string(),
            ports: ports.to_vec(),
            technique,
            privileged,
            ipv6,
            source_port,
        }
    }

    /// Render the nmap command line (without the binary).
    pub fn nmap_args(&self) -> Vec<String> {
        let mut args = vec![self.technique.nmap_flag().to_string()];
        args.push(if self.privileged {
            "--privileged".to_string()
        } else {
            "--unprivileged".to_string()
        });
        args.push("-p".to_string());
        args.push(self.ports.join(","));
        if self.ipv6 {
            args.push("-6".to_string());
        }
        if let Some(port) = self.source_port {
            args.push("-g".to_string());
            args.push(port.to_string());
        }
        args.extend(["-oX", "-", "--noninteractive"].map(String::from));
        args.push(self.target.clone());
        args
    }
}

/// What an engine run produced.
#[derive(Debug, Clone)]
pub struct EngineOutput {
    pub nmap_run: NmapRun,
    /// Non-fatal diagnostics printed by the engine.
    pub warnings: Vec<String>,
}

/// Capability interface of an external scanning engine.
#[async_trait]
pub trait ScanEngine: Send + Sync {
    async fn run(&self, invocation: &EngineInvocation, limit: Duration) -> Result<EngineOutput>;
}

/// Wrapper around the nmap binary.
#[derive(Debug, Clone)]
pub struct NmapEngine {
    nmap_path: String,
}

impl NmapEngine {
    /// Fails when the binary cannot be found.
    pub fn new(nmap_path: &str) -> Result<Self> {
        if locate_binary(nmap_path).is_none() {
            return Err(ScanError::EngineConstruction {
                path: nmap_path.to_string(),
                reason: "binary not found".to_string(),
            });
        }
        Ok(Self {
            nmap_path: nmap_path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.nmap_path
    }

    /// Verify nmap is installed and accessible.
    pub async fn verify_installation(&self) -> Result<String> {
        let output = Command::new(&self.nmap_path)
            .arg("--version")
            .output()
            .await
            .map_err(|e| ScanError::EngineConstruction {
                path: self.nmap_path.clone(),
                reason: e.to_string(),
            })?;

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ScanEngine for NmapEngine {
    async fn run(&self, invocation: &EngineInvocation, limit: Duration) -> Result<EngineOutput> {
        let start = Instant::now();
        let args = invocation.nmap_args();

        tracing::info!(
            target = %invocation.target,
            technique = ?invocation.technique,
            ports = %invocation.ports.join(","),
            "Starting nmap scan"
        );

        let mut command = Command::new(&self.nmap_path);
        command.args(&args).kill_on_drop(true);

        // Dropping the output future on timeout kills and reaps the child.
        let output = match timeout(limit, command.output()).await {
            Ok(result) => result.map_err(|e| ScanError::EngineExecution {
                reason: format!("{}: {e}", self.nmap_path),
            })?,
            Err(_) => {
                return Err(ScanError::EngineTimeout {
                    secs: limit.as_secs(),
                })
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(ScanError::EngineExecution {
                reason: format!(
                    "nmap exited with code {}: {}",
                    output.status.code().unwrap_or(-1),
                    stderr.trim()
                ),
            });
        }

        let warnings = stderr
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        let nmap_run = nmap_xml::parse_nmap_xml(&output.stdout)?;

        tracing::info!(
            target = %invocation.target,
            hosts = nmap_run.hosts.len(),
            duration_ms = start.elapsed().as_millis(),
            "Nmap scan complete"
        );

        Ok(EngineOutput { nmap_run, warnings })
    }
}

/// Resolve `path` the way a shell would: explicit paths must exist, bare
/// names are searched on `PATH`.
fn locate_binary(path: &str) -> Option<PathBuf> {
    if path.is_empty() {
        return None;
    }
    let candidate = Path::new(path);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let search = std::env::var_os("PATH")?;
    std::env::split_paths(&search)
        .map(|dir| dir.join(path))
        .find(|p| p.is_file())
}
