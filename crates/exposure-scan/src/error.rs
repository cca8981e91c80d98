//! Error types for the exposure-scan crate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Unsupported scan technique: {technique:?}")]
    UnsupportedTechnique { technique: String },

    #[error("Unable to create scan engine at {path}: {reason}")]
    EngineConstruction { path: String, reason: String },

    #[error("Unable to run scan engine: {reason}")]
    EngineExecution { reason: String },

    #[error("Scan engine did not finish within {secs}s")]
    EngineTimeout { secs: u64 },

    #[error("Failed to parse nmap XML output: {0}")]
    XmlParse(String),

    #[error("Probe of {target} failed: {source}")]
    Probe {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Gave up on {target} after {attempts} attempts: file descriptors exhausted")]
    ResourceExhausted { target: String, attempts: u32 },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ScanError>;
