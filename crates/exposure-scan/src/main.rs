//! CLI entry point for the exposure listen-port scanner.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use exposure_core::{HostContext, Inventory};
use exposure_scan::config::PortScanConfig;
use exposure_scan::scanner::NmapEngine;

#[derive(Parser)]
#[command(name = "exposure-scan")]
#[command(about = "Check which declared listen ports of a host are reachable")]
struct Cli {
    /// Inventory JSON produced by package/process discovery.
    #[arg(short, long)]
    inventory: PathBuf,

    /// IPv4 address of the scanned host, used to expand `*` (repeatable).
    #[arg(long = "ipv4")]
    ipv4_addrs: Vec<String>,

    /// Host the inventory was collected from.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Connection port of the host; `local` when scanning from the host itself.
    #[arg(long, default_value = "local")]
    port: String,

    /// Write the reconciled inventory here instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Config file prefix (default: exposure).
    #[arg(short, long, default_value = "exposure")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let scan_config = load_portscan_config(&cli.config)?;

    if scan_config.use_external_scanner() {
        let engine = NmapEngine::new(&scan_config.scanner_bin_path)?;
        let version = engine.verify_installation().await?;
        tracing::info!(nmap_version = %version.lines().next().unwrap_or("").trim(), "Nmap verified");
    }

    let mut inventory = Inventory::load(&cli.inventory)?;
    let host = HostContext {
        host: cli.host,
        port: cli.port,
        ipv4_addrs: cli.ipv4_addrs,
    };

    let report = exposure_scan::scan_ports(&mut inventory, &host, &scan_config).await?;
    tracing::info!(
        scan_id = %report.scan_id,
        engine = ?report.engine,
        targets = report.targets,
        open = report.open.len(),
        "Inventory reconciled"
    );

    let json = inventory.to_json_pretty()?;
    match cli.output {
        Some(path) => std::fs::write(path, json)?,
        None => println!("{json}"),
    }

    Ok(())
}

fn load_portscan_config(file_prefix: &str) -> anyhow::Result<PortScanConfig> {
    let cfg = config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix("EXPOSURE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    match cfg.get::<PortScanConfig>("portscan") {
        Ok(c) => Ok(c),
        Err(config::ConfigError::NotFound(_)) => Ok(PortScanConfig::default()),
        Err(e) => Err(e.into()),
    }
}
