//! Fieldmesh Node - gateway between the field mesh and the incident backend
//!
//! This binary runs:
//! - A BLE central connected to a radio node (feature `ble`), or an
//!   in-process simulated radio node (`--simulate`)
//! - Incident uploads to the backend
//! - The HTTP relay for radio-only clients

use anyhow::Context;
use clap::{Parser, Subcommand};
use fieldmesh_core::{
    parse_mac, BinaryIncidentCodec, DeviceIdentity, FileSettings, Location, LogFormat,
    LoggingConfig, Priority,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fieldmesh_node::{Gateway, GatewayConfig, IncidentUpload, SimulatedRadio, UploadStats};

#[derive(Parser)]
#[command(name = "fieldmesh-node")]
#[command(about = "Fieldmesh gateway: BLE central, incident uploader and HTTP relay")]
#[command(version)]
struct Cli {
    /// JSON configuration file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect to a radio node and serve uploads and the relay
    Gateway {
        /// Override the backend base URL
        #[arg(long)]
        backend: Option<String>,

        /// Run against an in-process simulated radio node
        #[arg(long)]
        simulate: bool,

        /// Interval between simulated field reports
        #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
        report_every: Duration,
    },

    /// Show the persisted node identity, creating it on first run
    Identity {
        /// Hardware MAC to derive the id from (aa:bb:cc:dd:ee:ff)
        #[arg(long)]
        mac: Option<String>,
    },

    /// Decode a hex-encoded incident payload
    Decode {
        /// Payload bytes as hex
        hex: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = GatewayConfig::load(cli.config.as_deref())
        .with_context(|| "failed to load configuration")?;
    init_logging(&config.logging, cli.verbose)?;

    match cli.command {
        Command::Gateway {
            backend,
            simulate,
            report_every,
        } => {
            if let Some(url) = backend {
                config.backend.base_url = url;
            }
            let stats = if simulate {
                run_simulated(config, report_every).await?
            } else {
                run_ble(config).await?
            };
            info!(?stats, "Exiting");
        }
        Command::Identity { mac } => show_identity(&config, mac.as_deref())?,
        Command::Decode { hex } => decode_payload(&hex)?,
    }

    Ok(())
}

fn init_logging(config: &LoggingConfig, verbose: bool) -> anyhow::Result<()> {
    let default = if verbose {
        "debug"
    } else {
        config.level.as_directive()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match config.format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("failed to install log subscriber: {}", e))
}

fn load_identity(config: &GatewayConfig, mac: Option<&str>) -> anyhow::Result<DeviceIdentity> {
    let mut settings = FileSettings::open(&config.identity.settings_path).with_context(|| {
        format!(
            "failed to open settings {}",
            config.identity.settings_path.display()
        )
    })?;
    let mac = match mac {
        Some(text) => parse_mac(text)?,
        None => config.identity.mac_bytes()?,
    };
    Ok(DeviceIdentity::load_or_create(&mut settings, mac)?)
}

fn show_identity(config: &GatewayConfig, mac: Option<&str>) -> anyhow::Result<()> {
    let identity = load_identity(config, mac)?;
    println!("node id:         {}", identity);
    println!("advertised name: {}", identity.advertised_name());
    println!(
        "settings:        {}",
        config.identity.settings_path.display()
    );
    println!("Deleting the settings file assigns a new node id; peers will see a new node.");
    Ok(())
}

fn decode_payload(hex_text: &str) -> anyhow::Result<()> {
    let bytes = hex::decode(hex_text.trim()).context("payload is not valid hex")?;
    let incident = BinaryIncidentCodec::decode(&bytes)?;
    let upload = IncidentUpload::from(&incident);
    println!("{}", serde_json::to_string_pretty(&upload)?);
    if let Some(image) = &incident.image {
        println!("image: {} bytes", image.len());
    }
    if let Some(audio) = &incident.audio {
        println!("audio: {} bytes", audio.len());
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn run_simulated(config: GatewayConfig, report_every: Duration) -> anyhow::Result<UploadStats> {
    let identity = load_identity(&config, None)?;
    let sim = Arc::new(SimulatedRadio::spawn(identity, &config.mesh, &config.meshtastic));
    let gateway = Gateway::new(sim.link.clone(), config)?;

    let reporter = tokio::spawn(report_loop(sim.clone(), report_every));
    let stats = gateway.run(shutdown_signal()).await?;
    reporter.abort();
    sim.shutdown().await;
    Ok(stats)
}

async fn report_loop(sim: Arc<SimulatedRadio>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    let mut count = 0u32;
    loop {
        ticker.tick().await;
        count += 1;
        let description = format!("Simulated report #{}", count);
        let location = Location::new(52.520008, 13.404954, 34.0);
        match sim.report(&description, location, Priority::Medium).await {
            Ok(true) => info!(count, "Simulated report sent"),
            Ok(false) => warn!("Simulated report refused by the mesh"),
            Err(e) => {
                warn!("Simulated field node stopped: {}", e);
                break;
            }
        }
    }
}

#[cfg(feature = "ble")]
async fn run_ble(config: GatewayConfig) -> anyhow::Result<UploadStats> {
    let link = fieldmesh_meshtastic::BtleplugLink::new();
    let gateway = Gateway::new(link, config)?;
    Ok(gateway.run(shutdown_signal()).await?)
}

#[cfg(not(feature = "ble"))]
async fn run_ble(_config: GatewayConfig) -> anyhow::Result<UploadStats> {
    anyhow::bail!("built without BLE support; rebuild with `--features ble` or pass --simulate")
}
