//! `devgate` command line.
//!
//! ```text
//! devgate serve    --config devgate.toml
//! devgate scan     192.168.1.0/28 --ports 80,4370
//! devgate handlers
//! devgate config   --config devgate.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use devgate_discovery::{DiscoveryService, TaskStatus, TcpProber};
use devgate_gateway::{Gateway, GatewayConfig, LoggingConfig, telemetry};
use devgate_protocol::ChannelSink;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Buffered device events between the listeners and the consumer.
const EVENT_BUFFER: usize = 1024;

#[derive(Debug, Parser)]
#[command(name = "devgate", version, about = "Device communication gateway")]
struct Cli {
    /// TOML configuration file; DEVGATE_* variables override it.
    #[arg(short, long, global = true, env = "DEVGATE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Accept device connections until interrupted.
    Serve,

    /// Probe an address range and print what was found as JSON.
    Scan {
        /// `a.b.c.d`, `a.b.c.d/nn` or `a.b.c.d-e`.
        range: String,

        /// Ports to probe instead of the configured list.
        #[arg(long, value_delimiter = ',')]
        ports: Option<Vec<u16>>,

        /// Hosts probed at once.
        #[arg(long)]
        fan_out: Option<usize>,

        /// Print only reachable hosts.
        #[arg(long)]
        reachable_only: bool,
    },

    /// List the registered protocol handlers as JSON.
    Handlers,

    /// Print the effective configuration as JSON.
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = GatewayConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Command::Serve => {
            init_logging(&config.logging)?;
            serve(config).await
        }
        Command::Scan {
            range,
            ports,
            fan_out,
            reachable_only,
        } => {
            init_logging(&config.logging)?;
            scan(config, &range, ports, fan_out, reachable_only).await
        }
        Command::Handlers => {
            let registry = config.registry()?;
            println!("{}", serde_json::to_string_pretty(&registry.all_handlers())?);
            Ok(())
        }
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    telemetry::init(logging).context("initializing logging")
}

async fn serve(config: GatewayConfig) -> Result<()> {
    let (sink, mut events) = ChannelSink::channel(EVENT_BUFFER);
    let gateway = Gateway::bind(&config, Arc::new(sink)).await?;

    let consumer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            info!(
                device = %event.device_id,
                protocol = %event.message.protocol_type,
                message = %event.message.summary(),
                fields = event.message.fields.len(),
                "Device event"
            );
        }
    });

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl-C");
            return;
        }
        info!("Shutdown requested");
        on_signal.cancel();
    });

    info!(
        addrs = ?gateway.local_addrs(),
        push_addrs = ?gateway.push_addrs(),
        "Serving"
    );
    gateway.run(shutdown).await;
    drop(gateway);
    consumer.await.context("event consumer")?;
    Ok(())
}

async fn scan(
    config: GatewayConfig,
    range: &str,
    ports: Option<Vec<u16>>,
    fan_out: Option<usize>,
    reachable_only: bool,
) -> Result<()> {
    let mut discovery = config.discovery;
    if let Some(ports) = ports {
        discovery.ports = ports;
    }
    if let Some(fan_out) = fan_out {
        anyhow::ensure!(fan_out > 0, "--fan-out must be at least 1");
        discovery.fan_out = fan_out;
    }

    let service = DiscoveryService::new(discovery.clone(), TcpProber::new(&discovery));
    let id = service.start_scan(range);

    let mut ticker = tokio::time::interval(Duration::from_secs(2));
    let task = loop {
        tokio::select! {
            done = service.wait(id) => break done?,
            _ = tokio::signal::ctrl_c() => {
                service.cancel(id)?;
                break service.wait(id).await?;
            }
            _ = ticker.tick() => {
                let progress = service.task(id)?.progress;
                info!(task = %id, completed = progress.completed, total = progress.total, "Scanning");
            }
        }
    };

    if task.status == TaskStatus::Failed {
        anyhow::bail!(
            "scan failed: {}",
            task.error.as_deref().unwrap_or("unknown error")
        );
    }

    let mut report = task;
    if reachable_only {
        report.devices.retain(|d| d.reachable);
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_scan_arguments() {
        let cli = Cli::try_parse_from([
            "devgate",
            "scan",
            "10.0.0.0/30",
            "--ports",
            "80,4370",
            "--fan-out",
            "4",
        ])
        .unwrap();
        let Command::Scan {
            range,
            ports,
            fan_out,
            reachable_only,
        } = cli.command
        else {
            panic!("expected scan");
        };
        assert_eq!(range, "10.0.0.0/30");
        assert_eq!(ports, Some(vec![80, 4370]));
        assert_eq!(fan_out, Some(4));
        assert!(!reachable_only);
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from(["devgate", "serve", "--config", "/etc/devgate.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/devgate.toml")));
        assert!(matches!(cli.command, Command::Serve));
    }

    #[test]
    fn test_scan_needs_a_range() {
        assert!(Cli::try_parse_from(["devgate", "scan"]).is_err());
    }
}
