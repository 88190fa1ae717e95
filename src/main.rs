use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;
use tokio::runtime::Builder;

use lsrouter::control_server::ControlServer;
use lsrouter::{RouterConfig, RoutingCoordinator};

#[derive(Parser)]
#[command(name = "lsrouter", about = "Simulated link-state router node")]
struct Cli {
    /// JSON configuration file
    #[arg(long)]
    config: PathBuf,

    /// Overrides the control port of the configuration
    #[arg(long)]
    control_port: Option<u16>,

    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let mut config = RouterConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(port) = cli.control_port {
        config.control_port = Some(port);
    }

    let rt = Builder::new_multi_thread().enable_all().build()?;
    rt.block_on(run(config))
}

async fn run(config: RouterConfig) -> Result<()> {
    let coordinator = RoutingCoordinator::bind(&config).await?;

    for neighbor in &config.neighbors {
        let areas = config.neighbor_areas(neighbor);
        if let Err(e) = coordinator
            .add_neighbor(neighbor.name, &neighbor.ip, neighbor.port, neighbor.distance, areas)
            .await
        {
            warn!("Neighbor {} not added: {}", neighbor.name, e);
        }
    }

    coordinator.start().await?;

    let control = config.control_port.map(|port| {
        let server = ControlServer::new(port, coordinator.clone());
        tokio::spawn(async move {
            if let Err(e) = server.start().await {
                warn!("Control server stopped: {}", e);
            }
        })
    });

    let mut changes = coordinator.subscribe_table_changes();
    let mut inbox = coordinator.take_inbox().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down router {}", config.name);
                break;
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let table = coordinator.routing_table().await;
                info!("Routing table of {} ({} routes):", config.name, table.len());
                for route in table.iter() {
                    info!("  {}", route);
                }
            }
            Some(delivery) = async {
                match inbox.as_mut() {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                info!(
                    "Message from {}: {} (path {:?})",
                    delivery.source,
                    String::from_utf8_lossy(&delivery.message),
                    delivery.path
                );
            }
        }
    }

    if let Some(task) = control {
        task.abort();
    }
    coordinator.stop(true).await;
    Ok(())
}
