mod config;
mod logging;
mod poller;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use canopen_common::{DictionarySource, NmtCommand};
use canopen_network::{BusConfig, Listener, Network};

use crate::config::{AppConfig, NodeConfig};
use crate::logging::{init_tracing, LogEvent, TrafficLogger};

/// CANopen bus monitor: logs traffic, tracks node states and polls SDO values
#[derive(Parser, Debug)]
#[command(name = "canopen-monitor", version, author, long_about = None)]
struct Args {
    /// Configuration file (defaults to the per-user config location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SocketCAN interface, overrides the configured bus
    #[arg(short, long)]
    interface: Option<String>,

    /// Use the named in-process virtual channel instead of SocketCAN
    #[arg(long, conflicts_with = "interface")]
    virtual_channel: Option<String>,

    /// Extra node to watch; repeat for several nodes
    #[arg(short, long = "node")]
    nodes: Vec<u8>,

    /// EDS file for the nodes given with --node
    #[arg(long)]
    eds: Option<PathBuf>,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    duration: Option<u64>,

    /// Print the readable objects of each node's dictionary and exit
    #[arg(long)]
    list_objects: bool,

    /// Disable the CSV traffic log
    #[arg(long)]
    no_log: bool,

    /// Write the effective configuration back to the config file
    #[arg(long)]
    save_config: bool,

    /// Default log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn apply_overrides(config: &mut AppConfig, args: &Args) {
    if let Some(interface) = &args.interface {
        config.bus = BusConfig::Socketcan {
            channel: interface.clone(),
        };
    }
    if let Some(channel) = &args.virtual_channel {
        config.bus = BusConfig::Virtual {
            channel: channel.clone(),
            receive_own_messages: false,
        };
    }
    for &id in &args.nodes {
        config.nodes.retain(|node| node.id != id);
        config.nodes.push(NodeConfig {
            id,
            eds: args.eds.clone(),
        });
    }
    if args.no_log {
        config.enable_logging = false;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let mut config = AppConfig::load(args.config.as_deref());
    apply_overrides(&mut config, &args);
    if args.save_config {
        config.save(args.config.as_deref())?;
    }

    let network = Network::with_config(config.network.clone());
    for node in &config.nodes {
        let source = DictionarySource::from(node.eds.clone());
        let added = network
            .add_node(node.id, source)
            .with_context(|| format!("Failed to add node {}", node.id))?;
        added
            .sdo()
            .set_response_timeout(Duration::from_millis(config.sdo_timeout_ms));
    }

    if args.list_objects {
        for node in network.nodes() {
            println!("Node {}:", node.id());
            for line in poller::describe_readable(node.object_dictionary()) {
                println!("  {}", line);
            }
        }
        return Ok(());
    }

    let logger = if config.enable_logging {
        match config.log_directory() {
            Some(directory) => match TrafficLogger::create(&directory) {
                Ok(logger) => Some(Arc::new(logger)),
                Err(e) => {
                    warn!("Traffic log disabled: {:#}", e);
                    None
                }
            },
            None => {
                warn!("Traffic log disabled: no log directory");
                None
            }
        }
    } else {
        None
    };
    if let Some(logger) = &logger {
        network.add_listener(Arc::clone(logger) as Arc<dyn Listener>);
    }

    if let Err(e) = network.connect(&config.bus) {
        if let Some(logger) = &logger {
            logger.log(&LogEvent::Connection(format!("Connection failed: {}", e)));
        }
        return Err(e).context("Failed to connect");
    }
    let channel = network.channel_info().unwrap_or_default();
    if let Some(logger) = &logger {
        logger.log(&LogEvent::Connection(format!("Connected to {}", channel)));
    }

    if config.start_nodes {
        network.nmt().send_command(NmtCommand::Start)?;
    }

    let mut tasks = Vec::new();
    for node in network.nodes() {
        tasks.push(poller::spawn_state_watch(Arc::clone(&node), logger.clone()));
    }
    for poll in &config.polls {
        match network.get(poll.node) {
            Ok(node) => tasks.push(poller::spawn_poll(node, poll.clone(), logger.clone())),
            Err(e) => error!("Skipping poll of 0x{:04X}: {}", poll.index, e),
        }
    }
    info!(
        "Monitoring {} node(s) with {} poll(s) on {}",
        network.len(),
        config.polls.len(),
        channel
    );

    match args.duration {
        Some(seconds) => tokio::time::sleep(Duration::from_secs(seconds)).await,
        None => tokio::signal::ctrl_c().await?,
    }

    info!("Shutting down");
    for task in tasks {
        task.abort();
    }
    network.disconnect()?;
    if let Some(logger) = &logger {
        logger.log(&LogEvent::Connection(format!("Disconnected from {}", channel)));
        info!("Traffic log written to {}", logger.path().display());
    }
    Ok(())
}
