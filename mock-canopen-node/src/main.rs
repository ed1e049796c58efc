//! # Mock CANopen Node
//!
//! A CANopen slave simulator for exercising the monitor and the network
//! library without hardware.
//!
//! This mock node:
//! - Answers expedited SDO uploads and downloads from a simulated dictionary
//! - Follows NMT commands and reports its state in heartbeats
//! - Broadcasts changing sensor values on TPDO1
//!
//! ## Usage
//!
//! ```bash
//! # Start the mock node on vcan0 with node ID 4
//! cargo run -p mock-canopen-node -- --interface vcan0 --node-id 4
//! ```

mod nmt_slave;
mod object_dictionary;
mod producer;
mod sdo_server;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use canopen_common::cob_id::{self, is_valid_node_id, SDO_REQUEST, TPDO1};
use canopen_common::ObjectDictionary;
use canopen_network::{BusConfig, Network};

use nmt_slave::NmtSlave;
use object_dictionary::SimulatedDictionary;
use sdo_server::SdoServer;

#[derive(Parser, Debug)]
#[command(name = "mock-node", version, about = "Simulated CANopen slave", long_about = None)]
struct Args {
    /// SocketCAN interface
    #[arg(short, long, default_value = "vcan0")]
    interface: String,

    /// Use the named in-process virtual channel instead of SocketCAN
    #[arg(long)]
    virtual_channel: Option<String>,

    #[arg(short, long, default_value_t = 4)]
    node_id: u8,

    /// TPDO1 period in milliseconds
    #[arg(long, default_value_t = 100)]
    tpdo_interval: u64,

    /// Heartbeat period in milliseconds
    #[arg(long, default_value_t = 1000)]
    heartbeat_interval: u64,

    /// Only send TPDOs once started by an NMT master
    #[arg(long)]
    wait_for_start: bool,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    duration: Option<u64>,

    /// Default log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if !is_valid_node_id(args.node_id) {
        bail!("Node ID must be between 1 and 127, got {}", args.node_id);
    }
    let bus = match &args.virtual_channel {
        Some(channel) => BusConfig::Virtual {
            channel: channel.clone(),
            receive_own_messages: false,
        },
        None => BusConfig::Socketcan {
            channel: args.interface.clone(),
        },
    };

    info!("Mock CANopen node {} starting", args.node_id);

    let dictionary = SimulatedDictionary::with_test_objects(args.node_id);
    info!("Object dictionary loaded with {} objects", dictionary.len());
    for line in dictionary.summary() {
        info!("  {}", line);
    }

    let network = Network::new();
    let node = network.add_node(args.node_id, ObjectDictionary::new())?;
    let server = Arc::new(SdoServer::new(args.node_id, dictionary));
    server.attach(&node);
    let slave = Arc::new(NmtSlave::new(args.node_id));
    slave.attach(&node);

    network.connect(&bus).with_context(|| {
        format!(
            "Failed to open {:?}. For vcan: sudo modprobe vcan && \
             sudo ip link add dev vcan0 type vcan && sudo ip link set up vcan0",
            bus
        )
    })?;

    let tasks = [
        producer::spawn_tpdo(
            Arc::clone(&node),
            Arc::clone(&slave),
            Duration::from_millis(args.tpdo_interval.max(1)),
            args.wait_for_start,
        ),
        producer::spawn_heartbeat(
            Arc::clone(&node),
            Arc::clone(&slave),
            Duration::from_millis(args.heartbeat_interval.max(1)),
        ),
    ];

    info!(
        "Mock node running: SDO requests on 0x{:03X}, TPDO1 on 0x{:03X} every {}ms",
        cob_id::cob_id(SDO_REQUEST, args.node_id),
        cob_id::cob_id(TPDO1, args.node_id),
        args.tpdo_interval
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
    Ok(())
}
