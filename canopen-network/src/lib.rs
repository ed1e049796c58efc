//! # CANopen network core
//!
//! Multiplexes one CAN bus connection among many logical nodes.
//!
//! Outbound frames from any thread go through an unbounded FIFO drained by a
//! single transmit thread. Inbound frames are read by a receive thread and
//! routed by node address (`cob_id & 0x7F`, 0 = broadcast) and then by
//! function code (`cob_id & 0x780`) into each node's service table.
//!
//! ```no_run
//! use canopen_network::{BusConfig, Network};
//! use canopen_common::DictionarySource;
//!
//! # async fn run() -> canopen_network::Result<()> {
//! let network = Network::new();
//! let node = network.add_node(5u8, DictionarySource::Empty)?;
//! network.connect(&BusConfig::Socketcan { channel: "can0".into() })?;
//!
//! let device_type = node.sdo().upload(0x1000, 0).await?;
//! println!("device type: {:02X?}", device_type);
//!
//! network.disconnect()?;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod channel;
pub mod dispatcher;
pub mod error;
pub mod network;
pub mod nmt;
pub mod node;
pub mod notifier;
pub mod registry;
pub mod sdo;
pub mod socketcan_bus;
pub mod transmit;
pub mod virtual_bus;

mod worker;

pub use bus::{open_bus, Bus, BusConfig, Frame, Listener};
pub use channel::{OutboundChannel, OutboundMessage};
pub use dispatcher::MessageDispatcher;
pub use error::{BusError, NetworkError, Result};
pub use network::{Network, NetworkConfig, NetworkHandle};
pub use nmt::NmtNode;
pub use node::{ensure_node, Node, NodeSpec, ServiceCallback, ServiceTable};
pub use notifier::Notifier;
pub use registry::NodeRegistry;
pub use sdo::SdoClient;
pub use socketcan_bus::SocketCanBus;
pub use virtual_bus::{VirtualBus, VirtualChannel};
