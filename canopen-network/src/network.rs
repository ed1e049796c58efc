//! Network facade: one bus connection shared by many nodes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::Sender;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, trace, warn};

use canopen_common::cob_id::BROADCAST_NODE_ID;
use canopen_common::DictionarySource;

use crate::bus::{open_bus, Bus, BusConfig, Listener};
use crate::channel::{OutboundChannel, OutboundMessage};
use crate::dispatcher::MessageDispatcher;
use crate::error::{NetworkError, Result};
use crate::nmt::NmtNode;
use crate::node::{ensure_node, NetworkLink, Node, NodeSpec};
use crate::notifier::Notifier;
use crate::registry::NodeRegistry;
use crate::transmit::TransmitLoop;

/// Worker timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Longest wait of the transmit loop on an empty queue.
    pub tx_poll_timeout_ms: u64,
    /// Longest wait of the receive loop on a silent bus.
    pub rx_poll_timeout_ms: u64,
    /// How long `disconnect` waits for each worker to exit.
    pub join_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            tx_poll_timeout_ms: 1000,
            rx_poll_timeout_ms: 1000,
            join_timeout_ms: 2000,
        }
    }
}

impl NetworkConfig {
    pub fn tx_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.tx_poll_timeout_ms)
    }

    pub fn rx_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.rx_poll_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// Cheap, cloneable sender onto a network's outbound queue.
#[derive(Clone)]
pub struct NetworkHandle {
    tx: Sender<OutboundMessage>,
}

impl NetworkHandle {
    /// Queue a frame. Fails only once the network itself is gone.
    pub fn send_message(&self, cob_id: u16, data: &[u8]) -> Result<()> {
        self.tx
            .send(OutboundMessage {
                cob_id,
                data: data.to_vec(),
            })
            .map_err(|_| NetworkError::Closed)
    }
}

struct Connection {
    bus: Arc<dyn Bus>,
    notifier: Notifier,
    transmit: TransmitLoop,
}

pub struct Network {
    config: NetworkConfig,
    outbound: OutboundChannel,
    registry: NodeRegistry,
    listeners: Mutex<Vec<Arc<dyn Listener>>>,
    connection: Mutex<Option<Connection>>,
    nmt: NmtNode,
}

impl Network {
    pub fn new() -> Self {
        Self::with_config(NetworkConfig::default())
    }

    pub fn with_config(config: NetworkConfig) -> Self {
        let outbound = OutboundChannel::new();
        let link = NetworkLink::new(BROADCAST_NODE_ID);
        link.attach(NetworkHandle {
            tx: outbound.sender(),
        });
        Self {
            config,
            outbound,
            registry: NodeRegistry::new(),
            listeners: Mutex::new(Vec::new()),
            connection: Mutex::new(None),
            nmt: NmtNode::new(BROADCAST_NODE_ID, link),
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Open the bus described by `config` and start the workers.
    pub fn connect(&self, config: &BusConfig) -> Result<()> {
        if self.is_connected() {
            return Err(NetworkError::AlreadyConnected);
        }
        let bus = open_bus(config)?;
        self.connect_bus(bus)
    }

    /// Start the workers on an already opened bus.
    pub fn connect_bus(&self, bus: Arc<dyn Bus>) -> Result<()> {
        let mut connection = self.connection.lock();
        if connection.is_some() {
            return Err(NetworkError::AlreadyConnected);
        }

        let mut listeners: Vec<Arc<dyn Listener>> =
            vec![Arc::new(MessageDispatcher::new(self.registry.clone()))];
        listeners.extend(self.listeners.lock().iter().cloned());

        let transmit = TransmitLoop::spawn(
            Arc::clone(&bus),
            self.outbound.receiver(),
            self.config.tx_poll_timeout(),
        )?;
        let notifier = match Notifier::new(Arc::clone(&bus), listeners, self.config.rx_poll_timeout())
        {
            Ok(notifier) => notifier,
            Err(e) => {
                transmit.stop(self.config.join_timeout());
                return Err(e);
            }
        };

        info!("Connected to {}", bus.channel_info());
        *connection = Some(Connection {
            bus,
            notifier,
            transmit,
        });
        Ok(())
    }

    /// Stop the workers and release the bus. Queued messages stay queued.
    pub fn disconnect(&self) -> Result<()> {
        let Connection {
            bus,
            notifier,
            transmit,
        } = self
            .connection
            .lock()
            .take()
            .ok_or(NetworkError::NotConnected)?;

        // both workers wind down in parallel against one deadline
        let deadline = Instant::now() + self.config.join_timeout();
        notifier.request_stop();
        transmit.request_stop();
        notifier.stop(deadline.saturating_duration_since(Instant::now()));
        if !transmit.stop(deadline.saturating_duration_since(Instant::now())) {
            // the detached loop never reached its own shutdown call
            bus.shutdown();
        }
        info!("Disconnected from {}", bus.channel_info());
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connection.lock().is_some()
    }

    /// Description of the connected bus.
    pub fn channel_info(&self) -> Option<String> {
        self.connection
            .lock()
            .as_ref()
            .map(|connection| connection.bus.channel_info())
    }

    /// Queue a frame for transmission. Never blocks; while disconnected the
    /// frame waits in the queue.
    pub fn send_message(&self, cob_id: u16, data: &[u8]) {
        trace!("Queue 0x{:03X} {:02X?}", cob_id, data);
        self.outbound.enqueue(cob_id, data);
    }

    /// Frames waiting for the transmit loop.
    pub fn pending_messages(&self) -> usize {
        self.outbound.len()
    }

    pub fn handle(&self) -> NetworkHandle {
        NetworkHandle {
            tx: self.outbound.sender(),
        }
    }

    /// Route one inbound frame to the registered nodes. Returns the number of
    /// nodes it was delivered to.
    pub fn route_inbound(&self, cob_id: u16, data: &[u8]) -> usize {
        self.registry.route(cob_id, data)
    }

    /// Extra listener for every frame received on the bus. Takes effect on
    /// the next `connect`.
    pub fn add_listener(&self, listener: Arc<dyn Listener>) {
        if self.is_connected() {
            warn!("Listener added while connected; active from next connect");
        }
        self.listeners.lock().push(listener);
    }

    /// Register a node, replacing any node at the same address.
    ///
    /// A bare address is built into a node using `dictionary`; dictionary
    /// resolution errors are returned unchanged.
    pub fn add_node(
        &self,
        node: impl Into<NodeSpec>,
        dictionary: impl Into<DictionarySource>,
    ) -> Result<Arc<Node>> {
        let node = ensure_node(node.into(), dictionary.into())?;
        node.attach(self.handle());
        if let Some(previous) = self.registry.insert(Arc::clone(&node)) {
            if !Arc::ptr_eq(&previous, &node) {
                previous.detach();
            }
        }
        info!("Added node {}", node.id());
        Ok(node)
    }

    pub fn remove_node(&self, node_id: u8) -> Result<Arc<Node>> {
        let node = self
            .registry
            .remove(node_id)
            .ok_or(NetworkError::NodeNotFound(node_id))?;
        node.detach();
        info!("Removed node {}", node_id);
        Ok(node)
    }

    pub fn get(&self, node_id: u8) -> Result<Arc<Node>> {
        self.registry
            .get(node_id)
            .ok_or(NetworkError::NodeNotFound(node_id))
    }

    pub fn contains(&self, node_id: u8) -> bool {
        self.registry.contains(node_id)
    }

    pub fn node_ids(&self) -> Vec<u8> {
        self.registry.ids()
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Registered nodes ordered by address.
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.registry.snapshot()
    }

    /// Network-wide NMT master (commands addressed to node 0).
    pub fn nmt(&self) -> &NmtNode {
        &self.nmt
    }
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Network {
    fn drop(&mut self) {
        if self.is_connected() {
            let _ = self.disconnect();
        }
    }
}
