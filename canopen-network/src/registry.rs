//! Node registry and inbound routing.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use canopen_common::cob_id::{self, BROADCAST_NODE_ID};

use crate::node::Node;

/// Address -> node map shared between the network API and the receive thread.
///
/// Routing takes a snapshot of the target nodes under the read lock and
/// invokes callbacks after releasing it, so callbacks may add or remove nodes.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    nodes: Arc<RwLock<HashMap<u8, Arc<Node>>>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `node` under its own id, returning the node it replaced.
    pub fn insert(&self, node: Arc<Node>) -> Option<Arc<Node>> {
        self.nodes.write().insert(node.id(), node)
    }

    pub fn remove(&self, node_id: u8) -> Option<Arc<Node>> {
        self.nodes.write().remove(&node_id)
    }

    pub fn get(&self, node_id: u8) -> Option<Arc<Node>> {
        self.nodes.read().get(&node_id).cloned()
    }

    pub fn contains(&self, node_id: u8) -> bool {
        self.nodes.read().contains_key(&node_id)
    }

    /// Registered addresses, ascending.
    pub fn ids(&self) -> Vec<u8> {
        let mut ids: Vec<u8> = self.nodes.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// All registered nodes, ordered by address.
    pub fn snapshot(&self) -> Vec<Arc<Node>> {
        let mut nodes: Vec<Arc<Node>> = self.nodes.read().values().cloned().collect();
        nodes.sort_unstable_by_key(|node| node.id());
        nodes
    }

    /// Deliver one inbound frame.
    ///
    /// Address 0 goes to every registered node. Otherwise the frame goes to
    /// the node at its address if there is one and is silently dropped if
    /// not. Returns how many nodes saw the frame.
    pub fn route(&self, cob_id: u16, data: &[u8]) -> usize {
        let node_id = cob_id::node_id(cob_id);
        let targets = if node_id == BROADCAST_NODE_ID {
            self.snapshot()
        } else {
            self.get(node_id).into_iter().collect()
        };

        if targets.is_empty() {
            trace!("No node for COB-ID 0x{:03X}, dropped", cob_id);
        }
        for node in &targets {
            node.on_message(cob_id, data);
        }
        targets.len()
    }
}
