//! Nodes and their per-node service tables.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use canopen_common::cob_id::{self, FUNCTION_CODE_MASK, HEARTBEAT, SDO_RESPONSE};
use canopen_common::{import_any, DictionarySource, ObjectDictionary};

use crate::error::{NetworkError, Result};
use crate::network::NetworkHandle;
use crate::nmt::NmtNode;
use crate::sdo::SdoClient;

/// Handler for frames of one function code: `(cob_id, data)`.
pub type ServiceCallback = Arc<dyn Fn(u16, &[u8]) + Send + Sync>;

/// Function code -> callback map owned by one node.
///
/// Dispatch clones the callback out of the table before invoking it, so a
/// callback may itself register or remove services.
#[derive(Default)]
pub struct ServiceTable {
    callbacks: RwLock<HashMap<u16, ServiceCallback>>,
}

impl ServiceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for the function code of `cob_id`; replaces any
    /// previous callback for that code.
    pub fn register<F>(&self, cob_id: u16, callback: F)
    where
        F: Fn(u16, &[u8]) + Send + Sync + 'static,
    {
        self.callbacks
            .write()
            .insert(cob_id & FUNCTION_CODE_MASK, Arc::new(callback));
    }

    pub fn unregister(&self, cob_id: u16) -> bool {
        self.callbacks
            .write()
            .remove(&(cob_id & FUNCTION_CODE_MASK))
            .is_some()
    }

    pub fn contains(&self, cob_id: u16) -> bool {
        self.callbacks
            .read()
            .contains_key(&(cob_id & FUNCTION_CODE_MASK))
    }

    /// Registered function codes, ascending.
    pub fn function_codes(&self) -> Vec<u16> {
        let mut codes: Vec<u16> = self.callbacks.read().keys().copied().collect();
        codes.sort_unstable();
        codes
    }

    /// Invoke the callback for `cob_id`'s function code, if any.
    pub fn dispatch(&self, cob_id: u16, data: &[u8]) -> bool {
        let callback = self
            .callbacks
            .read()
            .get(&cob_id::function_code(cob_id))
            .cloned();
        match callback {
            Some(callback) => {
                callback(cob_id, data);
                true
            }
            None => false,
        }
    }
}

/// Non-owning link from a node (and its engines) to the network it belongs to.
#[derive(Clone)]
pub(crate) struct NetworkLink {
    node_id: u8,
    slot: Arc<RwLock<Option<NetworkHandle>>>,
}

impl NetworkLink {
    pub fn new(node_id: u8) -> Self {
        Self {
            node_id,
            slot: Arc::new(RwLock::new(None)),
        }
    }

    pub fn attach(&self, handle: NetworkHandle) {
        *self.slot.write() = Some(handle);
    }

    pub fn detach(&self) {
        *self.slot.write() = None;
    }

    pub fn handle(&self) -> Option<NetworkHandle> {
        self.slot.read().clone()
    }

    pub fn send_message(&self, cob_id: u16, data: &[u8]) -> Result<()> {
        match self.slot.read().as_ref() {
            Some(handle) => handle.send_message(cob_id, data),
            None => Err(NetworkError::Detached(self.node_id)),
        }
    }
}

/// A remote CANopen device as seen from this network.
pub struct Node {
    id: u8,
    object_dictionary: Arc<ObjectDictionary>,
    services: ServiceTable,
    link: NetworkLink,
    sdo: Arc<SdoClient>,
    nmt: Arc<NmtNode>,
}

impl Node {
    /// Build node `node_id` (1-127) with the dictionary described by `dictionary`.
    ///
    /// The SDO client is registered for SDO responses and the NMT endpoint
    /// for heartbeats.
    pub fn new(node_id: u8, dictionary: impl Into<DictionarySource>) -> Result<Self> {
        if !cob_id::is_valid_node_id(node_id) {
            return Err(NetworkError::InvalidNodeId(node_id));
        }
        let object_dictionary = import_any(dictionary.into())?;
        let link = NetworkLink::new(node_id);

        let node = Self {
            id: node_id,
            sdo: Arc::new(SdoClient::new(
                node_id,
                Arc::clone(&object_dictionary),
                link.clone(),
            )),
            nmt: Arc::new(NmtNode::new(node_id, link.clone())),
            object_dictionary,
            services: ServiceTable::new(),
            link,
        };

        let sdo = Arc::clone(&node.sdo);
        node.register_service(SDO_RESPONSE, move |cob_id, data| sdo.on_response(cob_id, data));
        let nmt = Arc::clone(&node.nmt);
        node.register_service(HEARTBEAT, move |cob_id, data| nmt.on_heartbeat(cob_id, data));

        Ok(node)
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn object_dictionary(&self) -> &Arc<ObjectDictionary> {
        &self.object_dictionary
    }

    pub fn sdo(&self) -> &SdoClient {
        &self.sdo
    }

    pub fn nmt(&self) -> &NmtNode {
        &self.nmt
    }

    pub fn services(&self) -> &ServiceTable {
        &self.services
    }

    pub fn register_service<F>(&self, cob_id: u16, callback: F)
    where
        F: Fn(u16, &[u8]) + Send + Sync + 'static,
    {
        self.services.register(cob_id, callback);
    }

    pub fn unregister_service(&self, cob_id: u16) -> bool {
        self.services.unregister(cob_id)
    }

    pub fn has_service(&self, cob_id: u16) -> bool {
        self.services.contains(cob_id)
    }

    pub fn service_codes(&self) -> Vec<u16> {
        self.services.function_codes()
    }

    /// Route one inbound frame to the matching service. Frames for services
    /// this node does not implement are ignored.
    pub fn on_message(&self, cob_id: u16, data: &[u8]) -> bool {
        self.services.dispatch(cob_id, data)
    }

    /// Handle of the network this node is registered with.
    pub fn network(&self) -> Option<NetworkHandle> {
        self.link.handle()
    }

    pub fn is_attached(&self) -> bool {
        self.link.handle().is_some()
    }

    /// Queue a frame on the owning network.
    pub fn send_message(&self, cob_id: u16, data: &[u8]) -> Result<()> {
        self.link.send_message(cob_id, data)
    }

    pub(crate) fn attach(&self, handle: NetworkHandle) {
        self.link.attach(handle);
    }

    pub(crate) fn detach(&self) {
        self.link.detach();
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("services", &self.services.function_codes())
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Something that can become a registered node.
pub enum NodeSpec {
    /// Build a new node at this address.
    Address(u8),
    Node(Node),
    Shared(Arc<Node>),
}

impl From<u8> for NodeSpec {
    fn from(node_id: u8) -> Self {
        Self::Address(node_id)
    }
}

impl From<Node> for NodeSpec {
    fn from(node: Node) -> Self {
        Self::Node(node)
    }
}

impl From<Arc<Node>> for NodeSpec {
    fn from(node: Arc<Node>) -> Self {
        Self::Shared(node)
    }
}

/// Turn `spec` into a shared node; `dictionary` is only used for bare addresses.
pub fn ensure_node(spec: NodeSpec, dictionary: DictionarySource) -> Result<Arc<Node>> {
    match spec {
        NodeSpec::Address(node_id) => Node::new(node_id, dictionary).map(Arc::new),
        NodeSpec::Node(node) => Ok(Arc::new(node)),
        NodeSpec::Shared(node) => Ok(node),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopen_common::cob_id::TPDO1;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_new_node_registers_default_services() {
        let node = Node::new(5, DictionarySource::Empty).unwrap();
        assert_eq!(node.service_codes(), vec![SDO_RESPONSE, HEARTBEAT]);
        assert!(!node.is_attached());
    }

    #[test]
    fn test_invalid_node_ids() {
        assert!(matches!(
            Node::new(0, DictionarySource::Empty),
            Err(NetworkError::InvalidNodeId(0))
        ));
        assert!(matches!(
            Node::new(128, DictionarySource::Empty),
            Err(NetworkError::InvalidNodeId(128))
        ));
    }

    #[test]
    fn test_unresolvable_dictionary_propagates() {
        let result = Node::new(3, DictionarySource::Eds("/nonexistent/node3.eds".into()));
        assert!(matches!(result, Err(NetworkError::Dictionary(_))));
    }

    #[test]
    fn test_dispatch_by_function_code() {
        let node = Node::new(7, DictionarySource::Empty).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        node.register_service(TPDO1, move |cob_id, data| {
            sink.lock().push((cob_id, data.to_vec()));
        });

        assert!(node.on_message(0x187, &[1, 2]));
        assert!(!node.on_message(0x287, &[3]));
        assert_eq!(*seen.lock(), vec![(0x187, vec![1, 2])]);
    }

    #[test]
    fn test_last_registration_wins() {
        let table = ServiceTable::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&first);
        table.register(TPDO1, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = Arc::clone(&second);
        // registering with a full COB-ID keys on its function code
        table.register(TPDO1 + 9, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        table.dispatch(0x181, &[]);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(table.function_codes(), vec![TPDO1]);

        assert!(table.unregister(TPDO1));
        assert!(!table.dispatch(0x181, &[]));
    }

    #[test]
    fn test_callback_may_modify_its_own_table() {
        let node = Arc::new(Node::new(9, DictionarySource::Empty).unwrap());
        let weak = Arc::downgrade(&node);
        node.register_service(TPDO1, move |_, _| {
            if let Some(node) = weak.upgrade() {
                node.unregister_service(TPDO1);
            }
        });

        assert!(node.on_message(0x189, &[]));
        assert!(!node.has_service(TPDO1));
    }

    #[test]
    fn test_detached_node_cannot_send() {
        let node = Node::new(4, DictionarySource::Empty).unwrap();
        assert!(matches!(
            node.send_message(0x604, &[0x40, 0, 0x10, 0, 0, 0, 0, 0]),
            Err(NetworkError::Detached(4))
        ));
    }

    #[test]
    fn test_ensure_node() {
        let node = ensure_node(NodeSpec::from(12), DictionarySource::Empty).unwrap();
        assert_eq!(node.id(), 12);

        let same = ensure_node(NodeSpec::from(Arc::clone(&node)), DictionarySource::Empty).unwrap();
        assert!(Arc::ptr_eq(&node, &same));

        let built = Node::new(13, DictionarySource::Empty).unwrap();
        assert_eq!(
            ensure_node(built.into(), DictionarySource::Empty).unwrap().id(),
            13
        );
    }
}
