use tracing::debug;

use crate::bus::{Frame, Listener};
use crate::registry::NodeRegistry;

/// Listener that feeds bus frames into the node registry.
///
/// Error frames, remote frames and extended ids are not CANopen traffic and
/// are discarded.
pub struct MessageDispatcher {
    registry: NodeRegistry,
}

impl MessageDispatcher {
    pub fn new(registry: NodeRegistry) -> Self {
        Self { registry }
    }
}

impl Listener for MessageDispatcher {
    fn on_message_received(&self, frame: &Frame) {
        match frame.cob_id() {
            Some(cob_id) if frame.is_routable() => {
                self.registry.route(cob_id, &frame.data);
            }
            _ => debug!("Ignoring non-CANopen frame 0x{:X}", frame.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use canopen_common::cob_id::HEARTBEAT;
    use canopen_common::DictionarySource;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_only_routable_frames_are_dispatched() {
        let registry = NodeRegistry::new();
        let node = Arc::new(Node::new(5, DictionarySource::Empty).unwrap());
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        node.register_service(HEARTBEAT, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        registry.insert(node);

        let dispatcher = MessageDispatcher::new(registry);
        dispatcher.on_message_received(&Frame::new(0x705, &[0x05]));
        dispatcher.on_message_received(&Frame::error(0x705, &[0; 8]));
        dispatcher.on_message_received(&Frame::remote(0x705));
        dispatcher.on_message_received(&Frame::extended(0x705, &[0x05]));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
