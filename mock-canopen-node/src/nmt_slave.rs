//! NMT slave state machine.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use canopen_common::cob_id::{self, BROADCAST_NODE_ID, HEARTBEAT, NMT};
use canopen_common::{NmtCommand, NmtState};
use canopen_network::Node;

pub struct NmtSlave {
    node_id: u8,
    state: Mutex<NmtState>,
}

impl NmtSlave {
    /// A slave that has finished booting and sits in pre-operational.
    pub fn new(node_id: u8) -> Self {
        Self {
            node_id,
            state: Mutex::new(NmtState::PreOperational),
        }
    }

    pub fn state(&self) -> NmtState {
        *self.state.lock()
    }

    pub fn heartbeat(&self) -> [u8; 1] {
        [self.state().heartbeat_byte()]
    }

    /// Apply an NMT frame. Returns the command if it addressed this node.
    pub fn handle_command(&self, data: &[u8]) -> Option<NmtCommand> {
        let [command, target, ..] = *data else {
            debug!("Short NMT frame {:02X?}", data);
            return None;
        };
        if target != self.node_id && target != BROADCAST_NODE_ID {
            return None;
        }
        let Some(command) = NmtCommand::from_byte(command) else {
            warn!("Unknown NMT command 0x{:02X}", command);
            return None;
        };

        let state = match command {
            // reset completes immediately, the boot-up frame reports it
            NmtCommand::ResetNode | NmtCommand::ResetCommunication => NmtState::PreOperational,
            other => other.target_state(),
        };
        let previous = std::mem::replace(&mut *self.state.lock(), state);
        info!("NMT {:?}: {} -> {}", command, previous, state);
        Some(command)
    }

    /// Listen for NMT commands addressed to `node`.
    pub fn attach(self: &Arc<Self>, node: &Arc<Node>) {
        let slave = Arc::clone(self);
        let weak = Arc::downgrade(node);
        let heartbeat_id = cob_id::cob_id(HEARTBEAT, self.node_id);
        node.register_service(NMT, move |_, data| {
            let Some(command) = slave.handle_command(data) else {
                return;
            };
            if !matches!(
                command,
                NmtCommand::ResetNode | NmtCommand::ResetCommunication
            ) {
                return;
            }
            if let Some(node) = weak.upgrade() {
                let bootup = [NmtState::Initialising.heartbeat_byte()];
                if let Err(e) = node.send_message(heartbeat_id, &bootup) {
                    warn!("Failed to queue boot-up frame: {}", e);
                }
            }
        });
    }
}
