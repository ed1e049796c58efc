//! NMT endpoint: heartbeat consumer and command producer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use canopen_common::cob_id::NMT;
use canopen_common::{NmtCommand, NmtState};

use crate::error::{NetworkError, Result};
use crate::node::NetworkLink;

/// NMT view of one node, or of the whole network when `node_id` is 0.
pub struct NmtNode {
    node_id: u8,
    link: NetworkLink,
    state: watch::Sender<Option<NmtState>>,
    heartbeats: AtomicU64,
}

impl NmtNode {
    pub(crate) fn new(node_id: u8, link: NetworkLink) -> Self {
        Self {
            node_id,
            link,
            state: watch::Sender::new(None),
            heartbeats: AtomicU64::new(0),
        }
    }

    pub fn node_id(&self) -> u8 {
        self.node_id
    }

    /// Handler for frames on this node's heartbeat COB-ID.
    pub fn on_heartbeat(&self, cob_id: u16, data: &[u8]) {
        let Some(&byte) = data.first() else {
            return;
        };
        let state = NmtState::from_heartbeat(byte);
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
        let previous = self.state.send_replace(Some(state));
        if previous != Some(state) {
            debug!("Node {} (0x{:03X}) is {}", self.node_id, cob_id, state);
        }
    }

    /// Last state reported by a heartbeat or set by a command.
    pub fn state(&self) -> Option<NmtState> {
        *self.state.borrow()
    }

    pub fn heartbeat_count(&self) -> u64 {
        self.heartbeats.load(Ordering::Relaxed)
    }

    /// Observe state changes.
    pub fn subscribe(&self) -> watch::Receiver<Option<NmtState>> {
        self.state.subscribe()
    }

    /// Wait for the next heartbeat and return the state it carries.
    pub async fn wait_for_heartbeat(&self, timeout: Duration) -> Result<NmtState> {
        let mut rx = self.state.subscribe();
        let start = self.heartbeat_count();
        let wait = async {
            loop {
                if rx.changed().await.is_err() {
                    return None;
                }
                // commands also update the state; only a heartbeat counts here
                if self.heartbeat_count() != start {
                    return *rx.borrow_and_update();
                }
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(Some(state)) => Ok(state),
            _ => Err(NetworkError::HeartbeatTimeout(self.node_id)),
        }
    }

    /// Send an NMT command addressed to this node (to all nodes for node 0).
    /// The local state is updated to the command's target without waiting
    /// for confirmation.
    pub fn send_command(&self, command: NmtCommand) -> Result<()> {
        self.link.send_message(NMT, &command.encode(self.node_id))?;
        info!("NMT {:?} -> node {}", command, self.node_id);
        self.state.send_replace(Some(command.target_state()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(node_id: u8) -> NmtNode {
        NmtNode::new(node_id, NetworkLink::new(node_id))
    }

    #[test]
    fn test_heartbeat_updates_state() {
        let nmt = endpoint(5);
        assert_eq!(nmt.state(), None);

        nmt.on_heartbeat(0x705, &[0x05]);
        assert_eq!(nmt.state(), Some(NmtState::Operational));

        nmt.on_heartbeat(0x705, &[0xFF]);
        assert_eq!(nmt.state(), Some(NmtState::PreOperational));
        assert_eq!(nmt.heartbeat_count(), 2);
    }

    #[test]
    fn test_empty_heartbeat_is_ignored() {
        let nmt = endpoint(5);
        nmt.on_heartbeat(0x705, &[]);
        assert_eq!(nmt.state(), None);
        assert_eq!(nmt.heartbeat_count(), 0);
    }

    #[test]
    fn test_command_requires_network() {
        let nmt = endpoint(8);
        assert!(matches!(
            nmt.send_command(NmtCommand::Start),
            Err(NetworkError::Detached(8))
        ));
        assert_eq!(nmt.state(), None);
    }

    #[tokio::test]
    async fn test_wait_for_heartbeat_times_out() {
        let nmt = endpoint(9);
        let result = nmt.wait_for_heartbeat(Duration::from_millis(30)).await;
        assert!(matches!(result, Err(NetworkError::HeartbeatTimeout(9))));
    }

    #[tokio::test]
    async fn test_wait_for_heartbeat_sees_next_frame() {
        let nmt = std::sync::Arc::new(endpoint(2));
        nmt.on_heartbeat(0x702, &[0x7F]);

        let producer = std::sync::Arc::clone(&nmt);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.on_heartbeat(0x702, &[0x05]);
        });

        let state = nmt.wait_for_heartbeat(Duration::from_secs(1)).await.unwrap();
        assert_eq!(state, NmtState::Operational);
    }
}
