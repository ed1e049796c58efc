//! Outbound message queue.
//!
//! Unbounded FIFO shared by any number of producers and the single transmit
//! loop. Enqueueing never blocks.

use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};

/// One frame waiting for the transmit loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub cob_id: u16,
    pub data: Vec<u8>,
}

pub struct OutboundChannel {
    tx: Sender<OutboundMessage>,
    rx: Receiver<OutboundMessage>,
}

impl OutboundChannel {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Append a message; never blocks.
    pub fn enqueue(&self, cob_id: u16, data: &[u8]) {
        // the channel owns its receiver, so the send cannot fail
        let _ = self.tx.send(OutboundMessage {
            cob_id,
            data: data.to_vec(),
        });
    }

    /// Wait up to `timeout` for the oldest message.
    pub fn pop(&self, timeout: Duration) -> Option<OutboundMessage> {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => Some(message),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub(crate) fn sender(&self) -> Sender<OutboundMessage> {
        self.tx.clone()
    }

    pub(crate) fn receiver(&self) -> Receiver<OutboundMessage> {
        self.rx.clone()
    }
}

impl Default for OutboundChannel {
    fn default() -> Self {
        Self::new()
    }
}
