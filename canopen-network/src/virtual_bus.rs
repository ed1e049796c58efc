//! In-process virtual CAN bus.
//!
//! Every [`VirtualBus`] opened with the same channel name shares one
//! broadcast medium: a frame sent on one endpoint is delivered to every other
//! endpoint, in send order. Endpoints leave the channel on `shutdown` or drop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::bus::{Bus, Frame};
use crate::error::BusError;

/// Shared medium of one named channel.
#[derive(Default)]
pub struct VirtualChannel {
    name: String,
    endpoints: Mutex<Vec<(usize, Sender<Frame>)>>,
    next_endpoint: AtomicUsize,
}

fn channels() -> &'static Mutex<HashMap<String, Weak<VirtualChannel>>> {
    static CHANNELS: OnceLock<Mutex<HashMap<String, Weak<VirtualChannel>>>> = OnceLock::new();
    CHANNELS.get_or_init(|| Mutex::new(HashMap::new()))
}

impl VirtualChannel {
    /// Look up the channel called `name`, creating it if nobody holds it.
    pub fn named(name: &str) -> Arc<Self> {
        let mut channels = channels().lock();
        if let Some(channel) = channels.get(name).and_then(Weak::upgrade) {
            return channel;
        }
        let channel = Arc::new(Self {
            name: name.to_string(),
            ..Self::default()
        });
        channels.insert(name.to_string(), Arc::downgrade(&channel));
        channel
    }

    /// Number of endpoints currently attached.
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.lock().len()
    }

    fn attach(&self) -> (usize, Receiver<Frame>) {
        let id = self.next_endpoint.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = unbounded();
        self.endpoints.lock().push((id, tx));
        (id, rx)
    }

    fn detach(&self, endpoint: usize) {
        self.endpoints.lock().retain(|(id, _)| *id != endpoint);
    }

    fn deliver(&self, from: usize, frame: &Frame, include_sender: bool) {
        for (id, tx) in self.endpoints.lock().iter() {
            if *id != from || include_sender {
                let _ = tx.send(frame.clone());
            }
        }
    }
}

pub struct VirtualBus {
    channel: Arc<VirtualChannel>,
    endpoint: usize,
    rx: Receiver<Frame>,
    receive_own_messages: bool,
}

impl VirtualBus {
    /// Attach a new endpoint to the channel called `channel`.
    pub fn open(channel: &str) -> Self {
        let channel = VirtualChannel::named(channel);
        let (endpoint, rx) = channel.attach();
        Self {
            channel,
            endpoint,
            rx,
            receive_own_messages: false,
        }
    }

    /// Also deliver frames sent by this endpoint back to it.
    pub fn receive_own_messages(mut self, enabled: bool) -> Self {
        self.receive_own_messages = enabled;
        self
    }

    /// Put an arbitrary frame (extended, error, remote) on the channel.
    pub fn send_frame(&self, frame: &Frame) -> Result<(), BusError> {
        frame.validate()?;
        self.channel
            .deliver(self.endpoint, frame, self.receive_own_messages);
        Ok(())
    }
}

impl Bus for VirtualBus {
    fn send(&self, cob_id: u16, data: &[u8]) -> Result<(), BusError> {
        self.send_frame(&Frame::new(cob_id, data))
    }

    fn recv(&self, timeout: Duration) -> Result<Option<Frame>, BusError> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(BusError::Closed),
        }
    }

    fn channel_info(&self) -> String {
        format!("virtual channel '{}'", self.channel.name)
    }

    fn shutdown(&self) {
        self.channel.detach(self.endpoint);
    }
}

impl Drop for VirtualBus {
    fn drop(&mut self) {
        self.channel.detach(self.endpoint);
    }
}
