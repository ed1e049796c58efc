//! Receive loop feeding bus frames to listeners.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use crate::bus::{Bus, Listener};
use crate::error::Result;
use crate::worker::WorkerThread;

/// Reads frames from a bus on its own thread and hands each one to every
/// listener, in arrival order, on that thread.
pub struct Notifier {
    worker: WorkerThread,
}

impl Notifier {
    pub fn new(
        bus: Arc<dyn Bus>,
        listeners: Vec<Arc<dyn Listener>>,
        timeout: Duration,
    ) -> Result<Self> {
        let worker = WorkerThread::spawn("canopen-rx", move |shutdown| {
            while !shutdown.load(Ordering::Acquire) {
                match bus.recv(timeout) {
                    Ok(Some(frame)) => {
                        // a frame read while stopping is not delivered
                        if shutdown.load(Ordering::Acquire) {
                            break;
                        }
                        for listener in &listeners {
                            listener.on_message_received(&frame);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!("Receive error on {}: {}", bus.channel_info(), e);
                        break;
                    }
                }
            }
            for listener in &listeners {
                listener.stop();
            }
        })?;

        Ok(Self { worker })
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    /// Ask the receive loop to exit without waiting for it.
    pub fn request_stop(&self) {
        self.worker.request_stop();
    }

    /// Stop delivering frames; waits at most `join_timeout` for the thread.
    pub fn stop(mut self, join_timeout: Duration) -> bool {
        self.worker.stop(join_timeout)
    }
}
