//! Transmit loop: the only writer on the bus.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError};
use tracing::error;

use crate::bus::Bus;
use crate::channel::OutboundMessage;
use crate::error::Result;
use crate::worker::WorkerThread;

pub struct TransmitLoop {
    worker: WorkerThread,
}

impl TransmitLoop {
    /// Start draining `queue` onto `bus`.
    ///
    /// Each wait on the queue is bounded by `poll_timeout` so the loop notices
    /// shutdown. Send failures are logged and the message is dropped. The bus
    /// is shut down when the loop exits.
    pub fn spawn(
        bus: Arc<dyn Bus>,
        queue: Receiver<OutboundMessage>,
        poll_timeout: Duration,
    ) -> Result<Self> {
        let worker = WorkerThread::spawn("canopen-tx", move |shutdown| {
            while !shutdown.load(Ordering::Acquire) {
                let message = match queue.recv_timeout(poll_timeout) {
                    Ok(message) => message,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                };
                if let Err(e) = bus.send(message.cob_id, &message.data) {
                    error!(
                        "Failed to send COB-ID 0x{:03X} on {}: {}",
                        message.cob_id,
                        bus.channel_info(),
                        e
                    );
                }
            }
            bus.shutdown();
        })?;

        Ok(Self { worker })
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    /// Ask the loop to exit without waiting for it.
    pub fn request_stop(&self) {
        self.worker.request_stop();
    }

    /// Stop the loop, waiting at most `join_timeout`.
    pub fn stop(mut self, join_timeout: Duration) -> bool {
        self.worker.stop(join_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Frame;
    use crate::channel::OutboundChannel;
    use crate::error::BusError;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    /// Records sends; fails every frame sent to `fail_cob_id`.
    #[derive(Default)]
    struct RecordingBus {
        sent: Mutex<Vec<(u16, Vec<u8>)>>,
        fail_cob_id: Option<u16>,
        shutdowns: AtomicUsize,
    }

    impl Bus for RecordingBus {
        fn send(&self, cob_id: u16, data: &[u8]) -> std::result::Result<(), BusError> {
            if Some(cob_id) == self.fail_cob_id {
                return Err(BusError::Closed);
            }
            self.sent.lock().push((cob_id, data.to_vec()));
            Ok(())
        }

        fn recv(&self, _timeout: Duration) -> std::result::Result<Option<Frame>, BusError> {
            Ok(None)
        }

        fn channel_info(&self) -> String {
            "recording".to_string()
        }

        fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn wait_for(condition: impl Fn() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_messages_are_sent_in_order() {
        let bus = Arc::new(RecordingBus::default());
        let channel = OutboundChannel::new();
        let tx = TransmitLoop::spawn(bus.clone(), channel.receiver(), Duration::from_millis(20))
            .unwrap();

        for i in 0..10u8 {
            channel.enqueue(0x600 + i as u16, &[i]);
        }
        wait_for(|| bus.sent.lock().len() == 10);

        let sent = bus.sent.lock().clone();
        for (i, (cob_id, data)) in sent.iter().enumerate() {
            assert_eq!(*cob_id, 0x600 + i as u16);
            assert_eq!(data, &vec![i as u8]);
        }

        assert!(tx.stop(Duration::from_secs(1)));
        assert_eq!(bus.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_send_failure_does_not_stop_loop() {
        let bus = Arc::new(RecordingBus {
            fail_cob_id: Some(0x0AA),
            ..RecordingBus::default()
        });
        let channel = OutboundChannel::new();
        let tx = TransmitLoop::spawn(bus.clone(), channel.receiver(), Duration::from_millis(20))
            .unwrap();

        channel.enqueue(0x0AA, &[1]);
        channel.enqueue(0x181, &[2]);
        wait_for(|| bus.sent.lock().len() == 1);

        assert!(tx.is_running());
        assert_eq!(bus.sent.lock()[0], (0x181, vec![2]));
        assert!(tx.stop(Duration::from_secs(1)));
    }

    #[test]
    fn test_stop_with_empty_queue_is_bounded() {
        let bus = Arc::new(RecordingBus::default());
        let channel = OutboundChannel::new();
        let tx = TransmitLoop::spawn(bus.clone(), channel.receiver(), Duration::from_millis(50))
            .unwrap();

        let started = std::time::Instant::now();
        assert!(tx.stop(Duration::from_secs(2)));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(bus.shutdowns.load(Ordering::SeqCst), 1);
    }
}
