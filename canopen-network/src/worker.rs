//! Background worker threads with cooperative shutdown.
//!
//! The worker body polls a shared shutdown flag between bounded waits.
//! Stopping sets the flag and waits a bounded time for the body to return;
//! a worker that does not finish in time is detached and logged.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError};
use tracing::warn;

use crate::error::{NetworkError, Result};

pub(crate) struct WorkerThread {
    name: String,
    handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    // disconnected once the thread has left its body
    finished: Receiver<()>,
}

impl WorkerThread {
    pub fn spawn<F>(name: &str, body: F) -> Result<Self>
    where
        F: FnOnce(&AtomicBool) + Send + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let (done_tx, finished) = bounded::<()>(0);

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _done = done_tx;
                body(&flag);
            })
            .map_err(NetworkError::Spawn)?;

        Ok(Self {
            name: name.to_string(),
            handle: Some(handle),
            shutdown,
            finished,
        })
    }

    pub fn request_stop(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Signal the worker and wait up to `timeout` for it to exit.
    ///
    /// Returns `false` if the worker was still running and got detached.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        self.request_stop();
        let Some(handle) = self.handle.take() else {
            return true;
        };

        match self.finished.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "[Worker:{}] did not stop within {:?}, detaching",
                    self.name, timeout
                );
                false
            }
            _ => {
                if handle.join().is_err() {
                    warn!("[Worker:{}] panicked", self.name);
                }
                true
            }
        }
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        // never block in drop; the body exits on its next poll
        self.request_stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_worker_stops_on_flag() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let mut worker = WorkerThread::spawn("test-worker", move |shutdown| {
            while !shutdown.load(Ordering::Acquire) {
                counter.fetch_add(1, Ordering::Relaxed);
                thread::sleep(Duration::from_millis(5));
            }
        })
        .unwrap();

        assert!(worker.is_running());
        thread::sleep(Duration::from_millis(30));
        assert!(worker.stop(Duration::from_secs(1)));
        assert!(!worker.is_running());
        assert!(ticks.load(Ordering::Relaxed) > 0);
    }

    #[test]
    fn test_unresponsive_worker_is_detached() {
        let mut worker = WorkerThread::spawn("stuck-worker", |_| {
            thread::sleep(Duration::from_millis(300));
        })
        .unwrap();

        assert!(!worker.stop(Duration::from_millis(20)));
        // a second stop has nothing left to join
        assert!(worker.stop(Duration::from_millis(20)));
    }
}
