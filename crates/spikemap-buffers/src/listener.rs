//! Listener threads, one per endpoint

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::dispatch::DispatchTable;
use crate::error::{BufferError, Result};
use crate::transport::Endpoint;

/// How long a listener blocks before checking for shutdown
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A thread decoding messages from one endpoint and dispatching them
pub struct Listener {
    handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    dropped: Arc<AtomicUsize>,
    name: String,
}

impl Listener {
    /// Start listening on `endpoint`
    pub fn spawn(mut endpoint: Box<dyn Endpoint>, table: Arc<DispatchTable>) -> Result<Self> {
        let name = format!("listener-{}", endpoint.name());
        let shutdown = Arc::new(AtomicBool::new(false));
        let dropped = Arc::new(AtomicUsize::new(0));
        let stop_flag = Arc::clone(&shutdown);
        let drop_count = Arc::clone(&dropped);
        let thread_name = name.clone();

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                while !stop_flag.load(Ordering::Relaxed) {
                    match endpoint.recv(POLL_INTERVAL) {
                        Ok(Some(bytes)) => {
                            if let Err(e) = table.dispatch_bytes(&bytes) {
                                drop_count.fetch_add(1, Ordering::Relaxed);
                                log::warn!("{}: dropping message: {}", thread_name, e);
                            }
                        }
                        Ok(None) => continue,
                        Err(e) => {
                            log::error!("{}: endpoint failed: {}", thread_name, e);
                            break;
                        }
                    }
                }
                log::debug!("{} exiting", thread_name);
            })
            .map_err(|e| BufferError::transport(format!("cannot spawn {}: {}", name, e)))?;

        Ok(Self {
            handle: Some(handle),
            shutdown,
            dropped,
            name,
        })
    }

    /// Messages that failed to decode or dispatch
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Signal the thread and wait for it
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("{} panicked", self.name);
            }
        }
    }

    /// True while the thread is alive
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}
