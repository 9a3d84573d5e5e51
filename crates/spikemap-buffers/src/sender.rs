//! Outbound send thread
//!
//! Replies are queued on an unbounded channel and sent by one thread in
//! the order they were queued. Stopping queues a marker behind everything
//! already waiting, so the queue is drained before the thread exits.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use spikemap_image::CoreLocation;

use crate::error::{BufferError, Result};
use crate::messages::Message;
use crate::transport::Transceiver;

enum Outbound {
    Message(CoreLocation, Message),
    Stop,
}

/// FIFO sender owning one background thread
pub struct SenderThread {
    queue: Sender<Outbound>,
    handle: Mutex<Option<JoinHandle<usize>>>,
    name: String,
}

impl SenderThread {
    /// Spawn the thread sending through `transceiver`
    pub fn spawn(name: impl Into<String>, transceiver: Arc<dyn Transceiver>) -> Result<Self> {
        let name = name.into();
        let (queue, rx) = channel::unbounded();
        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run(&thread_name, rx, transceiver.as_ref()))
            .map_err(|e| BufferError::transport(format!("cannot spawn {}: {}", name, e)))?;
        Ok(Self {
            queue,
            handle: Mutex::new(Some(handle)),
            name,
        })
    }

    /// Queue a message for `core`
    pub fn send(&self, core: CoreLocation, message: Message) -> Result<()> {
        self.queue
            .send(Outbound::Message(core, message))
            .map_err(|_| BufferError::transport(format!("{} has stopped", self.name)))
    }

    /// True until [`SenderThread::stop`] has joined the thread
    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Drain the queue, then join the thread. Returns the messages sent.
    pub fn stop(&self) -> usize {
        let handle = match self.handle.lock().take() {
            Some(handle) => handle,
            None => return 0,
        };
        // the marker lands behind every queued message
        let _ = self.queue.send(Outbound::Stop);
        match handle.join() {
            Ok(sent) => {
                log::info!("{} stopped after {} messages", self.name, sent);
                sent
            }
            Err(_) => {
                log::error!("{} panicked", self.name);
                0
            }
        }
    }
}

impl Drop for SenderThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(name: &str, rx: Receiver<Outbound>, transceiver: &dyn Transceiver) -> usize {
    log::debug!("{} started", name);
    let mut sent = 0;
    for outbound in rx.iter() {
        match outbound {
            Outbound::Message(core, message) => {
                match transceiver.send_message(core, &message.encode()) {
                    Ok(()) => sent += 1,
                    Err(e) => log::warn!("{}: {} to {} failed: {}", name, message.command(), core, e),
                }
            }
            Outbound::Stop => break,
        }
    }
    sent
}
