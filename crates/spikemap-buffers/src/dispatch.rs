//! Message dispatch
//!
//! The table is built once before listeners start and shared by `Arc`.
//! Messages of one type are handled under that type's lock, so two cores'
//! requests of the same kind never interleave, while different kinds
//! proceed in parallel.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;

use crate::error::{BufferError, Result};
use crate::messages::{CommandId, Message};

/// Callback for one message type
pub type Handler = Box<dyn Fn(&Message) -> Result<()> + Send + Sync>;

struct Route {
    lock: Mutex<()>,
    handlers: Vec<Handler>,
}

/// Handlers keyed by command id
pub struct DispatchTable {
    routes: HashMap<CommandId, Route>,
}

/// Collects handlers before the table is frozen
#[derive(Default)]
pub struct DispatchTableBuilder {
    handlers: HashMap<CommandId, Vec<Handler>>,
}

impl DispatchTableBuilder {
    /// Add a handler for `command`; several handlers run in registration order
    pub fn register<F>(mut self, command: CommandId, handler: F) -> Self
    where
        F: Fn(&Message) -> Result<()> + Send + Sync + 'static,
    {
        self.handlers.entry(command).or_default().push(Box::new(handler));
        self
    }

    /// Freeze the table
    pub fn build(self) -> DispatchTable {
        let routes = self
            .handlers
            .into_iter()
            .map(|(command, handlers)| {
                (
                    command,
                    Route {
                        lock: Mutex::new(()),
                        handlers,
                    },
                )
            })
            .collect();
        DispatchTable { routes }
    }
}

impl DispatchTable {
    /// Start building a table
    pub fn builder() -> DispatchTableBuilder {
        DispatchTableBuilder::default()
    }

    /// True if `command` has a handler
    pub fn handles(&self, command: CommandId) -> bool {
        self.routes.contains_key(&command)
    }

    /// Run every handler registered for the message's type
    pub fn dispatch(&self, message: &Message) -> Result<()> {
        let command = message.command();
        let route = self.routes.get(&command).ok_or_else(|| {
            BufferError::protocol(format!("no handler registered for {}", command))
        })?;
        let _guard = route.lock.lock();
        for handler in &route.handlers {
            handler(message)?;
        }
        Ok(())
    }

    /// Decode and dispatch raw bytes
    pub fn dispatch_bytes(&self, bytes: &[u8]) -> Result<()> {
        let message = Message::decode(bytes)?;
        log::trace!("Dispatching {}", message.command());
        self.dispatch(&message)
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut commands: Vec<_> = self.routes.keys().collect();
        commands.sort();
        f.debug_struct("DispatchTable")
            .field("commands", &commands)
            .finish()
    }
}
