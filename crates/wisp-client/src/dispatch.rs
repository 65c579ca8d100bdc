//! Deferred fan-out of messages to handlers keyed by message id.
//!
//! [`Dispatcher::dispatch`] only enqueues; handlers run when the owner calls
//! [`Dispatcher::drain`] after it has finished processing the current event.
//! A handler therefore never observes a half-updated session, and a panic in
//! one handler is contained to that call.

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{error, trace};
use wisp_core::Message;

pub type Handler = Box<dyn FnMut(&Message) + Send>;

#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<u16, Vec<Handler>>,
    queue: VecDeque<Message>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Handlers for one id run in registration order.
    pub fn on<F>(&mut self, id: u16, handler: F)
    where
        F: FnMut(&Message) + Send + 'static,
    {
        self.handlers.entry(id).or_default().push(Box::new(handler));
    }

    /// Queue a message for the next drain.
    pub fn dispatch(&mut self, message: Message) {
        self.queue.push_back(message);
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Run handlers for every queued message, oldest first.
    ///
    /// Returns the number of messages drained.
    pub fn drain(&mut self) -> usize {
        let mut drained = 0;
        while let Some(message) = self.queue.pop_front() {
            drained += 1;
            let Some(handlers) = self.handlers.get_mut(&message.id()) else {
                trace!(id = message.id(), "no handlers");
                continue;
            };
            for (index, handler) in handlers.iter_mut().enumerate() {
                if catch_unwind(AssertUnwindSafe(|| handler(&message))).is_err() {
                    error!(id = message.id(), index, "message handler panicked");
                }
            }
        }
        drained
    }
}
