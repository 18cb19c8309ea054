//! Outbound send path and inbound fan-out.
//!
//! The dispatcher does not interpret messages. Every decoded message goes
//! to every registered [`MessageListener`], and each listener picks out
//! what it cares about (by `method`, `seq` or `subscriptionId`).

use std::sync::{Arc, Mutex, Weak};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::errors::SendError;
use crate::protocol::{self, Message};
use crate::utils::ListenerSet;

/// Receives every inbound message.
///
/// Called on the connection's reader task. Implementations must not block,
/// otherwise delivery stalls for all listeners.
pub trait MessageListener: Send + Sync {
    fn on_message(&self, message: &Message);
}

struct DispatcherInner {
    writer: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    listeners: ListenerSet<dyn MessageListener>,
}

/// Routes messages between the connection and its consumers.
///
/// Cheap to clone; clones share listeners and the send path.
#[derive(Clone)]
pub struct MessageDispatcher(Arc<DispatcherInner>);

impl Default for MessageDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageDispatcher {
    pub fn new() -> Self {
        Self(Arc::new(DispatcherInner {
            writer: Mutex::new(None),
            listeners: ListenerSet::new(),
        }))
    }

    /// Encodes `message` and queues it as one frame for the writer task.
    ///
    /// Fails with [`SendError::NotConnected`] unless the connection is
    /// established. Safe to call from any thread, including from inside a
    /// listener callback.
    pub fn send_message(&self, message: &Message) -> Result<(), SendError> {
        let writer = self.0.writer.lock().unwrap().clone();
        let Some(writer) = writer else {
            return Err(SendError::NotConnected);
        };
        let frame = protocol::encode_frame(message)?;
        log::trace!("--> {:?}", message);
        writer.send(frame).map_err(|_| SendError::NotConnected)
    }

    /// Returns `false` (and does nothing) if the listener is already registered.
    pub fn add_message_listener(&self, listener: Arc<dyn MessageListener>) -> bool {
        let added = self.0.listeners.insert(listener);
        if !added {
            log::warn!("attempted to add duplicate message listener");
        }
        added
    }

    /// Returns `false` (and does nothing) if the listener is not registered.
    pub fn remove_message_listener(&self, listener: &Arc<dyn MessageListener>) -> bool {
        let removed = self.0.listeners.remove(listener);
        if !removed {
            log::warn!("attempted to remove non existing message listener");
        }
        removed
    }

    pub fn listener_count(&self) -> usize {
        self.0.listeners.len()
    }

    pub fn is_connected(&self) -> bool {
        self.0
            .writer
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|w| !w.is_closed())
    }

    /// Hands every listener the message, in no particular order.
    pub(crate) fn dispatch(&self, message: &Message) {
        log::trace!("<-- {:?}", message);
        for listener in self.0.listeners.snapshot().iter() {
            listener.on_message(message);
        }
    }

    pub(crate) fn attach(&self, writer: mpsc::UnboundedSender<Bytes>) {
        *self.0.writer.lock().unwrap() = Some(writer);
    }

    pub(crate) fn detach(&self) {
        *self.0.writer.lock().unwrap() = None;
    }

    /// A handle that doesn't keep the dispatcher alive.
    ///
    /// Listeners registered with the dispatcher hold this instead of a
    /// clone, otherwise the listener set and the listener own each other.
    pub(crate) fn downgrade(&self) -> WeakDispatcher {
        WeakDispatcher(Arc::downgrade(&self.0))
    }
}

/// Non-owning [`MessageDispatcher`] handle.
#[derive(Clone)]
pub(crate) struct WeakDispatcher(Weak<DispatcherInner>);

impl WeakDispatcher {
    pub(crate) fn upgrade(&self) -> Option<MessageDispatcher> {
        self.0.upgrade().map(MessageDispatcher)
    }

    /// Like [`MessageDispatcher::send_message`]; a dispatcher that is gone
    /// is not connected.
    pub(crate) fn send_message(&self, message: &Message) -> Result<(), SendError> {
        match self.upgrade() {
            Some(dispatcher) => dispatcher.send_message(message),
            None => Err(SendError::NotConnected),
        }
    }
}
