//! TCP session lifecycle.
//!
//! A [`Connection`] moves through these states:
//!
//! ```text
//!   Disconnected --connect()--> Connecting --established--> Connected
//!        ^                          |                           |
//!        +-------- close() ---------+------------ close() ------+
//!                                   |                           |
//!                                   +---- transport error ----> Failed
//! ```
//!
//! `Failed` is terminal: build a new `Connection` to try again. There is no
//! automatic reconnection. Every transition is reported synchronously to
//! each registered [`ConnectionListener`].

mod handler;

use std::future::{Future, IntoFuture};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use bytes::Bytes;
use futures::FutureExt;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use crate::config::{Config, ConnectionInfo};
use crate::dispatcher::MessageDispatcher;
use crate::errors::ConnectError;
use crate::utils::ListenerSet;

use handler::Exit;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Not connected, `connect()` may be called
    Disconnected,
    /// TCP connect in progress
    Connecting,
    /// Messages can be sent and are being received
    Connected,
    /// The transport failed; terminal
    Failed,
}

/// Observes connection state changes.
pub trait ConnectionListener: Send + Sync {
    /// Called once, when the listener is registered with a connection.
    fn set_connection(&self, _connection: &Connection) {}

    /// Called after every transition, with the new state already in effect.
    fn on_connection_state_change(&self, state: State);
}

/// A regular future which you can poll to get the result,
/// but it's totally fine to drop it if you don't need it.
pub struct FutureResult<T>(pub(crate) T);

impl<T, R> IntoFuture for FutureResult<T>
where
    T: Future<Output = R>,
{
    type Output = R;
    type IntoFuture = T;

    fn into_future(self) -> Self::IntoFuture {
        self.0
    }
}

struct Lifecycle {
    state: State,
    /// Bumped by every `connect()`, so a finishing task of an earlier
    /// attempt can't touch the current one.
    epoch: u64,
    closer_write: Option<mpsc::Sender<()>>,
    on_connected_ch: Vec<oneshot::Sender<Result<(), ConnectError>>>,
    on_closed_ch: Vec<(u64, oneshot::Sender<()>)>,
}

pub(crate) struct ConnectionInner {
    rt: Handle,
    addr: Arc<str>,
    connect_timeout: Duration,
    max_frame_len: usize,
    dispatcher: MessageDispatcher,
    listeners: ListenerSet<dyn ConnectionListener>,
    on_error: Mutex<Option<Box<dyn FnMut(anyhow::Error) + Send + 'static>>>,
    lifecycle: Mutex<Lifecycle>,
}

impl ConnectionInner {
    // Connecting -> Connected
    //  - the attempt of `epoch` established the TCP stream
    fn move_to_connected(&self, epoch: u64, writer: mpsc::UnboundedSender<Bytes>) -> bool {
        let waiting = {
            let mut lifecycle = self.lifecycle.lock().unwrap();
            if lifecycle.epoch != epoch || lifecycle.state != State::Connecting {
                return false;
            }
            self.dispatcher.attach(writer);
            Self::set_state(&mut lifecycle, State::Connected);
            std::mem::take(&mut lifecycle.on_connected_ch)
        };
        // listeners go first: whatever they send (hello) is queued before
        // `connect()` returns to the caller
        self.notify(State::Connected);
        for ch in waiting {
            let _ = ch.send(Ok(()));
        }
        true
    }

    // Connecting, Connected -> Failed
    //  - connect error, read/write error, remote hang-up, undecodable frame
    fn move_to_failed(&self, epoch: u64, reason: ConnectError) -> bool {
        let waiting = {
            let mut lifecycle = self.lifecycle.lock().unwrap();
            if lifecycle.epoch != epoch
                || !matches!(lifecycle.state, State::Connecting | State::Connected)
            {
                return false;
            }
            self.dispatcher.detach();
            lifecycle.closer_write = None;
            Self::set_state(&mut lifecycle, State::Failed);
            std::mem::take(&mut lifecycle.on_connected_ch)
        };
        self.notify(State::Failed);
        for ch in waiting {
            let _ = ch.send(Err(reason.clone()));
        }
        true
    }

    // Connecting, Connected -> Disconnected
    //  - `close()` called
    fn move_to_disconnected(&self, closed_ch: oneshot::Sender<()>) -> bool {
        let waiting = {
            let mut lifecycle = self.lifecycle.lock().unwrap();
            if !matches!(lifecycle.state, State::Connecting | State::Connected) {
                let _ = closed_ch.send(());
                return false;
            }
            self.dispatcher.detach();
            // dropping the sender stops the connection task
            lifecycle.closer_write = None;
            let epoch = lifecycle.epoch;
            lifecycle.on_closed_ch.push((epoch, closed_ch));
            Self::set_state(&mut lifecycle, State::Disconnected);
            std::mem::take(&mut lifecycle.on_connected_ch)
        };
        self.notify(State::Disconnected);
        for ch in waiting {
            let _ = ch.send(Err(ConnectError::Closed));
        }
        true
    }

    fn set_state(lifecycle: &mut Lifecycle, state: State) {
        log::debug!("state: {:?} -> {:?}", lifecycle.state, state);
        lifecycle.state = state;
    }

    // listeners are called without holding the lifecycle lock, they are
    // free to send messages or call back into the connection
    fn notify(&self, state: State) {
        for listener in self.listeners.snapshot().iter() {
            listener.on_connection_state_change(state);
        }
    }

    fn report_error(&self, err: anyhow::Error) {
        if let Some(ref mut on_error) = *self.on_error.lock().unwrap() {
            on_error(err);
        }
    }

    // resolves `close()` futures of this attempt and the ones before it
    fn finish(&self, epoch: u64) {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        let (done, pending) = lifecycle
            .on_closed_ch
            .drain(..)
            .partition::<Vec<_>, _>(|(e, _)| *e <= epoch);
        lifecycle.on_closed_ch = pending;
        for (_, ch) in done {
            let _ = ch.send(());
        }
    }

    // this function does the following
    //  - connects to the server (Connecting state)
    //  - runs reader and writer until the session ends (Connected state)
    //  - records how it ended (Failed, or nothing if closed by the user)
    async fn do_connection_cycle(inner: Arc<Self>, epoch: u64, mut closer_read: mpsc::Receiver<()>) {
        log::debug!("connecting to {}", &inner.addr);
        let connect = tokio::time::timeout(inner.connect_timeout, TcpStream::connect(&*inner.addr));

        let result = tokio::select! {
            biased;
            _ = closer_read.recv() => {
                log::debug!("connect interrupted by user");
                inner.finish(epoch);
                return;
            }
            result = connect => result,
        };

        let stream = match result {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                log::debug!("{err}");
                let reason = ConnectError::Transport {
                    addr: inner.addr.to_string(),
                    reason: err.to_string(),
                };
                inner.report_error(anyhow!(err));
                inner.move_to_failed(epoch, reason);
                inner.finish(epoch);
                return;
            }
            Err(_) => {
                log::debug!("connect to {} timed out", &inner.addr);
                let reason = ConnectError::Timeout(inner.addr.to_string());
                inner.report_error(anyhow!(reason.clone()));
                inner.move_to_failed(epoch, reason);
                inner.finish(epoch);
                return;
            }
        };

        if let Err(err) = stream.set_nodelay(true) {
            log::debug!("failed to set TCP_NODELAY: {}", err);
        }

        let (write_tx, write_rx) = mpsc::unbounded_channel();
        if !inner.move_to_connected(epoch, write_tx) {
            inner.finish(epoch);
            return;
        }

        let inner1 = inner.clone();
        let exit = handler::connection_handler(
            inner.rt.clone(),
            stream,
            inner.dispatcher.clone(),
            write_rx,
            closer_read,
            inner.max_frame_len,
            move |err| inner1.report_error(err),
        )
        .await;

        if exit == Exit::Failed {
            inner.move_to_failed(epoch, ConnectError::Failed);
        }
        inner.finish(epoch);
    }
}

/// The TCP session with the server.
///
/// Cheap to clone; clones refer to the same session.
#[derive(Clone)]
pub struct Connection(pub(crate) Arc<ConnectionInner>);

impl Connection {
    /// Creates a disconnected connection to `info.address()`.
    ///
    /// Inbound messages are handed to `dispatcher`, which also becomes
    /// able to send while the connection is established.
    ///
    /// Must be called within a tokio runtime unless `config.runtime` is set.
    pub fn new(info: &ConnectionInfo, dispatcher: MessageDispatcher, config: &Config) -> Self {
        let rt = config.runtime.clone().unwrap_or_else(Handle::current);

        Self(Arc::new(ConnectionInner {
            rt,
            addr: info.address().into(),
            connect_timeout: config.connect_timeout,
            max_frame_len: config.max_frame_len,
            dispatcher,
            listeners: ListenerSet::new(),
            on_error: Mutex::new(None),
            lifecycle: Mutex::new(Lifecycle {
                state: State::Disconnected,
                epoch: 0,
                closer_write: None,
                on_connected_ch: Vec::new(),
                on_closed_ch: Vec::new(),
            }),
        }))
    }

    /// Starts connecting.
    ///
    /// The returned future resolves once the connection is established, or
    /// with an error when the attempt fails or is closed. It resolves
    /// immediately when already connected. Dropping it does not cancel
    /// the attempt.
    pub fn connect(&self) -> FutureResult<impl Future<Output = Result<(), ConnectError>>> {
        let (tx, rx) = oneshot::channel();

        let started = {
            let mut lifecycle = self.0.lifecycle.lock().unwrap();
            match lifecycle.state {
                State::Disconnected => {
                    let (closer_write, closer_read) = mpsc::channel(1);
                    lifecycle.epoch += 1;
                    lifecycle.closer_write = Some(closer_write);
                    lifecycle.on_connected_ch.push(tx);
                    ConnectionInner::set_state(&mut lifecycle, State::Connecting);
                    Some((lifecycle.epoch, closer_read))
                }
                State::Connecting => {
                    lifecycle.on_connected_ch.push(tx);
                    None
                }
                State::Connected => {
                    let _ = tx.send(Ok(()));
                    None
                }
                State::Failed => {
                    let _ = tx.send(Err(ConnectError::Failed));
                    None
                }
            }
        };

        if let Some((epoch, closer_read)) = started {
            self.0.notify(State::Connecting);
            let inner = self.0.clone();
            self.0.rt.spawn(ConnectionInner::do_connection_cycle(inner, epoch, closer_read));
        }

        FutureResult(rx.map(|result| result.unwrap_or(Err(ConnectError::Closed))))
    }

    /// Tears the session down and moves to `Disconnected`.
    ///
    /// The returned future resolves once the reader and writer have
    /// stopped. Does nothing unless connecting or connected.
    pub fn close(&self) -> FutureResult<impl Future<Output = ()>> {
        let (tx, rx) = oneshot::channel();
        self.0.move_to_disconnected(tx);
        FutureResult(rx.map(|_| ()))
    }

    /// Registers a listener and calls its `set_connection`.
    ///
    /// Returns `false` (and does nothing) if it is already registered.
    pub fn add_listener(&self, listener: Arc<dyn ConnectionListener>) -> bool {
        if !self.0.listeners.insert(listener.clone()) {
            log::warn!("attempted to add duplicate connection listener");
            return false;
        }
        listener.set_connection(self);
        true
    }

    /// Returns `false` (and does nothing) if the listener is not registered.
    pub fn remove_listener(&self, listener: &Arc<dyn ConnectionListener>) -> bool {
        let removed = self.0.listeners.remove(listener);
        if !removed {
            log::warn!("attempted to remove non existing connection listener");
        }
        removed
    }

    /// Sets a callback for transport errors.
    pub fn on_error(&self, func: impl FnMut(anyhow::Error) + Send + 'static) {
        *self.0.on_error.lock().unwrap() = Some(Box::new(func));
    }

    pub fn state(&self) -> State {
        self.0.lifecycle.lock().unwrap().state
    }

    /// `host:port` of the server.
    pub fn address(&self) -> &str {
        &self.0.addr
    }

    pub fn dispatcher(&self) -> &MessageDispatcher {
        &self.0.dispatcher
    }
}
