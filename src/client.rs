use std::sync::{Arc, Mutex};

use futures::Future;
use tokio::sync::oneshot;

use crate::authenticator::{self, Authenticator};
use crate::config::{Config, ConnectionInfo};
use crate::connection::{Connection, ConnectionListener, FutureResult, State};
use crate::dispatcher::{MessageDispatcher, MessageListener};
use crate::errors::ConnectError;
use crate::subscriber::Subscriber;

/// A session with one server: connection, dispatcher and login.
///
/// Cheap to clone; clones share the session.
///
/// ```rust,no_run
/// use tokio_htsp::{Client, Config, ConnectionInfo};
/// use tokio_htsp::authenticator::State;
///
/// # async fn run() -> anyhow::Result<()> {
/// let info = ConnectionInfo::new("tvheadend.local", 9982).with_credentials("viewer", "secret");
/// let client = Client::new(info, Config::new());
///
/// client.connect().await?;
/// if client.authenticated().await == State::Authenticated {
///     let subscriber = client.new_subscriber(1);
///     subscriber.subscribe(42)?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    config: Config,
    dispatcher: MessageDispatcher,
    connection: Connection,
    authenticator: Arc<Authenticator>,
}

impl Client {
    /// Must be called within a tokio runtime unless `config.runtime` is set.
    pub fn new(info: ConnectionInfo, config: Config) -> Self {
        let dispatcher = MessageDispatcher::new();
        let connection = Connection::new(&info, dispatcher.clone(), &config);
        let authenticator = Authenticator::new(dispatcher.clone(), info, &config);

        dispatcher.add_message_listener(authenticator.clone());
        connection.add_listener(authenticator.clone());

        Self {
            config,
            dispatcher,
            connection,
            authenticator,
        }
    }

    // future resolves when the TCP session is established; the login runs
    // on its own afterwards, see `authenticated`
    pub fn connect(&self) -> FutureResult<impl Future<Output = Result<(), ConnectError>>> {
        self.connection.connect()
    }

    pub fn close(&self) -> FutureResult<impl Future<Output = ()>> {
        self.connection.close()
    }

    /// Resolves with the outcome of the login handshake.
    ///
    /// Resolves immediately if the handshake already finished. If it never
    /// finishes (no connection is ever made) the future never resolves.
    /// Dropping the future unregisters it.
    pub fn authenticated(&self) -> FutureResult<impl Future<Output = authenticator::State>> {
        let (tx, rx) = oneshot::channel();
        let waiter = Arc::new(AuthWaiter(Mutex::new(Some(tx))));
        let as_dyn: Arc<dyn authenticator::Listener> = waiter.clone();

        // register first, so a transition racing with the check isn't lost
        self.authenticator.add_listener(as_dyn.clone());
        let registration = Registration {
            authenticator: self.authenticator.clone(),
            listener: as_dyn,
        };
        let state = self.authenticator.state();
        if state != authenticator::State::Unset {
            waiter.resolve(state);
        }

        FutureResult(async move {
            let _registration = registration;
            rx.await.unwrap_or(authenticator::State::Failed)
        })
    }

    /// A subscriber sharing this session. `subscription_id` must not be in
    /// use by another active subscriber of this client.
    pub fn new_subscriber(&self, subscription_id: i64) -> Arc<Subscriber> {
        Subscriber::new(self.dispatcher.clone(), subscription_id, &self.config)
    }

    pub fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener>) -> bool {
        self.connection.add_listener(listener)
    }

    pub fn add_message_listener(&self, listener: Arc<dyn MessageListener>) -> bool {
        self.dispatcher.add_message_listener(listener)
    }

    pub fn on_error(&self, func: impl FnMut(anyhow::Error) + Send + 'static) {
        self.connection.on_error(func);
    }

    pub fn state(&self) -> State {
        self.connection.state()
    }

    pub fn auth_state(&self) -> authenticator::State {
        self.authenticator.state()
    }

    pub fn dispatcher(&self) -> &MessageDispatcher {
        &self.dispatcher
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn authenticator(&self) -> &Arc<Authenticator> {
        &self.authenticator
    }
}

struct AuthWaiter(Mutex<Option<oneshot::Sender<authenticator::State>>>);

impl AuthWaiter {
    fn resolve(&self, state: authenticator::State) {
        if let Some(tx) = self.0.lock().unwrap().take() {
            let _ = tx.send(state);
        }
    }
}

// removes the waiter once the future completes or is dropped
struct Registration {
    authenticator: Arc<Authenticator>,
    listener: Arc<dyn authenticator::Listener>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.authenticator.remove_listener(&self.listener);
    }
}

impl authenticator::Listener for AuthWaiter {
    fn on_authenticated(&self, state: authenticator::State) {
        if state != authenticator::State::Unset {
            self.resolve(state);
        }
    }
}
