//! Challenge/response login.
//!
//! The handshake starts when the connection reports [`ConnectionState::Connected`]:
//!
//! 1. `hello` announces the protocol version and client identity; the
//!    server answers with a random `challenge`.
//! 2. `authenticate` carries the username and
//!    `SHA1(password || challenge)`, tagged with the reserved sequence
//!    number.
//! 3. The reply to that sequence number either carries `noaccess = 1`
//!    (credentials rejected) or completes the login, after which
//!    `enableAsyncMetadata` asks the server to start pushing metadata.
//!
//! Any other message carrying an `error` field while the handshake is in
//! progress fails it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use sha1::{Digest, Sha1};

use crate::config::{Config, ConnectionInfo};
use crate::connection::{ConnectionListener, State as ConnectionState};
use crate::dispatcher::{MessageDispatcher, MessageListener, WeakDispatcher};
use crate::errors::SendError;
use crate::protocol::Message;
use crate::utils::{self, ListenerSet};

/// Authentication state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No handshake has completed on the current connection
    Unset,
    /// Logged in, metadata requested
    Authenticated,
    /// The server rejected the credentials; the session itself is healthy
    Unauthorised,
    /// The server reported an error or the connection failed
    Failed,
}

/// Observes authentication state changes.
pub trait Listener: Send + Sync {
    fn on_authenticated(&self, state: State);
}

/// `SHA1(password || challenge)`, as sent in `authenticate`.
pub fn calculate_digest(password: &str, challenge: &[u8]) -> Vec<u8> {
    let mut hasher = Sha1::new();
    hasher.update(password.as_bytes());
    hasher.update(challenge);
    hasher.finalize().to_vec()
}

/// Drives the login handshake of one connection.
///
/// Register it with both the connection (to learn when to start) and the
/// dispatcher (to see the replies); `Client` does both.
pub struct Authenticator {
    dispatcher: WeakDispatcher,
    info: ConnectionInfo,
    htsp_version: i64,
    auth_seq: i64,
    epg_window: Duration,
    state: Mutex<State>,
    listeners: ListenerSet<dyn Listener>,
}

impl Authenticator {
    pub fn new(dispatcher: MessageDispatcher, info: ConnectionInfo, config: &Config) -> Arc<Self> {
        Arc::new(Self {
            dispatcher: dispatcher.downgrade(),
            info,
            htsp_version: config.htsp_version,
            auth_seq: config.auth_seq,
            epg_window: config.epg_window(),
            state: Mutex::new(State::Unset),
            listeners: ListenerSet::new(),
        })
    }

    pub fn state(&self) -> State {
        *self.state.lock().unwrap()
    }

    /// Returns `false` if the listener was already registered.
    pub fn add_listener(&self, listener: Arc<dyn Listener>) -> bool {
        self.listeners.insert(listener)
    }

    /// Returns `false` if the listener was not registered.
    pub fn remove_listener(&self, listener: &Arc<dyn Listener>) -> bool {
        self.listeners.remove(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn set_state(&self, state: State) {
        {
            let mut current = self.state.lock().unwrap();
            log::debug!("authentication state: {:?} -> {:?}", *current, state);
            *current = state;
        }
        for listener in self.listeners.snapshot().iter() {
            listener.on_authenticated(state);
        }
    }

    fn reset(&self) {
        if self.state() != State::Unset {
            self.set_state(State::Unset);
        }
    }

    fn send_hello(&self) {
        let hello = Message::method("hello")
            .with("htspversion", self.htsp_version)
            .with("clientname", self.info.client_name.as_str())
            .with("clientversion", self.info.client_version.as_str());

        log::debug!("sending hello");
        if let Err(err) = self.dispatcher.send_message(&hello) {
            log::debug!("failed to send hello: {}", err);
        }
    }

    fn send_authenticate(&self, challenge: &[u8]) -> Result<(), SendError> {
        let authenticate = Message::method("authenticate")
            .with("username", self.info.username.as_str())
            .with("digest", calculate_digest(&self.info.password, challenge))
            .with("seq", self.auth_seq);

        log::debug!("sending authenticate");
        self.dispatcher.send_message(&authenticate)
    }

    fn send_enable_async_metadata(&self) -> Result<(), SendError> {
        let request = Message::method("enableAsyncMetadata")
            .with("epg", 1)
            .with("epgMaxTime", utils::unix_time_after(self.epg_window));

        log::debug!("sending enableAsyncMetadata");
        self.dispatcher.send_message(&request)
    }

    fn handle_response(&self, message: &Message) {
        if message.get_i64("seq").ok() == Some(self.auth_seq) {
            if message.get_i64_or("noaccess", 0) == 1 {
                log::info!("credentials rejected for user {}", self.info.username);
                self.set_state(State::Unauthorised);
            } else {
                self.set_state(State::Authenticated);
                if let Err(err) = self.send_enable_async_metadata() {
                    log::debug!("failed to send enableAsyncMetadata: {}", err);
                    self.set_state(State::Failed);
                }
            }
            return;
        }

        if message.contains_key("error") {
            log::debug!("server error: {}", message.get_str_or("error", "<unknown>"));
            self.set_state(State::Failed);
            return;
        }

        if message.contains_key("challenge") {
            if let (Ok(name), Ok(version)) = (message.get_str("servername"), message.get_str("serverversion")) {
                log::info!("connected to {} {}", name, version);
            }

            let result = match message.get_bin("challenge") {
                Ok(challenge) => self.send_authenticate(challenge),
                Err(err) => {
                    log::warn!("unusable challenge: {}", err);
                    self.set_state(State::Failed);
                    return;
                }
            };
            if let Err(err) = result {
                log::debug!("failed to send authenticate: {}", err);
                self.set_state(State::Failed);
            }
        }
    }
}

impl ConnectionListener for Authenticator {
    fn on_connection_state_change(&self, state: ConnectionState) {
        log::debug!("received connection state {:?}", state);
        match state {
            ConnectionState::Connected => {
                // a fresh connection starts a fresh handshake
                self.reset();
                self.send_hello();
            }
            ConnectionState::Failed => self.set_state(State::Failed),
            // the login belonged to the session that just ended
            ConnectionState::Disconnected | ConnectionState::Connecting => self.reset(),
        }
    }
}

impl MessageListener for Authenticator {
    fn on_message(&self, message: &Message) {
        // only the handshake is of interest
        if self.state() != State::Unset {
            return;
        }
        self.handle_response(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::tests::Wire;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<State>>);

    impl Listener for Recorder {
        fn on_authenticated(&self, state: State) {
            self.0.lock().unwrap().push(state);
        }
    }

    fn setup(config: &Config) -> (Arc<Authenticator>, Arc<Recorder>, Wire) {
        let dispatcher = MessageDispatcher::new();
        let wire = Wire::attach(&dispatcher);
        let info = ConnectionInfo::new("localhost", 9982)
            .with_credentials("viewer", "secret")
            .with_client("living-room", "1.2.0");
        let authenticator = Authenticator::new(dispatcher.clone(), info, config);
        dispatcher.add_message_listener(authenticator.clone());
        let recorder = Arc::new(Recorder::default());
        authenticator.add_listener(recorder.clone());
        (authenticator, recorder, wire)
    }

    fn challenge() -> Message {
        Message::new()
            .with("htspversion", 34)
            .with("servername", "HTS Tvheadend")
            .with("serverversion", "4.2.8")
            .with("challenge", vec![7u8; 32])
    }

    #[test]
    fn test_digest_matches_sha1() {
        // sha1("secret" ++ "abc")
        let expected = Sha1::digest(b"secretabc").to_vec();
        assert_eq!(calculate_digest("secret", b"abc"), expected);
        assert_eq!(calculate_digest("", b"").len(), 20);
    }

    #[test]
    fn test_connected_sends_hello() {
        let (authenticator, _, mut wire) = setup(&Config::new());

        authenticator.on_connection_state_change(ConnectionState::Connected);

        let sent = wire.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0],
            Message::method("hello")
                .with("htspversion", 23)
                .with("clientname", "living-room")
                .with("clientversion", "1.2.0")
        );
    }

    #[test]
    fn test_challenge_answered_with_digest() {
        let (authenticator, _, mut wire) = setup(&Config::new());
        authenticator.on_connection_state_change(ConnectionState::Connected);
        wire.sent();

        authenticator.on_message(&challenge());

        let sent = wire.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method_name(), Some("authenticate"));
        assert_eq!(sent[0].get_str("username").unwrap(), "viewer");
        assert_eq!(sent[0].get_i64("seq").unwrap(), crate::config::AUTH_SEQ);
        assert_eq!(
            &sent[0].get_bin("digest").unwrap()[..],
            &calculate_digest("secret", &[7u8; 32])[..]
        );
        assert_eq!(authenticator.state(), State::Unset);
    }

    #[test]
    fn test_noaccess_is_unauthorised() {
        let (authenticator, recorder, mut wire) = setup(&Config::new());
        authenticator.on_connection_state_change(ConnectionState::Connected);
        authenticator.on_message(&challenge());
        wire.sent();

        authenticator.on_message(&Message::new().with("seq", crate::config::AUTH_SEQ).with("noaccess", 1));

        assert_eq!(authenticator.state(), State::Unauthorised);
        assert_eq!(*recorder.0.lock().unwrap(), vec![State::Unauthorised]);
        assert!(wire.sent().is_empty());
    }

    #[test]
    fn test_success_enables_async_metadata() {
        let (authenticator, recorder, mut wire) = setup(&Config::new());
        authenticator.on_connection_state_change(ConnectionState::Connected);
        authenticator.on_message(&challenge());
        wire.sent();

        let before = utils::unix_time_after(Duration::from_secs(7_200));
        authenticator.on_message(&Message::new().with("seq", crate::config::AUTH_SEQ));
        let after = utils::unix_time_after(Duration::from_secs(7_200));

        assert_eq!(authenticator.state(), State::Authenticated);
        assert_eq!(*recorder.0.lock().unwrap(), vec![State::Authenticated]);

        let sent = wire.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method_name(), Some("enableAsyncMetadata"));
        assert_eq!(sent[0].get_i64("epg").unwrap(), 1);
        let max_time = sent[0].get_i64("epgMaxTime").unwrap();
        assert!(max_time >= before && max_time <= after);
    }

    #[test]
    fn test_full_sync_window() {
        let config = Config::new().with_epg_sync(crate::config::EpgSync::Full);
        let (authenticator, _, mut wire) = setup(&config);
        authenticator.on_connection_state_change(ConnectionState::Connected);
        wire.sent();

        let before = utils::unix_time_after(Duration::from_secs(691_200));
        authenticator.on_message(&Message::new().with("seq", crate::config::AUTH_SEQ));

        let max_time = wire.sent()[0].get_i64("epgMaxTime").unwrap();
        assert!(max_time >= before);
    }

    #[test]
    fn test_custom_auth_seq() {
        let (authenticator, _, mut wire) = setup(&Config::new().with_auth_seq(77));
        authenticator.on_connection_state_change(ConnectionState::Connected);
        authenticator.on_message(&challenge());
        assert_eq!(wire.sent()[1].get_i64("seq").unwrap(), 77);

        // the default reserved number means nothing now
        authenticator.on_message(&Message::new().with("seq", crate::config::AUTH_SEQ));
        assert_eq!(authenticator.state(), State::Unset);

        authenticator.on_message(&Message::new().with("seq", 77));
        assert_eq!(authenticator.state(), State::Authenticated);
    }

    #[test]
    fn test_error_fails_handshake() {
        let (authenticator, recorder, _wire) = setup(&Config::new());
        authenticator.on_connection_state_change(ConnectionState::Connected);

        authenticator.on_message(&Message::new().with("seq", 3).with("error", "Invalid arguments"));

        assert_eq!(authenticator.state(), State::Failed);
        assert_eq!(*recorder.0.lock().unwrap(), vec![State::Failed]);
    }

    #[test]
    fn test_terminal_state_ignores_later_messages() {
        let (authenticator, recorder, _wire) = setup(&Config::new());
        authenticator.on_connection_state_change(ConnectionState::Connected);
        authenticator.on_message(&Message::new().with("seq", crate::config::AUTH_SEQ));

        authenticator.on_message(&Message::new().with("error", "No such channel"));

        assert_eq!(authenticator.state(), State::Authenticated);
        assert_eq!(*recorder.0.lock().unwrap(), vec![State::Authenticated]);
    }

    #[test]
    fn test_connection_failure_forces_failed() {
        let (authenticator, recorder, _wire) = setup(&Config::new());
        authenticator.on_connection_state_change(ConnectionState::Connected);
        authenticator.on_message(&Message::new().with("seq", crate::config::AUTH_SEQ));

        authenticator.on_connection_state_change(ConnectionState::Failed);

        assert_eq!(authenticator.state(), State::Failed);
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![State::Authenticated, State::Failed]
        );
    }

    #[test]
    fn test_close_forgets_previous_login() {
        let (authenticator, recorder, mut wire) = setup(&Config::new());
        authenticator.on_connection_state_change(ConnectionState::Connected);
        authenticator.on_message(&Message::new().with("seq", crate::config::AUTH_SEQ));
        wire.sent();

        authenticator.on_connection_state_change(ConnectionState::Disconnected);
        assert_eq!(authenticator.state(), State::Unset);

        // next session, the server refuses this time
        authenticator.on_connection_state_change(ConnectionState::Connecting);
        authenticator.on_connection_state_change(ConnectionState::Connected);
        assert_eq!(wire.sent()[0].method_name(), Some("hello"));
        authenticator.on_message(&Message::new().with("seq", crate::config::AUTH_SEQ).with("noaccess", 1));

        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![State::Authenticated, State::Unset, State::Unauthorised]
        );
    }

    #[test]
    fn test_does_not_keep_dispatcher_alive() {
        let dispatcher = MessageDispatcher::new();
        let authenticator = Authenticator::new(dispatcher.clone(), ConnectionInfo::default(), &Config::new());
        dispatcher.add_message_listener(authenticator.clone());
        let weak = Arc::downgrade(&authenticator);

        drop(authenticator);
        assert!(weak.upgrade().is_some());
        drop(dispatcher);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_authenticate_not_sent_when_disconnected() {
        let dispatcher = MessageDispatcher::new();
        let authenticator = Authenticator::new(dispatcher, ConnectionInfo::default(), &Config::new());

        // hello failure is only logged
        authenticator.on_connection_state_change(ConnectionState::Connected);
        assert_eq!(authenticator.state(), State::Unset);

        authenticator.on_message(&challenge());
        assert_eq!(authenticator.state(), State::Failed);
    }
}
