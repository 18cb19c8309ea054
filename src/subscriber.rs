//! One channel subscription.
//!
//! A [`Subscriber`] is registered with the dispatcher only while it is
//! subscribed. The dispatcher hands it every inbound message, and it keeps
//! those carrying its own `subscriptionId`.

use std::sync::{Arc, Mutex};

use crate::config::Config;
use crate::dispatcher::{MessageDispatcher, MessageListener, WeakDispatcher};
use crate::errors::SendError;
use crate::protocol::Message;
use crate::utils::ListenerSet;

/// Methods a subscriber consumes. Anything else is not about subscriptions.
const HANDLED_METHODS: [&str; 9] = [
    "subscriptionStart",
    "subscriptionStatus",
    "subscriptionStop",
    "subscriptionSkip",
    "subscriptionSpeed",
    "queueStatus",
    "signalStatus",
    "timeshiftStatus",
    "muxpkt",
];

/// Observes one subscription.
///
/// Called on the connection's reader task with the raw server message.
pub trait Listener: Send + Sync {
    fn on_subscription_start(&self, _message: &Message) {}

    fn on_subscription_status(&self, _message: &Message) {}

    fn on_subscription_stop(&self, _message: &Message) {}

    /// A unit of multiplexed media; the payload is not interpreted.
    fn on_muxpkt(&self, message: &Message);
}

struct Status {
    channel_id: Option<i64>,
    subscribed: bool,
}

/// Requests and follows a single subscription.
///
/// The subscription id is chosen by the application and must be unique
/// among the subscriptions sharing a dispatcher.
pub struct Subscriber {
    dispatcher: WeakDispatcher,
    subscription_id: i64,
    default_timeshift_period: i64,
    status: Mutex<Status>,
    listeners: ListenerSet<dyn Listener>,
}

impl Subscriber {
    pub fn new(dispatcher: MessageDispatcher, subscription_id: i64, config: &Config) -> Arc<Self> {
        Arc::new(Self {
            dispatcher: dispatcher.downgrade(),
            subscription_id,
            default_timeshift_period: config.default_timeshift_period,
            status: Mutex::new(Status {
                channel_id: None,
                subscribed: false,
            }),
            listeners: ListenerSet::new(),
        })
    }

    pub fn subscription_id(&self) -> i64 {
        self.subscription_id
    }

    /// Channel of the last `subscribe` request, if any.
    pub fn channel_id(&self) -> Option<i64> {
        self.status.lock().unwrap().channel_id
    }

    pub fn is_subscribed(&self) -> bool {
        self.status.lock().unwrap().subscribed
    }

    /// Subscribes to `channel_id` with the configured timeshift period.
    pub fn subscribe(self: &Arc<Self>, channel_id: i64) -> Result<(), SendError> {
        self.subscribe_with(channel_id, None, self.default_timeshift_period)
    }

    /// Sends `subscribe`, registering with the dispatcher first.
    ///
    /// Subscribing again (another channel, say) reuses the registration.
    /// On failure the subscriber is left unsubscribed and unregistered.
    pub fn subscribe_with(
        self: &Arc<Self>,
        channel_id: i64,
        profile: Option<&str>,
        timeshift_period: i64,
    ) -> Result<(), SendError> {
        let Some(dispatcher) = self.dispatcher.upgrade() else {
            return Err(SendError::NotConnected);
        };

        // held until the outcome is recorded, so concurrent calls can't undo
        // each other's registration
        let mut status = self.status.lock().unwrap();
        let registered = status.subscribed;
        if !registered {
            dispatcher.add_message_listener(self.as_message_listener());
        }

        let mut request = Message::method("subscribe")
            .with("subscriptionId", self.subscription_id)
            .with("channelId", channel_id)
            .with("timeshiftPeriod", timeshift_period);
        if let Some(profile) = profile {
            request.put("profile", profile);
        }

        log::debug!(
            "subscribing to channel {} as subscription {}",
            channel_id,
            self.subscription_id
        );
        if let Err(err) = dispatcher.send_message(&request) {
            if !registered {
                dispatcher.remove_message_listener(&self.as_message_listener());
            }
            return Err(err);
        }

        status.channel_id = Some(channel_id);
        status.subscribed = true;
        Ok(())
    }

    /// Seeks the subscription to the absolute `time`.
    pub fn skip(&self, time: i64) {
        let request = Message::method("subscriptionSkip")
            .with("subscriptionId", self.subscription_id)
            .with("time", time)
            .with("absolute", 1);

        match self.dispatcher.send_message(&request) {
            Ok(()) => {}
            // the server may already have dropped the subscription
            Err(SendError::NotConnected) => {
                log::debug!("skip on subscription {} while not connected", self.subscription_id);
            }
            Err(err) => log::warn!("failed to send subscriptionSkip: {}", err),
        }
    }

    /// Stops listening and asks the server to end the subscription.
    ///
    /// The request is best effort: nothing is reported if it can't be sent.
    pub fn unsubscribe(self: &Arc<Self>) {
        {
            let mut status = self.status.lock().unwrap();
            if std::mem::replace(&mut status.subscribed, false) {
                if let Some(dispatcher) = self.dispatcher.upgrade() {
                    dispatcher.remove_message_listener(&self.as_message_listener());
                }
            }
        }

        let request = Message::method("unsubscribe").with("subscriptionId", self.subscription_id);
        match self.dispatcher.send_message(&request) {
            Ok(()) => log::debug!("unsubscribed subscription {}", self.subscription_id),
            Err(SendError::NotConnected) => {
                log::debug!("unsubscribe of {} while not connected", self.subscription_id);
            }
            Err(err) => log::warn!("failed to send unsubscribe: {}", err),
        }
    }

    /// Returns `false` (and does nothing) if the listener is already registered.
    pub fn add_listener(&self, listener: Arc<dyn Listener>) -> bool {
        let added = self.listeners.insert(listener);
        if !added {
            log::warn!("attempted to add duplicate subscription listener");
        }
        added
    }

    /// Returns `false` (and does nothing) if the listener is not registered.
    pub fn remove_listener(&self, listener: &Arc<dyn Listener>) -> bool {
        let removed = self.listeners.remove(listener);
        if !removed {
            log::warn!("attempted to remove non existing subscription listener");
        }
        removed
    }

    fn as_message_listener(self: &Arc<Self>) -> Arc<dyn MessageListener> {
        self.clone()
    }
}

impl MessageListener for Subscriber {
    fn on_message(&self, message: &Message) {
        let Some(method) = message.method_name() else {
            return;
        };
        if !HANDLED_METHODS.contains(&method) {
            return;
        }
        if message.get_i64_or("subscriptionId", -1) != self.subscription_id {
            return;
        }

        let listeners = self.listeners.snapshot();
        match method {
            "subscriptionStart" => listeners.iter().for_each(|l| l.on_subscription_start(message)),
            "subscriptionStatus" => listeners.iter().for_each(|l| l.on_subscription_status(message)),
            "subscriptionStop" => listeners.iter().for_each(|l| l.on_subscription_stop(message)),
            "muxpkt" => listeners.iter().for_each(|l| l.on_muxpkt(message)),
            // no callbacks for the rest yet
            _ => {}
        }
    }
}
