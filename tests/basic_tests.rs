use std::sync::Arc;
use std::time::Duration;

use tokio_htsp::authenticator;
use tokio_htsp::config::{AUTH_SEQ, DEFAULT_PORT, EpgSync};
use tokio_htsp::connection::State;
use tokio_htsp::errors::{FieldError, SendError};
use tokio_htsp::protocol::ValueKind;
use tokio_htsp::{Client, Config, ConnectionInfo, Message};

#[tokio::test]
async fn test_client_creation() {
    let client = Client::new(ConnectionInfo::new("127.0.0.1", 9982), Config::new());

    assert_eq!(client.state(), State::Disconnected);
    assert_eq!(client.auth_state(), authenticator::State::Unset);
    assert_eq!(client.connection().address(), "127.0.0.1:9982");
    // the authenticator is the only message listener
    assert_eq!(client.dispatcher().listener_count(), 1);
}

#[tokio::test]
async fn test_send_before_connect() {
    let client = Client::new(ConnectionInfo::default(), Config::new());

    assert_eq!(
        client.dispatcher().send_message(&Message::method("hello")),
        Err(SendError::NotConnected)
    );

    let subscriber = client.new_subscriber(1);
    assert_eq!(subscriber.subscribe(42), Err(SendError::NotConnected));
    assert!(!subscriber.is_subscribed());
    assert_eq!(subscriber.channel_id(), None);

    // best effort, nothing to report
    subscriber.skip(0);
    subscriber.unsubscribe();
}

#[tokio::test]
async fn test_dropped_client_frees_session() {
    let client = Client::new(ConnectionInfo::default(), Config::new());
    let authenticator = Arc::downgrade(client.authenticator());
    let subscriber = client.new_subscriber(1);

    drop(client);

    assert!(authenticator.upgrade().is_none());
    // its dispatcher is gone with the client
    assert_eq!(subscriber.subscribe(42), Err(SendError::NotConnected));
}

#[tokio::test]
async fn test_dropped_auth_future_unregisters() {
    let client = Client::new(ConnectionInfo::default(), Config::new());

    for _ in 0..100 {
        drop(client.authenticated());
    }
    assert_eq!(client.authenticator().listener_count(), 0);

    let result = tokio::time::timeout(Duration::from_millis(10), client.authenticated()).await;
    assert!(result.is_err());
    assert_eq!(client.authenticator().listener_count(), 0);
}

#[tokio::test]
async fn test_close_when_disconnected() {
    let client = Client::new(ConnectionInfo::default(), Config::new());
    client.close().await;
    assert_eq!(client.state(), State::Disconnected);
}

#[test]
fn test_config_methods() {
    let config = Config::new()
        .with_connect_timeout(Duration::from_secs(3))
        .with_max_frame_len(1024)
        .with_htsp_version(34)
        .with_auth_seq(1)
        .with_epg_sync(EpgSync::Full)
        .with_sync_windows(Duration::from_secs(60), Duration::from_secs(600))
        .with_default_timeshift_period(3600);

    assert_eq!(config.connect_timeout, Duration::from_secs(3));
    assert_eq!(config.max_frame_len, 1024);
    assert_eq!(config.htsp_version, 34);
    assert_eq!(config.auth_seq, 1);
    assert_eq!(config.epg_window(), Duration::from_secs(600));
    assert_eq!(config.default_timeshift_period, 3600);
}

#[test]
fn test_config_defaults() {
    let config = Config::default();

    assert!(config.runtime.is_none());
    assert_eq!(config.auth_seq, AUTH_SEQ);
    assert_eq!(config.epg_sync, EpgSync::Quick);
    assert_eq!(config.epg_window(), Duration::from_secs(7_200));
    assert_eq!(config.default_timeshift_period, 0);
}

#[test]
fn test_connection_info_from_json() {
    let info: ConnectionInfo = serde_json::from_str(
        r#"{
            "hostname": "tvheadend.local",
            "port": 9981,
            "username": "viewer",
            "password": "secret",
            "client_name": "living-room"
        }"#,
    )
    .unwrap();

    assert_eq!(info.address(), "tvheadend.local:9981");
    assert_eq!(info.username, "viewer");
    assert_eq!(info.client_name, "living-room");
    assert_eq!(info.client_version, env!("CARGO_PKG_VERSION"));

    let empty: ConnectionInfo = serde_json::from_str("{}").unwrap();
    assert_eq!(empty.hostname, "localhost");
    assert_eq!(empty.port, DEFAULT_PORT);
}

#[test]
fn test_connection_info_debug_hides_password() {
    let info = ConnectionInfo::default().with_credentials("viewer", "hunter2");
    let debug = format!("{:?}", info);

    assert!(debug.contains("viewer"));
    assert!(!debug.contains("hunter2"));
}

#[test]
fn test_message_accessors() {
    let message = Message::method("subscriptionStatus")
        .with("subscriptionId", 7)
        .with("status", "No input");

    assert_eq!(message.method_name(), Some("subscriptionStatus"));
    assert_eq!(message.get_i64("subscriptionId").unwrap(), 7);
    assert_eq!(message.get_i64_or("dropped", -1), -1);
    assert_eq!(message.get_str_or("subscriptionId", "n/a"), "n/a");
    assert_eq!(
        message.get_i64("status"),
        Err(FieldError::TypeMismatch {
            field: "status".into(),
            expected: ValueKind::Integer,
            found: ValueKind::String,
        })
    );
    assert_eq!(
        message.get_bin("payload"),
        Err(FieldError::Missing("payload".into()))
    );
}
