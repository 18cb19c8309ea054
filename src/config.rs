//! # Configuration Module
//!
//! This module provides the configuration types of the tokio-htsp library.
//!
//! ## Core Types
//!
//! - **ConnectionInfo**: Server address, credentials and client identity
//! - **Config**: Runtime, transport limits and protocol policy defaults
//! - **EpgSync**: How much of the programme guide to request after login

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use tokio::runtime::Handle;

/// Default HTSP port.
pub const DEFAULT_PORT: u16 = 9982;

/// Protocol version announced in the `hello` request.
pub const HTSP_VERSION: i64 = 23;

/// Sequence number reserved for the `authenticate` request and its reply.
///
/// Application requests sharing the dispatcher must never use it.
pub const AUTH_SEQ: i64 = 0x7FFF_FFFF;

/// Timeshift period sent by `Subscriber::subscribe`, in seconds.
pub const DEFAULT_TIMESHIFT_PERIOD: i64 = 0;

/// Server address, credentials and client identity of one session.
///
/// ## Example
///
/// ```rust
/// use tokio_htsp::config::ConnectionInfo;
///
/// let info = ConnectionInfo::new("tvheadend.local", 9982)
///     .with_credentials("viewer", "secret")
///     .with_client("living-room", "1.2.0");
///
/// assert_eq!(info.address(), "tvheadend.local:9982");
/// ```
///
/// Account stores usually keep these records as JSON:
///
/// ```rust
/// use tokio_htsp::config::ConnectionInfo;
///
/// let info: ConnectionInfo = serde_json::from_str(
///     r#"{"hostname": "10.0.0.5", "username": "viewer", "password": "secret"}"#,
/// ).unwrap();
///
/// assert_eq!(info.port, 9982);
/// ```
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionInfo {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Name announced to the server in `hello`
    pub client_name: String,
    /// Version announced to the server in `hello`
    pub client_version: String,
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        ConnectionInfo {
            hostname: String::from("localhost"),
            port: DEFAULT_PORT,
            username: String::new(),
            password: String::new(),
            client_name: String::from(env!("CARGO_PKG_NAME")),
            client_version: String::from(env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ConnectionInfo {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        ConnectionInfo {
            hostname: hostname.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_client(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.client_name = name.into();
        self.client_version = version.into();
        self
    }

    /// `host:port`, as passed to the TCP connect.
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("client_name", &self.client_name)
            .field("client_version", &self.client_version)
            .finish()
    }
}

/// How far ahead the programme guide is requested once authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpgSync {
    /// Request `Config::quick_sync_window` worth of events
    Quick,
    /// Request `Config::full_sync_window` worth of events
    Full,
}

/// Session configuration
///
/// ## Example
///
/// ```rust
/// use tokio_htsp::config::{Config, EpgSync};
/// use std::time::Duration;
///
/// let config = Config::new()
///     .with_connect_timeout(Duration::from_secs(3))
///     .with_epg_sync(EpgSync::Full);
///
/// assert_eq!(config.epg_sync, EpgSync::Full);
/// assert_eq!(config.full_sync_window, Duration::from_secs(691_200));
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Optional custom tokio runtime handle
    ///
    /// Connection tasks are spawned on it. Defaults to the runtime the
    /// connection is created in.
    pub runtime: Option<Handle>,

    /// Upper bound for establishing the TCP connection
    ///
    /// Replies to requests are not subject to any timeout.
    pub connect_timeout: Duration,

    /// Largest accepted inbound frame body, in bytes
    pub max_frame_len: usize,

    /// Protocol version announced in `hello`
    pub htsp_version: i64,

    /// Sequence number reserved for authentication
    pub auth_seq: i64,

    /// Guide window requested after authentication
    pub epg_sync: EpgSync,

    /// Window requested with [`EpgSync::Quick`]
    pub quick_sync_window: Duration,

    /// Window requested with [`EpgSync::Full`]
    pub full_sync_window: Duration,

    /// Timeshift period used by `Subscriber::subscribe`, in seconds
    pub default_timeshift_period: i64,
}

impl Default for Config {
    /// Defaults:
    /// - No custom runtime
    /// - 10 second connect timeout
    /// - 16 MiB frames
    /// - HTSP version 23
    /// - Quick guide sync (2 hours), full sync is 8 days
    /// - No timeshift
    fn default() -> Self {
        Config {
            runtime: None,
            connect_timeout: Duration::from_secs(10),
            max_frame_len: 16 * 1024 * 1024,
            htsp_version: HTSP_VERSION,
            auth_seq: AUTH_SEQ,
            epg_sync: EpgSync::Quick,
            quick_sync_window: Duration::from_secs(7_200),
            full_sync_window: Duration::from_secs(691_200),
            default_timeshift_period: DEFAULT_TIMESHIFT_PERIOD,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    pub fn with_htsp_version(mut self, version: i64) -> Self {
        self.htsp_version = version;
        self
    }

    /// Reserves another sequence number for authentication.
    pub fn with_auth_seq(mut self, seq: i64) -> Self {
        self.auth_seq = seq;
        self
    }

    pub fn with_epg_sync(mut self, sync: EpgSync) -> Self {
        self.epg_sync = sync;
        self
    }

    pub fn with_sync_windows(mut self, quick: Duration, full: Duration) -> Self {
        self.quick_sync_window = quick;
        self.full_sync_window = full;
        self
    }

    pub fn with_default_timeshift_period(mut self, seconds: i64) -> Self {
        self.default_timeshift_period = seconds;
        self
    }

    /// The guide window for the configured sync mode.
    pub fn epg_window(&self) -> Duration {
        match self.epg_sync {
            EpgSync::Quick => self.quick_sync_window,
            EpgSync::Full => self.full_sync_window,
        }
    }
}
