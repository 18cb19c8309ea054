pub mod authenticator;
pub mod client;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod errors;
pub mod protocol;
pub mod subscriber;
mod utils;

pub use client::Client;
pub use config::{Config, ConnectionInfo};
pub use connection::FutureResult;
pub use protocol::{Message, Value};
