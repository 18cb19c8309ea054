//! Logs in and follows one channel.
//!
//! ```text
//! cargo run --example watch -- <host> <channel id> [username] [password]
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_htsp::authenticator::State;
use tokio_htsp::subscriber::Listener;
use tokio_htsp::{Client, Config, ConnectionInfo, Message};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::prelude::*;

#[derive(Default)]
struct Events {
    packets: AtomicU64,
    bytes: AtomicU64,
}

impl Listener for Events {
    fn on_subscription_start(&self, message: &Message) {
        let streams = message.get_list("streams").map(|s| s.len()).unwrap_or(0);
        log::info!("subscription started with {} streams", streams);
    }

    fn on_subscription_status(&self, message: &Message) {
        log::info!("status: {}", message.get_str_or("status", "ok"));
    }

    fn on_subscription_stop(&self, message: &Message) {
        log::info!("subscription stopped: {}", message.get_str_or("status", "no reason"));
    }

    fn on_muxpkt(&self, message: &Message) {
        let len = message.get_bin("payload").map(|p| p.len()).unwrap_or(0);
        let packets = self.packets.fetch_add(1, Ordering::Relaxed) + 1;
        self.bytes.fetch_add(len as u64, Ordering::Relaxed);
        if packets % 1000 == 0 {
            log::info!(
                "{} packets, {} bytes",
                packets,
                self.bytes.load(Ordering::Relaxed)
            );
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            Targets::new()
                .with_default(LevelFilter::INFO)
                .with_target("tokio_htsp", LevelFilter::DEBUG)
        )
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "localhost".into());
    let channel_id: i64 = args.next().unwrap_or_else(|| "1".into()).parse()?;
    let username = args.next().unwrap_or_default();
    let password = args.next().unwrap_or_default();

    let info = ConnectionInfo::new(host, tokio_htsp::config::DEFAULT_PORT)
        .with_credentials(username, password)
        .with_client("watch", env!("CARGO_PKG_VERSION"));
    let client = Client::new(info, Config::new());

    client.on_error(|err| {
        log::info!("error: {:?}", err);
    });

    client.connect().await?;
    match client.authenticated().await {
        State::Authenticated => log::info!("authenticated"),
        state => anyhow::bail!("login failed: {:?}", state),
    }

    let subscriber = client.new_subscriber(1);
    subscriber.add_listener(Arc::new(Events::default()));
    subscriber.subscribe(channel_id)?;

    tokio::signal::ctrl_c().await?;

    subscriber.unsubscribe();
    client.close().await;
    Ok(())
}
