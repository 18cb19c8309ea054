//! Reader and writer tasks of an established connection.

use anyhow::anyhow;
use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::dispatcher::MessageDispatcher;
use crate::protocol;

/// Why the handler stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Exit {
    /// `close()` was called
    Closed,
    /// The transport broke or the peer sent garbage
    Failed,
}

/// Runs until the stream breaks or `closer_ch` fires.
///
/// The reader decodes frames and dispatches them in-line; the writer drains
/// `write_ch`, writing one whole frame at a time.
pub(crate) async fn connection_handler(
    rt: tokio::runtime::Handle,
    stream: TcpStream,
    dispatcher: MessageDispatcher,
    mut write_ch: mpsc::UnboundedReceiver<Bytes>,
    mut closer_ch: mpsc::Receiver<()>,
    max_frame_len: usize,
    on_error: impl Fn(anyhow::Error) + Send + Sync + 'static,
) -> Exit {
    let (mut read_half, mut write_half) = stream.into_split();
    let (writer_done_tx, mut writer_done_rx) = mpsc::channel::<()>(1);

    let writer_task = rt.spawn(async move {
        let result = async {
            while let Some(frame) = write_ch.recv().await {
                write_half.write_all(&frame).await?;
            }
            write_half.shutdown().await
        }
        .await;
        drop(writer_done_tx);
        result
    });

    let mut buf = BytesMut::with_capacity(64 * 1024);
    let exit = 'outer: loop {
        // a single read may carry several frames
        loop {
            match protocol::decode_frame(&buf, max_frame_len) {
                Ok(Some((message, used))) => {
                    buf.advance(used);
                    dispatcher.dispatch(&message);
                }
                Ok(None) => break,
                Err(err) => {
                    log::debug!("failed to decode frame: {}", err);
                    on_error(anyhow!(err));
                    break 'outer Exit::Failed;
                }
            }
        }

        tokio::select! {
            biased;

            _ = closer_ch.recv() => {
                break 'outer Exit::Closed;
            }

            _ = writer_done_rx.recv() => {
                // writer stopped on its own, the write half is gone
                break 'outer Exit::Failed;
            }

            result = read_half.read_buf(&mut buf) => {
                match result {
                    Ok(0) => {
                        log::debug!("connection closed by remote");
                        break 'outer Exit::Failed;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        log::debug!("failed to read: {}", err);
                        on_error(anyhow!(err));
                        break 'outer Exit::Failed;
                    }
                }
            }
        }
    };

    // the writer ends once every sender is gone; detach happens in the
    // caller, so it may still be running here
    writer_task.abort();
    match writer_task.await {
        Ok(Err(err)) => {
            log::debug!("failed to write: {}", err);
            on_error(anyhow!(err));
        }
        Ok(Ok(())) | Err(_) => {}
    }

    log::debug!("connection handler finished: {:?}", exit);
    exit
}
