//! Newline-delimited JSON over a pair of byte streams.
//!
//! In production the streams are the process's stdin and stdout; tests use
//! in-memory duplex pipes. Logs go to stderr, so stdout carries protocol
//! frames only.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::codec::NdjsonCodec;
use super::{serve, Transport, TransportFuture};
use crate::config::GlobalConfig;
use crate::protocol::Message;
use crate::router::Router;
use crate::Result;

/// NDJSON transport over any async reader/writer pair.
#[derive(Debug)]
pub struct StdioTransport<R, W> {
    reader: FramedRead<R, NdjsonCodec>,
    writer: FramedWrite<W, NdjsonCodec>,
    read_timeout: Duration,
}

impl<R, W> StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Frame `reader` and `writer` as NDJSON.
    ///
    /// `read_timeout` is the idle interval after which a quiet peer is
    /// logged; reading continues afterwards.
    #[must_use]
    pub fn new(reader: R, writer: W, read_timeout: Duration, max_line_bytes: usize) -> Self {
        Self {
            reader: FramedRead::new(reader, NdjsonCodec::with_max_line_bytes(max_line_bytes)),
            writer: FramedWrite::new(writer, NdjsonCodec::with_max_line_bytes(max_line_bytes)),
            read_timeout,
        }
    }
}

impl<R, W> Transport for StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn kind(&self) -> &'static str {
        "stdio"
    }

    fn connect(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn disconnect(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move { self.writer.flush().await })
    }

    fn send<'a>(&'a mut self, message: &'a Message) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            let line = message.to_line()?;
            // `send` flushes, so each message is on the wire before returning.
            self.writer.send(line).await
        })
    }

    fn receive(&mut self) -> TransportFuture<'_, Option<String>> {
        Box::pin(async move {
            loop {
                match tokio::time::timeout(self.read_timeout, self.reader.next()).await {
                    Err(_) => {
                        debug!(
                            idle_seconds = self.read_timeout.as_secs(),
                            "no input from peer"
                        );
                    }
                    Ok(None) => return Ok(None),
                    Ok(Some(Ok(line))) if line.trim().is_empty() => {}
                    Ok(Some(Ok(line))) => return Ok(Some(line)),
                    Ok(Some(Err(err))) => return Err(err),
                }
            }
        })
    }
}

/// Serve the process's stdin/stdout until EOF or `shutdown`.
///
/// # Errors
///
/// Propagates errors from [`serve`].
pub async fn serve_stdio(
    router: Router,
    config: &GlobalConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    info!("serving on stdio");
    let transport = StdioTransport::new(
        tokio::io::stdin(),
        tokio::io::stdout(),
        Duration::from_secs(config.transport.stdio_read_timeout_seconds),
        config.transport.max_line_bytes,
    );
    serve(router, transport, shutdown).await?;
    info!("stdin closed; stdio transport finished");
    Ok(())
}
