//! Transport abstraction and the transport-agnostic serve loop.
//!
//! A [`Transport`] moves whole frames: one JSON message per stdio line or
//! per WebSocket message. [`serve`] pulls frames off a transport, hands each
//! one to the [`Router`] on its own task, and funnels every response through
//! a single writer so that writes on one connection never interleave.

pub mod codec;
pub mod stdio;
pub mod websocket;

use std::future::Future;
use std::pin::Pin;

use futures_util::stream::{self, Stream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::protocol::{Message, Response};
use crate::router::Router;
use crate::Result;

/// Boxed future returned by [`Transport`] methods.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Bidirectional, frame-oriented channel to one peer.
pub trait Transport: Send {
    /// Short label used in logs.
    fn kind(&self) -> &'static str;

    /// Prepare the channel. Called once before the first receive.
    fn connect(&mut self) -> TransportFuture<'_, ()>;

    /// Flush and close the channel.
    fn disconnect(&mut self) -> TransportFuture<'_, ()>;

    /// Write one message as a single frame, flushing before returning.
    fn send<'a>(&'a mut self, message: &'a Message) -> TransportFuture<'a, ()>;

    /// Next inbound frame, or `None` once the peer has finished.
    ///
    /// Must be cancel-safe: dropping the future before it completes loses
    /// no data.
    fn receive(&mut self) -> TransportFuture<'_, Option<String>>;
}

/// Inbound frames of `transport` as a stream; ends at end of input or on
/// the first receive error.
pub fn inbound<T: Transport>(transport: &mut T) -> impl Stream<Item = String> + '_ {
    stream::unfold(transport, |transport| async move {
        match transport.receive().await {
            Ok(Some(frame)) => Some((frame, transport)),
            Ok(None) => None,
            Err(err) => {
                warn!(kind = transport.kind(), %err, "receive failed; ending inbound stream");
                None
            }
        }
    })
}

/// Serve `transport` until its input ends or `shutdown` fires.
///
/// Frames are handled concurrently. When input ends, responses still in
/// flight are written before the transport is disconnected. On shutdown the
/// connection's in-flight requests are cancelled first, so they answer
/// promptly with `Cancelled`.
///
/// # Errors
///
/// Returns an error only if the transport fails to connect.
pub async fn serve<T: Transport>(
    router: Router,
    mut transport: T,
    shutdown: CancellationToken,
) -> Result<()> {
    let connection = router.open_connection();
    let span = info_span!("connection", %connection, kind = transport.kind());

    async move {
        transport.connect().await?;
        info!("connection opened");

        let (responses, mut outbound) = mpsc::unbounded_channel::<Response>();
        let mut writable = true;

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    debug!("shutdown requested");
                    router.close_connection(connection);
                    break;
                }
                Some(response) = outbound.recv() => {
                    if !write(&mut transport, response).await {
                        writable = false;
                        router.close_connection(connection);
                        break;
                    }
                }
                frame = transport.receive() => match frame {
                    Ok(Some(frame)) => {
                        let router = router.clone();
                        let responses = responses.clone();
                        tokio::spawn(
                            async move {
                                if let Some(response) = router.handle_frame(connection, &frame).await {
                                    // Receiver is gone only once the connection is torn down.
                                    let _ = responses.send(response);
                                }
                            }
                            .in_current_span(),
                        );
                    }
                    Ok(None) => {
                        debug!("input ended");
                        break;
                    }
                    Err(err) => {
                        warn!(%err, "receive failed; closing connection");
                        router.close_connection(connection);
                        break;
                    }
                },
            }
        }

        // Every task holds its own sender; the channel closes when the last
        // in-flight request has answered.
        drop(responses);
        while let Some(response) = outbound.recv().await {
            if writable && !write(&mut transport, response).await {
                writable = false;
            }
        }

        if let Err(err) = transport.disconnect().await {
            debug!(%err, "disconnect failed");
        }
        router.close_connection(connection);
        info!("connection closed");
        Ok(())
    }
    .instrument(span)
    .await
}

/// Write one response; `false` when the transport can no longer be written.
async fn write<T: Transport>(transport: &mut T, response: Response) -> bool {
    let message = Message::Response(response);
    match transport.send(&message).await {
        Ok(()) => true,
        Err(err) => {
            warn!(%err, "failed to write response");
            false
        }
    }
}
