//! WebSocket transport: one JSON message per frame, one loop per client.

use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{CloseFrame, Message as WsMessage, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{serve, Transport, TransportFuture};
use crate::config::GlobalConfig;
use crate::protocol::Message;
use crate::router::Router;
use crate::{AppError, Result};

/// Close code sent when a client upgrades on a path other than the
/// configured one.
pub const CLOSE_UNKNOWN_PATH: u16 = 4004;

/// Transport over one upgraded WebSocket connection.
#[derive(Debug)]
pub struct WebSocketTransport {
    socket: WebSocket,
}

impl WebSocketTransport {
    /// Wrap an upgraded socket.
    #[must_use]
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

impl Transport for WebSocketTransport {
    fn kind(&self) -> &'static str {
        "websocket"
    }

    fn connect(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn disconnect(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            // The peer may already be gone; closing twice is harmless.
            if let Err(err) = self.socket.send(WsMessage::Close(None)).await {
                debug!(%err, "close frame not sent");
            }
            Ok(())
        })
    }

    fn send<'a>(&'a mut self, message: &'a Message) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            let text = message.to_line()?;
            self.socket
                .send(WsMessage::Text(text.into()))
                .await
                .map_err(|err| AppError::Transport(format!("websocket send: {err}")))
        })
    }

    fn receive(&mut self) -> TransportFuture<'_, Option<String>> {
        Box::pin(async move {
            loop {
                match self.socket.recv().await {
                    None | Some(Ok(WsMessage::Close(_))) => return Ok(None),
                    Some(Ok(WsMessage::Text(text))) => return Ok(Some(text.as_str().to_owned())),
                    Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => return Ok(Some(text)),
                        Err(err) => warn!(%err, "discarding binary frame that is not UTF-8"),
                    },
                    Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {}
                    Some(Err(err)) => {
                        // A broken socket ends this connection like a close would.
                        debug!(%err, "websocket receive failed");
                        return Ok(None);
                    }
                }
            }
        })
    }
}

#[derive(Clone)]
struct WsState {
    router: Router,
    shutdown: CancellationToken,
}

/// Build the axum app: upgrades on `path`, 4004 close on any other path.
#[must_use]
pub fn app(router: Router, path: &str, shutdown: CancellationToken) -> axum::Router {
    let state = Arc::new(WsState { router, shutdown });
    axum::Router::new()
        .route(path, get(upgrade))
        .fallback(reject_unknown_path)
        .with_state(state)
}

/// Bind `host:port` from `config` and serve until `shutdown`.
///
/// # Errors
///
/// Returns `AppError::Transport` if the listener cannot bind or the server
/// fails.
pub async fn serve_websocket(
    router: Router,
    config: &GlobalConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = format!("{}:{}", config.transport.host, config.transport.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|err| AppError::Transport(format!("failed to bind {addr}: {err}")))?;
    serve_websocket_on(listener, router, &config.transport.path, shutdown).await
}

/// Serve on an already-bound listener until `shutdown`.
///
/// # Errors
///
/// Returns `AppError::Transport` if the server fails.
pub async fn serve_websocket_on(
    listener: TcpListener,
    router: Router,
    path: &str,
    shutdown: CancellationToken,
) -> Result<()> {
    let local = listener
        .local_addr()
        .map_err(|err| AppError::Transport(format!("listener address: {err}")))?;
    info!(%local, path, "websocket transport listening");

    let app = app(router, path, shutdown.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|err| AppError::Transport(format!("websocket server failed: {err}")))?;

    info!("websocket transport stopped");
    Ok(())
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<Arc<WsState>>) -> Response {
    ws.on_upgrade(move |socket| async move {
        let transport = WebSocketTransport::new(socket);
        let shutdown = state.shutdown.child_token();
        if let Err(err) = serve(state.router.clone(), transport, shutdown).await {
            error!(%err, "websocket connection failed");
        }
    })
}

async fn reject_unknown_path(
    uri: Uri,
    upgrade: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match upgrade {
        Ok(ws) => {
            warn!(path = %uri.path(), "websocket upgrade on unknown path");
            ws.on_upgrade(|mut socket| async move {
                let frame = CloseFrame {
                    code: CLOSE_UNKNOWN_PATH,
                    reason: Utf8Bytes::from_static("unknown path"),
                };
                if let Err(err) = socket.send(WsMessage::Close(Some(frame))).await {
                    debug!(%err, "close frame not sent");
                }
            })
        }
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}
