//! Method dispatch and the request lifecycle.
//!
//! Every frame a transport receives ends up in [`Router::handle_frame`].
//! A request moves through validation, admission, dispatch and release:
//!
//! 1. The envelope is checked; a bad one is answered without admission.
//! 2. The request is admitted by the [`RequestTracker`] (or queued on the
//!    [`BackpressureController`] when that is enabled). A refusal is
//!    answered with a server-busy error.
//! 3. An unknown method is answered with `MethodNotFound`.
//! 4. The composed handler runs in its own task, raced against the
//!    method's deadline and the request's cancellation token.
//! 5. The admission guard is dropped before the response is returned.
//!
//! Notifications skip admission and never produce a response. A
//! notification may name any request method; its result is discarded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, error, info_span, warn, Instrument};

use crate::concurrency::{
    AdmissionError, BackpressureController, CancellationToken, ConnectionId, QueuedWork,
    RateLimiterRegistry, RequestKey, RequestTracker, TimeoutManager,
};
use crate::config::GlobalConfig;
use crate::middleware::{
    AuthMiddleware, Handler, HandlerResult, LoggingMiddleware, Middleware, Pipeline,
    RateLimitMiddleware, RedactionMiddleware, Redactor, RequestContext,
};
use crate::protocol::{Message, Notification, Request, RequestId, Response, RpcError};
use crate::Result;

// ── Builder ───────────────────────────────────────────────────────────────────

/// Collects handlers and middleware, then composes them once into a [`Router`].
pub struct RouterBuilder {
    config: GlobalConfig,
    tracker: RequestTracker,
    pipeline: Pipeline,
    methods: HashMap<String, Handler>,
    notifications: HashMap<String, Handler>,
}

impl RouterBuilder {
    /// Start a router for `config`'s concurrency, timeout and queue settings.
    #[must_use]
    pub fn new(config: &GlobalConfig) -> Self {
        Self {
            config: config.clone(),
            tracker: RequestTracker::new(config.concurrency.max_concurrent),
            pipeline: Pipeline::new(),
            methods: HashMap::new(),
            notifications: HashMap::new(),
        }
    }

    /// Tracker the built router will admit requests through.
    ///
    /// Handlers that cancel other requests capture this before `build`.
    #[must_use]
    pub fn tracker(&self) -> RequestTracker {
        self.tracker.clone()
    }

    /// Register a request handler under `name`, replacing any previous one.
    #[must_use]
    pub fn method(mut self, name: impl Into<String>, handler: Handler) -> Self {
        self.methods.insert(name.into(), handler);
        self
    }

    /// Register a notification handler under `name`.
    #[must_use]
    pub fn notification(mut self, name: impl Into<String>, handler: Handler) -> Self {
        self.notifications.insert(name.into(), handler);
        self
    }

    /// Append a middleware. The first one added is the outermost.
    #[must_use]
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.pipeline.push(middleware);
        self
    }

    /// Install logging, rate limiting, redaction and auth, in that order.
    ///
    /// Rate limiting and auth are skipped when disabled in the configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the redaction patterns fail to compile.
    pub fn with_default_middleware(mut self) -> Result<Self> {
        let redactor = Arc::new(Redactor::new()?);
        self.pipeline
            .push(Arc::new(LoggingMiddleware::new(Arc::clone(&redactor))));
        if self.config.rate_limit.enabled {
            let limiters = Arc::new(RateLimiterRegistry::new(self.config.rate_limit.clone()));
            self.pipeline.push(Arc::new(RateLimitMiddleware::new(limiters)));
        }
        self.pipeline.push(Arc::new(RedactionMiddleware::new(redactor)));
        if self.config.auth.enabled {
            self.pipeline.push(Arc::new(AuthMiddleware::new(
                self.config.auth.tokens.iter().cloned(),
            )));
        }
        Ok(self)
    }

    /// Compose every handler with the middleware pipeline.
    #[must_use]
    pub fn build(self) -> Router {
        let compose = |handlers: HashMap<String, Handler>| -> HashMap<String, Handler> {
            handlers
                .into_iter()
                .map(|(name, handler)| (name, self.pipeline.wrap(handler)))
                .collect()
        };
        let methods = compose(self.methods);
        let notifications = compose(self.notifications);

        let timeouts = TimeoutManager::new(self.config.request_timeout())
            .with_overrides(self.config.method_timeouts());
        let backpressure = self.config.backpressure.enabled.then(|| {
            BackpressureController::new(
                self.config.backpressure.max_queue_size,
                Duration::from_millis(self.config.backpressure.queue_timeout_ms),
                self.config.concurrency.max_concurrent,
            )
        });

        debug!(
            methods = methods.len(),
            notifications = notifications.len(),
            middleware = ?self.pipeline.names(),
            "router built"
        );

        Router {
            inner: Arc::new(RouterInner {
                methods,
                notifications,
                tracker: self.tracker,
                timeouts,
                backpressure,
                next_connection: AtomicU64::new(1),
            }),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────────────

/// Shared, cheaply cloneable dispatcher.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    methods: HashMap<String, Handler>,
    notifications: HashMap<String, Handler>,
    tracker: RequestTracker,
    timeouts: TimeoutManager,
    backpressure: Option<BackpressureController>,
    next_connection: AtomicU64,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("methods", &self.inner.methods.len())
            .field("tracker", &self.inner.tracker)
            .finish_non_exhaustive()
    }
}

impl Router {
    /// Allocate an id for a new transport connection.
    #[must_use]
    pub fn open_connection(&self) -> ConnectionId {
        ConnectionId(self.inner.next_connection.fetch_add(1, Ordering::Relaxed))
    }

    /// Cancel whatever `connection` left in flight.
    pub fn close_connection(&self, connection: ConnectionId) {
        let cancelled = self.inner.tracker.cancel_connection(connection);
        if cancelled > 0 {
            debug!(%connection, cancelled, "cancelled in-flight requests of closed connection");
        }
    }

    /// Handle one raw frame; returns the response to send, if any.
    pub async fn handle_frame(&self, connection: ConnectionId, frame: &str) -> Option<Response> {
        match Message::parse(frame) {
            Ok(Message::Request(request)) => Some(self.handle_request(connection, request).await),
            Ok(Message::Notification(notification)) => {
                self.handle_notification(connection, notification).await;
                None
            }
            Ok(Message::Response(response)) => {
                debug!(%connection, id = ?response.id, "ignoring response from client");
                None
            }
            Err(err) => {
                warn!(%connection, %err, "rejected malformed frame");
                Some(err.into_response())
            }
        }
    }

    /// Run the full request lifecycle; always yields exactly one response.
    pub async fn handle_request(&self, connection: ConnectionId, request: Request) -> Response {
        let span = info_span!(
            "request",
            method = %request.method,
            id = ?request.id,
            %connection
        );
        async move {
            if let Err(err) = request.validate() {
                warn!(%err, "invalid request");
                return err.into_response();
            }
            let Request {
                id, method, params, ..
            } = request;
            let key = match &id {
                Some(id) => RequestKey::new(connection, id.clone()),
                None => RequestKey::generated(connection),
            };
            let params = params.unwrap_or_else(|| Value::Object(Map::new()));

            if let Some(queue) = &self.inner.backpressure {
                return self.enqueue(queue, key, id, method, params).await;
            }

            let guard = match self.inner.tracker.try_acquire(key) {
                Ok(guard) => guard,
                Err(err) => {
                    warn!(%err, "request refused");
                    return Response::error(id, err.into_rpc());
                }
            };
            let ctx = RequestContext {
                method,
                params,
                request_id: id.clone(),
                connection,
                token: guard.token().clone(),
                notification: false,
            };
            let outcome = self.dispatch(ctx).await;
            guard.release();
            Response::from_outcome(id, outcome)
        }
        .instrument(span)
        .await
    }

    /// Dispatch a notification; errors are logged, never returned.
    pub async fn handle_notification(&self, connection: ConnectionId, notification: Notification) {
        if let Err(err) = notification.validate() {
            warn!(%connection, %err, "invalid notification");
            return;
        }
        let Notification { method, params, .. } = notification;
        // Any request method may also be sent fire-and-forget.
        let Some(handler) = self
            .inner
            .notifications
            .get(&method)
            .or_else(|| self.inner.methods.get(&method))
            .cloned()
        else {
            debug!(%connection, method, "no handler for notification");
            return;
        };
        let ctx = RequestContext {
            method: method.clone(),
            params: params.unwrap_or_else(|| Value::Object(Map::new())),
            request_id: None,
            connection,
            token: CancellationToken::detached(),
            notification: true,
        };
        match self.inner.timeouts.run_for(&method, handler(ctx)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => warn!(%connection, method, code = err.code, "notification handler failed"),
            Err(err) => warn!(%connection, method, %err, "notification handler timed out"),
        }
    }

    /// Mark every in-flight request with `id` cancelled.
    ///
    /// Returns whether an active request was found.
    pub fn cancel_request(&self, id: &RequestId) -> bool {
        let found = self.inner.tracker.cancel(id);
        debug!(%id, found, "cancel requested");
        found
    }

    /// Requests currently admitted.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.tracker.active_count()
    }

    /// Whether the next request would be refused.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.inner.tracker.is_full()
    }

    /// Admission tracker.
    #[must_use]
    pub fn tracker(&self) -> &RequestTracker {
        &self.inner.tracker
    }

    /// Admission queue, when `[backpressure]` is enabled.
    #[must_use]
    pub fn backpressure(&self) -> Option<&BackpressureController> {
        self.inner.backpressure.as_ref()
    }

    // ── Private helpers ───────────────────────────────────────────────────────

    /// Run the composed handler for `ctx.method` under its deadline and
    /// cancellation token.
    async fn dispatch(&self, ctx: RequestContext) -> HandlerResult {
        let Some(handler) = self.inner.methods.get(&ctx.method).cloned() else {
            return Err(RpcError::method_not_found(&ctx.method));
        };
        let method = ctx.method.clone();
        let token = ctx.token.clone();
        let after = self.inner.timeouts.timeout_for(&method);

        let mut task = tokio::spawn(handler(ctx));
        let raced = self
            .inner
            .timeouts
            .run(after, async {
                tokio::select! {
                    biased;
                    joined = &mut task => Some(joined),
                    () = token.cancelled() => None,
                }
            })
            .await;

        let outcome = match raced {
            Ok(Some(Ok(result))) => result,
            Ok(Some(Err(join_err))) if join_err.is_panic() => {
                error!(method, "handler panicked");
                Err(RpcError::internal("handler panicked"))
            }
            Ok(Some(Err(_)) | None) => {
                debug!(method, "request cancelled");
                Err(RpcError::cancelled())
            }
            Err(timeout) => {
                token.cancel();
                warn!(method, %timeout, "request timed out");
                Err(RpcError::timeout(&method, timeout.after))
            }
        };
        task.abort();
        outcome
    }

    async fn enqueue(
        &self,
        queue: &BackpressureController,
        key: RequestKey,
        id: Option<RequestId>,
        method: String,
        params: Value,
    ) -> Response {
        let pending = match self.inner.tracker.reserve(key.clone()) {
            Ok(pending) => pending,
            Err(err) => {
                warn!(%err, "request refused");
                return Response::error(id, err.into_rpc());
            }
        };
        let router = self.clone();
        let connection = key.connection;
        let request_id = id.clone();
        let work: QueuedWork = Box::pin(async move {
            let guard = pending.admit().await.map_err(AdmissionError::into_rpc)?;
            if guard.token().is_cancelled() {
                debug!(method, "request cancelled while queued");
                return Err(RpcError::cancelled());
            }
            let ctx = RequestContext {
                method,
                params,
                request_id,
                connection,
                token: guard.token().clone(),
                notification: false,
            };
            let outcome = router.dispatch(ctx).await;
            guard.release();
            outcome
        });

        match queue.enqueue(key, work, None).await {
            Ok(receiver) => {
                let outcome = receiver
                    .await
                    .unwrap_or_else(|_| Err(RpcError::internal("queued request was dropped")));
                Response::from_outcome(id, outcome)
            }
            Err(full) => {
                warn!(%full, "request refused");
                Response::error(id, full.into_rpc())
            }
        }
    }
}
