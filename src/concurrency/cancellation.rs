//! Per-request cooperative cancellation.

use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};

use crate::protocol::{RequestId, RpcError};

/// Cooperative cancellation flag shared between the router and a handler.
///
/// Cloning yields another handle to the same flag. Cancelling is one-way and
/// records the first cancellation time; handlers observe it with
/// [`CancellationToken::check`] at their own checkpoints or by awaiting
/// [`CancellationToken::cancelled`].
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    request_id: Option<RequestId>,
    cancelled_at: OnceLock<DateTime<Utc>>,
    signal: tokio_util::sync::CancellationToken,
}

impl CancellationToken {
    /// Create an uncancelled token for `request_id`.
    #[must_use]
    pub fn new(request_id: Option<RequestId>) -> Self {
        Self {
            inner: Arc::new(Inner {
                request_id,
                cancelled_at: OnceLock::new(),
                signal: tokio_util::sync::CancellationToken::new(),
            }),
        }
    }

    /// Token not tied to any tracked request (notifications, tests).
    #[must_use]
    pub fn detached() -> Self {
        Self::new(None)
    }

    /// Id of the request this token belongs to.
    #[must_use]
    pub fn request_id(&self) -> Option<&RequestId> {
        self.inner.request_id.as_ref()
    }

    /// Mark the token cancelled. Returns `true` on the first call only.
    pub fn cancel(&self) -> bool {
        // Timestamp is set before the signal fires so waiters always see it.
        let first = self.inner.cancelled_at.set(Utc::now()).is_ok();
        self.inner.signal.cancel();
        first
    }

    /// Whether [`CancellationToken::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.signal.is_cancelled()
    }

    /// When the token was first cancelled.
    #[must_use]
    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.inner.cancelled_at.get().copied()
    }

    /// Checkpoint for handlers.
    ///
    /// # Errors
    ///
    /// Returns a `Cancelled` (-32005) error once the token is cancelled.
    pub fn check(&self) -> Result<(), RpcError> {
        if self.is_cancelled() {
            Err(RpcError::cancelled())
        } else {
            Ok(())
        }
    }

    /// Resolve once the token is cancelled.
    pub async fn cancelled(&self) {
        self.inner.signal.cancelled().await;
    }
}
