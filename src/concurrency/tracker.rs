//! Bounded admission of in-flight requests.
//!
//! Each admitted request holds one semaphore permit and one entry in the
//! active map for as long as its [`RequestGuard`] lives. Dropping the guard
//! is the only release path, so a handler that errors, panics or times out
//! still frees its slot.
//!
//! Requests waiting in the admission queue are reserved first, so they can
//! be cancelled before they hold a slot.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::debug;

use super::cancellation::CancellationToken;
use crate::protocol::{RequestId, RpcError};

/// Identifies one transport connection. Request ids are unique per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl Display for ConnectionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Tracking key for one in-flight request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    /// Connection the request arrived on.
    pub connection: ConnectionId,
    /// Client-supplied id, or a generated one for `"id": null`.
    pub id: RequestId,
}

impl RequestKey {
    /// Key for a request with a client-supplied id.
    #[must_use]
    pub fn new(connection: ConnectionId, id: RequestId) -> Self {
        Self { connection, id }
    }

    /// Key with a generated id, for requests sent with `"id": null`.
    #[must_use]
    pub fn generated(connection: ConnectionId) -> Self {
        Self {
            connection,
            id: RequestId::String(format!("generated-{}", uuid::Uuid::new_v4())),
        }
    }
}

impl Display for RequestKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.connection, self.id)
    }
}

/// Why a request could not be admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// Every slot is taken.
    AtCapacity {
        /// Requests in flight at the time of refusal.
        active: usize,
        /// Configured ceiling.
        max: usize,
    },
    /// The same id is already in flight on this connection.
    DuplicateId(RequestKey),
    /// The tracker was shut down.
    Closed,
}

impl AdmissionError {
    /// Wire error for this refusal.
    #[must_use]
    pub fn into_rpc(self) -> RpcError {
        match self {
            Self::AtCapacity { active, max } => RpcError::at_capacity(active, max),
            Self::DuplicateId(key) => {
                RpcError::invalid_request(format!("request id {} is already in flight", key.id))
            }
            Self::Closed => RpcError::internal("request tracker closed"),
        }
    }
}

impl Display for AdmissionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AtCapacity { active, max } => write!(f, "at capacity: {active}/{max}"),
            Self::DuplicateId(key) => write!(f, "duplicate request id: {key}"),
            Self::Closed => f.write_str("tracker closed"),
        }
    }
}

impl std::error::Error for AdmissionError {}

/// Counting semaphore plus the map of active cancellation tokens.
#[derive(Debug, Clone)]
pub struct RequestTracker {
    inner: Arc<TrackerInner>,
}

#[derive(Debug)]
struct TrackerInner {
    max_concurrent: usize,
    permits: Arc<Semaphore>,
    active: Mutex<HashMap<RequestKey, CancellationToken>>,
    /// Reserved but not yet admitted (waiting in the admission queue).
    pending: Mutex<HashMap<RequestKey, CancellationToken>>,
}

type TokenMap<'a> = std::sync::MutexGuard<'a, HashMap<RequestKey, CancellationToken>>;

impl TrackerInner {
    fn active(&self) -> TokenMap<'_> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> TokenMap<'_> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Both maps, always locked active first.
    fn both(&self) -> (TokenMap<'_>, TokenMap<'_>) {
        let active = self.active();
        (active, self.pending())
    }
}

impl RequestTracker {
    /// Create a tracker admitting at most `max_concurrent` requests.
    #[must_use]
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                max_concurrent,
                permits: Arc::new(Semaphore::new(max_concurrent)),
                active: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Wait for a free slot, then register `key`.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::DuplicateId`] if `key` is already in flight.
    pub async fn acquire(&self, key: RequestKey) -> Result<RequestGuard, AdmissionError> {
        if self.contains(&key) {
            return Err(AdmissionError::DuplicateId(key));
        }
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| AdmissionError::Closed)?;
        self.register(key, permit)
    }

    /// Register `key` only if a slot is free right now.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::AtCapacity`] when no slot is free, or
    /// [`AdmissionError::DuplicateId`] if `key` is already in flight.
    pub fn try_acquire(&self, key: RequestKey) -> Result<RequestGuard, AdmissionError> {
        if self.contains(&key) {
            return Err(AdmissionError::DuplicateId(key));
        }
        let permit = Arc::clone(&self.inner.permits)
            .try_acquire_owned()
            .map_err(|err| match err {
                TryAcquireError::NoPermits => AdmissionError::AtCapacity {
                    active: self.active_count(),
                    max: self.inner.max_concurrent,
                },
                TryAcquireError::Closed => AdmissionError::Closed,
            })?;
        self.register(key, permit)
    }

    fn register(
        &self,
        key: RequestKey,
        permit: OwnedSemaphorePermit,
    ) -> Result<RequestGuard, AdmissionError> {
        let token = CancellationToken::new(Some(key.id.clone()));
        {
            let (mut active, pending) = self.inner.both();
            if active.contains_key(&key) || pending.contains_key(&key) {
                return Err(AdmissionError::DuplicateId(key));
            }
            active.insert(key.clone(), token.clone());
        }
        debug!(request = %key, "request admitted");
        Ok(RequestGuard {
            tracker: Arc::clone(&self.inner),
            key,
            token,
            _permit: permit,
        })
    }

    /// Reserve `key` without taking a slot.
    ///
    /// The reservation's token is reachable by every cancel method while the
    /// request waits; [`PendingRequest::admit`] later takes a slot under the
    /// same token.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::DuplicateId`] if `key` is already reserved or in
    /// flight.
    pub fn reserve(&self, key: RequestKey) -> Result<PendingRequest, AdmissionError> {
        let token = CancellationToken::new(Some(key.id.clone()));
        {
            let (active, mut pending) = self.inner.both();
            if active.contains_key(&key) || pending.contains_key(&key) {
                return Err(AdmissionError::DuplicateId(key));
            }
            pending.insert(key.clone(), token.clone());
        }
        debug!(request = %key, "request reserved");
        Ok(PendingRequest {
            tracker: Arc::clone(&self.inner),
            key,
            token,
        })
    }

    /// Cancel every reserved or in-flight request with this id, on any
    /// connection.
    ///
    /// Returns whether at least one request was found.
    pub fn cancel(&self, id: &RequestId) -> bool {
        let (active, pending) = self.inner.both();
        let mut found = false;
        for (key, token) in active.iter().chain(pending.iter()) {
            if &key.id == id {
                token.cancel();
                found = true;
            }
        }
        found
    }

    /// Cancel the request identified by `key`.
    pub fn cancel_key(&self, key: &RequestKey) -> bool {
        let (active, pending) = self.inner.both();
        active
            .get(key)
            .or_else(|| pending.get(key))
            .map(CancellationToken::cancel)
            .is_some()
    }

    /// Cancel everything `connection` still has reserved or running.
    /// Returns the count.
    pub fn cancel_connection(&self, connection: ConnectionId) -> usize {
        let (active, pending) = self.inner.both();
        let mut cancelled = 0;
        for (key, token) in active.iter().chain(pending.iter()) {
            if key.connection == connection {
                token.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Token for a reserved or in-flight request.
    #[must_use]
    pub fn token(&self, key: &RequestKey) -> Option<CancellationToken> {
        let (active, pending) = self.inner.both();
        active.get(key).or_else(|| pending.get(key)).cloned()
    }

    /// Whether `key` is reserved or in flight.
    #[must_use]
    pub fn contains(&self, key: &RequestKey) -> bool {
        let (active, pending) = self.inner.both();
        active.contains_key(key) || pending.contains_key(key)
    }

    /// Number of requests in flight.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.active().len()
    }

    /// Configured ceiling.
    #[must_use]
    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }

    /// Whether a new request would be refused.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.inner.permits.available_permits() == 0
    }
}

/// Reservation for a request that has not been admitted yet.
///
/// Dropping it without admitting withdraws the reservation.
#[derive(Debug)]
pub struct PendingRequest {
    tracker: Arc<TrackerInner>,
    key: RequestKey,
    token: CancellationToken,
}

impl PendingRequest {
    /// Cancellation token the request will run under.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Wait for a free slot and move the reservation into the active set.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::Closed`] if the tracker's semaphore was closed.
    pub async fn admit(self) -> Result<RequestGuard, AdmissionError> {
        let permit = Arc::clone(&self.tracker.permits)
            .acquire_owned()
            .await
            .map_err(|_| AdmissionError::Closed)?;
        {
            let (mut active, mut pending) = self.tracker.both();
            pending.remove(&self.key);
            active.insert(self.key.clone(), self.token.clone());
        }
        debug!(request = %self.key, "request admitted");
        Ok(RequestGuard {
            tracker: Arc::clone(&self.tracker),
            key: self.key.clone(),
            token: self.token.clone(),
            _permit: permit,
        })
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.tracker.pending().remove(&self.key);
    }
}

/// Admission slot for one request; dropping it releases the slot.
#[derive(Debug)]
pub struct RequestGuard {
    tracker: Arc<TrackerInner>,
    key: RequestKey,
    token: CancellationToken,
    _permit: OwnedSemaphorePermit,
}

impl RequestGuard {
    /// Key this guard was admitted under.
    #[must_use]
    pub fn key(&self) -> &RequestKey {
        &self.key
    }

    /// Cancellation token of the admitted request.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Release the slot now rather than at end of scope.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.tracker.active().remove(&self.key);
        debug!(request = %self.key, "request released");
    }
}
