//! Bounded admission queue, an opt-in alternative to immediate rejection.
//!
//! Work waits in a bounded channel until one of `workers` drain slots frees
//! up. Producers wait at most `queue_timeout` for room in the channel before
//! the enqueue is refused.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::tracker::RequestKey;
use crate::protocol::{ErrorCode, RpcError};

/// Work accepted by the queue.
pub type QueuedWork = Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send>>;

/// Receiver for the outcome of queued work.
pub type QueuedOutcome = oneshot::Receiver<Result<Value, RpcError>>;

/// The queue stayed full for the whole `queue_timeout`, or was shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull {
    /// Items waiting when the enqueue gave up.
    pub queued: usize,
    /// Queue capacity.
    pub capacity: usize,
}

impl QueueFull {
    /// Wire error for this refusal.
    #[must_use]
    pub fn into_rpc(self) -> RpcError {
        RpcError::queue_full(self.queued, self.capacity)
    }
}

impl Display for QueueFull {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "queue full: {}/{}", self.queued, self.capacity)
    }
}

impl std::error::Error for QueueFull {}

struct QueuedItem {
    key: RequestKey,
    work: QueuedWork,
    timeout: Option<Duration>,
    reply: oneshot::Sender<Result<Value, RpcError>>,
}

/// Bounded queue plus its drain loop.
pub struct BackpressureController {
    sender: mpsc::Sender<QueuedItem>,
    receiver: Mutex<Option<mpsc::Receiver<QueuedItem>>>,
    max_queue_size: usize,
    queue_timeout: Duration,
    workers: usize,
}

impl std::fmt::Debug for BackpressureController {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackpressureController")
            .field("max_queue_size", &self.max_queue_size)
            .field("queue_timeout", &self.queue_timeout)
            .field("workers", &self.workers)
            .field("queued", &self.queued())
            .finish_non_exhaustive()
    }
}

impl BackpressureController {
    /// Create a queue holding up to `max_queue_size` items, drained by at
    /// most `workers` concurrent executions.
    ///
    /// The drain loop starts on the first [`BackpressureController::enqueue`]
    /// unless [`BackpressureController::run`] claimed it earlier.
    #[must_use]
    pub fn new(max_queue_size: usize, queue_timeout: Duration, workers: usize) -> Self {
        let (sender, receiver) = mpsc::channel(max_queue_size.max(1));
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            max_queue_size: max_queue_size.max(1),
            queue_timeout,
            workers: workers.max(1),
        }
    }

    /// Items currently waiting.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.max_queue_size.saturating_sub(self.sender.capacity())
    }

    /// Queue capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.max_queue_size
    }

    /// Queue `work`, waiting up to the queue timeout for a free slot.
    ///
    /// `timeout`, when set, bounds the execution of `work` once dequeued.
    ///
    /// # Errors
    ///
    /// Returns [`QueueFull`] when no slot frees up in time.
    pub async fn enqueue(
        &self,
        key: RequestKey,
        work: QueuedWork,
        timeout: Option<Duration>,
    ) -> Result<QueuedOutcome, QueueFull> {
        self.start();
        let (reply, outcome) = oneshot::channel();
        let item = QueuedItem {
            key,
            work,
            timeout,
            reply,
        };
        match self.sender.send_timeout(item, self.queue_timeout).await {
            Ok(()) => Ok(outcome),
            Err(SendTimeoutError::Timeout(item)) => {
                warn!(request = %item.key, "admission queue full");
                Err(QueueFull {
                    queued: self.queued(),
                    capacity: self.max_queue_size,
                })
            }
            Err(SendTimeoutError::Closed(_)) => Err(QueueFull {
                queued: 0,
                capacity: self.max_queue_size,
            }),
        }
    }

    /// Drain the queue on the current task until `shutdown` fires.
    ///
    /// Returns at once if the drain loop is already running.
    pub async fn run(&self, shutdown: CancellationToken) {
        if let Some(receiver) = self.take_receiver() {
            drain(receiver, self.workers, shutdown).await;
        }
    }

    fn start(&self) {
        if let Some(receiver) = self.take_receiver() {
            tokio::spawn(drain(receiver, self.workers, CancellationToken::new()));
        }
    }

    fn take_receiver(&self) -> Option<mpsc::Receiver<QueuedItem>> {
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if receiver.is_some() {
            info!(
                max_queue_size = self.max_queue_size,
                workers = self.workers,
                "starting admission queue drain loop"
            );
        }
        receiver
    }
}

/// Pop queued items and run up to `workers` of them at once.
///
/// Ends on `shutdown`, or when every sender is dropped and the queue is
/// empty. Items still queued at shutdown are dropped, which fails their
/// outcome receivers.
async fn drain(
    mut receiver: mpsc::Receiver<QueuedItem>,
    workers: usize,
    shutdown: CancellationToken,
) {
    let slots = Arc::new(Semaphore::new(workers));
    loop {
        let permit = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            permit = Arc::clone(&slots).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let item = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            item = receiver.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };
        tokio::spawn(async move {
            let _permit = permit;
            let QueuedItem {
                key,
                work,
                timeout,
                reply,
            } = item;
            debug!(request = %key, "dequeued");
            let outcome = match timeout {
                Some(after) => tokio::time::timeout(after, work).await.unwrap_or_else(|_| {
                    Err(RpcError::new(ErrorCode::Timeout, "Request timed out").with_data(json!({
                        "timeoutMs": u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
                    })))
                }),
                None => work.await,
            };
            if reply.send(outcome).is_err() {
                debug!(request = %key, "queued request outcome dropped; caller gone");
            }
        });
    }
    debug!("admission queue drain loop stopped");
}
