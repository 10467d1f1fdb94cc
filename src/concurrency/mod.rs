//! Admission control, cancellation, rate limiting, timeouts and queueing.

pub mod backpressure;
pub mod cancellation;
pub mod rate_limiter;
pub mod timeout;
pub mod tracker;

pub use backpressure::{BackpressureController, QueueFull, QueuedOutcome, QueuedWork};
pub use cancellation::CancellationToken;
pub use rate_limiter::{RateLimiter, RateLimiterRegistry};
pub use timeout::{TimeoutError, TimeoutManager};
pub use tracker::{
    AdmissionError, ConnectionId, PendingRequest, RequestGuard, RequestKey, RequestTracker,
};
