//! Deadline enforcement for handler execution.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::time::Duration;

/// The wrapped future did not complete in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutError {
    /// Deadline that was exceeded.
    pub after: Duration,
}

impl Display for TimeoutError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "timed out after {}ms", self.after.as_millis())
    }
}

impl std::error::Error for TimeoutError {}

/// Default deadline plus per-method overrides.
///
/// Expiry only stops the wait. Side effects already started by the future
/// continue unless the caller also cancels or aborts it.
#[derive(Debug, Clone)]
pub struct TimeoutManager {
    default: Duration,
    overrides: HashMap<String, Duration>,
}

impl TimeoutManager {
    /// Create a manager with `default` for every method.
    #[must_use]
    pub fn new(default: Duration) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    /// Replace the per-method overrides.
    #[must_use]
    pub fn with_overrides(mut self, overrides: HashMap<String, Duration>) -> Self {
        self.overrides = overrides;
        self
    }

    /// Deadline that applies to `method`.
    #[must_use]
    pub fn timeout_for(&self, method: &str) -> Duration {
        self.overrides.get(method).copied().unwrap_or(self.default)
    }

    /// Await `work` for at most `after`.
    ///
    /// # Errors
    ///
    /// Returns [`TimeoutError`] when the deadline passes first.
    pub async fn run<F>(&self, after: Duration, work: F) -> Result<F::Output, TimeoutError>
    where
        F: Future,
    {
        tokio::time::timeout(after, work)
            .await
            .map_err(|_| TimeoutError { after })
    }

    /// Await `work` under `method`'s deadline.
    ///
    /// # Errors
    ///
    /// Returns [`TimeoutError`] when the deadline passes first.
    pub async fn run_for<F>(&self, method: &str, work: F) -> Result<F::Output, TimeoutError>
    where
        F: Future,
    {
        self.run(self.timeout_for(method), work).await
    }
}
