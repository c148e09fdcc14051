use std::{
    future::IntoFuture,
    sync::{Arc, OnceLock},
};

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::Notify;

/// How the first-emission signal settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum FirstEmissionOutcome {
    /// The source emitted a value
    Value,
    /// The source failed before emitting
    Error,
    /// Nothing happened before the timeout elapsed. The consumer is released, but it
    /// has neither a value nor an error to show.
    TimedOut,
}

/// A once-settling token that resolves at the earliest of first value, first error or timeout.
/// This is what a rendering layer suspends on. Clones share the same state.
#[derive(Clone)]
pub struct FirstEmission(Arc<Inner>);

struct Inner {
    outcome: OnceLock<FirstEmissionOutcome>,
    settled: Notify,
}

impl FirstEmission {
    pub(crate) fn new() -> Self { Self(Arc::new(Inner { outcome: OnceLock::new(), settled: Notify::new() })) }

    /// Settle the token. Returns false if it had already settled, in which case nothing changes.
    pub(crate) fn settle(&self, outcome: FirstEmissionOutcome) -> bool {
        if self.0.outcome.set(outcome).is_err() {
            return false;
        }
        self.0.settled.notify_waiters();
        true
    }

    pub fn outcome(&self) -> Option<FirstEmissionOutcome> { self.0.outcome.get().copied() }

    pub fn is_settled(&self) -> bool { self.0.outcome.get().is_some() }

    /// Wait until the token settles
    pub async fn wait(&self) -> FirstEmissionOutcome {
        loop {
            let mut notified = std::pin::pin!(self.0.settled.notified());
            // register before checking, so a settle between the check and the await is not lost
            notified.as_mut().enable();
            if let Some(outcome) = self.outcome() {
                return outcome;
            }
            notified.await;
        }
    }

    /// Whether two tokens belong to the same subscription
    pub fn ptr_eq(&self, other: &Self) -> bool { Arc::ptr_eq(&self.0, &other.0) }
}

impl IntoFuture for FirstEmission {
    type Output = FirstEmissionOutcome;
    type IntoFuture = BoxFuture<'static, FirstEmissionOutcome>;

    fn into_future(self) -> Self::IntoFuture { async move { self.wait().await }.boxed() }
}

impl std::fmt::Debug for FirstEmission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirstEmission").field("outcome", &self.outcome()).finish()
    }
}
