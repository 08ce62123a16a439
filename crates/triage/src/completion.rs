//! Completion broker - delivers worker outcomes to waiting submitters.
//!
//! Each submission owns a [`CompletionHandle`] keyed by its request token.
//! The handle goes `Waiting → Resolved | TimedOut` exactly once:
//! - the worker claims the entry and sends the outcome (resolved), or
//! - the wait elapses and the handle removes its own entry first (timed out).
//!
//! Whoever removes the registry entry wins. A timeout never cancels the
//! allocation itself; an outcome published after the caller gave up is
//! dropped with a log line. Entries are removed on every path, including
//! an early drop of the handle.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::error::AllocationError;
use crate::request::RequestToken;
use crate::store::{Hospital, Report};

/// A committed allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Allocated {
    pub report: Report,
    pub hospital: Hospital,
}

pub type AllocationResult = Result<Allocated, AllocationError>;

/// What a requester sees at the end of an admission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted(Allocated),
    /// The bounded wait ran out; the allocation may still complete.
    Retry,
}

impl Admission {
    pub fn status(&self) -> &'static str {
        match self {
            Self::Admitted(_) => "success",
            Self::Retry => "retry",
        }
    }

    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted(_))
    }

    pub fn allocated(&self) -> Option<&Allocated> {
        match self {
            Self::Admitted(a) => Some(a),
            Self::Retry => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    Waiting,
    Resolved,
    TimedOut,
}

/// Registry of submitters waiting on an outcome.
#[derive(Default)]
pub struct CompletionBroker {
    waiters: DashMap<RequestToken, oneshot::Sender<AllocationResult>>,
}

impl CompletionBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a waiter for `token`. Must happen before the request becomes
    /// visible to workers.
    pub fn register(self: &Arc<Self>, token: RequestToken) -> CompletionHandle {
        let (tx, rx) = oneshot::channel();
        if self.waiters.insert(token, tx).is_some() {
            tracing::error!(%token, "Duplicate request token registered - previous waiter dropped");
        }
        CompletionHandle {
            token,
            rx,
            broker: Arc::clone(self),
            state: WaitState::Waiting,
        }
    }

    /// Deliver an outcome. Returns false if nobody is waiting any more.
    pub fn publish(&self, token: RequestToken, result: AllocationResult) -> bool {
        let Some((_, tx)) = self.waiters.remove(&token) else {
            tracing::info!(
                %token,
                succeeded = result.is_ok(),
                "Outcome arrived after caller stopped waiting"
            );
            return false;
        };
        // No await between claiming the entry and sending.
        tx.send(result).is_ok()
    }

    pub fn is_waiting(&self, token: &RequestToken) -> bool {
        self.waiters.contains_key(token)
    }

    /// Number of submitters currently waiting.
    pub fn pending(&self) -> usize {
        self.waiters.len()
    }

    fn deregister(&self, token: &RequestToken) -> bool {
        self.waiters.remove(token).is_some()
    }
}

/// One submitter's view of its outcome.
pub struct CompletionHandle {
    token: RequestToken,
    rx: oneshot::Receiver<AllocationResult>,
    broker: Arc<CompletionBroker>,
    state: WaitState,
}

impl CompletionHandle {
    pub fn token(&self) -> RequestToken {
        self.token
    }

    pub fn state(&self) -> WaitState {
        self.state
    }

    /// Wait up to `timeout` for the outcome.
    ///
    /// Timing out is not an error: it yields [`Admission::Retry`] while the
    /// allocation keeps running in the background.
    pub async fn wait(mut self, timeout: Duration) -> Result<Admission, AllocationError> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(received) => self.resolve(received),
            Err(_) => {
                if self.broker.deregister(&self.token) {
                    self.state = WaitState::TimedOut;
                    tracing::info!(
                        token = %self.token,
                        ?timeout,
                        "Wait timed out - allocation continues in background"
                    );
                    return Ok(Admission::Retry);
                }
                // A worker already claimed the entry; its send is imminent.
                let received = (&mut self.rx).await;
                self.resolve(received)
            }
        }
    }

    fn resolve(
        &mut self,
        received: Result<AllocationResult, oneshot::error::RecvError>,
    ) -> Result<Admission, AllocationError> {
        match received {
            Ok(result) => {
                self.state = WaitState::Resolved;
                result.map(Admission::Admitted)
            }
            Err(_) => {
                // Sender dropped without an outcome; nothing more will arrive.
                tracing::warn!(token = %self.token, "Completion channel closed without outcome");
                self.state = WaitState::TimedOut;
                Ok(Admission::Retry)
            }
        }
    }
}

impl Drop for CompletionHandle {
    fn drop(&mut self) {
        if self.state == WaitState::Waiting {
            self.broker.deregister(&self.token);
        }
    }
}
