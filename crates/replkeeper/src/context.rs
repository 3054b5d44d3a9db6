//! Operation context: cancellation and deadlines
//!
//! Every public engine operation runs under an [`OperationContext`]. The context carries a
//! [`CancellationToken`] the caller may trigger at any time and an optional deadline. Engine
//! components derive bounded sub-contexts from it (connection establishment, readiness polling)
//! whose deadlines never exceed the parent's.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

/// Why a context stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// The token was cancelled
    Cancelled,
    /// The deadline elapsed
    DeadlineExceeded,
}

/// Cancellation and deadline scope for one logical operation.
#[derive(Debug, Clone)]
pub struct OperationContext {
    id: Uuid,
    token: CancellationToken,
    deadline: Option<Instant>,
    budget: Option<Duration>,
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationContext {
    /// A context without deadline
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            token: CancellationToken::new(),
            deadline: None,
            budget: None,
        }
    }

    /// A context that expires `budget` from now. A budget too large to express as an instant
    /// leaves the context without deadline.
    pub fn with_timeout(budget: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(budget),
            budget: Some(budget),
            ..Self::new()
        }
    }

    /// Use an existing token, e.g. one tied to process shutdown.
    #[must_use]
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Derive a sub-context that expires after `budget` or at the parent's deadline, whichever
    /// comes first. Cancelling the parent cancels the child; cancelling the child leaves the
    /// parent running.
    pub fn child_with_timeout(&self, budget: Duration) -> Self {
        let now = Instant::now();
        let own = now.checked_add(budget);
        let (deadline, budget) = match (self.deadline, own) {
            (Some(parent), Some(own)) if own < parent => (Some(own), budget),
            (Some(parent), _) => (Some(parent), parent.saturating_duration_since(now)),
            (None, own) => (own, budget),
        };

        Self {
            id: self.id,
            token: self.token.child_token(),
            deadline,
            budget: Some(budget),
        }
    }

    /// Derive a sub-context sharing the parent's deadline
    pub fn child(&self) -> Self {
        Self {
            id: self.id,
            token: self.token.child_token(),
            deadline: self.deadline,
            budget: self.budget,
        }
    }

    /// Operation id, shared by derived contexts
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The cancellation token
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel this context and every context derived from it
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether [`OperationContext::cancel`] was called here or on an ancestor
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Whether the deadline has passed
    pub fn is_expired(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> Interrupt {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    () = self.token.cancelled() => Interrupt::Cancelled,
                    () = tokio::time::sleep_until(deadline) => Interrupt::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                Interrupt::Cancelled
            }
        }
    }

    /// Fail if the context is already cancelled or expired.
    pub fn check(&self, operation: &str) -> EngineResult<()> {
        if self.is_cancelled() {
            return Err(self.interrupted(Interrupt::Cancelled, operation, None));
        }
        if self.is_expired() {
            return Err(self.interrupted(Interrupt::DeadlineExceeded, operation, None));
        }
        Ok(())
    }

    /// Build the error describing why this context stopped.
    pub fn interrupted(
        &self,
        interrupt: Interrupt,
        operation: &str,
        last_observation: Option<String>,
    ) -> EngineError {
        match interrupt {
            Interrupt::Cancelled => EngineError::cancelled(operation),
            Interrupt::DeadlineExceeded => EngineError::Timeout {
                operation: operation.to_string(),
                after: self.budget.unwrap_or_default(),
                last_observation,
            },
        }
    }

    /// Race `future` against this context.
    ///
    /// The future is polled first, so an inner component that reports its own interruption
    /// (with more detail) wins over the generic error built here.
    pub async fn run<F, T>(&self, operation: &str, future: F) -> EngineResult<T>
    where
        F: Future<Output = EngineResult<T>>,
    {
        tokio::select! {
            biased;
            result = future => result,
            interrupt = self.done() => Err(self.interrupted(interrupt, operation, None)),
        }
    }
}
