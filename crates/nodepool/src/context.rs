//! Cancellation and deadline context for blocking pool calls.
//!
//! A [`Context`] bounds how long [`Pool::get`](crate::Pool::get) may wait for
//! capacity. It ends either when its [`CancellationToken`] is cancelled or when
//! its deadline passes, whichever comes first.

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Reason a [`Context`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The context was cancelled explicitly.
    #[error("context cancelled")]
    Cancelled,

    /// The context deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation scope for a pool call.
///
/// Cloning a context shares its cancellation token, so cancelling any clone
/// ends all of them.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// Create a context that never ends on its own.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// Create a context that ends after `timeout`.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().timeout(timeout)
    }

    /// Create a context driven by an existing cancellation token.
    #[must_use]
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Set a deadline relative to now.
    ///
    /// An earlier deadline already on the context is kept. A timeout too
    /// large to represent leaves the context without a new deadline.
    #[must_use]
    pub fn timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.deadline(deadline),
            None => self,
        }
    }

    /// Set an absolute deadline.
    ///
    /// An earlier deadline already on the context is kept.
    #[must_use]
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Derive a child context.
    ///
    /// Cancelling the parent cancels the child, but not the other way around.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Cancel this context and every clone and child of it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Get the deadline, if any.
    #[must_use]
    pub fn get_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Get the underlying cancellation token.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Return why the context has ended, or `None` while it is still live.
    #[must_use]
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Wait until the context ends.
    ///
    /// Cancel-safe: dropping the returned future has no side effects.
    pub async fn done(&self) -> ContextError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    () = self.token.cancelled() => ContextError::Cancelled,
                    () = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                ContextError::Cancelled
            }
        }
    }
}

impl From<CancellationToken> for Context {
    fn from(token: CancellationToken) -> Self {
        Self::with_token(token)
    }
}
