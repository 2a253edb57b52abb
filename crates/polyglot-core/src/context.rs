//! Cancellable request context.
//!
//! A [`Context`] travels with every orchestrator, runtime and bridge call. It
//! combines a cancellation token with an optional deadline. Derived contexts
//! are cancelled together with their parent and never outlive its deadline.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use polyglot_common::{PolyglotError, Result};

/// Cancellation and deadline carrier.
///
/// Cloning a context shares its cancellation state.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a context that can be cancelled independently of this one.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Derive a context that expires after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a context that expires at `deadline` (or earlier, if this
    /// context already expires earlier).
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = self
            .deadline
            .map_or(deadline, |current| current.min(deadline));

        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Cancel this context and every context derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The context error if the context is already done.
    pub fn err(&self) -> Option<PolyglotError> {
        if self.token.is_cancelled() {
            return Some(PolyglotError::Canceled);
        }

        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(PolyglotError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolve once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> PolyglotError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.token.cancelled() => PolyglotError::Canceled,
                    () = tokio::time::sleep_until(deadline) => PolyglotError::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                PolyglotError::Canceled
            }
        }
    }

    /// Race `fut` against this context.
    ///
    /// Once the context is done its error wins, even over a result that
    /// arrives in the same instant. `fut` is dropped when the context wins.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }

        tokio::select! {
            biased;
            err = self.done() => Err(err),
            result = fut => match self.err() {
                Some(err) => Err(err),
                None => result,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_is_never_done() {
        let ctx = Context::background();
        assert!(ctx.err().is_none());
        assert!(ctx.deadline().is_none());

        let result = ctx.run(async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_cancel_propagates_to_children() {
        let parent = Context::background();
        let child = parent.child();
        let timed = parent.with_timeout(Duration::from_secs(60));

        parent.cancel();

        assert!(matches!(child.err(), Some(PolyglotError::Canceled)));
        assert!(matches!(timed.err(), Some(PolyglotError::Canceled)));
        assert!(matches!(child.done().await, PolyglotError::Canceled));
    }

    #[tokio::test]
    async fn test_child_cancel_does_not_affect_parent() {
        let parent = Context::background();
        let child = parent.child();

        child.cancel();

        assert!(child.err().is_some());
        assert!(parent.err().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded() {
        let ctx = Context::background().with_timeout(Duration::from_millis(50));
        assert!(ctx.err().is_none());

        let err = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, PolyglotError::DeadlineExceeded));
        assert!(matches!(ctx.err(), Some(PolyglotError::DeadlineExceeded)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_deadline_never_extends_parent() {
        let parent = Context::background().with_timeout(Duration::from_millis(10));
        let child = parent.with_timeout(Duration::from_secs(10));

        assert_eq!(child.deadline(), parent.deadline());
    }

    #[tokio::test]
    async fn test_run_with_cancelled_context_skips_future() {
        let ctx = Context::background();
        ctx.cancel();

        let mut polled = false;
        let result: Result<()> = ctx
            .run(async {
                polled = true;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(PolyglotError::Canceled)));
        assert!(!polled);
    }
}
