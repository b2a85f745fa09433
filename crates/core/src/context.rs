//! Cancellation and deadline propagation for blocking operations.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// A cancellable, optionally deadline-bearing scope.
///
/// Derived contexts share their parent's cancellation: cancelling a parent
/// cancels every child, never the other way round. A child's deadline is the
/// earlier of its own and its parent's.
#[derive(Debug, Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for Context {
    fn default() -> Self { Self::background() }
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self { Self { token: CancellationToken::new(), deadline: None } }

    /// Child context that can be cancelled independently through [`Context::cancel`].
    pub fn with_cancel(&self) -> Self { Self { token: self.token.child_token(), deadline: self.deadline } }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        Self { token: self.token.child_token(), deadline: Some(deadline) }
    }

    pub fn cancel(&self) { self.token.cancel(); }

    pub fn deadline(&self) -> Option<Instant> { self.deadline }

    /// Why the context is done, or `None` while it is still live.
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            return Some(ContextError::Canceled);
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool { self.err().is_some() }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) {
        match self.deadline {
            Some(d) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(d) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_propagates_to_children_only() {
        let parent = Context::background();
        let child = parent.with_cancel();
        child.cancel();
        assert_eq!(child.err(), Some(ContextError::Canceled));
        assert_eq!(parent.err(), None);

        let other = parent.with_cancel();
        parent.cancel();
        other.done().await;
        assert_eq!(other.err(), Some(ContextError::Canceled));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_reports_deadline_exceeded() {
        let ctx = Context::background().with_timeout(Duration::from_secs(5));
        assert_eq!(ctx.err(), None);
        ctx.done().await;
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
        assert_eq!(ctx.err().map(|e| e.to_string()).as_deref(), Some("context deadline exceeded"));
    }

    #[test]
    fn child_deadline_never_outlives_parent() {
        let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().expect("runtime");
        rt.block_on(async {
            let parent = Context::background().with_timeout(Duration::from_secs(1));
            let child = parent.with_timeout(Duration::from_secs(60));
            assert_eq!(child.deadline(), parent.deadline());
        });
    }
}
