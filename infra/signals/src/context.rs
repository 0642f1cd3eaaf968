use crate::error::SignalError;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Cancellation and deadline scope threaded through every emission.
///
/// A context is polled, never preemptive: dispatchers check it before an
/// emission starts and before each listener, but a listener that is already
/// running is never interrupted. Listeners receive the context and may poll it
/// themselves.
///
/// Cloning is cheap and clones share cancellation state.
///
/// # Example
///
/// ```rust
/// use pulse_signals::Context;
/// use std::time::Duration;
///
/// let root = Context::cancellable();
/// let request = root.with_timeout(Duration::from_secs(5));
/// assert!(request.check().is_ok());
///
/// root.cancel();
/// assert!(request.check().unwrap_err().is_canceled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    ///
    /// Does not allocate. Calling [`Context::cancel`] on it has no effect.
    #[must_use]
    pub const fn background() -> Self {
        Self { token: None, deadline: None }
    }

    /// Creates a new root context that can be cancelled with [`Context::cancel`].
    #[must_use]
    pub fn cancellable() -> Self {
        Self { token: Some(CancellationToken::new()), deadline: None }
    }

    /// Derives a context that is cancelled whenever `self` is, and can also be
    /// cancelled on its own without affecting `self`.
    ///
    /// The parent's deadline is inherited.
    #[must_use]
    pub fn child(&self) -> Self {
        let token =
            self.token.as_ref().map_or_else(CancellationToken::new, CancellationToken::child_token);
        Self { token: Some(token), deadline: self.deadline }
    }

    /// Derives a child context that expires at `deadline`, or at the parent's
    /// deadline if that comes first.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let mut child = self.child();
        child.deadline = Some(self.deadline.map_or(deadline, |parent| parent.min(deadline)));
        child
    }

    /// Derives a child context that expires after `timeout`.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Instant::now()
            .checked_add(timeout)
            .map_or_else(|| self.child(), |deadline| self.with_deadline(deadline))
    }

    /// Cancels this context and every context derived from it.
    pub fn cancel(&self) {
        if let Some(token) = &self.token {
            token.cancel();
        }
    }

    /// Reports the terminal state of the context.
    ///
    /// Cancellation takes precedence over an expired deadline.
    ///
    /// # Errors
    /// Returns [`SignalError::Canceled`] once cancelled, or
    /// [`SignalError::DeadlineExceeded`] once the deadline has passed.
    #[inline]
    pub fn check(&self) -> Result<(), SignalError> {
        if self.token.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(SignalError::Canceled { context: None });
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(SignalError::DeadlineExceeded { context: None });
        }
        Ok(())
    }

    /// Returns `true` once the context is cancelled or past its deadline.
    #[inline]
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.check().is_err()
    }

    /// The instant at which this context expires, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Waits until the context is cancelled or its deadline passes.
    ///
    /// Never resolves for [`Context::background`]. Deadlines are tracked with
    /// Tokio's timer, so this must be awaited inside a Tokio runtime.
    pub async fn done(&self) {
        let deadline = self.deadline.map(tokio::time::Instant::from_std);
        match (&self.token, deadline) {
            (Some(token), Some(deadline)) => {
                tokio::select! {
                    () = token.cancelled() => {},
                    () = tokio::time::sleep_until(deadline) => {},
                }
            },
            (Some(token), None) => token.cancelled().await,
            (None, Some(deadline)) => tokio::time::sleep_until(deadline).await,
            (None, None) => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_is_never_done() {
        let ctx = Context::background();
        ctx.cancel();
        assert!(ctx.check().is_ok());
        assert!(ctx.deadline().is_none());
    }

    #[test]
    fn test_cancel_propagates_to_children_only() {
        let parent = Context::cancellable();
        let child = parent.child();
        let sibling = parent.child();

        child.cancel();
        assert!(child.is_done());
        assert!(!parent.is_done());
        assert!(!sibling.is_done());

        parent.cancel();
        assert!(sibling.check().unwrap_err().is_canceled());
    }

    #[test]
    fn test_deadline_expires() {
        let ctx = Context::background().with_timeout(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        assert!(ctx.check().unwrap_err().is_deadline_exceeded());
    }

    #[test]
    fn test_child_keeps_earlier_parent_deadline() {
        let parent = Context::background().with_timeout(Duration::from_millis(10));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[test]
    fn test_cancellation_wins_over_deadline() {
        let ctx = Context::cancellable().with_timeout(Duration::ZERO);
        ctx.cancel();
        assert!(ctx.check().unwrap_err().is_canceled());
    }

    #[tokio::test]
    async fn test_done_resolves_on_cancel() {
        let ctx = Context::cancellable();
        let waiter = ctx.clone();
        let handle = tokio::spawn(async move { waiter.done().await });

        ctx.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("done() should resolve after cancel")
            .expect("waiter task should not panic");
    }

    #[tokio::test]
    async fn test_done_resolves_on_deadline() {
        let ctx = Context::background().with_timeout(Duration::from_millis(10));
        tokio::time::timeout(Duration::from_secs(1), ctx.done())
            .await
            .expect("done() should resolve at the deadline");
    }
}
