//! Cancellation helpers shared by the resolver and the controller.
//!
//! `first_of` races two futures under a shared cancellation token so the
//! loser is always dropped and anything it spawned can observe the cancel.
//! `ScopedTask` ties a spawned task to its owner: dropping the owner cancels
//! the task's token and aborts it.

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Outcome of [`first_of`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Race<A, B> {
    First(A),
    Second(B),
    /// The parent token was cancelled before either side finished
    Cancelled,
}

/// Run two futures and return whichever finishes first.
///
/// Each side is built from a child of `token`. When this function returns,
/// by either side winning or by cancellation, that child token is cancelled
/// and the losing future is dropped. Ties go to `first`.
pub async fn first_of<FA, FB, A, B>(
    token: &CancellationToken,
    first: FA,
    second: FB,
) -> Race<A::Output, B::Output>
where
    FA: FnOnce(CancellationToken) -> A,
    FB: FnOnce(CancellationToken) -> B,
    A: Future,
    B: Future,
{
    let scope = token.child_token();
    let _release = scope.clone().drop_guard();

    let first = first(scope.clone());
    let second = second(scope.clone());

    tokio::select! {
        biased;
        () = scope.cancelled() => Race::Cancelled,
        a = first => Race::First(a),
        b = second => Race::Second(b),
    }
}

/// A spawned task that is cancelled when its owner drops it
pub struct ScopedTask<T> {
    token: CancellationToken,
    handle: JoinHandle<T>,
}

impl<T: Send + 'static> ScopedTask<T> {
    pub fn spawn<F, Fut>(task: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let token = CancellationToken::new();
        let handle = tokio::spawn(task(token.clone()));
        Self { token, handle }
    }
}

impl<T> ScopedTask<T> {
    /// Wait for the task's output. Cancel-safe: dropping the returned future
    /// leaves the task running and joinable.
    ///
    /// Returns `None` if the task was aborted or panicked. Must not be called
    /// again after it has returned.
    pub async fn join(&mut self) -> Option<T> {
        match (&mut self.handle).await {
            Ok(value) => Some(value),
            Err(e) => {
                if !e.is_cancelled() {
                    warn!(error = %e, "scoped task failed");
                }
                None
            }
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<T> Drop for ScopedTask<T> {
    fn drop(&mut self) {
        self.token.cancel();
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::sleep;

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_of_faster_side_wins() {
        let token = CancellationToken::new();
        let result = first_of(
            &token,
            |_| async {
                sleep(Duration::from_millis(280)).await;
                "notified"
            },
            |_| async {
                sleep(Duration::from_millis(400)).await;
                "fallback"
            },
        )
        .await;
        assert_eq!(result, Race::First("notified"));

        let result = first_of(
            &token,
            |_| async {
                sleep(Duration::from_millis(500)).await;
            },
            |_| async {
                sleep(Duration::from_millis(400)).await;
            },
        )
        .await;
        assert_eq!(result, Race::Second(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_of_drops_loser_and_cancels_scope() {
        let token = CancellationToken::new();
        let dropped = Arc::new(AtomicBool::new(false));
        let scope_seen = Arc::new(AtomicBool::new(false));

        let guard = SetOnDrop(dropped.clone());
        let seen = scope_seen.clone();
        let result = first_of(
            &token,
            |_| async { 1 },
            move |scope| {
                // The loser hands its scope to a detached task
                tokio::spawn(async move {
                    scope.cancelled().await;
                    seen.store(true, Ordering::SeqCst);
                });
                async move {
                    let _guard = guard;
                    std::future::pending::<u32>().await
                }
            },
        )
        .await;

        assert_eq!(result, Race::First(1));
        assert!(dropped.load(Ordering::SeqCst));
        tokio::task::yield_now().await;
        assert!(scope_seen.load(Ordering::SeqCst));
        assert!(!token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_of_external_cancel() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let result = first_of(
            &token,
            |_| sleep(Duration::from_secs(10)),
            |_| sleep(Duration::from_secs(20)),
        )
        .await;
        assert_eq!(result, Race::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scoped_task_join() {
        let mut task = ScopedTask::spawn(|_| async {
            sleep(Duration::from_millis(10)).await;
            42
        });
        assert_eq!(task.join().await, Some(42));
        assert!(task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scoped_task_drop_cancels() {
        let start = tokio::time::Instant::now();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let task = ScopedTask::spawn(move |token| async move {
            let _notify = tx;
            tokio::select! {
                () = token.cancelled() => {}
                () = sleep(Duration::from_secs(60)) => {}
            }
        });
        drop(task);

        // The sender goes away once the task is cancelled or aborted
        let _ = rx.await;
        assert!(start.elapsed() < Duration::from_secs(60));
    }
}
