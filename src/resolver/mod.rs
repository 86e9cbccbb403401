//! Target resolution: wait for a step's anchor to be present, visible and
//! sized, with a per-attempt timeout and fixed-delay retries.
//!
//! Each attempt checks immediately, then re-checks on every change
//! notification until its timer fires. Timed-out attempts are retried with
//! backon's constant backoff. The subscription and timer belong to the
//! attempt future, so they are released on success, failure and
//! cancellation alike.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::TourError;
use crate::race::ScopedTask;

pub mod registry;

pub use registry::{
    AnchorRegistry, DomChange, DomQuery, ElementHandle, Geometry, RecordingDom, BODY_ANCHOR,
};

/// Delay between a timed-out attempt and the next one
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// A single lookup request; not retained after it resolves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitRequest {
    pub anchor: String,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl WaitRequest {
    pub fn new(anchor: impl Into<String>, timeout: Duration) -> Self {
        Self {
            anchor: anchor.into(),
            timeout,
            max_retries: 0,
        }
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Outcome of a [`WaitRequest`]
#[derive(Debug, Clone, PartialEq)]
pub struct WaitResult {
    pub success: bool,
    pub element: Option<ElementHandle>,
    pub attempt_count: u32,
    pub elapsed: Duration,
    pub error: Option<TourError>,
}

/// Deferred [`WaitResult`]; dropping it cancels the wait
pub type PendingWait = ScopedTask<WaitResult>;

#[derive(Debug)]
enum AttemptError {
    TimedOut,
    Cancelled,
}

#[derive(Clone)]
pub struct TargetResolver {
    dom: Arc<dyn DomQuery>,
    retry_delay: Duration,
    scroll_into_view: bool,
}

impl TargetResolver {
    pub fn new(dom: Arc<dyn DomQuery>) -> Self {
        Self {
            dom,
            retry_delay: DEFAULT_RETRY_DELAY,
            scroll_into_view: true,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_scroll_into_view(mut self, enabled: bool) -> Self {
        self.scroll_into_view = enabled;
        self
    }

    /// The element for `anchor` if it is ready right now
    pub fn check(&self, anchor: &str) -> Option<ElementHandle> {
        let element = self.dom.query(anchor)?;
        let geometry = self.dom.geometry(&element)?;
        geometry.is_ready().then_some(element)
    }

    /// Start resolving in the background; the caller keeps running
    pub fn spawn(&self, request: WaitRequest) -> PendingWait {
        let resolver = self.clone();
        ScopedTask::spawn(move |token| async move { resolver.resolve(&request, &token).await })
    }

    /// Resolve `request`, giving up early if `token` is cancelled
    #[instrument(skip(self, token), fields(anchor = %request.anchor))]
    pub async fn resolve(&self, request: &WaitRequest, token: &CancellationToken) -> WaitResult {
        let started = Instant::now();
        let attempts = AtomicU32::new(0);

        let outcome = {
            let attempts = &attempts;
            let anchor = request.anchor.as_str();
            let timeout = request.timeout;
            let retries = (move || async move {
                attempts.fetch_add(1, Ordering::Relaxed);
                self.attempt(anchor, timeout, token).await
            })
            .retry(self.backoff(request.max_retries))
            .sleep(tokio::time::sleep)
            .when(|e| matches!(e, AttemptError::TimedOut))
            .notify(|_, delay| {
                debug!(anchor, ?delay, "anchor not ready, retrying");
            });

            tokio::select! {
                result = retries => result,
                () = token.cancelled() => Err(AttemptError::Cancelled),
            }
        };

        let attempt_count = attempts.load(Ordering::Relaxed);
        let elapsed = started.elapsed();

        match outcome {
            Ok(element) => {
                if self.scroll_into_view {
                    self.dom.scroll_into_view(&element);
                }
                debug!(attempt_count, ?elapsed, "anchor ready");
                WaitResult {
                    success: true,
                    element: Some(element),
                    attempt_count,
                    elapsed,
                    error: None,
                }
            }
            Err(AttemptError::Cancelled) => {
                debug!(attempt_count, "anchor wait cancelled");
                WaitResult {
                    success: false,
                    element: None,
                    attempt_count,
                    elapsed,
                    error: Some(TourError::Cancelled),
                }
            }
            Err(AttemptError::TimedOut) => {
                let error = TourError::TargetNotFound {
                    anchor: request.anchor.clone(),
                    attempts: attempt_count,
                    elapsed,
                };
                warn!(%error, "anchor lookup gave up");
                WaitResult {
                    success: false,
                    element: None,
                    attempt_count,
                    elapsed,
                    error: Some(error),
                }
            }
        }
    }

    fn backoff(&self, max_retries: u32) -> ConstantBuilder {
        ConstantBuilder::default()
            .with_delay(self.retry_delay)
            .with_max_times(max_retries as usize)
    }

    async fn attempt(
        &self,
        anchor: &str,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<ElementHandle, AttemptError> {
        // Subscribe before the first check so a change in between is not missed
        let mut changes = self.dom.subscribe();
        if let Some(element) = self.check(anchor) {
            return Ok(element);
        }

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut listening = true;

        loop {
            tokio::select! {
                () = &mut deadline => return Err(AttemptError::TimedOut),
                () = token.cancelled() => return Err(AttemptError::Cancelled),
                change = changes.recv(), if listening => match change {
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        if let Some(element) = self.check(anchor) {
                            return Ok(element);
                        }
                    }
                    // Source went away; only the timer can end this attempt now
                    Err(RecvError::Closed) => listening = false,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn setup() -> (Arc<AnchorRegistry>, TargetResolver) {
        let registry = Arc::new(AnchorRegistry::with_body());
        let resolver = TargetResolver::new(registry.clone());
        (registry, resolver)
    }

    #[tokio::test(start_paused = true)]
    async fn test_present_anchor_resolves_on_first_check() {
        let (registry, resolver) = setup();
        let request = WaitRequest::new(BODY_ANCHOR, Duration::from_millis(2000));

        let result = resolver.resolve(&request, &CancellationToken::new()).await;

        assert!(result.success);
        assert_eq!(result.attempt_count, 1);
        assert!(result.elapsed < Duration::from_millis(2000));
        assert_eq!(result.element.as_ref().map(|e| e.anchor()), Some("body"));
        assert_eq!(registry.last_scrolled(), result.element);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_anchor_fails_after_timeout() {
        let (_registry, resolver) = setup();
        let request = WaitRequest::new("legend", Duration::from_millis(2000));

        let result = resolver.resolve(&request, &CancellationToken::new()).await;

        assert!(!result.success);
        assert_eq!(result.attempt_count, 1);
        assert!(result.elapsed >= Duration::from_millis(2000));
        assert!(matches!(
            result.error,
            Some(TourError::TargetNotFound { ref anchor, attempts: 1, .. }) if anchor == "legend"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_extend_total_wait() {
        let (_registry, resolver) = setup();
        let request = WaitRequest::new("legend", Duration::from_millis(1000)).with_retries(2);

        let result = resolver.resolve(&request, &CancellationToken::new()).await;

        assert!(!result.success);
        assert_eq!(result.attempt_count, 3);
        // 3 attempts plus 2 inter-retry delays
        assert!(result.elapsed >= Duration::from_millis(3 * 1000 + 2 * 500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_anchor_registered_later_resolves_on_notification() {
        let (registry, resolver) = setup();
        let late = registry.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(300)).await;
            late.register("map-canvas", Geometry::sized(800.0, 600.0));
        });

        let request = WaitRequest::new("map-canvas", Duration::from_millis(2000));
        let result = resolver.resolve(&request, &CancellationToken::new()).await;

        assert!(result.success);
        assert_eq!(result.attempt_count, 1);
        assert!(result.elapsed >= Duration::from_millis(300));
        assert!(result.elapsed < Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_sized_anchor_waits_for_layout() {
        let (registry, resolver) = setup();
        registry.register("score-chart", Geometry::sized(400.0, 0.0));
        assert!(resolver.check("score-chart").is_none());

        let later = registry.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(200)).await;
            later.update_geometry("score-chart", Geometry::sized(400.0, 240.0));
        });

        let request = WaitRequest::new("score-chart", Duration::from_millis(1000));
        let result = resolver.resolve(&request, &CancellationToken::new()).await;

        assert!(result.success);
        assert!(result.elapsed >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_anchor_found_on_retry() {
        let (registry, resolver) = setup();
        let later = registry.clone();
        tokio::spawn(async move {
            // Lands in the gap between attempt 1 and attempt 2
            sleep(Duration::from_millis(1200)).await;
            later.register("landcover-tab", Geometry::sized(120.0, 32.0));
        });

        let request = WaitRequest::new("landcover-tab", Duration::from_millis(1000)).with_retries(1);
        let result = resolver.resolve(&request, &CancellationToken::new()).await;

        assert!(result.success);
        assert_eq!(result.attempt_count, 2);
        assert!(result.elapsed >= Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_releases_subscription() {
        let (registry, resolver) = setup();
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let request = WaitRequest::new("legend", Duration::from_millis(5000)).with_retries(3);
        let result = resolver.resolve(&request, &token).await;

        assert!(!result.success);
        assert_eq!(result.error, Some(TourError::Cancelled));
        assert!(result.elapsed < Duration::from_millis(5000));
        assert_eq!(registry.listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_wait_is_cancelled_on_drop() {
        let (registry, resolver) = setup();
        let pending = resolver.spawn(WaitRequest::new("legend", Duration::from_secs(30)));

        sleep(Duration::from_millis(10)).await;
        assert_eq!(registry.listener_count(), 1);

        drop(pending);
        sleep(Duration::from_millis(1)).await;
        assert_eq!(registry.listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_wait_delivers_result() {
        let (_registry, resolver) = setup();
        let mut pending = resolver
            .clone()
            .with_scroll_into_view(false)
            .spawn(WaitRequest::new(BODY_ANCHOR, Duration::from_secs(1)));

        let result = pending.join().await.unwrap();
        assert!(result.success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scroll_can_be_disabled() {
        let (registry, resolver) = setup();
        let resolver = resolver.with_scroll_into_view(false);
        let request = WaitRequest::new(BODY_ANCHOR, Duration::from_secs(1));

        assert!(resolver.resolve(&request, &CancellationToken::new()).await.success);
        assert!(registry.last_scrolled().is_none());
    }
}
