//! Scroll-back controller.
//!
//! Turns "top of the list is visible" signals into page fetches, one at a
//! time, and stops for good once the backend reports the start of history.
//!
//! ```text
//!   Idle --proximity--> Fetching --non-empty page--> Idle
//!                          |  \--error------------> Idle
//!                          \--empty page----------> Exhausted
//! ```

use crate::error::FetchError;
use crate::fetcher::{DEFAULT_PAGE_SIZE, PageFetcher};
use crate::record::Timestamp;
use crate::timeline::{PrependOutcome, SharedTimeline};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollState {
    Idle,
    Fetching,
    Exhausted,
}

/// Result of a proximity signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProximityOutcome {
    /// Dropped because a fetch is in flight or history is exhausted
    Ignored(ScrollState),
    /// A page was merged into the timeline
    Loaded(PrependOutcome),
    /// The backend returned an empty page; no further fetches
    Exhausted,
    /// The context was reset while the fetch was in flight
    Discarded,
}

#[derive(Debug)]
struct Inner {
    state: ScrollState,
    epoch: u64,
    cancel: CancellationToken,
    /// Oldest timestamp of any page received, kept even when every record was a duplicate
    floor: Option<Timestamp>,
}

/// Drives backward pagination for one conversation context
pub struct ScrollBackController<F> {
    fetcher: Arc<F>,
    timeline: SharedTimeline,
    page_size: usize,
    inner: Mutex<Inner>,
}

impl<F: PageFetcher> ScrollBackController<F> {
    pub fn new(fetcher: Arc<F>, timeline: SharedTimeline) -> Self {
        Self {
            fetcher,
            timeline,
            page_size: DEFAULT_PAGE_SIZE,
            inner: Mutex::new(Inner {
                state: ScrollState::Idle,
                epoch: 0,
                cancel: CancellationToken::new(),
                floor: None,
            }),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ScrollState {
        self.lock().state
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// The viewport reports the oldest loaded record is near.
    ///
    /// Starts a fetch when idle; a signal while fetching or exhausted is
    /// dropped. Errors return the controller to idle without retrying, as does
    /// dropping the returned future before it completes.
    pub async fn notify_scroll_proximity(&self) -> Result<ProximityOutcome, FetchError> {
        let (epoch, cancel, before) = {
            let mut inner = self.lock();
            if inner.state != ScrollState::Idle {
                tracing::trace!(state = ?inner.state, "Proximity signal ignored");
                return Ok(ProximityOutcome::Ignored(inner.state));
            }
            inner.state = ScrollState::Fetching;
            let before = earliest(self.timeline.cursor(), inner.floor);
            tracing::debug!(?before, "Scroll-back fetch started");
            (inner.epoch, inner.cancel.clone(), before)
        };

        let guard = FetchingGuard { inner: &self.inner, epoch, armed: true };
        let result = self.fetcher.fetch_page(before, self.page_size, &cancel).await;
        guard.disarm();

        let mut inner = self.lock();
        if inner.epoch != epoch || cancel.is_cancelled() {
            tracing::debug!("Discarding page fetched for a torn-down context");
            return Ok(ProximityOutcome::Discarded);
        }

        match result {
            Ok(batch) if batch.is_empty() => {
                inner.state = ScrollState::Exhausted;
                tracing::debug!("History exhausted");
                Ok(ProximityOutcome::Exhausted)
            }
            Ok(batch) => {
                inner.floor = earliest(inner.floor, batch.first().map(|record| record.timestamp));
                let outcome = self.timeline.prepend(batch);
                inner.state = ScrollState::Idle;
                Ok(ProximityOutcome::Loaded(outcome))
            }
            Err(err) => {
                inner.state = ScrollState::Idle;
                tracing::warn!(error = %err, retryable = err.is_retryable(), "Scroll-back fetch failed");
                Err(err)
            }
        }
    }

    /// Cancel any in-flight fetch and return to idle for a fresh context
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.cancel.cancel();
        inner.cancel = CancellationToken::new();
        inner.epoch += 1;
        inner.state = ScrollState::Idle;
        inner.floor = None;
    }
}

/// Returns the controller to idle when a fetch future is dropped before completing
struct FetchingGuard<'a> {
    inner: &'a Mutex<Inner>,
    epoch: u64,
    armed: bool,
}

impl FetchingGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for FetchingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.epoch == self.epoch && inner.state == ScrollState::Fetching {
            inner.state = ScrollState::Idle;
            tracing::debug!("Scroll-back fetch abandoned before completion");
        }
    }
}

fn earliest(a: Option<Timestamp>, b: Option<Timestamp>) -> Option<Timestamp> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}
