//! One conversation context: the timeline plus everything that feeds it.

use crate::clock::{Clock, SystemClock};
use crate::error::{FetchError, ValidationError};
use crate::fetcher::{DEFAULT_PAGE_SIZE, PageFetcher};
use crate::live::{LiveEvent, LiveEventAdapter, LiveSession};
use crate::logging::ContentPolicy;
use crate::record::{MessageRecord, Timestamp};
use crate::scrollback::{ProximityOutcome, ScrollBackController, ScrollState};
use crate::send::SendPipeline;
use crate::timeline::{SharedTimeline, TimelineSnapshot};

use chrono::TimeZone;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Knobs shared by the components of a context
#[derive(Clone)]
pub struct ConversationOptions {
    pub page_size: usize,
    pub clock: Arc<dyn Clock>,
    pub content: ContentPolicy,
}

impl Default for ConversationOptions {
    fn default() -> Self {
        Self { page_size: DEFAULT_PAGE_SIZE, clock: Arc::new(SystemClock), content: ContentPolicy::default() }
    }
}

impl std::fmt::Debug for ConversationOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationOptions")
            .field("page_size", &self.page_size)
            .field("content", &self.content)
            .finish_non_exhaustive()
    }
}

/// Wires the page fetcher, live session and send pipeline to one timeline
pub struct Conversation<F, S> {
    timeline: SharedTimeline,
    scrollback: ScrollBackController<F>,
    live: LiveEventAdapter,
    send: SendPipeline<S>,
    context: Mutex<CancellationToken>,
}

impl<F: PageFetcher, S: LiveSession> Conversation<F, S> {
    pub fn new(fetcher: Arc<F>, session: S) -> Self {
        Self::with_options(fetcher, session, ConversationOptions::default())
    }

    pub fn with_options(fetcher: Arc<F>, session: S, options: ConversationOptions) -> Self {
        let timeline = SharedTimeline::new();
        let scrollback = ScrollBackController::new(fetcher, timeline.clone()).with_page_size(options.page_size);
        let live = LiveEventAdapter::with_clock(timeline.clone(), options.clock.clone())
            .with_content_policy(options.content);
        let send = SendPipeline::with_clock(session, timeline.clone(), options.clock)
            .with_content_policy(options.content);

        Self { timeline, scrollback, live, send, context: Mutex::new(CancellationToken::new()) }
    }

    pub fn timeline(&self) -> &SharedTimeline {
        &self.timeline
    }

    pub fn live(&self) -> &LiveEventAdapter {
        &self.live
    }

    pub fn session(&self) -> &S {
        self.send.session()
    }

    pub fn current_timeline(&self) -> TimelineSnapshot {
        self.timeline.current_timeline()
    }

    /// Day-header flags in the local time zone
    pub fn day_boundaries(&self) -> Vec<bool> {
        self.timeline.day_boundaries()
    }

    pub fn day_boundaries_in<Tz: TimeZone>(&self, tz: &Tz) -> Vec<bool> {
        self.timeline.day_boundaries_in(tz)
    }

    pub fn cursor(&self) -> Option<Timestamp> {
        self.timeline.cursor()
    }

    pub fn scroll_state(&self) -> ScrollState {
        self.scrollback.state()
    }

    pub async fn notify_scroll_proximity(&self) -> Result<ProximityOutcome, FetchError> {
        self.scrollback.notify_scroll_proximity().await
    }

    pub async fn send_outgoing(&self, text: &str) -> Result<MessageRecord, ValidationError> {
        self.send.send_outgoing(text).await
    }

    /// Token cancelled when this context is torn down
    pub fn context_token(&self) -> CancellationToken {
        self.context.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Feed session events into the timeline until the channel closes or the context resets
    pub async fn pump_live(&self, events: mpsc::UnboundedReceiver<LiveEvent>) -> usize {
        self.live.pump(events, self.context_token()).await
    }

    /// Tear the context down: cancel outstanding work and clear the timeline.
    ///
    /// The context token is cancelled before anything is cleared, so a live
    /// pump from the old context cannot append into the fresh timeline.
    pub fn reset(&self) {
        let mut context = self.context.lock().unwrap_or_else(PoisonError::into_inner);
        context.cancel();
        self.scrollback.reset();
        self.timeline.reset();
        *context = CancellationToken::new();
        tracing::info!("Conversation context reset");
    }

    /// Reset, then load the newest page again
    pub async fn reload(&self) -> Result<ProximityOutcome, FetchError> {
        self.reset();
        self.notify_scroll_proximity().await
    }
}
