//! Live event adapter.
//!
//! Converts finalized text from the real-time session into live records and
//! appends them straight into the timeline. No buffering or coalescing
//! happens here.

use crate::clock::{Clock, SystemClock};
use crate::error::SessionError;
use crate::logging::{ContentPolicy, redact_content};
use crate::record::MessageRecord;
use crate::timeline::SharedTimeline;

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Traffic delivered by the real-time session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveEvent {
    /// Finalized assistant reply
    AgentText(String),
    /// Finalized transcript of the user's speech
    UserText(String),
    /// Session connected or dropped
    Connection(bool),
}

/// Outbound half of the real-time conversational session
#[async_trait::async_trait]
pub trait LiveSession: Send + Sync {
    async fn send_text(&self, text: &str) -> Result<(), SessionError>;
}

#[async_trait::async_trait]
impl<T: LiveSession + ?Sized> LiveSession for Arc<T> {
    async fn send_text(&self, text: &str) -> Result<(), SessionError> {
        (**self).send_text(text).await
    }
}

/// Turns session events into live timeline records
pub struct LiveEventAdapter {
    timeline: SharedTimeline,
    clock: Arc<dyn Clock>,
    connected: watch::Sender<bool>,
    content: ContentPolicy,
}

impl LiveEventAdapter {
    pub fn new(timeline: SharedTimeline) -> Self {
        Self::with_clock(timeline, Arc::new(SystemClock))
    }

    pub fn with_clock(timeline: SharedTimeline, clock: Arc<dyn Clock>) -> Self {
        let (connected, _) = watch::channel(false);
        Self { timeline, clock, connected, content: ContentPolicy::default() }
    }

    pub fn with_content_policy(mut self, content: ContentPolicy) -> Self {
        self.content = content;
        self
    }

    /// Append an assistant reply stamped with the current time
    pub fn on_agent_text(&self, text: &str) -> MessageRecord {
        self.append(text, true)
    }

    /// Append a user transcript stamped with the current time
    pub fn on_user_text(&self, text: &str) -> MessageRecord {
        self.append(text, false)
    }

    fn append(&self, text: &str, is_agent: bool) -> MessageRecord {
        let record = self.timeline.append(MessageRecord::live(text, is_agent, self.clock.now()));
        self.log_appended(&record, text);
        record
    }

    fn log_appended(&self, record: &MessageRecord, text: &str) {
        tracing::debug!(
            id = %record.id,
            is_agent = record.is_agent,
            text = %redact_content(text, &self.content),
            "Live record appended"
        );
    }

    /// Like [`handle`](Self::handle), but drops text that arrives after `context` is cancelled
    fn handle_within(&self, event: LiveEvent, context: &CancellationToken) -> Option<MessageRecord> {
        let (text, is_agent) = match event {
            LiveEvent::AgentText(text) => (text, true),
            LiveEvent::UserText(text) => (text, false),
            LiveEvent::Connection(connected) => {
                self.set_connected(connected);
                return None;
            }
        };
        let record = self
            .timeline
            .append_within(MessageRecord::live(&text, is_agent, self.clock.now()), context)?;
        self.log_appended(&record, &text);
        Some(record)
    }

    /// Route one session event; returns the record it produced, if any
    pub fn handle(&self, event: LiveEvent) -> Option<MessageRecord> {
        match event {
            LiveEvent::AgentText(text) => Some(self.on_agent_text(&text)),
            LiveEvent::UserText(text) => Some(self.on_user_text(&text)),
            LiveEvent::Connection(connected) => {
                self.set_connected(connected);
                None
            }
        }
    }

    pub fn set_connected(&self, connected: bool) {
        let previous = self.connected.send_replace(connected);
        if previous != connected {
            tracing::info!(connected, "Live session connection changed");
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Observe connection transitions
    pub fn connection(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// Drain session events until the channel closes or `cancel` fires.
    ///
    /// Returns the number of records appended.
    pub async fn pump(&self, mut events: mpsc::UnboundedReceiver<LiveEvent>, cancel: CancellationToken) -> usize {
        let mut appended = 0;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("Live pump cancelled");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => {
                        if self.handle_within(event, &cancel).is_some() {
                            appended += 1;
                        }
                    }
                    None => {
                        tracing::debug!("Live session channel closed");
                        break;
                    }
                },
            }
        }
        appended
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Timestamp;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Mutex;

    struct SteppingClock {
        next: Mutex<Timestamp>,
    }

    impl SteppingClock {
        fn starting_at(start: Timestamp) -> Arc<Self> {
            Arc::new(Self { next: Mutex::new(start) })
        }
    }

    impl Clock for SteppingClock {
        fn now(&self) -> Timestamp {
            let mut next = self.next.lock().unwrap();
            let now = *next;
            *next = now + Duration::seconds(1);
            now
        }
    }

    fn start() -> Timestamp {
        Utc.with_ymd_and_hms(2025, 11, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_on_agent_text_appends_live_agent_record() {
        let timeline = SharedTimeline::new();
        let adapter = LiveEventAdapter::with_clock(timeline.clone(), SteppingClock::starting_at(start()));

        let record = adapter.on_agent_text("hello there");
        assert!(record.is_agent);
        assert!(record.is_live());
        assert_eq!(record.timestamp, start());
        assert_eq!(timeline.current_timeline().as_slice(), &[record]);
    }

    #[test]
    fn test_on_user_text_appends_user_record() {
        let timeline = SharedTimeline::new();
        let adapter = LiveEventAdapter::with_clock(timeline.clone(), SteppingClock::starting_at(start()));

        let record = adapter.on_user_text("how are you");
        assert!(!record.is_agent);
        assert_eq!(timeline.len(), 1);
    }

    struct FrozenClock(Timestamp);

    impl Clock for FrozenClock {
        fn now(&self) -> Timestamp {
            self.0
        }
    }

    #[test]
    fn test_same_text_same_instant_gets_distinct_ids() {
        let timeline = SharedTimeline::new();
        let adapter = LiveEventAdapter::with_clock(timeline.clone(), Arc::new(FrozenClock(start())));

        let user = adapter.on_user_text("ok");
        let agent = adapter.on_agent_text("ok");

        assert_ne!(user.id, agent.id);
        let snapshot = timeline.current_timeline();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, user.id);
        assert_eq!(snapshot[1].id, agent.id);
        assert!(snapshot[1].is_agent);
    }

    #[test]
    fn test_live_media_payload_is_classified() {
        let timeline = SharedTimeline::new();
        let adapter = LiveEventAdapter::new(timeline);
        let record = adapter.on_agent_text("MEDIA:https://example.com/selfie.jpg");
        assert_eq!(record.content.media_url(), Some("https://example.com/selfie.jpg"));
    }

    #[test]
    fn test_handle_connection_event() {
        let adapter = LiveEventAdapter::new(SharedTimeline::new());
        let mut rx = adapter.connection();
        assert!(!adapter.is_connected());

        assert_eq!(adapter.handle(LiveEvent::Connection(true)), None);
        assert!(adapter.is_connected());
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update());
    }

    #[tokio::test]
    async fn test_pump_appends_in_arrival_order() {
        let timeline = SharedTimeline::new();
        let adapter = LiveEventAdapter::with_clock(timeline.clone(), SteppingClock::starting_at(start()));
        let (tx, rx) = mpsc::unbounded_channel();

        tx.send(LiveEvent::Connection(true)).unwrap();
        tx.send(LiveEvent::UserText("hi".to_string())).unwrap();
        tx.send(LiveEvent::AgentText("hey!".to_string())).unwrap();
        drop(tx);

        let appended = adapter.pump(rx, CancellationToken::new()).await;
        assert_eq!(appended, 2);

        let snapshot = timeline.current_timeline();
        assert_eq!(snapshot[0].content.text(), Some("hi"));
        assert_eq!(snapshot[1].content.text(), Some("hey!"));
        assert!(adapter.is_connected());
    }

    #[tokio::test]
    async fn test_pump_stops_on_cancel() {
        let adapter = LiveEventAdapter::new(SharedTimeline::new());
        let (_tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(adapter.pump(rx, cancel).await, 0);
    }
}
