//! Outgoing messages.
//!
//! The local echo lands in the timeline before the session is asked to
//! deliver, so the user sees their text immediately. A failed delivery marks
//! the echo as failed but never removes it.

use crate::clock::{Clock, SystemClock};
use crate::error::ValidationError;
use crate::live::LiveSession;
use crate::logging::{ContentPolicy, redact_content};
use crate::record::{DeliveryState, MessageRecord};
use crate::timeline::SharedTimeline;

use std::sync::Arc;

/// Echoes outgoing text into the timeline and hands it to the live session
pub struct SendPipeline<S> {
    session: S,
    timeline: SharedTimeline,
    clock: Arc<dyn Clock>,
    content: ContentPolicy,
}

impl<S: LiveSession> SendPipeline<S> {
    pub fn new(session: S, timeline: SharedTimeline) -> Self {
        Self::with_clock(session, timeline, Arc::new(SystemClock))
    }

    pub fn with_clock(session: S, timeline: SharedTimeline, clock: Arc<dyn Clock>) -> Self {
        Self { session, timeline, clock, content: ContentPolicy::default() }
    }

    pub fn with_content_policy(mut self, content: ContentPolicy) -> Self {
        self.content = content;
        self
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    /// Send user text.
    ///
    /// Whitespace-only input is rejected without touching the timeline.
    /// Returns the echoed record with its final delivery state.
    pub async fn send_outgoing(&self, text: &str) -> Result<MessageRecord, ValidationError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyMessage);
        }

        let pending = MessageRecord::live(text, false, self.clock.now()).with_delivery(DeliveryState::Pending);
        let mut echo = self.timeline.append(pending);
        tracing::debug!(id = %echo.id, text = %redact_content(text, &self.content), "Outgoing message echoed");

        let state = match self.session.send_text(text).await {
            Ok(()) => DeliveryState::Sent,
            Err(err) => {
                tracing::warn!(id = %echo.id, error = %err, "Outgoing message was not delivered");
                DeliveryState::Failed
            }
        };

        if !self.timeline.mark_delivery(&echo.id, state) {
            tracing::debug!(id = %echo.id, "Echo left the timeline before delivery completed");
        }
        echo.delivery = Some(state);
        Ok(echo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeSession {
        sent: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl LiveSession for FakeSession {
        async fn send_text(&self, text: &str) -> Result<(), SessionError> {
            if self.fail {
                return Err(SessionError::Disconnected);
            }
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_send_echoes_and_marks_sent() {
        let timeline = SharedTimeline::new();
        let pipeline = SendPipeline::new(FakeSession::default(), timeline.clone());

        let echo = pipeline.send_outgoing("  good morning ").await.unwrap();
        assert_eq!(echo.content.text(), Some("good morning"));
        assert!(!echo.is_agent);
        assert!(echo.is_live());
        assert_eq!(echo.delivery, Some(DeliveryState::Sent));

        let snapshot = timeline.current_timeline();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].delivery, Some(DeliveryState::Sent));
        assert_eq!(*pipeline.session().sent.lock().unwrap(), vec!["good morning".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let timeline = SharedTimeline::new();
        let pipeline = SendPipeline::new(FakeSession::default(), timeline.clone());

        assert_eq!(pipeline.send_outgoing("   \n\t").await.unwrap_err(), ValidationError::EmptyMessage);
        tokio_test::assert_err!(pipeline.send_outgoing("").await);
        assert!(timeline.is_empty());
        assert!(pipeline.session().sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_delivery_keeps_echo() {
        let timeline = SharedTimeline::new();
        let session = FakeSession { fail: true, ..Default::default() };
        let pipeline = SendPipeline::new(session, timeline.clone());

        let echo = pipeline.send_outgoing("are you there?").await.unwrap();
        assert_eq!(echo.delivery, Some(DeliveryState::Failed));

        let snapshot = timeline.current_timeline();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].content.text(), Some("are you there?"));
        assert_eq!(snapshot[0].delivery, Some(DeliveryState::Failed));
    }

    #[tokio::test]
    async fn test_echo_follows_existing_live_records() {
        let timeline = SharedTimeline::new();
        timeline.append(MessageRecord::live("earlier reply", true, chrono::Utc::now()));
        let pipeline = SendPipeline::new(FakeSession::default(), timeline.clone());

        pipeline.send_outgoing("thanks").await.unwrap();
        let snapshot = timeline.current_timeline();
        assert_eq!(snapshot.last().and_then(|r| r.content.text()), Some("thanks"));
    }

    struct FrozenClock;

    impl Clock for FrozenClock {
        fn now(&self) -> crate::record::Timestamp {
            chrono::DateTime::from_timestamp(1_761_987_600, 0).unwrap()
        }
    }

    #[tokio::test]
    async fn test_repeated_message_marks_its_own_echo() {
        let timeline = SharedTimeline::new();
        let session = FakeSession { fail: true, ..Default::default() };
        let pipeline = SendPipeline::with_clock(session, timeline.clone(), Arc::new(FrozenClock));

        let first = pipeline.send_outgoing("ok").await.unwrap();
        let second = pipeline.send_outgoing("ok").await.unwrap();

        assert_ne!(first.id, second.id);
        let snapshot = timeline.current_timeline();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[1].id, second.id);
        assert!(snapshot.iter().all(|r| r.delivery == Some(DeliveryState::Failed)));
    }
}
