//! Timeline merge engine.
//!
//! Keeps one ordered, de-duplicated sequence per conversation context:
//! historical pages are merged in at the head, live records are appended at
//! the tail in arrival order. The layout is always
//! `[historical..., live...]`, so the cursor is simply the first record's
//! timestamp whenever any history is loaded.

use crate::record::{DeliveryState, MessageId, MessageRecord, Timestamp};

use chrono::{Local, NaiveDate, TimeZone};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// Immutable view of the timeline handed to the presentation layer
pub type TimelineSnapshot = Arc<Vec<MessageRecord>>;

/// What a prepend did to the timeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrependOutcome {
    /// Records added to the timeline
    pub inserted: usize,
    /// Records dropped because their id was already present
    pub duplicates: usize,
}

/// Ordered, de-duplicated message sequence for one conversation
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    records: TimelineSnapshot,
    ids: HashSet<MessageId>,
    history_len: usize,
    cursor: Option<Timestamp>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear records and cursor when switching conversation context
    pub fn reset(&mut self) {
        self.records = Arc::new(Vec::new());
        self.ids.clear();
        self.history_len = 0;
        self.cursor = None;
    }

    /// Merge a historical batch (oldest first) in at the head.
    ///
    /// Records whose id is already present are dropped, including ids that
    /// arrived live; the live copy keeps its place at the tail.
    pub fn prepend(&mut self, batch: Vec<MessageRecord>) -> PrependOutcome {
        if batch.is_empty() {
            return PrependOutcome::default();
        }

        let total = batch.len();
        let mut fresh: Vec<MessageRecord> = Vec::with_capacity(total);
        for record in batch {
            if self.ids.contains(&record.id) || fresh.iter().any(|r| r.id == record.id) {
                continue;
            }
            fresh.push(record);
        }
        let outcome = PrependOutcome { inserted: fresh.len(), duplicates: total - fresh.len() };

        if fresh.is_empty() {
            tracing::debug!(duplicates = outcome.duplicates, "Prepend dropped every record");
            return outcome;
        }

        fresh.sort_by(|a, b| history_key(a).cmp(&history_key(b)));
        for record in &fresh {
            self.ids.insert(record.id.clone());
        }

        let (history, live) = self.records.split_at(self.history_len);
        let mut merged = Vec::with_capacity(self.records.len() + fresh.len());
        let mut existing = history.iter().peekable();
        for record in fresh {
            while let Some(current) = existing.next_if(|current| history_key(current) < history_key(&record)) {
                merged.push(current.clone());
            }
            merged.push(record);
        }
        merged.extend(existing.cloned());
        merged.extend(live.iter().cloned());

        self.history_len += outcome.inserted;
        self.records = Arc::new(merged);
        self.cursor = self.records.first().map(|record| record.timestamp);

        tracing::debug!(
            inserted = outcome.inserted,
            duplicates = outcome.duplicates,
            total = self.records.len(),
            "Prepended historical batch"
        );
        outcome
    }

    /// Append a live record at the tail and return it as stored.
    ///
    /// Arrival order wins over timestamps: the record is never moved, even
    /// when its clock is behind the current tail. The first arrival keeps its
    /// derived id so a later page can still match it; a repeat of an id
    /// already present gets an arrival suffix (`<id>-1`, `<id>-2`, ...).
    pub fn append(&mut self, mut record: MessageRecord) -> MessageRecord {
        debug_assert!(record.is_live(), "only live records are appended");
        if self.ids.contains(&record.id) {
            let id = self.next_free_id(&record.id);
            tracing::debug!(derived = %record.id, assigned = %id, "Live record id already taken");
            record = record.with_id(id);
        }
        self.ids.insert(record.id.clone());
        Arc::make_mut(&mut self.records).push(record.clone());
        record
    }

    fn next_free_id(&self, derived: &MessageId) -> MessageId {
        (1u64..)
            .map(|arrival| MessageId::new(format!("{derived}-{arrival}")))
            .find(|candidate| !self.ids.contains(candidate))
            .unwrap_or_else(|| derived.clone())
    }

    /// Update the delivery state of a live record; false when it is not present
    pub fn mark_delivery(&mut self, id: &MessageId, state: DeliveryState) -> bool {
        let history_len = self.history_len;
        match Arc::make_mut(&mut self.records)[history_len..]
            .iter_mut()
            .rev()
            .find(|record| &record.id == id)
        {
            Some(record) => {
                record.delivery = Some(state);
                true
            }
            None => false,
        }
    }

    /// Snapshot of the full ordered sequence
    pub fn current_timeline(&self) -> TimelineSnapshot {
        Arc::clone(&self.records)
    }

    /// Date-header flags in the viewer's local time zone
    pub fn day_boundaries(&self) -> Vec<bool> {
        day_boundaries(&self.records, &Local)
    }

    /// Date-header flags in an explicit time zone
    pub fn day_boundaries_in<Tz: TimeZone>(&self, tz: &Tz) -> Vec<bool> {
        day_boundaries(&self.records, tz)
    }

    /// Timestamp of the oldest loaded historical record
    pub fn cursor(&self) -> Option<Timestamp> {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    pub fn history_len(&self) -> usize {
        self.history_len
    }

    pub fn live_len(&self) -> usize {
        self.records.len() - self.history_len
    }
}

fn history_key(record: &MessageRecord) -> (Timestamp, u64) {
    (record.timestamp, record.content_hash)
}

/// For each index, whether a date header belongs above it.
///
/// True at index 0 and wherever the calendar day in `tz` differs from the
/// previous record's.
pub fn day_boundaries<Tz: TimeZone>(records: &[MessageRecord], tz: &Tz) -> Vec<bool> {
    let mut previous: Option<NaiveDate> = None;
    records
        .iter()
        .map(|record| {
            let day = record.timestamp.with_timezone(tz).date_naive();
            let boundary = previous != Some(day);
            previous = Some(day);
            boundary
        })
        .collect()
}

/// Timeline shared between the fetch, live and send paths of one context.
///
/// Every mutation takes the lock, so prepends and appends are serialized;
/// readers only hold it long enough to clone the snapshot.
#[derive(Debug, Clone, Default)]
pub struct SharedTimeline {
    inner: Arc<Mutex<Timeline>>,
}

impl SharedTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Timeline> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn reset(&self) {
        self.lock().reset();
    }

    pub fn prepend(&self, batch: Vec<MessageRecord>) -> PrependOutcome {
        self.lock().prepend(batch)
    }

    pub fn append(&self, record: MessageRecord) -> MessageRecord {
        self.lock().append(record)
    }

    /// Append unless `context` has been cancelled.
    ///
    /// The token is checked under the timeline lock, so a record can never
    /// land after a reset that cancelled its context.
    pub fn append_within(&self, record: MessageRecord, context: &CancellationToken) -> Option<MessageRecord> {
        let mut timeline = self.lock();
        if context.is_cancelled() {
            tracing::debug!(id = %record.id, "Dropping live record from a cancelled context");
            return None;
        }
        Some(timeline.append(record))
    }

    pub fn mark_delivery(&self, id: &MessageId, state: DeliveryState) -> bool {
        self.lock().mark_delivery(id, state)
    }

    pub fn current_timeline(&self) -> TimelineSnapshot {
        self.lock().current_timeline()
    }

    pub fn day_boundaries(&self) -> Vec<bool> {
        day_boundaries(&self.current_timeline(), &Local)
    }

    pub fn day_boundaries_in<Tz: TimeZone>(&self, tz: &Tz) -> Vec<bool> {
        day_boundaries(&self.current_timeline(), tz)
    }

    pub fn cursor(&self) -> Option<Timestamp> {
        self.lock().cursor()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
