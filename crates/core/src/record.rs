//! Canonical timeline entry shared by historical pages and live events.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Point in time used for ordering and cursors
pub type Timestamp = DateTime<Utc>;

/// Wire prefix marking a text payload as a media reference
pub const MEDIA_PREFIX: &str = "MEDIA:";

/// Stable identity of a timeline entry.
///
/// The backend has no primary key for messages, so identity is derived from
/// the timestamp and a hash of the raw payload. Two fetches of the same row
/// always derive the same id, which is what de-duplication keys on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the composite `<micros>-<hash>` identity
    pub fn derive(timestamp: &Timestamp, content_hash: u64) -> Self {
        Self(format!("{}-{:016x}", timestamp.timestamp_micros(), content_hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hash of the raw wire payload: the first eight bytes of its SHA-256, big-endian.
///
/// Fixed across builds and platforms, so derived ids stay valid if persisted.
pub fn content_hash(raw: &str) -> u64 {
    let digest = Sha256::digest(raw.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

/// Semantic kind of a record's content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Text,
    Media,
}

/// Payload of a record, classified once at parse time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageContent {
    Text { text: String },
    Media { url: String, thumbnail_url: Option<String> },
}

impl MessageContent {
    /// Classify a wire payload.
    ///
    /// `MEDIA:<url>` becomes a media reference with no thumbnail. A bare
    /// `MEDIA:` with nothing after it carries no reference and stays text.
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix(MEDIA_PREFIX) {
            Some(url) if !url.is_empty() => Self::Media { url: url.to_string(), thumbnail_url: None },
            _ => Self::Text { text: raw.to_string() },
        }
    }

    pub fn kind(&self) -> ContentKind {
        match self {
            Self::Text { .. } => ContentKind::Text,
            Self::Media { .. } => ContentKind::Media,
        }
    }

    /// Text body, if this is a text message
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::Media { .. } => None,
        }
    }

    /// Media URL, if this is a media message
    pub fn media_url(&self) -> Option<&str> {
        match self {
            Self::Media { url, .. } => Some(url),
            Self::Text { .. } => None,
        }
    }

    /// Re-encode into the wire format
    pub fn to_wire(&self) -> String {
        match self {
            Self::Text { text } => text.clone(),
            Self::Media { url, .. } => format!("{MEDIA_PREFIX}{url}"),
        }
    }
}

/// Provenance of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Fetched from the paginated store
    Historical,
    /// Delivered by the real-time session or echoed locally
    Live,
}

/// Delivery progress of a locally echoed outgoing message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Sent,
    Failed,
}

/// One timeline entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub content: MessageContent,
    /// True when produced by the assistant, false for the local user
    pub is_agent: bool,
    pub timestamp: Timestamp,
    pub origin: Origin,
    /// Hash of the raw payload; breaks ordering ties between historical records
    pub content_hash: u64,
    /// Only set on optimistic echoes of outgoing messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<DeliveryState>,
}

impl MessageRecord {
    /// Build a record from a wire payload
    pub fn from_wire(raw: &str, is_agent: bool, timestamp: Timestamp, origin: Origin) -> Self {
        let content_hash = content_hash(raw);
        Self {
            id: MessageId::derive(&timestamp, content_hash),
            content: MessageContent::parse(raw),
            is_agent,
            timestamp,
            origin,
            content_hash,
            delivery: None,
        }
    }

    pub fn historical(raw: &str, is_agent: bool, timestamp: Timestamp) -> Self {
        Self::from_wire(raw, is_agent, timestamp, Origin::Historical)
    }

    pub fn live(raw: &str, is_agent: bool, timestamp: Timestamp) -> Self {
        Self::from_wire(raw, is_agent, timestamp, Origin::Live)
    }

    /// Override the derived identity
    pub fn with_id(mut self, id: MessageId) -> Self {
        self.id = id;
        self
    }

    pub fn with_delivery(mut self, delivery: DeliveryState) -> Self {
        self.delivery = Some(delivery);
        self
    }

    pub fn kind(&self) -> ContentKind {
        self.content.kind()
    }

    pub fn is_historical(&self) -> bool {
        self.origin == Origin::Historical
    }

    pub fn is_live(&self) -> bool {
        self.origin == Origin::Live
    }
}

/// Parse an ISO 8601 timestamp as sent by the backend.
///
/// Accepts RFC 3339 with any offset, and offset-less values which are read as UTC.
pub fn parse_timestamp(value: &str) -> Option<Timestamp> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

/// Format a timestamp the way the store persists it (fixed-width UTC, microseconds)
pub fn format_timestamp(timestamp: &Timestamp) -> String {
    timestamp.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}
