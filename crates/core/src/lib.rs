pub mod clock;
pub mod config;
pub mod conversation;
pub mod error;
pub mod fetcher;
pub mod live;
pub mod logging;
pub mod record;
pub mod scope;
pub mod scrollback;
pub mod send;
pub mod timeline;

pub use clock::{Clock, SystemClock};
pub use config::{Config, FileLoggingConfig, HistoryConfig, IdentityConfig, LoggingConfig, StoreConfig};
pub use conversation::{Conversation, ConversationOptions};
pub use error::{DecodeError, Error, FetchError, Result, SessionError, ValidationError};
pub use fetcher::{
    DEFAULT_PAGE_SIZE, HistoryQuery, HistoryStore, PageFetcher, StorePageFetcher, StoredMessage, decode_page,
    decode_stored_json,
};
pub use live::{LiveEvent, LiveEventAdapter, LiveSession};
pub use record::{
    ContentKind, DeliveryState, MEDIA_PREFIX, MessageContent, MessageId, MessageRecord, Origin, Timestamp,
    format_timestamp, parse_timestamp,
};
pub use scope::ScopeFilter;
pub use scrollback::{ProximityOutcome, ScrollBackController, ScrollState};
pub use send::SendPipeline;
pub use timeline::{PrependOutcome, SharedTimeline, Timeline, TimelineSnapshot, day_boundaries};
