//! Weekly activity aggregation ("status board") for the BCSD Slack bot.
//!
//! Walks every channel the bot belongs to, pages through history and thread
//! replies inside a time window, and folds the result into per-user
//! [`ActivityStats`]. Collaborator failures shrink the report scope instead of
//! aborting it; only malformed requests and cancellation escape as errors.

mod status_board_engine;
mod status_error;
mod status_pagination;
mod status_reducer;
mod status_report;
mod status_source;
mod status_types;

pub use status_board_engine::{
    ScopeDiagnostics, StatusBoardConfig, StatusBoardEngine, StatusBoardReport, StatusBoardRequest,
};
pub use status_error::{PartialScopeFailure, ScopeKind, SourceError, StatusBoardError};
pub use status_pagination::PageSizes;
pub use status_reducer::{
    calendar_date, message_permalink, reduce, MetricReducer, ReducerSettings, ThreadKey,
    DEFAULT_PERMALINK_BASE,
};
pub use status_report::render_status_board;
pub use status_source::{
    ActivitySource, CallPolicy, ChannelKind, ChannelListRequest, ChannelSummary, HistoryRequest,
    Page, ReactionListRequest, RepliesRequest,
};
pub use status_types::{
    is_well_formed_token, token_epoch_seconds, ActivityStats, ChannelId, Message,
    MostReactedMessage, ReactedItem, ReactionEvent, ReactionTally, TimeWindow,
    TIMESTAMP_TOKEN_SEPARATOR,
};
