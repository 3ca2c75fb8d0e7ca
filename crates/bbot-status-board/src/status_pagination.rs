//! Lazy cursor pagination over the activity source: channel enumeration,
//! channel history, thread replies, and the user's reaction listing.
//!
//! Every stream yields one `Result` per page and ends after the first error.

use std::future::Future;

use futures_util::stream::{self, Stream, StreamExt};
use tokio::sync::watch;

use crate::status_error::SourceError;
use crate::status_source::{
    CallFailure, ChannelKind, ChannelListRequest, HistoryRequest, Page, ReactionListRequest,
    RepliesRequest, SourceCaller,
};
use crate::status_types::{ChannelId, Message, ReactedItem, TimeWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSizes {
    pub channels: usize,
    pub history: usize,
    pub replies: usize,
    pub reactions: usize,
}

impl Default for PageSizes {
    fn default() -> Self {
        Self {
            channels: 1_000,
            history: 200,
            replies: 200,
            reactions: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PaginationLimits {
    pub(crate) page_sizes: PageSizes,
    pub(crate) max_pages: usize,
}

struct CursorState<F> {
    fetch: F,
    cancel: watch::Receiver<bool>,
    cursor: Option<String>,
    pages: usize,
    done: bool,
}

fn paginate<'a, T, F, Fut>(
    caller: &'a SourceCaller,
    operation: &'static str,
    max_pages: usize,
    cancel: watch::Receiver<bool>,
    fetch: F,
) -> impl Stream<Item = Result<Vec<T>, CallFailure>> + 'a
where
    T: 'a,
    F: Fn(Option<String>) -> Fut + 'a,
    Fut: Future<Output = Result<Page<T>, SourceError>> + 'a,
{
    let state = CursorState {
        fetch,
        cancel,
        cursor: None,
        pages: 0,
        done: false,
    };
    stream::unfold(state, move |mut state| async move {
        if state.done {
            return None;
        }
        let cursor = state.cursor.clone();
        let fetched = caller
            .call(operation, &mut state.cancel, || (state.fetch)(cursor.clone()))
            .await;
        state.pages = state.pages.saturating_add(1);
        let page = match fetched {
            Ok(page) => page,
            Err(failure) => {
                state.done = true;
                return Some((Err(failure), state));
            }
        };

        state.cursor = page
            .next_cursor
            .map(|cursor| cursor.trim().to_string())
            .filter(|cursor| !cursor.is_empty());
        if state.cursor.is_none() {
            state.done = true;
        } else if state.pages >= max_pages.max(1) {
            tracing::warn!(
                operation,
                pages = state.pages,
                "status board reached page limit; listing may be incomplete"
            );
            state.done = true;
        }
        Some((Ok(page.items), state))
    })
}

/// Channels the bot belongs to. Non-member channels are fetched and dropped.
pub(crate) fn list_scoped_channels<'a>(
    caller: &'a SourceCaller,
    limits: PaginationLimits,
    cancel: watch::Receiver<bool>,
) -> impl Stream<Item = Result<Vec<ChannelId>, CallFailure>> + 'a {
    let pages = paginate(
        caller,
        "conversations.list",
        limits.max_pages,
        cancel,
        move |cursor| {
            caller.source().list_channels(ChannelListRequest {
                page_size: limits.page_sizes.channels,
                cursor,
                channel_kinds: vec![ChannelKind::PublicChannel, ChannelKind::PrivateChannel],
                exclude_archived: true,
            })
        },
    );
    pages.map(|page| {
        page.map(|channels| {
            channels
                .into_iter()
                .filter(|channel| channel.is_member)
                .map(|channel| channel.id)
                .collect::<Vec<_>>()
        })
    })
}

pub(crate) fn list_history<'a>(
    caller: &'a SourceCaller,
    limits: PaginationLimits,
    channel_id: &'a ChannelId,
    window: TimeWindow,
    cancel: watch::Receiver<bool>,
) -> impl Stream<Item = Result<Vec<Message>, CallFailure>> + 'a {
    paginate(
        caller,
        "conversations.history",
        limits.max_pages,
        cancel,
        move |cursor| {
            caller.source().channel_history(HistoryRequest {
                channel_id: channel_id.clone(),
                oldest_epoch_seconds: window.start_epoch_seconds,
                latest_epoch_seconds: window.end_epoch_seconds,
                inclusive: true,
                page_size: limits.page_sizes.history,
                cursor,
            })
        },
    )
}

/// Replies of one thread, never including the root itself.
pub(crate) fn list_replies<'a>(
    caller: &'a SourceCaller,
    limits: PaginationLimits,
    channel_id: &'a ChannelId,
    thread_root_token: &'a str,
    window: TimeWindow,
    cancel: watch::Receiver<bool>,
) -> impl Stream<Item = Result<Vec<Message>, CallFailure>> + 'a {
    let pages = paginate(
        caller,
        "conversations.replies",
        limits.max_pages,
        cancel,
        move |cursor| {
            caller.source().thread_replies(RepliesRequest {
                channel_id: channel_id.clone(),
                thread_root_token: thread_root_token.to_string(),
                oldest_epoch_seconds: window.start_epoch_seconds,
                page_size: limits.page_sizes.replies,
                cursor,
            })
        },
    );
    pages.map(move |page| {
        page.map(|messages| {
            messages
                .into_iter()
                .filter(|message| message.timestamp_token != thread_root_token)
                .collect::<Vec<_>>()
        })
    })
}

pub(crate) fn list_reacted_items<'a>(
    caller: &'a SourceCaller,
    limits: PaginationLimits,
    user_id: &'a str,
    window: TimeWindow,
    cancel: watch::Receiver<bool>,
) -> impl Stream<Item = Result<Vec<ReactedItem>, CallFailure>> + 'a {
    paginate(
        caller,
        "reactions.list",
        limits.max_pages,
        cancel,
        move |cursor| {
            caller.source().reactions_by_user(ReactionListRequest {
                user_id: user_id.to_string(),
                oldest_epoch_seconds: window.start_epoch_seconds,
                page_size: limits.page_sizes.reactions,
                cursor,
            })
        },
    )
}
