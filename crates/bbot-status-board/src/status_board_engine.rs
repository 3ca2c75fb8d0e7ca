//! Cross-channel activity aggregation: enumerate scoped channels, walk their
//! history and threads with bounded concurrency, and fold the result.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::{pin_mut, stream, StreamExt};
use tokio::sync::watch;

use crate::status_error::{PartialScopeFailure, ScopeKind, SourceError, StatusBoardError};
use crate::status_pagination::{
    list_history, list_reacted_items, list_replies, list_scoped_channels, PageSizes,
    PaginationLimits,
};
use crate::status_reducer::{reduce, ReducerSettings, ThreadKey};
use crate::status_report::render_status_board;
use crate::status_source::{ActivitySource, CallFailure, CallPolicy, SourceCaller};
use crate::status_types::{ActivityStats, ChannelId, Message, ReactionEvent, TimeWindow};

#[derive(Debug, Clone, PartialEq, Eq)]
/// Tuning knobs for one status board engine.
pub struct StatusBoardConfig {
    pub page_sizes: PageSizes,
    pub max_pages_per_scope: usize,
    pub call_policy: CallPolicy,
    pub max_concurrent_channels: usize,
    pub reducer: ReducerSettings,
}

impl Default for StatusBoardConfig {
    fn default() -> Self {
        Self {
            page_sizes: PageSizes::default(),
            max_pages_per_scope: 50,
            call_policy: CallPolicy::default(),
            max_concurrent_channels: 4,
            reducer: ReducerSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusBoardRequest {
    pub user_id: String,
    pub window: TimeWindow,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeDiagnostics {
    pub channels_scanned: usize,
    pub threads_expanded: usize,
    pub failures: Vec<PartialScopeFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusBoardReport {
    pub user_id: String,
    pub window: TimeWindow,
    pub stats: ActivityStats,
    pub diagnostics: ScopeDiagnostics,
}

impl StatusBoardReport {
    pub fn render(&self) -> String {
        render_status_board(&self.user_id, &self.stats)
    }
}

#[derive(Debug)]
struct ChannelActivity {
    channel_id: ChannelId,
    history_read: bool,
    messages: Vec<Message>,
    threads: Vec<(ThreadKey, Vec<Message>)>,
    failures: Vec<PartialScopeFailure>,
}

impl ChannelActivity {
    fn new(channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            history_read: false,
            messages: Vec::new(),
            threads: Vec::new(),
            failures: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct StatusBoardEngine {
    caller: SourceCaller,
    config: StatusBoardConfig,
}

impl StatusBoardEngine {
    pub fn new(source: Arc<dyn ActivitySource>, config: StatusBoardConfig) -> Self {
        Self {
            caller: SourceCaller::new(source, config.call_policy),
            config,
        }
    }

    pub fn config(&self) -> &StatusBoardConfig {
        &self.config
    }

    /// Computes a fresh report. Unreadable channels, threads, or reaction
    /// listings shrink the report scope instead of failing the run.
    pub async fn run(
        &self,
        request: &StatusBoardRequest,
        cancel: watch::Receiver<bool>,
    ) -> Result<StatusBoardReport, StatusBoardError> {
        let user_id = validate_user_id(&request.user_id)?;
        let window = request.window;
        let mut diagnostics = ScopeDiagnostics::default();

        if window.is_inverted() {
            tracing::debug!(
                user_id,
                start = window.start_epoch_seconds,
                end = ?window.end_epoch_seconds,
                "inverted status board window; returning empty report"
            );
            return Ok(StatusBoardReport {
                user_id: user_id.to_string(),
                window,
                stats: ActivityStats::default(),
                diagnostics,
            });
        }

        let channels = self
            .enumerate_channels(cancel.clone(), &mut diagnostics)
            .await?;

        let collected = stream::iter(channels.iter().cloned())
            .map(|channel_id| {
                let cancel = cancel.clone();
                async move { self.collect_channel(&channel_id, window, cancel).await }
            })
            .buffer_unordered(self.config.max_concurrent_channels.max(1))
            .collect::<Vec<_>>()
            .await;
        let mut activities = Vec::with_capacity(collected.len());
        for outcome in collected {
            activities.push(outcome?);
        }
        activities.sort_by(|left, right| left.channel_id.cmp(&right.channel_id));

        let reaction_events = self
            .collect_reaction_events(user_id, window, cancel, &mut diagnostics)
            .await?;

        let mut messages = Vec::new();
        let mut threads = BTreeMap::new();
        for activity in activities {
            if activity.history_read {
                diagnostics.channels_scanned = diagnostics.channels_scanned.saturating_add(1);
            }
            diagnostics.threads_expanded = diagnostics
                .threads_expanded
                .saturating_add(activity.threads.len());
            diagnostics.failures.extend(activity.failures);
            messages.extend(activity.messages);
            threads.extend(activity.threads);
        }

        let stats = reduce(
            user_id,
            window,
            &messages,
            &threads,
            &reaction_events,
            &self.config.reducer,
        );

        if !diagnostics.failures.is_empty() {
            tracing::warn!(
                user_id,
                failed_scopes = diagnostics.failures.len(),
                "status board completed with a reduced scope"
            );
        }
        tracing::info!(
            user_id,
            channels = diagnostics.channels_scanned,
            threads = diagnostics.threads_expanded,
            messages = stats.message_count,
            "status board run completed"
        );

        Ok(StatusBoardReport {
            user_id: user_id.to_string(),
            window,
            stats,
            diagnostics,
        })
    }

    fn limits(&self) -> PaginationLimits {
        PaginationLimits {
            page_sizes: self.config.page_sizes,
            max_pages: self.config.max_pages_per_scope,
        }
    }

    async fn enumerate_channels(
        &self,
        cancel: watch::Receiver<bool>,
        diagnostics: &mut ScopeDiagnostics,
    ) -> Result<Vec<ChannelId>, StatusBoardError> {
        let pages = list_scoped_channels(&self.caller, self.limits(), cancel);
        pin_mut!(pages);
        let mut channels = Vec::new();
        while let Some(page) = pages.next().await {
            match page {
                Ok(batch) => channels.extend(batch),
                Err(CallFailure::Cancelled) => return Err(StatusBoardError::Cancelled),
                Err(CallFailure::Source(error)) => {
                    tracing::warn!(
                        %error,
                        collected = channels.len(),
                        "channel listing failed; continuing with partial channel set"
                    );
                    record_failure(diagnostics, ScopeKind::ChannelListing, error);
                    break;
                }
            }
        }
        channels.sort();
        channels.dedup();
        Ok(channels)
    }

    async fn collect_channel(
        &self,
        channel_id: &ChannelId,
        window: TimeWindow,
        cancel: watch::Receiver<bool>,
    ) -> Result<ChannelActivity, StatusBoardError> {
        let mut activity = ChannelActivity::new(channel_id.clone());
        let pages = list_history(&self.caller, self.limits(), channel_id, window, cancel.clone());
        pin_mut!(pages);
        let mut messages = Vec::new();
        while let Some(page) = pages.next().await {
            match page {
                Ok(batch) => messages.extend(batch),
                Err(CallFailure::Cancelled) => return Err(StatusBoardError::Cancelled),
                Err(CallFailure::Source(error)) => {
                    tracing::warn!(
                        channel_id = %channel_id,
                        %error,
                        "channel history unavailable; excluding channel from report"
                    );
                    activity.failures.push(PartialScopeFailure {
                        scope: ScopeKind::ChannelHistory {
                            channel_id: channel_id.clone(),
                        },
                        error,
                    });
                    return Ok(activity);
                }
            }
        }

        for root in messages
            .iter()
            .filter(|message| message.is_thread_root() && window.contains_token(&message.timestamp_token))
        {
            let replies = self
                .collect_replies(channel_id, root, window, cancel.clone(), &mut activity.failures)
                .await?;
            activity.threads.push((ThreadKey::for_root(root), replies));
        }
        activity.messages = messages;
        activity.history_read = true;
        Ok(activity)
    }

    async fn collect_replies(
        &self,
        channel_id: &ChannelId,
        root: &Message,
        window: TimeWindow,
        cancel: watch::Receiver<bool>,
        failures: &mut Vec<PartialScopeFailure>,
    ) -> Result<Vec<Message>, StatusBoardError> {
        let pages = list_replies(
            &self.caller,
            self.limits(),
            channel_id,
            &root.timestamp_token,
            window,
            cancel,
        );
        pin_mut!(pages);
        let mut replies = Vec::new();
        while let Some(page) = pages.next().await {
            match page {
                Ok(batch) => replies.extend(batch),
                Err(CallFailure::Cancelled) => return Err(StatusBoardError::Cancelled),
                Err(CallFailure::Source(error)) => {
                    tracing::warn!(
                        channel_id = %channel_id,
                        thread_root = %root.timestamp_token,
                        %error,
                        "thread replies unavailable; counting zero replies"
                    );
                    failures.push(PartialScopeFailure {
                        scope: ScopeKind::ThreadReplies {
                            channel_id: channel_id.clone(),
                            thread_root_token: root.timestamp_token.clone(),
                        },
                        error,
                    });
                    return Ok(Vec::new());
                }
            }
        }
        Ok(replies)
    }

    async fn collect_reaction_events(
        &self,
        user_id: &str,
        window: TimeWindow,
        cancel: watch::Receiver<bool>,
        diagnostics: &mut ScopeDiagnostics,
    ) -> Result<Vec<ReactionEvent>, StatusBoardError> {
        let pages = list_reacted_items(&self.caller, self.limits(), user_id, window, cancel);
        pin_mut!(pages);
        let mut events = Vec::new();
        while let Some(page) = pages.next().await {
            match page {
                Ok(items) => events.extend(
                    items
                        .iter()
                        .flat_map(|item| ReactionEvent::from_reacted_item(user_id, item)),
                ),
                Err(CallFailure::Cancelled) => return Err(StatusBoardError::Cancelled),
                Err(CallFailure::Source(error)) => {
                    tracing::warn!(
                        user_id,
                        %error,
                        "reaction history unavailable; reporting zero added reactions"
                    );
                    record_failure(diagnostics, ScopeKind::ReactionEvents, error);
                    return Ok(Vec::new());
                }
            }
        }
        Ok(events)
    }
}

fn record_failure(diagnostics: &mut ScopeDiagnostics, scope: ScopeKind, error: SourceError) {
    diagnostics.failures.push(PartialScopeFailure { scope, error });
}

fn validate_user_id(raw: &str) -> Result<&str, StatusBoardError> {
    let user_id = raw.trim();
    if user_id.is_empty() {
        return Err(StatusBoardError::FatalConfiguration(
            "requesting user id is empty".to_string(),
        ));
    }
    if !user_id.chars().all(|ch| ch.is_ascii_alphanumeric()) {
        return Err(StatusBoardError::FatalConfiguration(format!(
            "requesting user id `{user_id}` is malformed"
        )));
    }
    Ok(user_id)
}

#[cfg(test)]
mod tests;
