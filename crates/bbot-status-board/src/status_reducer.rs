//! Pure fold from messages, thread replies, and reaction events into [`ActivityStats`].

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::status_types::{
    is_well_formed_token, token_epoch_seconds, ActivityStats, ChannelId, Message, ReactionEvent,
    TimeWindow, TIMESTAMP_TOKEN_SEPARATOR,
};

pub const DEFAULT_PERMALINK_BASE: &str = "https://bcsdlab.slack.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReducerSettings {
    /// Zone used to turn message timestamps into calendar dates.
    pub time_zone: Tz,
    pub permalink_base: String,
}

impl Default for ReducerSettings {
    fn default() -> Self {
        Self {
            time_zone: chrono_tz::UTC,
            permalink_base: DEFAULT_PERMALINK_BASE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadKey {
    pub channel_id: ChannelId,
    pub thread_root_token: String,
}

impl ThreadKey {
    pub fn for_root(root: &Message) -> Self {
        Self {
            channel_id: root.channel_id.clone(),
            thread_root_token: root.timestamp_token.clone(),
        }
    }
}

/// `<base>/archives/{channel}/p{token without separators}`.
pub fn message_permalink(permalink_base: &str, channel_id: &ChannelId, timestamp_token: &str) -> String {
    if !is_well_formed_token(timestamp_token) {
        tracing::debug!(
            channel_id = %channel_id,
            timestamp_token,
            "unexpected timestamp token shape; permalink may not resolve"
        );
    }
    let compact = timestamp_token.replace(TIMESTAMP_TOKEN_SEPARATOR, "");
    format!(
        "{}/archives/{}/p{}",
        permalink_base.trim_end_matches('/'),
        channel_id,
        compact
    )
}

pub fn calendar_date(timestamp_token: &str, time_zone: Tz) -> Option<String> {
    let seconds = i64::try_from(token_epoch_seconds(timestamp_token)?).ok()?;
    let utc = DateTime::<Utc>::from_timestamp(seconds, 0)?;
    Some(utc.with_timezone(&time_zone).format("%Y-%m-%d").to_string())
}

/// Accumulator owned by one report run.
pub struct MetricReducer<'a> {
    user_id: &'a str,
    mention_token: String,
    window: TimeWindow,
    settings: &'a ReducerSettings,
    counted_threads: BTreeSet<ThreadKey>,
    /// Broadcast replies show up in both channel history and their thread.
    seen_messages: BTreeSet<(ChannelId, String)>,
    stats: ActivityStats,
}

impl<'a> MetricReducer<'a> {
    pub fn new(user_id: &'a str, window: TimeWindow, settings: &'a ReducerSettings) -> Self {
        Self {
            user_id,
            mention_token: format!("<@{user_id}>"),
            window,
            settings,
            counted_threads: BTreeSet::new(),
            seen_messages: BTreeSet::new(),
            stats: ActivityStats::default(),
        }
    }

    pub fn observe_message(&mut self, message: &Message) {
        if self.window.is_inverted() || !self.window.contains_token(&message.timestamp_token) {
            return;
        }
        // Every counted message must land on a calendar day.
        let Some(date) = calendar_date(&message.timestamp_token, self.settings.time_zone) else {
            tracing::debug!(
                channel_id = %message.channel_id,
                timestamp_token = %message.timestamp_token,
                "skipping message without a representable date"
            );
            return;
        };
        let key = (message.channel_id.clone(), message.timestamp_token.clone());
        if !self.seen_messages.insert(key) {
            return;
        }
        if message.mentions(&self.mention_token) {
            self.stats.mentions_received = self.stats.mentions_received.saturating_add(1);
        }
        if !message.is_authored_by(self.user_id) {
            return;
        }

        self.stats.message_count = self.stats.message_count.saturating_add(1);
        *self.stats.active_days.entry(date).or_insert(0) += 1;
        for tally in &message.reactions {
            self.stats.reactions_received = self.stats.reactions_received.saturating_add(tally.count);
            if tally.count > self.stats.most_reacted_message.count {
                self.stats.most_reacted_message.count = tally.count;
                self.stats.most_reacted_message.permalink = message_permalink(
                    &self.settings.permalink_base,
                    &message.channel_id,
                    &message.timestamp_token,
                );
            }
        }
    }

    /// Folds the replies of one thread. The root itself goes through [`Self::observe_message`].
    pub fn observe_thread(&mut self, root: &Message, replies: &[Message]) {
        let mut participated = false;
        for reply in replies {
            if reply.timestamp_token == root.timestamp_token {
                continue;
            }
            participated |= reply.is_authored_by(self.user_id)
                && self.window.contains_token(&reply.timestamp_token);
            self.observe_message(reply);
        }
        if participated && self.counted_threads.insert(ThreadKey::for_root(root)) {
            self.stats.threads_participated = self.stats.threads_participated.saturating_add(1);
        }
    }

    pub fn observe_reaction_event(&mut self, event: &ReactionEvent) {
        if self.window.is_inverted() || event.acting_user_id != self.user_id {
            return;
        }
        self.stats.reactions_added = self.stats.reactions_added.saturating_add(1);
        *self
            .stats
            .emoji_added
            .entry(event.emoji_name.clone())
            .or_insert(0) += 1;
    }

    pub fn finish(self) -> ActivityStats {
        self.stats
    }
}

/// Folds `messages` in order, expanding each thread root with its replies right after it.
pub fn reduce(
    user_id: &str,
    window: TimeWindow,
    messages: &[Message],
    thread_replies_by_root: &BTreeMap<ThreadKey, Vec<Message>>,
    reaction_events: &[ReactionEvent],
    settings: &ReducerSettings,
) -> ActivityStats {
    if window.is_inverted() {
        return ActivityStats::default();
    }
    let mut reducer = MetricReducer::new(user_id, window, settings);
    for message in messages {
        reducer.observe_message(message);
        if !message.is_thread_root() {
            continue;
        }
        if let Some(replies) = thread_replies_by_root.get(&ThreadKey::for_root(message)) {
            reducer.observe_thread(message, replies);
        }
    }
    for event in reaction_events {
        reducer.observe_reaction_event(event);
    }
    reducer.finish()
}
