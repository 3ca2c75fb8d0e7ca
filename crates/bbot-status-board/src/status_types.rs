//! Value types shared by the status board pagination, reduction, and rendering layers.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Separator between the seconds and sequence halves of a Slack `ts` token.
pub const TIMESTAMP_TOKEN_SEPARATOR: char = '.';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// Reporting window; the lower bound is inclusive and a missing upper bound means "now".
pub struct TimeWindow {
    pub start_epoch_seconds: u64,
    pub end_epoch_seconds: Option<u64>,
}

impl TimeWindow {
    pub fn new(start_epoch_seconds: u64, end_epoch_seconds: Option<u64>) -> Self {
        Self {
            start_epoch_seconds,
            end_epoch_seconds,
        }
    }

    /// Window covering the `days` days before `now_epoch_seconds`, open-ended.
    pub fn trailing_days(now_epoch_seconds: u64, days: u64) -> Self {
        let span = days.saturating_mul(24 * 60 * 60);
        Self::new(now_epoch_seconds.saturating_sub(span), None)
    }

    pub fn is_inverted(&self) -> bool {
        matches!(self.end_epoch_seconds, Some(end) if self.start_epoch_seconds > end)
    }

    pub fn contains_epoch_seconds(&self, epoch_seconds: u64) -> bool {
        if epoch_seconds < self.start_epoch_seconds {
            return false;
        }
        match self.end_epoch_seconds {
            Some(end) => epoch_seconds <= end,
            None => true,
        }
    }

    /// Tokens that cannot be parsed are treated as outside the window.
    pub fn contains_token(&self, timestamp_token: &str) -> bool {
        token_epoch_seconds(timestamp_token)
            .map(|seconds| self.contains_epoch_seconds(seconds))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
/// Opaque channel handle. Ordering defines the fold order of concurrent channel results.
pub struct ChannelId(String);

impl ChannelId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionTally {
    pub emoji_name: String,
    pub count: u64,
    /// May be truncated or missing depending on the collaborator.
    #[serde(default)]
    pub reacting_user_ids: Option<Vec<String>>,
}

impl ReactionTally {
    fn lists_user(&self, user_id: &str) -> bool {
        self.reacting_user_ids
            .as_ref()
            .map(|users| users.iter().any(|user| user == user_id))
            .unwrap_or(false)
    }

    fn user_list_is_partial(&self) -> bool {
        match &self.reacting_user_ids {
            Some(users) => (users.len() as u64) < self.count,
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub author_id: Option<String>,
    pub timestamp_token: String,
    pub channel_id: ChannelId,
    #[serde(default)]
    pub thread_root_token: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub reactions: Vec<ReactionTally>,
}

impl Message {
    /// A message starts a thread when its thread marker references itself.
    pub fn is_thread_root(&self) -> bool {
        self.thread_root_token.as_deref() == Some(self.timestamp_token.as_str())
    }

    pub fn is_thread_reply(&self) -> bool {
        matches!(&self.thread_root_token, Some(root) if root != &self.timestamp_token)
    }

    pub fn is_authored_by(&self, user_id: &str) -> bool {
        self.author_id.as_deref() == Some(user_id)
    }

    pub fn mentions(&self, mention_token: &str) -> bool {
        self.text
            .as_deref()
            .map(|text| text.contains(mention_token))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Item returned by the reactions-by-user listing.
pub struct ReactedItem {
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionEvent {
    pub acting_user_id: String,
    pub target_message: Message,
    pub emoji_name: String,
}

impl ReactionEvent {
    /// Expands one reacted item into the reactions `user_id` added to it.
    ///
    /// Tallies listing the user are authoritative. When no tally lists the user,
    /// tallies whose user list is missing or truncated are attributed instead.
    pub fn from_reacted_item(user_id: &str, item: &ReactedItem) -> Vec<ReactionEvent> {
        let reactions = &item.message.reactions;
        let mut attributed = reactions
            .iter()
            .filter(|tally| tally.lists_user(user_id))
            .collect::<Vec<_>>();
        if attributed.is_empty() {
            attributed = reactions
                .iter()
                .filter(|tally| tally.user_list_is_partial())
                .collect();
        }
        attributed
            .into_iter()
            .map(|tally| ReactionEvent {
                acting_user_id: user_id.to_string(),
                target_message: item.message.clone(),
                emoji_name: tally.emoji_name.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MostReactedMessage {
    pub count: u64,
    pub permalink: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Aggregated activity for one user over one window.
pub struct ActivityStats {
    pub message_count: u64,
    pub active_days: BTreeMap<String, u64>,
    pub reactions_received: u64,
    pub reactions_added: u64,
    pub most_reacted_message: MostReactedMessage,
    pub emoji_added: BTreeMap<String, u64>,
    pub threads_participated: u64,
    pub mentions_received: u64,
}

impl ActivityStats {
    /// Busiest calendar date; the earliest date wins ties. Empty when there is no activity.
    pub fn most_active_day(&self) -> &str {
        first_max_key(&self.active_days).unwrap_or("")
    }

    /// Emoji the user added most often; the first in iteration order wins ties.
    pub fn most_added_emoji(&self) -> Option<&str> {
        first_max_key(&self.emoji_added)
    }
}

fn first_max_key(histogram: &BTreeMap<String, u64>) -> Option<&str> {
    let mut best: Option<(&str, u64)> = None;
    for (key, count) in histogram {
        match best {
            Some((_, best_count)) if *count <= best_count => {}
            _ => best = Some((key.as_str(), *count)),
        }
    }
    best.map(|(key, _)| key)
}

/// Seconds half of a `"<seconds>.<sequence>"` token.
pub fn token_epoch_seconds(timestamp_token: &str) -> Option<u64> {
    let seconds = timestamp_token
        .split(TIMESTAMP_TOKEN_SEPARATOR)
        .next()
        .unwrap_or_default()
        .trim();
    if seconds.is_empty() {
        return None;
    }
    seconds.parse::<u64>().ok()
}

/// True for tokens shaped like `digits` or `digits.digits`.
pub fn is_well_formed_token(timestamp_token: &str) -> bool {
    let mut parts = timestamp_token.split(TIMESTAMP_TOKEN_SEPARATOR);
    let all_digits = |part: &str| !part.is_empty() && part.chars().all(|ch| ch.is_ascii_digit());
    match (parts.next(), parts.next(), parts.next()) {
        (Some(seconds), None, None) => all_digits(seconds),
        (Some(seconds), Some(sequence), None) => all_digits(seconds) && all_digits(sequence),
        _ => false,
    }
}
