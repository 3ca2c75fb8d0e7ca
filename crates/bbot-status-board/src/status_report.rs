//! Human-readable rendering of a status board run.

use crate::status_types::ActivityStats;

/// Renders the weekly summary posted back into the requesting thread.
pub fn render_status_board(user_id: &str, stats: &ActivityStats) -> String {
    let most_added_emoji = stats
        .most_added_emoji()
        .map(|emoji| format!(":{emoji}:"))
        .unwrap_or_else(|| "-".to_string());
    let most_active_day = match stats.most_active_day() {
        "" => "-",
        day => day,
    };
    let most_reacted = if stats.most_reacted_message.permalink.is_empty() {
        "-".to_string()
    } else {
        format!(
            "<{}|open> ({} reactions)",
            stats.most_reacted_message.permalink, stats.most_reacted_message.count
        )
    };

    [
        format!("*Weekly activity for <@{user_id}>*"),
        format!("Messages: {}", stats.message_count),
        format!("Most active day: {most_active_day}"),
        format!("Reactions received: {}", stats.reactions_received),
        format!("Reactions added: {}", stats.reactions_added),
        format!("Most added emoji: {most_added_emoji}"),
        format!("Threads joined: {}", stats.threads_participated),
        format!("Mentions received: {}", stats.mentions_received),
        format!("Most reacted message: {most_reacted}"),
    ]
    .join("\n")
}
