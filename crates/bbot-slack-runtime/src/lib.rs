//! Slack-facing side of the BCSD bot: Web API client, command routing, one-shot
//! games and reactions, group mentions, and the Socket Mode loop.

mod attempt_counter;
mod games;
mod member_filter;
mod slack_api_client;
mod slack_commands;
mod slack_helpers;
mod slack_runtime;

pub use attempt_counter::{
    AttemptCounter, AttemptCounterError, FileAttemptCounter, InMemoryAttemptCounter,
};
pub use games::{
    draw_lottery_winner, pick_rock_paper_scissors, pick_thanks_emojis,
    render_jackpot_announcement, render_lottery_result, render_roulette_reply, roll_dice,
    vote_option_reactions, RouletteOutcome, RouletteSpin, CELEBRATION_TEXT,
    LOTTERY_ENTRY_REACTION, ROCK_PAPER_SCISSORS, ROULETTE_DAILY_ATTEMPTS, ROULETTE_DIGITS,
    ROULETTE_JACKPOT, THANKS_EMOJIS, THANKS_EMOJI_PICKS, VOTE_OPTION_REACTIONS,
};
pub use member_filter::{
    build_member_filter, render_group_mention, select_mentions, JsonFileMemberDirectory, Member,
    MemberDirectory, MemberQuery, Selector, StaticMemberDirectory,
};
pub use slack_api_client::{
    SlackApiClient, SlackApiError, SlackPostedMessage, DEFAULT_SLACK_API_BASE,
};
pub use slack_commands::{bot_command_usage, BotCommand, CommandParser};
pub use slack_runtime::{
    roulette_posts, run_slack_bot, CommandDispatcher, InboundMessage, OutboundAction,
    OutboundPost, OutboundReaction, SlackBotRuntimeConfig, DEFAULT_STATUS_BOARD_DAYS,
};
