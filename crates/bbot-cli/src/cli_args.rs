use std::path::PathBuf;

use bbot_slack_runtime::{DEFAULT_SLACK_API_BASE, DEFAULT_STATUS_BOARD_DAYS};
use bbot_status_board::DEFAULT_PERMALINK_BASE;
use chrono_tz::Tz;
use clap::{Args, Parser, Subcommand};

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_time_zone(value: &str) -> Result<Tz, String> {
    value
        .trim()
        .parse::<Tz>()
        .map_err(|error| format!("invalid time zone '{value}': {error}"))
}

#[derive(Debug, Parser)]
#[command(
    name = "bbot",
    about = "BCSD Slack bot: weekly status boards, games, and group mentions",
    version
)]
pub(crate) struct Cli {
    #[command(flatten)]
    pub(crate) slack: SlackConnectionFlags,

    #[command(flatten)]
    pub(crate) status_board: StatusBoardFlags,

    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub(crate) enum CliCommand {
    /// Connect over Socket Mode and answer commands until interrupted.
    Serve(ServeFlags),
    /// Compute one status board and print it to stdout.
    StatusBoard(StatusBoardOnceFlags),
}

/// Slack Web API connection flags shared by every subcommand.
#[derive(Debug, Args)]
pub(crate) struct SlackConnectionFlags {
    #[arg(
        long = "slack-api-base",
        env = "BBOT_SLACK_API_BASE",
        global = true,
        default_value = DEFAULT_SLACK_API_BASE,
        help = "Slack Web API base URL"
    )]
    pub(crate) api_base: String,

    #[arg(
        long = "slack-bot-token",
        env = "BBOT_SLACK_BOT_TOKEN",
        global = true,
        hide_env_values = true,
        help = "Slack bot token (xoxb-...)"
    )]
    pub(crate) bot_token: Option<String>,

    #[arg(
        long = "slack-request-timeout-ms",
        env = "BBOT_SLACK_REQUEST_TIMEOUT_MS",
        global = true,
        default_value_t = 15_000,
        value_parser = parse_positive_u64,
        help = "Timeout for each Slack Web API request"
    )]
    pub(crate) request_timeout_ms: u64,

    #[arg(
        long = "slack-retry-max-attempts",
        env = "BBOT_SLACK_RETRY_MAX_ATTEMPTS",
        global = true,
        default_value_t = 4,
        value_parser = parse_positive_usize,
        help = "Attempts per Slack Web API request on rate limits and server errors"
    )]
    pub(crate) retry_max_attempts: usize,

    #[arg(
        long = "slack-retry-base-delay-ms",
        env = "BBOT_SLACK_RETRY_BASE_DELAY_MS",
        global = true,
        default_value_t = 500,
        help = "Base backoff between Slack Web API retries"
    )]
    pub(crate) retry_base_delay_ms: u64,
}

/// Status board tuning shared by `serve` and `status-board`.
#[derive(Debug, Args)]
pub(crate) struct StatusBoardFlags {
    #[arg(
        long = "time-zone",
        env = "BBOT_TIME_ZONE",
        global = true,
        default_value = "UTC",
        value_parser = parse_time_zone,
        help = "IANA zone used for calendar dates (active days, roulette resets)"
    )]
    pub(crate) time_zone: Tz,

    #[arg(
        long = "permalink-base",
        env = "BBOT_PERMALINK_BASE",
        global = true,
        default_value = DEFAULT_PERMALINK_BASE,
        help = "Workspace URL used to build message permalinks"
    )]
    pub(crate) permalink_base: String,

    #[arg(
        long = "status-board-concurrency",
        env = "BBOT_STATUS_BOARD_CONCURRENCY",
        global = true,
        default_value_t = 4,
        value_parser = parse_positive_usize,
        help = "Channels scanned concurrently per status board"
    )]
    pub(crate) max_concurrent_channels: usize,

    #[arg(
        long = "status-board-call-timeout-ms",
        env = "BBOT_STATUS_BOARD_CALL_TIMEOUT_MS",
        global = true,
        default_value_t = 15_000,
        value_parser = parse_positive_u64,
        help = "Deadline for each collaborator call made while scanning"
    )]
    pub(crate) call_timeout_ms: u64,
}

#[derive(Debug, Args)]
pub(crate) struct ServeFlags {
    #[arg(
        long = "slack-app-token",
        env = "BBOT_SLACK_APP_TOKEN",
        hide_env_values = true,
        help = "Slack Socket Mode app token (xapp-...)"
    )]
    pub(crate) app_token: Option<String>,

    #[arg(
        long = "slack-bot-user-id",
        env = "BBOT_SLACK_BOT_USER_ID",
        help = "Bot user id; resolved with auth.test when omitted"
    )]
    pub(crate) bot_user_id: Option<String>,

    #[arg(
        long = "reconnect-delay-ms",
        env = "BBOT_RECONNECT_DELAY_MS",
        default_value_t = 2_000,
        help = "Pause before reopening a dropped Socket Mode connection"
    )]
    pub(crate) reconnect_delay_ms: u64,

    #[arg(
        long = "max-event-age-seconds",
        env = "BBOT_MAX_EVENT_AGE_SECONDS",
        default_value_t = 300,
        help = "Ignore events older than this; 0 disables the check"
    )]
    pub(crate) max_event_age_seconds: u64,

    #[arg(
        long = "status-board-days",
        env = "BBOT_STATUS_BOARD_DAYS",
        default_value_t = DEFAULT_STATUS_BOARD_DAYS,
        value_parser = parse_positive_u64,
        help = "Trailing days covered by the status board command"
    )]
    pub(crate) status_board_days: u64,

    #[arg(
        long = "announcement-channel",
        env = "BBOT_ANNOUNCEMENT_CHANNEL",
        help = "Channel id that hears about roulette jackpots"
    )]
    pub(crate) announcement_channel: Option<String>,

    #[arg(
        long = "roulette-state-path",
        env = "BBOT_ROULETTE_STATE_PATH",
        help = "JSON file persisting daily roulette attempts; in-memory when omitted"
    )]
    pub(crate) roulette_state_path: Option<PathBuf>,

    #[arg(
        long = "members-file",
        env = "BBOT_MEMBERS_FILE",
        help = "JSON array of club members used by group mentions"
    )]
    pub(crate) members_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub(crate) struct StatusBoardOnceFlags {
    #[arg(long = "user", help = "Slack user id to report on")]
    pub(crate) user_id: String,

    #[arg(
        long = "days",
        default_value_t = DEFAULT_STATUS_BOARD_DAYS,
        value_parser = parse_positive_u64,
        help = "Trailing days covered by the report"
    )]
    pub(crate) days: u64,
}
