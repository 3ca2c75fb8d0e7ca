//! Trigger matching for inbound channel messages.

use regex::Regex;

use crate::games::vote_option_reactions;
use crate::member_filter::{MemberQuery, Selector};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    StatusBoard,
    Dice,
    RockPaperScissors,
    Roulette,
    /// Draw one user among those who reacted `:hand:` on the thread root.
    Lottery,
    /// Add number reactions `first..=last` to the trigger message.
    Vote { first: u32, last: u32 },
    Celebrate,
    Thanks,
    GroupMention(MemberQuery),
    Help,
    Invalid { message: String },
}

pub fn bot_command_usage() -> String {
    [
        "Supported commands:",
        "- `!상태창` / `상태창!` / `!status`: your activity over the last 7 days",
        "- `!주사위`: roll a die",
        "- `!가위바위보`: rock paper scissors",
        "- `!룰렛` / `룰렛!`: daily roulette (3 official spins)",
        "- `!추첨`: draw one person who reacted :hand: on the thread",
        "- `!투표 1~4`: add number reactions for a vote (1 to 9)",
        "- `!축하` / `축하!`, `!감사` / `감사!`",
        "- `!멘션 <track> <team> <member_type>`: mention a group (`all` matches anything)",
        "- `!help`",
    ]
    .join("\n")
}

/// Compiled trigger patterns. Triggers match anywhere in the message except
/// `!멘션` and `!help`, which must be the whole message.
#[derive(Debug, Clone)]
pub struct CommandParser {
    status_board: Regex,
    roulette: Regex,
    dice: Regex,
    rock_paper_scissors: Regex,
    lottery: Regex,
    vote: Regex,
    celebrate: Regex,
    thanks: Regex,
    group_mention: Regex,
    help: Regex,
}

impl CommandParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            status_board: Regex::new(r"!상태창|상태창!|!status\b")?,
            roulette: Regex::new(r"!룰렛|룰렛!")?,
            dice: Regex::new(r"!주사위")?,
            rock_paper_scissors: Regex::new(r"!가위바위보")?,
            lottery: Regex::new(r"!추첨")?,
            vote: Regex::new(r"!?투표!? (?P<first>\d+)~(?P<last>\d+)")?,
            celebrate: Regex::new(r"!축하|축하!")?,
            thanks: Regex::new(r"!감사|감사!")?,
            group_mention: Regex::new(r"^\s*!멘션(?:\s+(?P<args>.*?))?\s*$")?,
            help: Regex::new(r"^\s*!help\s*$")?,
        })
    }

    pub fn parse(&self, text: &str) -> Option<BotCommand> {
        if let Some(captures) = self.group_mention.captures(text) {
            let args = captures
                .name("args")
                .map(|args| args.as_str())
                .unwrap_or_default();
            return Some(parse_group_mention(args));
        }
        if self.help.is_match(text) {
            return Some(BotCommand::Help);
        }
        if self.status_board.is_match(text) {
            return Some(BotCommand::StatusBoard);
        }
        if self.roulette.is_match(text) {
            return Some(BotCommand::Roulette);
        }
        if self.lottery.is_match(text) {
            return Some(BotCommand::Lottery);
        }
        if let Some(captures) = self.vote.captures(text) {
            return Some(parse_vote_range(&captures["first"], &captures["last"]));
        }
        if self.dice.is_match(text) {
            return Some(BotCommand::Dice);
        }
        if self.rock_paper_scissors.is_match(text) {
            return Some(BotCommand::RockPaperScissors);
        }
        if self.celebrate.is_match(text) {
            return Some(BotCommand::Celebrate);
        }
        if self.thanks.is_match(text) {
            return Some(BotCommand::Thanks);
        }
        None
    }
}

fn parse_vote_range(first: &str, last: &str) -> BotCommand {
    match (first.parse::<u32>(), last.parse::<u32>()) {
        (Ok(first), Ok(last)) if vote_option_reactions(first, last).is_some() => {
            BotCommand::Vote { first, last }
        }
        _ => BotCommand::Invalid {
            message: "Enter a number range between 1 and 9, like `!투표 1~4`.".to_string(),
        },
    }
}

/// Missing trailing selectors default to `all`.
fn parse_group_mention(args: &str) -> BotCommand {
    let selectors = args.split_whitespace().collect::<Vec<_>>();
    if selectors.len() > 3 {
        return BotCommand::Invalid {
            message: "Usage: !멘션 <track> <team> <member_type>".to_string(),
        };
    }
    let selector_at = |index: usize| {
        selectors
            .get(index)
            .map(|raw| Selector::parse(raw))
            .unwrap_or(Selector::Any)
    };
    BotCommand::GroupMention(MemberQuery {
        track: selector_at(0),
        team: selector_at(1),
        member_type: selector_at(2),
    })
}
