//! Randomized one-shot commands. Every roll takes the RNG explicitly so tests can seed it.

use rand::seq::SliceRandom;
use rand::Rng;

pub const ROCK_PAPER_SCISSORS: [&str; 3] = ["가위", "바위", "보"];

pub const ROULETTE_DIGITS: [&str; 10] = [
    ":one:", ":two:", ":three:", ":four:", ":five:", ":six:", ":seven:", ":eight:", ":nine:",
    ":zero:",
];

pub const ROULETTE_JACKPOT: &str = ":seven::seven::seven:";

/// Official attempts per user per day; later spins are reported as unofficial.
pub const ROULETTE_DAILY_ATTEMPTS: u32 = 3;

pub fn roll_dice<R: Rng + ?Sized>(rng: &mut R) -> u8 {
    rng.gen_range(1..=6)
}

pub fn pick_rock_paper_scissors<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    ROCK_PAPER_SCISSORS
        .choose(rng)
        .copied()
        .unwrap_or(ROCK_PAPER_SCISSORS[0])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouletteSpin {
    pub digits: [&'static str; 3],
}

impl RouletteSpin {
    pub fn spin<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut digits = [ROULETTE_DIGITS[0]; 3];
        for slot in &mut digits {
            *slot = ROULETTE_DIGITS[rng.gen_range(0..ROULETTE_DIGITS.len())];
        }
        Self { digits }
    }

    pub fn text(&self) -> String {
        self.digits.concat()
    }

    pub fn is_jackpot(&self) -> bool {
        self.text() == ROULETTE_JACKPOT
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouletteOutcome {
    Jackpot { attempt: u32 },
    Miss { remaining_attempts: u32 },
    Unofficial { attempt: u32 },
}

impl RouletteOutcome {
    /// Classifies a spin given the user's attempt number for the day (1-based).
    pub fn classify(spin: &RouletteSpin, attempt: u32) -> Self {
        if attempt > ROULETTE_DAILY_ATTEMPTS {
            Self::Unofficial { attempt }
        } else if spin.is_jackpot() {
            Self::Jackpot { attempt }
        } else {
            Self::Miss {
                remaining_attempts: ROULETTE_DAILY_ATTEMPTS.saturating_sub(attempt),
            }
        }
    }
}

pub fn render_roulette_reply(user_id: &str, spin: &RouletteSpin, outcome: &RouletteOutcome) -> String {
    let digits = spin.text();
    match outcome {
        RouletteOutcome::Jackpot { .. } => format!(
            ":slot_machine: :tada::tada::tada: Congratulations! {digits} is a winner! :tada::tada::tada: :slot_machine:"
        ),
        RouletteOutcome::Miss { remaining_attempts } => format!(
            "<@{user_id}> rolled {digits} :meow_sad-rain:\nAttempts left today: {remaining_attempts}"
        ),
        RouletteOutcome::Unofficial { attempt } => format!(
            "<@{user_id}> unofficial result {digits} (attempt {attempt} today)"
        ),
    }
}

pub fn render_jackpot_announcement(user_id: &str, channel_id: &str, attempt: u32) -> String {
    format!(
        ":tada::tada::tada: <@{user_id}> hit {ROULETTE_JACKPOT} in <#{channel_id}> on attempt {attempt} today! Congratulate them! :tada::tada::tada:"
    )
}

pub const CELEBRATION_TEXT: &str = ":tada::tada::tada::tada::tada::tada::tada:";

pub const THANKS_EMOJIS: [&str; 10] = [
    ":감사하트:",
    ":blob_bowing:",
    ":grand_zul:",
    ":meow_sparkle:",
    ":thank_you:",
    ":meow_party:",
    ":meow_heart:",
    ":blob-clap:",
    ":blob_excited:",
    ":mario_luigi_dance:",
];

pub const THANKS_EMOJI_PICKS: usize = 6;

/// Six distinct thank-you emojis in random order.
pub fn pick_thanks_emojis<R: Rng + ?Sized>(rng: &mut R) -> String {
    THANKS_EMOJIS
        .choose_multiple(rng, THANKS_EMOJI_PICKS)
        .copied()
        .collect::<Vec<_>>()
        .concat()
}

/// Reaction that enters a user into a `!추첨` draw.
pub const LOTTERY_ENTRY_REACTION: &str = "hand";

pub fn draw_lottery_winner<'a, R: Rng + ?Sized>(
    rng: &mut R,
    participants: &'a [String],
) -> Option<&'a str> {
    participants.choose(rng).map(String::as_str)
}

pub fn render_lottery_result(winner: &str, participant_count: usize) -> String {
    format!(
        ":hand: Drawing one of the {participant_count} people who reacted with :hand:!\n<@{winner}> is the winner! Congratulations! :tada:"
    )
}

/// Number reactions used by `!투표`; index 0 is option 1.
pub static VOTE_OPTION_REACTIONS: [&str; 9] = [
    "one", "two", "three", "four", "five", "six", "seven", "eight", "nine",
];

/// Reaction names for options `first..=last`, or `None` outside `1..=9`.
pub fn vote_option_reactions(first: u32, last: u32) -> Option<&'static [&'static str]> {
    let max = VOTE_OPTION_REACTIONS.len() as u32;
    if first < 1 || last > max || first > last {
        return None;
    }
    VOTE_OPTION_REACTIONS.get(first as usize - 1..last as usize)
}
