// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::{sync::LazyLock, time::Duration};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

mod engine;
mod render;

pub use engine::{Lane, MovementOdds, RaceEngine, assign_places};
pub use render::{
    elapsed_after, format_elapsed, help_message, render_track, results_message, roster_message,
    running_header,
};

pub const DEFAULT_TRACK_LENGTH: u32 = 25;
pub const DEFAULT_TICK_PERIOD_MS: u64 = 1300;
pub const DEFAULT_COUNTDOWN_STEP_MS: u64 = 1000;
pub const DEFAULT_STALL_PROBABILITY: f64 = 0.10;
pub const DEFAULT_BOOST_PROBABILITY: f64 = 0.70;
pub const DEFAULT_COMMAND_PREFIX: &str = "!race";
pub const DEFAULT_RACER_ICON: &str = ":wheelchair:";

/// One step of track. Every lane is drawn with `progress` copies of it.
pub const RACE_DELIMITER: &str = "   ";

/// Platform username limit; longer names would break `MAX_NAME_WIDTH`.
pub const MAX_DISPLAY_NAME_CHARS: usize = 32;
/// Longest icon a racer may carry: animated custom emoji markup,
/// `<a:` + 32-character name + `:` + 20-digit id + `>`. Longer icons fall
/// back to the default icon.
pub const MAX_ICON_CHARS: usize = 57;
/// Upper bound for the width of a lane's `icon-name` tail plus its newline,
/// used by the roster capacity formula.
pub const MAX_NAME_WIDTH: usize = MAX_ICON_CHARS + 1 + MAX_DISPLAY_NAME_CHARS + 1;
/// Characters of a frame not covered by lanes (header words, timer, newlines).
pub const FIXED_MESSAGE_OVERHEAD: usize = 24;
/// Maximum length of a single chat message.
pub const MESSAGE_CEILING: usize = 2000;

pub type RacerId = String;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Racer {
    pub racer_id: RacerId,
    pub display_name: String,
    pub icon: String,
    pub joined_at: DateTime<Utc>,
}

impl Racer {
    pub fn new(
        racer_id: impl Into<RacerId>,
        display_name: impl Into<String>,
        icon: Option<String>,
    ) -> Self {
        Self {
            racer_id: racer_id.into(),
            display_name: display_name.into(),
            icon: icon
                .filter(|icon| !icon.trim().is_empty() && icon.chars().count() <= MAX_ICON_CHARS)
                .unwrap_or_else(|| DEFAULT_RACER_ICON.to_string()),
            joined_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RaceResult {
    pub racer: Racer,
    pub finish_tick: u64,
    pub place: u32,
}

impl RaceResult {
    /// Track cells covered per tick.
    pub fn speed(&self, track_length: u32) -> f64 {
        f64::from(track_length) / self.finish_tick.max(1) as f64
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RacePhase {
    Idle,
    Loading,
    Countdown,
    Running,
    Finished,
}

impl RacePhase {
    pub fn is_active(self) -> bool {
        !matches!(self, RacePhase::Idle)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RaceSettings {
    pub track_length: u32,
    pub tick_period: Duration,
    pub countdown_step: Duration,
    pub stall_probability: f64,
    pub boost_probability: f64,
    pub message_ceiling: usize,
}

impl Default for RaceSettings {
    fn default() -> Self {
        Self {
            track_length: DEFAULT_TRACK_LENGTH,
            tick_period: Duration::from_millis(DEFAULT_TICK_PERIOD_MS),
            countdown_step: Duration::from_millis(DEFAULT_COUNTDOWN_STEP_MS),
            stall_probability: DEFAULT_STALL_PROBABILITY,
            boost_probability: DEFAULT_BOOST_PROBABILITY,
            message_ceiling: MESSAGE_CEILING,
        }
    }
}

impl RaceSettings {
    /// Clamp values that would otherwise make the engine misbehave.
    pub fn normalized(mut self) -> Self {
        self.track_length = self.track_length.max(1);
        self.stall_probability = clamp_probability(self.stall_probability);
        self.boost_probability = clamp_probability(self.boost_probability);
        if self.tick_period.is_zero() {
            self.tick_period = Duration::from_millis(1);
        }
        self
    }

    pub fn odds(&self) -> MovementOdds {
        MovementOdds::new(self.stall_probability, self.boost_probability)
    }

    pub fn roster_limits(&self) -> RosterLimits {
        RosterLimits {
            track_length: self.track_length as usize,
            message_ceiling: self.message_ceiling,
            ..RosterLimits::default()
        }
    }
}

pub(crate) fn clamp_probability(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Inputs of the worst-case frame size formula used to cap the roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RosterLimits {
    pub track_length: usize,
    pub delimiter_width: usize,
    pub max_name_width: usize,
    pub fixed_overhead: usize,
    pub message_ceiling: usize,
}

impl Default for RosterLimits {
    fn default() -> Self {
        Self {
            track_length: DEFAULT_TRACK_LENGTH as usize,
            delimiter_width: RACE_DELIMITER.len(),
            max_name_width: MAX_NAME_WIDTH,
            fixed_overhead: FIXED_MESSAGE_OVERHEAD,
            message_ceiling: MESSAGE_CEILING,
        }
    }
}

impl RosterLimits {
    /// Longest frame the renderer can produce for `racer_count` lanes.
    pub fn worst_case_len(&self, racer_count: usize) -> usize {
        let lane = self.track_length * self.delimiter_width;
        racer_count * (lane + self.max_name_width) + lane + self.fixed_overhead
    }

    pub fn admits(&self, racer_count: usize) -> bool {
        self.worst_case_len(racer_count) <= self.message_ceiling
    }

    pub fn max_racers(&self) -> usize {
        let lane = self.track_length * self.delimiter_width;
        let fixed = lane + self.fixed_overhead;
        let per_racer = lane + self.max_name_width;
        if self.message_ceiling < fixed || per_racer == 0 {
            return 0;
        }
        (self.message_ceiling - fixed) / per_racer
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RaceCommand {
    Join,
    Leave,
    Reset,
    ListJoined,
    Start,
    Help,
}

pub const ALL_RACE_COMMANDS: [RaceCommand; 6] = [
    RaceCommand::Join,
    RaceCommand::Leave,
    RaceCommand::Reset,
    RaceCommand::ListJoined,
    RaceCommand::Start,
    RaceCommand::Help,
];

impl RaceCommand {
    pub fn verb(self) -> &'static str {
        match self {
            RaceCommand::Join => "join",
            RaceCommand::Leave => "leave",
            RaceCommand::Reset => "reset",
            RaceCommand::ListJoined => "list-joined",
            RaceCommand::Start => "start",
            RaceCommand::Help => "help",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            RaceCommand::Join => "Joins the next race, optionally with an emoji as your racer",
            RaceCommand::Leave => "Leaves the next race",
            RaceCommand::Reset => "Removes all joined racers",
            RaceCommand::ListJoined => "Prints the list of joined racers",
            RaceCommand::Start => "Starts the race with all joined racers",
            RaceCommand::Help => "Prints this help",
        }
    }

    fn from_verb(verb: &str) -> Option<Self> {
        let verb = verb.to_ascii_lowercase();
        ALL_RACE_COMMANDS
            .into_iter()
            .find(|command| command.verb() == verb)
    }
}

/// Parse `<prefix> <verb> ...`. A bare prefix or an unknown verb maps to
/// [`RaceCommand::Help`]; messages for other plugins return `None`.
pub fn parse_race_command(content: &str, prefix: &str) -> Option<RaceCommand> {
    let mut words = content.split_whitespace();
    let head = words.next()?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    Some(
        words
            .next()
            .and_then(RaceCommand::from_verb)
            .unwrap_or(RaceCommand::Help),
    )
}

static ICON_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i):\w+:(?::(?:\w+-)+\w+:)?").expect("icon token pattern is valid")
});

static ENV_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env var pattern is valid")
});

/// First `:emoji:` token in a chat message, including an optional
/// `:skin-tone-N:` style modifier.
pub fn extract_icon_token(content: &str) -> Option<String> {
    ICON_TOKEN
        .find(content)
        .map(|token| token.as_str().to_string())
}

/// Name part of an `:emoji:` token, `None` for anything else.
pub fn icon_token_name(token: &str) -> Option<&str> {
    let name = token.strip_prefix(':')?.strip_suffix(':')?;
    if name.is_empty() || name.contains(':') {
        return None;
    }
    Some(name)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RaceHeaderRecord {
    pub race_id: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StandingRecord {
    pub race_id: String,
    pub racer_id: RacerId,
    pub display_name: String,
    pub speed: f64,
    pub finish_tick: u64,
    pub place: u32,
}

pub fn standings_for_race(
    race_id: &str,
    results: &[RaceResult],
    track_length: u32,
) -> Vec<StandingRecord> {
    results
        .iter()
        .map(|result| StandingRecord {
            race_id: race_id.to_string(),
            racer_id: result.racer.racer_id.clone(),
            display_name: result.racer.display_name.clone(),
            speed: result.speed(track_length),
            finish_tick: result.finish_tick,
            place: result.place,
        })
        .collect()
}

/// Replace `${VAR_NAME}` patterns in a string with values from environment variables.
/// Unknown or unset variables are replaced with an empty string.
pub fn expand_env_vars(input: &str) -> String {
    ENV_VAR
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}
