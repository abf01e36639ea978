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

use std::{fmt::Write, time::Duration};

use crate::{ALL_RACE_COMMANDS, RACE_DELIMITER, RaceResult, Racer};

/// Draw one frame: `header`, then a lane per racer with `progress` track
/// cells in front of the racer's icon and name.
pub fn render_track<'a>(header: &str, lanes: impl IntoIterator<Item = (&'a Racer, u32)>) -> String {
    let mut frame = String::from(header);
    frame.push('\n');
    for (racer, progress) in lanes {
        frame.push_str(&RACE_DELIMITER.repeat(progress as usize));
        frame.push_str(&racer.icon);
        frame.push('-');
        frame.push_str(&racer.display_name);
        frame.push('\n');
    }
    frame
}

/// Header of in-race frames, with the finish line drawn at the end of the
/// track and the elapsed race time.
pub fn running_header(track_length: u32, elapsed: Duration) -> String {
    format!(
        "GO! {} |Finish; Time: {}",
        RACE_DELIMITER.repeat(track_length.saturating_sub(1) as usize),
        format_elapsed(elapsed)
    )
}

/// Race time after `ticks` movement steps of `tick_period` each.
pub fn elapsed_after(tick_period: Duration, ticks: u64) -> Duration {
    tick_period.saturating_mul(u32::try_from(ticks).unwrap_or(u32::MAX))
}

pub fn format_elapsed(elapsed: Duration) -> String {
    let seconds = elapsed.as_secs();
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

pub fn results_message(results: &[RaceResult], tick_period: Duration, track_length: u32) -> String {
    let mut message = String::from("Race result:\n");
    for result in results {
        let finished_after = elapsed_after(tick_period, result.finish_tick);
        let _ = writeln!(
            message,
            "**#{} - {};** Finish Time: {}; Speed: {:.3} cells/tick;",
            result.place,
            result.racer.display_name,
            format_elapsed(finished_after),
            result.speed(track_length),
        );
    }
    message
}

pub fn roster_message(racers: &[Racer]) -> String {
    if racers.is_empty() {
        return "No racers have joined the next race yet".to_string();
    }
    let mut message = String::from("Racers:\n");
    for (index, racer) in racers.iter().enumerate() {
        let _ = writeln!(message, "#{} - {}", index + 1, racer.display_name);
    }
    message
}

pub fn help_message(prefix: &str) -> String {
    let mut message = String::from("Race commands:\n");
    for command in ALL_RACE_COMMANDS {
        let _ = writeln!(
            message,
            "`{} {}` - {}",
            prefix,
            command.verb(),
            command.description()
        );
    }
    message
}
