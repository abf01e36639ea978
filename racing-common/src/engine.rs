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

use rand::Rng;

use crate::{RaceResult, Racer, clamp_probability};

/// Per-tick movement probabilities. Both values are kept inside `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementOdds {
    stall_probability: f64,
    boost_probability: f64,
}

impl MovementOdds {
    pub fn new(stall_probability: f64, boost_probability: f64) -> Self {
        Self {
            stall_probability: clamp_probability(stall_probability),
            boost_probability: clamp_probability(boost_probability),
        }
    }

    pub fn stall_probability(&self) -> f64 {
        self.stall_probability
    }

    pub fn boost_probability(&self) -> f64 {
        self.boost_probability
    }
}

#[derive(Debug, Clone)]
pub struct Lane {
    racer: Racer,
    progress: u32,
    finish_tick: Option<u64>,
}

impl Lane {
    pub fn racer(&self) -> &Racer {
        &self.racer
    }

    pub fn progress(&self) -> u32 {
        self.progress
    }

    pub fn finish_tick(&self) -> Option<u64> {
        self.finish_tick
    }

    pub fn is_finished(&self) -> bool {
        self.finish_tick.is_some()
    }

    /// Moves one cell; returns true when this move crossed the finish line.
    fn advance(&mut self, track_length: u32, tick: u64) -> bool {
        self.progress += 1;
        if self.progress >= track_length {
            self.progress = track_length;
            self.finish_tick = Some(tick);
            return true;
        }
        false
    }
}

/// State of one race. Every call to [`RaceEngine::step`] is one tick; the
/// engine holds no timers so callers decide how ticks are paced.
#[derive(Debug, Clone)]
pub struct RaceEngine {
    track_length: u32,
    tick: u64,
    lanes: Vec<Lane>,
}

impl RaceEngine {
    pub fn new(racers: Vec<Racer>, track_length: u32) -> Self {
        Self {
            track_length: track_length.max(1),
            tick: 0,
            lanes: racers
                .into_iter()
                .map(|racer| Lane {
                    racer,
                    progress: 0,
                    finish_tick: None,
                })
                .collect(),
        }
    }

    pub fn track_length(&self) -> u32 {
        self.track_length
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn lanes(&self) -> &[Lane] {
        &self.lanes
    }

    /// `(racer, progress)` pairs in roster order, as consumed by the renderer.
    pub fn snapshot(&self) -> impl Iterator<Item = (&Racer, u32)> {
        self.lanes.iter().map(|lane| (&lane.racer, lane.progress))
    }

    pub fn is_finished(&self) -> bool {
        self.lanes.iter().all(Lane::is_finished)
    }

    /// Advance every unfinished racer by one tick. A racer stalls with the
    /// stall probability, otherwise moves one cell and, unless that move
    /// finished it, moves a second cell with the boost probability.
    ///
    /// Returns true once every racer has finished.
    pub fn step<R: Rng>(&mut self, rng: &mut R, odds: MovementOdds) -> bool {
        self.tick += 1;
        for lane in self.lanes.iter_mut().filter(|lane| !lane.is_finished()) {
            if rng.random_bool(odds.stall_probability) {
                continue;
            }
            if lane.advance(self.track_length, self.tick) {
                continue;
            }
            if rng.random_bool(odds.boost_probability) {
                lane.advance(self.track_length, self.tick);
            }
        }
        self.is_finished()
    }

    /// Finishers ranked by finish tick, ties kept in roster order.
    pub fn results(&self) -> Vec<RaceResult> {
        let mut finishers: Vec<(&Racer, u64)> = self
            .lanes
            .iter()
            .filter_map(|lane| lane.finish_tick.map(|tick| (&lane.racer, tick)))
            .collect();
        finishers.sort_by_key(|(_, tick)| *tick);
        assign_places(finishers)
    }
}

/// Dense ranking over finishers sorted by finish tick: racers sharing a tick
/// share a place, and each new tick advances the place by one.
pub fn assign_places<'a>(
    finishers: impl IntoIterator<Item = (&'a Racer, u64)>,
) -> Vec<RaceResult> {
    let mut results = Vec::new();
    let mut place = 0;
    let mut previous_tick = None;
    for (racer, finish_tick) in finishers {
        if previous_tick != Some(finish_tick) {
            place += 1;
            previous_tick = Some(finish_tick);
        }
        results.push(RaceResult {
            racer: racer.clone(),
            finish_tick,
            place,
        });
    }
    results
}
