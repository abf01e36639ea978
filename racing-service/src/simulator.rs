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

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use chrono::Utc;
use racing_common::{
    RaceEngine, RacePhase, RaceResult, RaceSettings, Racer, elapsed_after, render_track,
    results_message, running_header,
};
use rand::{SeedableRng, rngs::StdRng};
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{gateway::ChatGateway, recorder::ResultsRecorder, registry::RacerRegistry};

const LOADING_MESSAGE: &str = "Race is loading...";
const ABORTED_MESSAGE: &str = "Race aborted, please start a new one";
const COUNTDOWN_HEADERS: [&str; 3] = ["Ready!", "Steady!", "GO!"];

/// Phase of the single race this process can run at a time.
#[derive(Debug)]
pub struct RaceLifecycle {
    phase: Mutex<RacePhase>,
}

impl Default for RaceLifecycle {
    fn default() -> Self {
        Self {
            phase: Mutex::new(RacePhase::Idle),
        }
    }
}

impl RaceLifecycle {
    pub fn phase(&self) -> RacePhase {
        *self.lock()
    }

    /// Move from `Idle` to `Loading`. Only one guard exists at a time.
    pub fn try_claim(self: &Arc<Self>) -> Option<RaceGuard> {
        let mut phase = self.lock();
        if phase.is_active() {
            return None;
        }
        *phase = RacePhase::Loading;
        Some(RaceGuard {
            lifecycle: Arc::clone(self),
        })
    }

    fn lock(&self) -> MutexGuard<'_, RacePhase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Claim on the lifecycle; dropping it returns the lifecycle to `Idle`.
#[derive(Debug)]
pub struct RaceGuard {
    lifecycle: Arc<RaceLifecycle>,
}

impl RaceGuard {
    pub fn advance(&self, phase: RacePhase) {
        *self.lifecycle.lock() = phase;
    }
}

impl Drop for RaceGuard {
    fn drop(&mut self) {
        *self.lifecycle.lock() = RacePhase::Idle;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartRejection {
    AlreadyRunning,
    NoRacers,
}

impl StartRejection {
    pub fn code(self) -> &'static str {
        match self {
            StartRejection::AlreadyRunning => "ALREADY_RUNNING",
            StartRejection::NoRacers => "NO_RACERS",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            StartRejection::AlreadyRunning => {
                "Race is already in progress. Please wait until it ends"
            }
            StartRejection::NoRacers => "No racers have joined the race yet",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RaceOutcome {
    pub results: Vec<RaceResult>,
    pub ticks: u64,
}

pub struct RaceTicket {
    pub racers: usize,
    /// Resolves to `None` when the race was aborted.
    pub task: JoinHandle<Option<RaceOutcome>>,
}

pub enum StartOutcome {
    Started(RaceTicket),
    Rejected(StartRejection),
}

#[derive(Clone)]
pub struct RaceSimulator {
    registry: Arc<RacerRegistry>,
    gateway: Arc<dyn ChatGateway>,
    recorder: ResultsRecorder,
    lifecycle: Arc<RaceLifecycle>,
    rng: Arc<Mutex<StdRng>>,
    settings: RaceSettings,
}

impl RaceSimulator {
    pub fn new(
        registry: Arc<RacerRegistry>,
        gateway: Arc<dyn ChatGateway>,
        recorder: ResultsRecorder,
        settings: RaceSettings,
    ) -> Self {
        let seed = Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .unsigned_abs();
        Self {
            registry,
            gateway,
            recorder,
            lifecycle: Arc::new(RaceLifecycle::default()),
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
            settings: settings.normalized(),
        }
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Arc::new(Mutex::new(rng));
        self
    }

    pub fn phase(&self) -> RacePhase {
        self.lifecycle.phase()
    }

    pub fn settings(&self) -> &RaceSettings {
        &self.settings
    }

    /// Snapshot the roster and spawn the race task. The roster may change
    /// freely afterwards; only the next race sees it.
    pub async fn start(&self, channel_id: &str) -> anyhow::Result<StartOutcome> {
        if self.lifecycle.phase().is_active() {
            return Ok(StartOutcome::Rejected(StartRejection::AlreadyRunning));
        }

        let racers = self
            .registry
            .list()
            .await
            .context("failed to snapshot roster for race")?;
        if racers.is_empty() {
            return Ok(StartOutcome::Rejected(StartRejection::NoRacers));
        }

        let Some(guard) = self.lifecycle.try_claim() else {
            return Ok(StartOutcome::Rejected(StartRejection::AlreadyRunning));
        };

        info!(channel_id = %channel_id, racers = racers.len(), "race starting");
        let racer_count = racers.len();
        let simulator = self.clone();
        let channel_id = channel_id.to_string();
        let task = tokio::spawn(async move { simulator.run_race(guard, channel_id, racers).await });

        Ok(StartOutcome::Started(RaceTicket {
            racers: racer_count,
            task,
        }))
    }

    async fn run_race(
        &self,
        guard: RaceGuard,
        channel_id: String,
        racers: Vec<Racer>,
    ) -> Option<RaceOutcome> {
        match self.drive_race(&guard, &channel_id, racers).await {
            Ok(outcome) => Some(outcome),
            Err(error) => {
                warn!(channel_id = %channel_id, error = %error, "race aborted");
                if let Err(error) = self.gateway.send_message(&channel_id, ABORTED_MESSAGE).await {
                    debug!(error = %error, "failed to announce aborted race");
                }
                None
            }
        }
    }

    async fn drive_race(
        &self,
        guard: &RaceGuard,
        channel_id: &str,
        racers: Vec<Racer>,
    ) -> anyhow::Result<RaceOutcome> {
        let message_id = self
            .gateway
            .send_message(channel_id, LOADING_MESSAGE)
            .await
            .context("failed to send race message")?;

        guard.advance(RacePhase::Countdown);
        let mut engine = RaceEngine::new(racers, self.settings.track_length);
        for (index, header) in COUNTDOWN_HEADERS.into_iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.settings.countdown_step).await;
            }
            let frame = render_track(header, engine.snapshot());
            self.show_frame(channel_id, &message_id, &frame, engine.tick()).await;
        }

        guard.advance(RacePhase::Running);
        let period = self.settings.tick_period;
        let odds = self.settings.odds();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let finished = {
                let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
                engine.step(&mut *rng, odds)
            };
            let elapsed = elapsed_after(period, engine.tick());
            let header = running_header(engine.track_length(), elapsed);
            let frame = render_track(&header, engine.snapshot());
            self.show_frame(channel_id, &message_id, &frame, engine.tick()).await;
            if finished {
                break;
            }
        }

        guard.advance(RacePhase::Finished);
        let results = engine.results();
        let summary = results_message(&results, period, engine.track_length());
        // Persistence runs on its own; the announcement does not wait for it.
        drop(self.recorder.record(results.clone()));
        if let Err(error) = self.gateway.send_message(channel_id, &summary).await {
            warn!(channel_id = %channel_id, error = %error, "failed to announce race results");
        }

        info!(
            channel_id = %channel_id,
            ticks = engine.tick(),
            finishers = results.len(),
            "race finished"
        );
        Ok(RaceOutcome {
            results,
            ticks: engine.tick(),
        })
    }

    async fn show_frame(&self, channel_id: &str, message_id: &str, frame: &str, tick: u64) {
        if let Err(error) = self
            .gateway
            .edit_message(channel_id, message_id, frame)
            .await
        {
            warn!(
                channel_id = %channel_id,
                tick,
                error = %error,
                "failed to update race frame"
            );
        }
    }
}
