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

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use racing_common::{RaceHeaderRecord, RaceResult, StandingRecord, standings_for_race};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[async_trait]
pub trait RaceHistoryStore: Send + Sync {
    /// Insert a new race header and return it with its generated id.
    async fn insert_race(&self, recorded_at: DateTime<Utc>) -> anyhow::Result<RaceHeaderRecord>;
    async fn insert_standings(&self, standings: &[StandingRecord]) -> anyhow::Result<()>;
}

/// Writes finished races to the history store in the background.
#[derive(Clone)]
pub struct ResultsRecorder {
    store: Option<Arc<dyn RaceHistoryStore>>,
    track_length: u32,
}

impl ResultsRecorder {
    pub fn new(store: Option<Arc<dyn RaceHistoryStore>>, track_length: u32) -> Self {
        Self {
            store,
            track_length,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Spawn the write and return immediately. Failures are only logged.
    pub fn record(&self, results: Vec<RaceResult>) -> JoinHandle<()> {
        let store = self.store.clone();
        let track_length = self.track_length;
        tokio::spawn(async move {
            let Some(store) = store else {
                debug!(
                    results = results.len(),
                    "race history persistence disabled; skipping"
                );
                return;
            };
            if let Err(error) = persist_results(store.as_ref(), &results, track_length).await {
                warn!(error = %error, "failed to persist race results");
            }
        })
    }
}

async fn persist_results(
    store: &dyn RaceHistoryStore,
    results: &[RaceResult],
    track_length: u32,
) -> anyhow::Result<()> {
    if results.is_empty() {
        debug!("no race results to persist");
        return Ok(());
    }

    let header = store
        .insert_race(Utc::now())
        .await
        .context("failed to insert race header")?;
    let standings = standings_for_race(&header.race_id, results, track_length);
    store
        .insert_standings(&standings)
        .await
        .with_context(|| format!("failed to insert standings for race {}", header.race_id))?;

    info!(
        race_id = %header.race_id,
        standings = standings.len(),
        "race results persisted"
    );
    Ok(())
}
