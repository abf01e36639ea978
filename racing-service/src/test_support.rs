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

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use racing_common::{RaceHeaderRecord, Racer, StandingRecord, icon_token_name};

use crate::{
    gateway::{ChatGateway, ChatLocation, IconLookup, MessageId},
    recorder::RaceHistoryStore,
    registry::{InsertOutcome, RosterStore},
};

#[derive(Default)]
pub struct StaticIcons {
    icons: HashMap<String, String>,
    fail: bool,
}

impl StaticIcons {
    pub fn with(name: &str, rendered: &str) -> Self {
        Self {
            icons: HashMap::from([(name.to_string(), rendered.to_string())]),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            icons: HashMap::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl IconLookup for StaticIcons {
    async fn lookup_icon(
        &self,
        token: &str,
        _location: &ChatLocation,
    ) -> anyhow::Result<Option<String>> {
        if self.fail {
            anyhow::bail!("emoji lookup unavailable");
        }
        Ok(icon_token_name(token).and_then(|name| self.icons.get(name).cloned()))
    }
}

/// Icon lookup that never answers.
pub struct HangingIcons;

#[async_trait]
impl IconLookup for HangingIcons {
    async fn lookup_icon(
        &self,
        _token: &str,
        _location: &ChatLocation,
    ) -> anyhow::Result<Option<String>> {
        std::future::pending::<()>().await;
        Ok(None)
    }
}

pub struct FailingRosterStore;

#[async_trait]
impl RosterStore for FailingRosterStore {
    async fn insert_racer(&self, _racer: &Racer) -> anyhow::Result<InsertOutcome> {
        anyhow::bail!("roster table unavailable")
    }

    async fn remove_racer(&self, _racer_id: &str) -> anyhow::Result<bool> {
        anyhow::bail!("roster table unavailable")
    }

    async fn clear(&self) -> anyhow::Result<usize> {
        anyhow::bail!("roster table unavailable")
    }

    async fn list_racers(&self) -> anyhow::Result<Vec<Racer>> {
        anyhow::bail!("roster table unavailable")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMessage {
    Sent {
        channel_id: String,
        content: String,
    },
    Edited {
        channel_id: String,
        message_id: String,
        content: String,
    },
}

#[derive(Default)]
pub struct RecordingGateway {
    messages: Mutex<Vec<SentMessage>>,
    next_id: AtomicU64,
    fail_sends: AtomicBool,
    fail_edits: AtomicBool,
}

impl RecordingGateway {
    pub fn failing_sends() -> Self {
        let gateway = Self::default();
        gateway.fail_sends.store(true, Ordering::SeqCst);
        gateway
    }

    pub fn failing_edits() -> Self {
        let gateway = Self::default();
        gateway.fail_edits.store(true, Ordering::SeqCst);
        gateway
    }

    pub fn messages(&self) -> Vec<SentMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter_map(|message| match message {
                SentMessage::Sent { content, .. } => Some(content),
                SentMessage::Edited { .. } => None,
            })
            .collect()
    }

    pub fn edits(&self) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter_map(|message| match message {
                SentMessage::Edited { content, .. } => Some(content),
                SentMessage::Sent { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
impl ChatGateway for RecordingGateway {
    async fn send_message(&self, channel_id: &str, content: &str) -> anyhow::Result<MessageId> {
        if self.fail_sends.load(Ordering::SeqCst) {
            anyhow::bail!("send failed");
        }
        self.messages.lock().unwrap().push(SentMessage::Sent {
            channel_id: channel_id.to_string(),
            content: content.to_string(),
        });
        Ok(format!("msg-{}", self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        content: &str,
    ) -> anyhow::Result<()> {
        if self.fail_edits.load(Ordering::SeqCst) {
            anyhow::bail!("edit failed");
        }
        self.messages.lock().unwrap().push(SentMessage::Edited {
            channel_id: channel_id.to_string(),
            message_id: message_id.to_string(),
            content: content.to_string(),
        });
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingHistoryStore {
    pub races: Mutex<Vec<RaceHeaderRecord>>,
    pub standings: Mutex<Vec<StandingRecord>>,
}

#[async_trait]
impl RaceHistoryStore for RecordingHistoryStore {
    async fn insert_race(&self, recorded_at: DateTime<Utc>) -> anyhow::Result<RaceHeaderRecord> {
        let mut races = self.races.lock().unwrap();
        let header = RaceHeaderRecord {
            race_id: format!("race-{}", races.len() + 1),
            recorded_at,
        };
        races.push(header.clone());
        Ok(header)
    }

    async fn insert_standings(&self, standings: &[StandingRecord]) -> anyhow::Result<()> {
        self.standings.lock().unwrap().extend_from_slice(standings);
        Ok(())
    }
}

pub struct FailingHistoryStore;

#[async_trait]
impl RaceHistoryStore for FailingHistoryStore {
    async fn insert_race(&self, _recorded_at: DateTime<Utc>) -> anyhow::Result<RaceHeaderRecord> {
        anyhow::bail!("history table unavailable")
    }

    async fn insert_standings(&self, _standings: &[StandingRecord]) -> anyhow::Result<()> {
        anyhow::bail!("history table unavailable")
    }
}
