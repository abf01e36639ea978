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

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use racing_common::{
    MAX_DISPLAY_NAME_CHARS, MAX_ICON_CHARS, Racer, RosterLimits, extract_icon_token,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::gateway::{ChatLocation, IconLookup};

pub const DEFAULT_ICON_LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

#[async_trait]
pub trait RosterStore: Send + Sync {
    async fn insert_racer(&self, racer: &Racer) -> anyhow::Result<InsertOutcome>;
    async fn remove_racer(&self, racer_id: &str) -> anyhow::Result<bool>;
    async fn clear(&self) -> anyhow::Result<usize>;
    /// Racers in join order.
    async fn list_racers(&self) -> anyhow::Result<Vec<Racer>>;
}

#[derive(Default)]
pub struct InMemoryRosterStore {
    racers: RwLock<Vec<Racer>>,
}

#[async_trait]
impl RosterStore for InMemoryRosterStore {
    async fn insert_racer(&self, racer: &Racer) -> anyhow::Result<InsertOutcome> {
        let mut racers = self.racers.write().await;
        if racers
            .iter()
            .any(|existing| existing.racer_id == racer.racer_id)
        {
            return Ok(InsertOutcome::Duplicate);
        }
        racers.push(racer.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn remove_racer(&self, racer_id: &str) -> anyhow::Result<bool> {
        let mut racers = self.racers.write().await;
        let before = racers.len();
        racers.retain(|racer| racer.racer_id != racer_id);
        Ok(racers.len() != before)
    }

    async fn clear(&self) -> anyhow::Result<usize> {
        let mut racers = self.racers.write().await;
        let removed = racers.len();
        racers.clear();
        Ok(removed)
    }

    async fn list_racers(&self) -> anyhow::Result<Vec<Racer>> {
        Ok(self.racers.read().await.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinContext {
    pub command_text: String,
    pub location: ChatLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinRejection {
    AlreadyJoined,
    NameTooLong,
    RosterFull,
}

impl JoinRejection {
    pub fn code(self) -> &'static str {
        match self {
            JoinRejection::AlreadyJoined => "ALREADY_JOINED",
            JoinRejection::NameTooLong => "NAME_TOO_LONG",
            JoinRejection::RosterFull => "ROSTER_FULL",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            JoinRejection::AlreadyJoined => "You have already joined the race",
            JoinRejection::NameTooLong => "Your display name is too long to race",
            JoinRejection::RosterFull => {
                "You cannot join the race: maximum number of racers already joined"
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JoinOutcome {
    Joined(Racer),
    Rejected(JoinRejection),
}

/// Roster of the next race. Every store access runs under one registry-wide
/// lock so the capacity check and the insert of a join cannot interleave.
/// Icon lookups happen before the lock is taken.
pub struct RacerRegistry {
    store: Arc<dyn RosterStore>,
    icons: Arc<dyn IconLookup>,
    icon_timeout: Duration,
    limits: RosterLimits,
    guard: Mutex<()>,
}

impl RacerRegistry {
    pub fn new(
        store: Arc<dyn RosterStore>,
        icons: Arc<dyn IconLookup>,
        limits: RosterLimits,
    ) -> Self {
        Self {
            store,
            icons,
            icon_timeout: DEFAULT_ICON_LOOKUP_TIMEOUT,
            limits,
            guard: Mutex::new(()),
        }
    }

    pub fn with_icon_timeout(mut self, icon_timeout: Duration) -> Self {
        self.icon_timeout = icon_timeout;
        self
    }

    pub fn limits(&self) -> RosterLimits {
        self.limits
    }

    pub async fn join(
        &self,
        racer_id: &str,
        display_name: &str,
        context: &JoinContext,
    ) -> anyhow::Result<JoinOutcome> {
        let icon = self.resolve_icon(racer_id, context).await;

        let _guard = self.guard.lock().await;
        let racers = self
            .store
            .list_racers()
            .await
            .context("failed to load roster")?;

        if racers.iter().any(|racer| racer.racer_id == racer_id) {
            return Ok(JoinOutcome::Rejected(JoinRejection::AlreadyJoined));
        }
        if display_name.chars().count() > MAX_DISPLAY_NAME_CHARS {
            return Ok(JoinOutcome::Rejected(JoinRejection::NameTooLong));
        }
        if !self.limits.admits(racers.len() + 1) {
            info!(
                racer_id = %racer_id,
                racers = racers.len(),
                "roster is full"
            );
            return Ok(JoinOutcome::Rejected(JoinRejection::RosterFull));
        }

        let racer = Racer::new(racer_id, display_name, icon);
        match self
            .store
            .insert_racer(&racer)
            .await
            .context("failed to store racer")?
        {
            InsertOutcome::Inserted => {
                info!(
                    racer_id = %racer.racer_id,
                    icon = %racer.icon,
                    racers = racers.len() + 1,
                    "racer joined next race"
                );
                Ok(JoinOutcome::Joined(racer))
            }
            InsertOutcome::Duplicate => Ok(JoinOutcome::Rejected(JoinRejection::AlreadyJoined)),
        }
    }

    async fn resolve_icon(&self, racer_id: &str, context: &JoinContext) -> Option<String> {
        let token = extract_icon_token(&context.command_text)?;
        let lookup = self.icons.lookup_icon(&token, &context.location);
        match tokio::time::timeout(self.icon_timeout, lookup).await {
            Ok(Ok(Some(icon))) if icon.chars().count() <= MAX_ICON_CHARS => Some(icon),
            Ok(Ok(Some(icon))) => {
                warn!(
                    racer_id = %racer_id,
                    token = %token,
                    icon_chars = icon.chars().count(),
                    "resolved icon too long; using raw token"
                );
                Some(token)
            }
            Ok(Ok(None)) => Some(token),
            Ok(Err(error)) => {
                warn!(
                    racer_id = %racer_id,
                    token = %token,
                    error = %error,
                    "icon lookup failed; using raw token"
                );
                Some(token)
            }
            Err(_) => {
                warn!(
                    racer_id = %racer_id,
                    token = %token,
                    timeout_ms = self.icon_timeout.as_millis() as u64,
                    "icon lookup timed out; using raw token"
                );
                Some(token)
            }
        }
    }

    pub async fn leave(&self, racer_id: &str) -> anyhow::Result<()> {
        let _guard = self.guard.lock().await;
        let removed = self
            .store
            .remove_racer(racer_id)
            .await
            .context("failed to remove racer")?;
        if removed {
            info!(racer_id = %racer_id, "racer left next race");
        }
        Ok(())
    }

    pub async fn reset(&self) -> anyhow::Result<()> {
        let _guard = self.guard.lock().await;
        let removed = self.store.clear().await.context("failed to clear roster")?;
        info!(removed, "roster reset");
        Ok(())
    }

    pub async fn list(&self) -> anyhow::Result<Vec<Racer>> {
        let _guard = self.guard.lock().await;
        self.store.list_racers().await.context("failed to list roster")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FailingRosterStore, HangingIcons, StaticIcons};

    fn context(command_text: &str) -> JoinContext {
        JoinContext {
            command_text: command_text.to_string(),
            location: ChatLocation {
                channel_id: "chan-1".to_string(),
                guild_id: Some("guild-1".to_string()),
            },
        }
    }

    fn registry_with(limits: RosterLimits, icons: StaticIcons) -> RacerRegistry {
        RacerRegistry::new(
            Arc::new(InMemoryRosterStore::default()),
            Arc::new(icons),
            limits,
        )
    }

    fn registry() -> RacerRegistry {
        registry_with(RosterLimits::default(), StaticIcons::default())
    }

    fn joined(outcome: JoinOutcome) -> Racer {
        match outcome {
            JoinOutcome::Joined(racer) => racer,
            JoinOutcome::Rejected(reason) => panic!("expected join, got {}", reason.code()),
        }
    }

    #[tokio::test]
    async fn unique_joins_list_back_in_join_order() {
        let registry = registry();
        for (id, name) in [("1", "alice"), ("2", "bob"), ("3", "carol")] {
            joined(registry.join(id, name, &context("!race join")).await.unwrap());
        }

        let names: Vec<String> = registry
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|racer| racer.display_name)
            .collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
    }

    #[tokio::test]
    async fn duplicate_join_is_rejected_without_mutation() {
        let registry = registry();
        joined(registry.join("1", "alice", &context("!race join")).await.unwrap());

        let outcome = registry
            .join("1", "alice again", &context("!race join :snail:"))
            .await
            .unwrap();
        assert_eq!(outcome, JoinOutcome::Rejected(JoinRejection::AlreadyJoined));

        let racers = registry.list().await.unwrap();
        assert_eq!(racers.len(), 1);
        assert_eq!(racers[0].display_name, "alice");
    }

    #[tokio::test]
    async fn long_display_name_is_rejected() {
        let registry = registry();
        let name = "x".repeat(MAX_DISPLAY_NAME_CHARS + 1);

        let outcome = registry.join("1", &name, &context("!race join")).await.unwrap();
        assert_eq!(outcome, JoinOutcome::Rejected(JoinRejection::NameTooLong));
        assert!(registry.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn capacity_admits_up_to_the_threshold() {
        // 30 per lane, 121 per racer, 54 fixed: three racers fit in 450.
        let limits = RosterLimits {
            track_length: 10,
            message_ceiling: 450,
            ..RosterLimits::default()
        };
        assert_eq!(limits.max_racers(), 3);
        let registry = registry_with(limits, StaticIcons::default());

        for id in ["1", "2", "3"] {
            joined(registry.join(id, id, &context("!race join")).await.unwrap());
        }
        let outcome = registry.join("4", "4", &context("!race join")).await.unwrap();
        assert_eq!(outcome, JoinOutcome::Rejected(JoinRejection::RosterFull));
        assert_eq!(registry.list().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn join_resolves_custom_icon() {
        let registry = registry_with(
            RosterLimits::default(),
            StaticIcons::with("parrot", "<:parrot:42>"),
        );

        let racer = joined(
            registry
                .join("1", "alice", &context("!race join :parrot:"))
                .await
                .unwrap(),
        );
        assert_eq!(racer.icon, "<:parrot:42>");
    }

    #[tokio::test]
    async fn unknown_icon_keeps_raw_token() {
        let registry = registry();
        let racer = joined(
            registry
                .join("1", "alice", &context("!race join :snail:"))
                .await
                .unwrap(),
        );
        assert_eq!(racer.icon, ":snail:");
    }

    #[tokio::test]
    async fn long_custom_emoji_name_resolves_to_markup() {
        let name = "a".repeat(MAX_DISPLAY_NAME_CHARS);
        let markup = format!("<a:{name}:{}>", "1".repeat(20));
        let registry = registry_with(RosterLimits::default(), StaticIcons::with(&name, &markup));

        let racer = joined(
            registry
                .join("1", "alice", &context(&format!("!race join :{name}:")))
                .await
                .unwrap(),
        );
        assert_eq!(racer.icon, markup);
    }

    #[tokio::test]
    async fn oversized_resolved_icon_keeps_raw_token() {
        let registry = registry_with(
            RosterLimits::default(),
            StaticIcons::with("parrot", &format!("<:parrot:{}>", "7".repeat(60))),
        );

        let racer = joined(
            registry
                .join("1", "alice", &context("!race join :parrot:"))
                .await
                .unwrap(),
        );
        assert_eq!(racer.icon, ":parrot:");
    }

    #[tokio::test]
    async fn pending_icon_lookup_does_not_hold_the_roster() {
        let registry = Arc::new(RacerRegistry::new(
            Arc::new(InMemoryRosterStore::default()),
            Arc::new(HangingIcons),
            RosterLimits::default(),
        ));
        joined(registry.join("1", "alice", &context("!race join")).await.unwrap());

        let pending_join = {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .join("2", "bob", &context("!race join :parrot:"))
                    .await
            })
        };
        tokio::task::yield_now().await;

        let racers = tokio::time::timeout(Duration::from_secs(2), registry.list())
            .await
            .expect("list should not wait for the icon lookup")
            .unwrap();
        assert_eq!(racers.len(), 1);
        tokio::time::timeout(Duration::from_secs(2), registry.leave("1"))
            .await
            .expect("leave should not wait for the icon lookup")
            .unwrap();
        assert!(registry.list().await.unwrap().is_empty());

        pending_join.abort();
    }

    #[tokio::test]
    async fn icon_lookup_timeout_falls_back_to_raw_token() {
        let registry = RacerRegistry::new(
            Arc::new(InMemoryRosterStore::default()),
            Arc::new(HangingIcons),
            RosterLimits::default(),
        )
        .with_icon_timeout(Duration::from_millis(20));

        let racer = joined(
            tokio::time::timeout(
                Duration::from_secs(2),
                registry.join("1", "alice", &context("!race join :parrot:")),
            )
            .await
            .expect("join should give up on the icon lookup")
            .unwrap(),
        );
        assert_eq!(racer.icon, ":parrot:");
        assert_eq!(registry.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn icon_lookup_failure_does_not_block_join() {
        let registry = registry_with(RosterLimits::default(), StaticIcons::failing());
        let racer = joined(
            registry
                .join("1", "alice", &context("!race join :parrot:"))
                .await
                .unwrap(),
        );
        assert_eq!(racer.icon, ":parrot:");
    }

    #[tokio::test]
    async fn join_without_icon_uses_default() {
        let registry = registry();
        let racer = joined(registry.join("1", "alice", &context("!race join")).await.unwrap());
        assert_eq!(racer.icon, racing_common::DEFAULT_RACER_ICON);
    }

    #[tokio::test]
    async fn leave_is_idempotent() {
        let registry = registry();
        joined(registry.join("1", "alice", &context("!race join")).await.unwrap());
        joined(registry.join("2", "bob", &context("!race join")).await.unwrap());

        registry.leave("1").await.unwrap();
        registry.leave("1").await.unwrap();
        registry.leave("missing").await.unwrap();

        let racers = registry.list().await.unwrap();
        assert_eq!(racers.len(), 1);
        assert_eq!(racers[0].racer_id, "2");
    }

    #[tokio::test]
    async fn reset_clears_roster_and_allows_rejoin() {
        let registry = registry();
        joined(registry.join("1", "alice", &context("!race join")).await.unwrap());
        registry.reset().await.unwrap();
        assert!(registry.list().await.unwrap().is_empty());

        joined(registry.join("1", "alice", &context("!race join")).await.unwrap());
        assert_eq!(registry.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn store_errors_propagate() {
        let registry = RacerRegistry::new(
            Arc::new(FailingRosterStore),
            Arc::new(StaticIcons::default()),
            RosterLimits::default(),
        );

        let error = registry
            .join("1", "alice", &context("!race join"))
            .await
            .unwrap_err();
        assert!(error.to_string().contains("failed to load roster"));
        assert!(registry.list().await.is_err());
    }

    #[tokio::test]
    async fn concurrent_joins_never_exceed_capacity() {
        let limits = RosterLimits {
            track_length: 10,
            message_ceiling: 450,
            ..RosterLimits::default()
        };
        let registry = Arc::new(registry_with(limits, StaticIcons::default()));

        let mut tasks = Vec::new();
        for index in 0..10 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let id = index.to_string();
                registry.join(&id, &id, &context("!race join")).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(registry.list().await.unwrap().len(), 3);
    }
}
