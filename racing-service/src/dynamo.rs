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

use std::{collections::HashMap, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, timeout::TimeoutConfig};
use aws_sdk_dynamodb::{
    Client as DynamoClient,
    types::{AttributeValue, DeleteRequest, PutRequest, ReturnValue, WriteRequest},
};
use chrono::{DateTime, SecondsFormat, Utc};
use racing_common::{RaceHeaderRecord, Racer, StandingRecord};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    recorder::RaceHistoryStore,
    registry::{InsertOutcome, RosterStore},
};

const BATCH_WRITE_LIMIT: usize = 25;

type Item = HashMap<String, AttributeValue>;

/// Client for the configured DynamoDB endpoint or region, `None` when
/// neither `DYNAMODB_ENDPOINT` nor `AWS_REGION` is set.
pub async fn client_from_env(operation_timeout: Duration) -> Option<DynamoClient> {
    if std::env::var("DYNAMODB_ENDPOINT").is_err() && std::env::var("AWS_REGION").is_err() {
        return None;
    }

    let mut loader = aws_config::defaults(BehaviorVersion::latest()).timeout_config(
        TimeoutConfig::builder()
            .operation_timeout(operation_timeout)
            .build(),
    );
    if let Ok(endpoint) = std::env::var("DYNAMODB_ENDPOINT") {
        loader = loader.endpoint_url(endpoint);
    }
    let config = loader.load().await;
    Some(DynamoClient::new(&config))
}

fn av_s(value: impl Into<String>) -> AttributeValue {
    AttributeValue::S(value.into())
}

fn av_n(value: impl ToString) -> AttributeValue {
    AttributeValue::N(value.to_string())
}

fn string_attr(item: &Item, key: &str) -> Option<String> {
    item.get(key).and_then(|value| value.as_s().ok()).cloned()
}

fn racer_to_item(racer: &Racer) -> Item {
    HashMap::from([
        ("racer_id".to_string(), av_s(&racer.racer_id)),
        ("display_name".to_string(), av_s(&racer.display_name)),
        ("icon".to_string(), av_s(&racer.icon)),
        (
            "joined_at".to_string(),
            av_s(racer.joined_at.to_rfc3339_opts(SecondsFormat::Micros, true)),
        ),
    ])
}

fn racer_from_item(item: &Item) -> Option<Racer> {
    let joined_at = DateTime::parse_from_rfc3339(&string_attr(item, "joined_at")?)
        .ok()?
        .with_timezone(&Utc);
    Some(Racer {
        racer_id: string_attr(item, "racer_id")?,
        display_name: string_attr(item, "display_name")?,
        icon: string_attr(item, "icon")?,
        joined_at,
    })
}

fn standing_to_item(standing: &StandingRecord) -> Item {
    HashMap::from([
        ("race_id".to_string(), av_s(&standing.race_id)),
        ("racer_id".to_string(), av_s(&standing.racer_id)),
        ("display_name".to_string(), av_s(&standing.display_name)),
        ("speed".to_string(), av_n(standing.speed)),
        ("finish_tick".to_string(), av_n(standing.finish_tick)),
        ("place".to_string(), av_n(standing.place)),
    ])
}

async fn scan_all(client: &DynamoClient, table_name: &str) -> anyhow::Result<Vec<Item>> {
    let mut items = Vec::new();
    let mut start_key = None;
    loop {
        let response = client
            .scan()
            .table_name(table_name)
            .set_exclusive_start_key(start_key)
            .send()
            .await
            .with_context(|| format!("failed to scan {table_name}"))?;
        items.extend(response.items.unwrap_or_default());
        start_key = response.last_evaluated_key;
        if start_key.is_none() {
            return Ok(items);
        }
    }
}

async fn batch_write(
    client: &DynamoClient,
    table_name: &str,
    requests: Vec<WriteRequest>,
) -> anyhow::Result<()> {
    for chunk in requests.chunks(BATCH_WRITE_LIMIT) {
        let response = client
            .batch_write_item()
            .request_items(table_name, chunk.to_vec())
            .send()
            .await
            .with_context(|| format!("failed to batch write to {table_name}"))?;

        let unprocessed: usize = response
            .unprocessed_items
            .unwrap_or_default()
            .values()
            .map(Vec::len)
            .sum();
        if unprocessed > 0 {
            anyhow::bail!("{unprocessed} writes to {table_name} were left unprocessed");
        }
    }
    Ok(())
}

#[derive(Clone)]
pub struct DynamoRosterStore {
    client: DynamoClient,
    table_name: String,
}

impl DynamoRosterStore {
    pub fn new(client: DynamoClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }
}

#[async_trait]
impl RosterStore for DynamoRosterStore {
    async fn insert_racer(&self, racer: &Racer) -> anyhow::Result<InsertOutcome> {
        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(racer_to_item(racer)))
            .condition_expression("attribute_not_exists(racer_id)")
            .send()
            .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(error)
                if error
                    .as_service_error()
                    .is_some_and(|error| error.is_conditional_check_failed_exception()) =>
            {
                debug!(racer_id = %racer.racer_id, "racer already present in roster table");
                Ok(InsertOutcome::Duplicate)
            }
            Err(error) => Err(error).context("failed to put racer into roster table"),
        }
    }

    async fn remove_racer(&self, racer_id: &str) -> anyhow::Result<bool> {
        let response = self
            .client
            .delete_item()
            .table_name(&self.table_name)
            .key("racer_id", av_s(racer_id))
            .return_values(ReturnValue::AllOld)
            .send()
            .await
            .context("failed to delete racer from roster table")?;
        Ok(response.attributes.is_some())
    }

    async fn clear(&self) -> anyhow::Result<usize> {
        let items = scan_all(&self.client, &self.table_name).await?;
        let mut requests = Vec::with_capacity(items.len());
        for item in &items {
            let Some(racer_id) = item.get("racer_id") else {
                continue;
            };
            let delete = DeleteRequest::builder()
                .key("racer_id", racer_id.clone())
                .build()
                .context("failed to build roster delete request")?;
            requests.push(WriteRequest::builder().delete_request(delete).build());
        }

        let removed = requests.len();
        batch_write(&self.client, &self.table_name, requests).await?;
        Ok(removed)
    }

    async fn list_racers(&self) -> anyhow::Result<Vec<Racer>> {
        let items = scan_all(&self.client, &self.table_name).await?;
        let mut racers: Vec<Racer> = items
            .iter()
            .filter_map(|item| {
                let racer = racer_from_item(item);
                if racer.is_none() {
                    warn!(table = %self.table_name, "skipping malformed roster item");
                }
                racer
            })
            .collect();
        racers.sort_by_key(|racer| racer.joined_at);
        Ok(racers)
    }
}

#[derive(Clone)]
pub struct DynamoRaceHistoryStore {
    client: DynamoClient,
    races_table: String,
    standings_table: String,
}

impl DynamoRaceHistoryStore {
    pub fn new(
        client: DynamoClient,
        races_table: impl Into<String>,
        standings_table: impl Into<String>,
    ) -> Self {
        Self {
            client,
            races_table: races_table.into(),
            standings_table: standings_table.into(),
        }
    }
}

#[async_trait]
impl RaceHistoryStore for DynamoRaceHistoryStore {
    async fn insert_race(&self, recorded_at: DateTime<Utc>) -> anyhow::Result<RaceHeaderRecord> {
        let header = RaceHeaderRecord {
            race_id: Uuid::new_v4().to_string(),
            recorded_at,
        };
        let item = HashMap::from([
            ("race_id".to_string(), av_s(&header.race_id)),
            ("recorded_at".to_string(), av_s(recorded_at.to_rfc3339())),
        ]);

        self.client
            .put_item()
            .table_name(&self.races_table)
            .set_item(Some(item))
            .condition_expression("attribute_not_exists(race_id)")
            .send()
            .await
            .context("failed to put race header")?;
        Ok(header)
    }

    async fn insert_standings(&self, standings: &[StandingRecord]) -> anyhow::Result<()> {
        let mut requests = Vec::with_capacity(standings.len());
        for standing in standings {
            let put = PutRequest::builder()
                .set_item(Some(standing_to_item(standing)))
                .build()
                .context("failed to build standing put request")?;
            requests.push(WriteRequest::builder().put_request(put).build());
        }
        batch_write(&self.client, &self.standings_table, requests).await
    }
}
