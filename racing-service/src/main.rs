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

mod dynamo;
mod gateway;
mod recorder;
mod registry;
mod simulator;
#[cfg(test)]
mod test_support;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use racing_common::{
    DEFAULT_COMMAND_PREFIX, RaceCommand, RacePhase, RaceSettings, Racer, expand_env_vars,
    help_message, parse_race_command, roster_message,
};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

use crate::{
    dynamo::{DynamoRaceHistoryStore, DynamoRosterStore},
    gateway::{ChatGateway, ChatLocation, DiscordRestGateway},
    recorder::{RaceHistoryStore, ResultsRecorder},
    registry::{InMemoryRosterStore, JoinContext, JoinOutcome, RacerRegistry, RosterStore},
    simulator::{RaceSimulator, RaceTicket, StartOutcome},
};

const DEFAULT_DISCORD_API_BASE_URL: &str = "https://discord.com/api/v10";
const DEFAULT_PERSISTENCE_TIMEOUT_SECONDS: u64 = 5;

#[derive(Clone)]
struct AppState {
    registry: Arc<RacerRegistry>,
    simulator: RaceSimulator,
    gateway: Arc<dyn ChatGateway>,
    command_prefix: String,
}

impl AppState {
    async fn from_env() -> anyhow::Result<Self> {
        let bot_token =
            std::env::var("DISCORD_BOT_TOKEN").context("DISCORD_BOT_TOKEN must be set")?;
        let discord = Arc::new(DiscordRestGateway::new(
            std::env::var("DISCORD_API_BASE_URL")
                .ok()
                .unwrap_or_else(|| DEFAULT_DISCORD_API_BASE_URL.to_string()),
            bot_token,
        ));
        let command_prefix = std::env::var("RACING_COMMAND_PREFIX")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_COMMAND_PREFIX.to_string());

        let settings = load_race_settings().unwrap_or_default().normalized();
        info!(
            track_length = settings.track_length,
            tick_period_ms = settings.tick_period.as_millis() as u64,
            max_racers = settings.roster_limits().max_racers(),
            "race settings loaded"
        );

        let persistence_timeout = Duration::from_secs(
            std::env::var("PERSISTENCE_TIMEOUT_SECONDS")
                .ok()
                .and_then(|value| value.trim().parse().ok())
                .unwrap_or(DEFAULT_PERSISTENCE_TIMEOUT_SECONDS),
        );
        let (roster_store, history_store): (
            Arc<dyn RosterStore>,
            Option<Arc<dyn RaceHistoryStore>>,
        ) = match dynamo::client_from_env(persistence_timeout).await {
            Some(client) => {
                info!("DynamoDB configured; roster and race history are persisted");
                (
                    Arc::new(DynamoRosterStore::new(
                        client.clone(),
                        env_or("RACERS_TABLE", "racers"),
                    )),
                    Some(Arc::new(DynamoRaceHistoryStore::new(
                        client,
                        env_or("RACE_HISTORY_TABLE", "race_history"),
                        env_or("RACE_STANDINGS_TABLE", "race_standings"),
                    ))),
                )
            }
            None => {
                info!("DynamoDB not configured; roster kept in memory");
                (Arc::new(InMemoryRosterStore::default()), None)
            }
        };

        let registry = Arc::new(RacerRegistry::new(
            roster_store,
            discord.clone(),
            settings.roster_limits(),
        ));
        let recorder = ResultsRecorder::new(history_store, settings.track_length);
        if !recorder.is_enabled() {
            info!("race history persistence disabled");
        }
        let simulator = RaceSimulator::new(registry.clone(), discord.clone(), recorder, settings);

        Ok(Self {
            registry,
            simulator,
            gateway: discord,
            command_prefix,
        })
    }
}

fn env_or(var_name: &str, default: &str) -> String {
    std::env::var(var_name)
        .ok()
        .unwrap_or_else(|| default.to_string())
}

#[derive(Debug, Clone, Deserialize)]
struct MessageAuthor {
    id: String,
    display_name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct MessageEvent {
    content: String,
    author: MessageAuthor,
    channel_id: String,
    #[serde(default)]
    guild_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
struct MessageEventResponse {
    handled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<RaceCommand>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply: Option<String>,
}

impl MessageEventResponse {
    fn ignored() -> Self {
        Self {
            handled: false,
            command: None,
            reply: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
struct RaceStatusResponse {
    phase: RacePhase,
    max_racers: usize,
    track_length: u32,
}

/// Optional race tuning read from `RACE_SETTINGS_PATH`.
#[derive(Debug, Default, Deserialize)]
struct RaceSettingsFile {
    track_length: Option<u32>,
    tick_period_ms: Option<u64>,
    countdown_step_ms: Option<u64>,
    stall_probability: Option<f64>,
    boost_probability: Option<f64>,
    message_ceiling: Option<usize>,
}

impl RaceSettingsFile {
    fn apply(self, mut settings: RaceSettings) -> RaceSettings {
        if let Some(track_length) = self.track_length {
            settings.track_length = track_length;
        }
        if let Some(tick_period_ms) = self.tick_period_ms {
            settings.tick_period = Duration::from_millis(tick_period_ms);
        }
        if let Some(countdown_step_ms) = self.countdown_step_ms {
            settings.countdown_step = Duration::from_millis(countdown_step_ms);
        }
        if let Some(stall_probability) = self.stall_probability {
            settings.stall_probability = stall_probability;
        }
        if let Some(boost_probability) = self.boost_probability {
            settings.boost_probability = boost_probability;
        }
        if let Some(message_ceiling) = self.message_ceiling {
            settings.message_ceiling = message_ceiling;
        }
        settings.normalized()
    }
}

fn parse_race_settings(raw: &str) -> anyhow::Result<RaceSettings> {
    let file = serde_yaml::from_str::<RaceSettingsFile>(&expand_env_vars(raw))
        .context("failed to parse race settings yaml")?;
    Ok(file.apply(RaceSettings::default()))
}

fn load_race_settings() -> Option<RaceSettings> {
    let path = std::env::var("RACE_SETTINGS_PATH")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())?;

    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(error) => {
            warn!(path = %path, error = %error, "failed to read race settings file");
            return None;
        }
    };

    if raw.trim().is_empty() {
        warn!(path = %path, "race settings file is empty");
        return None;
    }

    match parse_race_settings(&raw) {
        Ok(settings) => Some(settings),
        Err(error) => {
            warn!(path = %path, error = %format!("{error:#}"), "using default race settings");
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "racing_service=debug,tower_http=info".to_string()),
        )
        .init();

    let state = AppState::from_env().await?;
    let app = build_router(state);

    let bind_addr = parse_bind_addr("RACING_BIND", "0.0.0.0:8085")?;
    info!(%bind_addr, "racing-service listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/events/message", post(message_event_handler))
        .route("/v1/roster", get(get_roster_handler))
        .route("/v1/race", get(get_race_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn parse_bind_addr(var_name: &str, default: &str) -> anyhow::Result<SocketAddr> {
    let value = std::env::var(var_name)
        .ok()
        .unwrap_or_else(|| default.to_string());
    value.parse().context(format!("invalid {var_name}"))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true, "service": "racing-service"}))
}

async fn get_roster_handler(State(state): State<AppState>) -> Result<Json<Vec<Racer>>, ApiError> {
    let racers = state.registry.list().await.map_err(ApiError::from_command)?;
    Ok(Json(racers))
}

async fn get_race_handler(State(state): State<AppState>) -> Json<RaceStatusResponse> {
    let settings = state.simulator.settings();
    Json(RaceStatusResponse {
        phase: state.simulator.phase(),
        max_racers: state.registry.limits().max_racers(),
        track_length: settings.track_length,
    })
}

async fn message_event_handler(
    State(state): State<AppState>,
    Json(event): Json<MessageEvent>,
) -> Result<Json<MessageEventResponse>, ApiError> {
    let Some(command) = parse_race_command(&event.content, &state.command_prefix) else {
        return Ok(Json(MessageEventResponse::ignored()));
    };
    if event.channel_id.trim().is_empty() || event.author.id.trim().is_empty() {
        return Err(ApiError::bad_request(
            "message event needs a channel_id and an author id",
        ));
    }

    debug!(
        command = command.verb(),
        racer_id = %event.author.id,
        channel_id = %event.channel_id,
        "race command received"
    );
    let reply = run_command(&state, command, &event).await?;
    if let Some(reply) = &reply {
        if let Err(error) = state.gateway.send_message(&event.channel_id, reply).await {
            warn!(
                channel_id = %event.channel_id,
                error = %error,
                "failed to post race command reply"
            );
        }
    }

    Ok(Json(MessageEventResponse {
        handled: true,
        command: Some(command),
        reply,
    }))
}

async fn run_command(
    state: &AppState,
    command: RaceCommand,
    event: &MessageEvent,
) -> Result<Option<String>, ApiError> {
    let author = &event.author;
    let reply = match command {
        RaceCommand::Join => {
            let context = JoinContext {
                command_text: event.content.clone(),
                location: ChatLocation {
                    channel_id: event.channel_id.clone(),
                    guild_id: event.guild_id.clone(),
                },
            };
            match state
                .registry
                .join(&author.id, &author.display_name, &context)
                .await
                .map_err(ApiError::from_command)?
            {
                JoinOutcome::Joined(racer) => {
                    format!("{} successfully joined the next race", racer.display_name)
                }
                JoinOutcome::Rejected(reason) => reason.message().to_string(),
            }
        }
        RaceCommand::Leave => {
            state
                .registry
                .leave(&author.id)
                .await
                .map_err(ApiError::from_command)?;
            format!("{} left the next race", author.display_name)
        }
        RaceCommand::Reset => {
            state
                .registry
                .reset()
                .await
                .map_err(ApiError::from_command)?;
            "Racing roster has been reset".to_string()
        }
        RaceCommand::ListJoined => {
            let racers = state
                .registry
                .list()
                .await
                .map_err(ApiError::from_command)?;
            roster_message(&racers)
        }
        RaceCommand::Start => {
            match state
                .simulator
                .start(&event.channel_id)
                .await
                .map_err(ApiError::from_command)?
            {
                // The race task posts its own messages from here on.
                StartOutcome::Started(ticket) => {
                    info!(
                        channel_id = %event.channel_id,
                        racers = ticket.racers,
                        "race started"
                    );
                    tokio::spawn(watch_race(ticket));
                    return Ok(None);
                }
                StartOutcome::Rejected(reason) => reason.message().to_string(),
            }
        }
        RaceCommand::Help => help_message(&state.command_prefix),
    };
    Ok(Some(reply))
}

async fn watch_race(ticket: RaceTicket) {
    match ticket.task.await {
        Ok(Some(outcome)) => debug!(
            ticks = outcome.ticks,
            finishers = outcome.results.len(),
            "race task completed"
        ),
        Ok(None) => debug!("race task ended without results"),
        Err(error) => warn!(error = %error, "race task failed"),
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn from_command(error: anyhow::Error) -> Self {
        warn!(error = %format!("{error:#}"), "race command failed");
        Self::internal("race command failed")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(status = %self.status, message = %self.message, "request failed");
        (
            self.status,
            Json(serde_json::json!({"error": self.message})),
        )
            .into_response()
    }
}
