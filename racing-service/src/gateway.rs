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

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use racing_common::icon_token_name;
use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use serde_json::json;

pub type MessageId = String;

const DISCORD_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Where a chat event came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatLocation {
    pub channel_id: String,
    pub guild_id: Option<String>,
}

#[async_trait]
pub trait ChatGateway: Send + Sync {
    async fn send_message(&self, channel_id: &str, content: &str) -> anyhow::Result<MessageId>;
    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        content: &str,
    ) -> anyhow::Result<()>;
}

#[async_trait]
pub trait IconLookup: Send + Sync {
    /// Renderable form of an `:emoji:` token, `None` when the token names no
    /// custom emoji visible from `location`.
    async fn lookup_icon(
        &self,
        token: &str,
        location: &ChatLocation,
    ) -> anyhow::Result<Option<String>>;
}

#[derive(Debug, Deserialize)]
struct CreatedMessage {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ChannelInfo {
    #[serde(default)]
    guild_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GuildEmoji {
    id: Option<String>,
    name: Option<String>,
    #[serde(default)]
    animated: bool,
}

pub fn renderable_emoji(name: &str, id: &str, animated: bool) -> String {
    if animated {
        format!("<a:{name}:{id}>")
    } else {
        format!("<:{name}:{id}>")
    }
}

#[derive(Clone)]
pub struct DiscordRestGateway {
    client: reqwest::Client,
    base_url: String,
    bot_token: String,
}

impl DiscordRestGateway {
    pub fn new(base_url: impl Into<String>, bot_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            bot_token: bot_token.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.endpoint(path))
            .timeout(DISCORD_REQUEST_TIMEOUT)
            .header("Authorization", format!("Bot {}", self.bot_token))
    }

    async fn execute(request: RequestBuilder, what: &str) -> anyhow::Result<reqwest::Response> {
        let response = request
            .send()
            .await
            .with_context(|| format!("failed to call discord: {what}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<response body unavailable>".to_string());
            anyhow::bail!("discord returned {status} for {what}: {body}");
        }

        Ok(response)
    }

    async fn guild_for_channel(&self, channel_id: &str) -> anyhow::Result<Option<String>> {
        let response = Self::execute(
            self.request(Method::GET, &format!("channels/{channel_id}")),
            "get channel",
        )
        .await?;
        let channel: ChannelInfo = response
            .json()
            .await
            .context("failed to decode discord channel")?;
        Ok(channel.guild_id)
    }

    async fn guild_emojis(&self, guild_id: &str) -> anyhow::Result<Vec<GuildEmoji>> {
        let response = Self::execute(
            self.request(Method::GET, &format!("guilds/{guild_id}/emojis")),
            "list guild emojis",
        )
        .await?;
        response
            .json()
            .await
            .context("failed to decode discord guild emojis")
    }
}

#[async_trait]
impl ChatGateway for DiscordRestGateway {
    async fn send_message(&self, channel_id: &str, content: &str) -> anyhow::Result<MessageId> {
        let response = Self::execute(
            self.request(Method::POST, &format!("channels/{channel_id}/messages"))
                .json(&json!({ "content": content })),
            "create message",
        )
        .await?;
        let created: CreatedMessage = response
            .json()
            .await
            .context("failed to decode discord message")?;
        Ok(created.id)
    }

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        content: &str,
    ) -> anyhow::Result<()> {
        Self::execute(
            self.request(
                Method::PATCH,
                &format!("channels/{channel_id}/messages/{message_id}"),
            )
            .json(&json!({ "content": content })),
            "edit message",
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl IconLookup for DiscordRestGateway {
    async fn lookup_icon(
        &self,
        token: &str,
        location: &ChatLocation,
    ) -> anyhow::Result<Option<String>> {
        let Some(name) = icon_token_name(token) else {
            return Ok(None);
        };
        let guild_id = match &location.guild_id {
            Some(guild_id) => Some(guild_id.clone()),
            None => self.guild_for_channel(&location.channel_id).await?,
        };
        let Some(guild_id) = guild_id else {
            return Ok(None);
        };

        let emojis = self.guild_emojis(&guild_id).await?;
        Ok(find_emoji(&emojis, name))
    }
}

fn find_emoji(emojis: &[GuildEmoji], name: &str) -> Option<String> {
    emojis.iter().find_map(|emoji| match (&emoji.id, &emoji.name) {
        (Some(id), Some(emoji_name)) if emoji_name == name => {
            Some(renderable_emoji(emoji_name, id, emoji.animated))
        }
        _ => None,
    })
}
