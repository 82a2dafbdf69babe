//! Discord interactions adapter.
//!
//! Discord's gateway already authenticates the interaction before it
//! reaches this endpoint, so no signature check is performed here. A
//! `PING` (type 1) is answered with a `PONG` (type 1) with no pipeline
//! call and no persistence. Everything else is acknowledged deferred
//! (type 5) immediately, then the real reply is delivered as a followup
//! message once the pipeline finishes — this lets a slow AI call run past
//! Discord's three-second interaction response budget.

use axum::{extract::State, response::IntoResponse, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;

use crate::channels::ChannelState;
use crate::domain::{MessengerType, UserMessage};
use crate::error::AppError;

const INTERACTION_PING: i64 = 1;
const INTERACTION_APPLICATION_COMMAND: i64 = 2;
const RESPONSE_PONG: i64 = 1;
const RESPONSE_DEFERRED_CHANNEL_MESSAGE: i64 = 5;

#[derive(Debug, Deserialize)]
struct DiscordInteraction {
    id: Option<String>,
    #[serde(rename = "type")]
    interaction_type: i64,
    token: String,
    member: Option<DiscordMember>,
    user: Option<DiscordUser>,
    data: Option<DiscordInteractionData>,
}

#[derive(Debug, Deserialize)]
struct DiscordMember {
    user: DiscordUser,
}

#[derive(Debug, Deserialize)]
struct DiscordUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DiscordInteractionData {
    #[serde(default)]
    options: Vec<DiscordOption>,
}

#[derive(Debug, Deserialize)]
struct DiscordOption {
    value: Option<String>,
}

#[derive(Debug, Serialize)]
struct FollowupMessage {
    content: String,
}

fn followup_url(application_id: &str, token: &str) -> String {
    format!("https://discord.com/api/v10/webhooks/{application_id}/{token}")
}

pub async fn handle_webhook(
    State(state): State<ChannelState>,
    Json(interaction): Json<DiscordInteraction>,
) -> Result<impl IntoResponse, AppError> {
    if interaction.interaction_type == INTERACTION_PING {
        return Ok(Json(json!({ "type": RESPONSE_PONG })));
    }

    if interaction.interaction_type != INTERACTION_APPLICATION_COMMAND {
        return Ok(Json(json!({ "type": RESPONSE_PONG })));
    }

    let config = state
        .config
        .credentials
        .discord
        .as_ref()
        .ok_or_else(|| AppError::Upstream("Discord adapter not configured".to_string()))?;

    let user_id = interaction
        .member
        .as_ref()
        .map(|m| m.user.id.clone())
        .or_else(|| interaction.user.as_ref().map(|u| u.id.clone()))
        .ok_or_else(|| AppError::Decoding("interaction has no user".to_string()))?;

    if let Some(interaction_id) = &interaction.id {
        if state.dedup.already_seen("discord", interaction_id).await {
            return Ok(Json(json!({ "type": RESPONSE_DEFERRED_CHANNEL_MESSAGE })));
        }
    }

    let text = interaction
        .data
        .as_ref()
        .and_then(|d| d.options.first())
        .and_then(|o| o.value.clone())
        .unwrap_or_default();

    let user_message = UserMessage {
        user_id: format!("discord_{user_id}"),
        content: text,
        source: MessengerType::Discord,
        timestamp: Utc::now(),
        metadata: HashMap::new(),
    };

    let pipeline = state.pipeline.clone();
    let http = state.http.clone();
    let application_id = config.application_id.clone();
    let interaction_token = interaction.token;
    tokio::spawn(async move {
        let response = pipeline.process_message(user_message).await;
        let followup = FollowupMessage { content: response.text };
        if let Err(e) = http
            .post(followup_url(&application_id, &interaction_token))
            .json(&followup)
            .send()
            .await
        {
            tracing::warn!(error = %e, "failed to deliver Discord followup");
        }
    });

    Ok(Json(json!({ "type": RESPONSE_DEFERRED_CHANNEL_MESSAGE })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_type_is_one() {
        assert_eq!(INTERACTION_PING, 1);
        assert_eq!(RESPONSE_PONG, 1);
    }

    #[test]
    fn ping_interaction_parses() {
        let body = r#"{"type":1,"id":"x","token":"t"}"#;
        let interaction: DiscordInteraction = serde_json::from_str(body).unwrap();
        assert_eq!(interaction.interaction_type, INTERACTION_PING);
    }
}
