//! Microsoft Teams (Bot Framework) adapter.
//!
//! Verification: the bearer token carried in `Authorization` must equal
//! the HMAC-SHA256 of the raw body, keyed with the app password and
//! base64-encoded. Teams activities carry their own callback location —
//! `serviceUrl` plus `conversation.id` — so the reply destination is read
//! from the activity itself rather than configured statically.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::channels::common::{constant_time_eq, hmac_sha256_base64};
use crate::channels::ChannelState;
use crate::domain::{MessengerType, UserMessage};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
struct TeamsActivity {
    #[serde(rename = "type")]
    activity_type: String,
    text: Option<String>,
    from: Option<TeamsAccount>,
    #[serde(rename = "serviceUrl")]
    service_url: String,
    conversation: TeamsConversation,
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TeamsAccount {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TeamsConversation {
    id: String,
}

#[derive(Debug, Serialize)]
struct ReplyActivity {
    #[serde(rename = "type")]
    activity_type: &'static str,
    text: String,
}

pub async fn handle_webhook(
    State(state): State<ChannelState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let config = state
        .config
        .credentials
        .teams
        .as_ref()
        .ok_or_else(|| AppError::Upstream("Teams adapter not configured".to_string()))?;

    let auth_header = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Authentication("missing Authorization header".to_string()))?;
    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Authentication("malformed Authorization header".to_string()))?;

    let expected = hmac_sha256_base64(&config.app_password, &body);
    if !constant_time_eq(&expected, token) {
        return Err(AppError::Authentication("invalid Teams bearer token".to_string()));
    }

    let activity: TeamsActivity =
        serde_json::from_slice(&body).map_err(|e| AppError::Decoding(e.to_string()))?;

    if activity.activity_type != "message" {
        return Ok(StatusCode::OK);
    }
    let Some(text) = activity.text else {
        return Ok(StatusCode::OK);
    };
    let Some(from) = activity.from else {
        return Ok(StatusCode::OK);
    };

    if let Some(activity_id) = &activity.id {
        if state.dedup.already_seen("teams", activity_id).await {
            return Ok(StatusCode::OK);
        }
    }

    let user_message = UserMessage {
        user_id: format!("teams_{}", from.id),
        content: text,
        source: MessengerType::Teams,
        timestamp: Utc::now(),
        metadata: HashMap::new(),
    };

    let pipeline = state.pipeline.clone();
    let http = state.http.clone();
    let service_url = activity.service_url;
    let conversation_id = activity.conversation.id;
    let activity_id = activity.id.unwrap_or_default();
    tokio::spawn(async move {
        let response = pipeline.process_message(user_message).await;
        let url = format!(
            "{}/v3/conversations/{}/activities/{}",
            service_url.trim_end_matches('/'),
            conversation_id,
            activity_id
        );
        let reply = ReplyActivity {
            activity_type: "message",
            text: response.text,
        };
        if let Err(e) = http.post(url).json(&reply).send().await {
            tracing::warn!(error = %e, "failed to deliver Teams reply");
        }
    });

    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_must_match_hmac_of_body() {
        let password = "app-password";
        let body = b"{\"type\":\"message\"}";
        let token = hmac_sha256_base64(password, body);
        assert!(constant_time_eq(&token, &hmac_sha256_base64(password, body)));
    }

    #[test]
    fn authorization_header_requires_bearer_prefix() {
        assert_eq!("Bearer abc".strip_prefix("Bearer "), Some("abc"));
        assert_eq!("abc".strip_prefix("Bearer "), None);
    }
}
