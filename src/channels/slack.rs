//! Slack Events API adapter.
//!
//! Verification: HMAC-SHA256 over `v0:<timestamp>:<raw body>` with the
//! signing secret, hex-encoded with a `v0=` prefix, compared against
//! `X-Slack-Signature`. Requests older than five minutes (by
//! `X-Slack-Request-Timestamp`) are rejected outright to block replay.
//! The one-time `url_verification` handshake echoes `challenge` back.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::channels::common::{constant_time_eq, hmac_sha256_hex};
use crate::channels::ChannelState;
use crate::domain::{MessengerType, UserMessage};
use crate::error::AppError;

const TIMESTAMP_SKEW_LIMIT_SECS: i64 = 5 * 60;

#[derive(Debug, Deserialize)]
struct SlackEnvelope {
    #[serde(rename = "type")]
    envelope_type: String,
    challenge: Option<String>,
    event: Option<SlackEvent>,
    event_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SlackEvent {
    #[serde(rename = "type")]
    event_type: String,
    user: Option<String>,
    text: Option<String>,
    channel: Option<String>,
    bot_id: Option<String>,
}

pub async fn handle_webhook(
    State(state): State<ChannelState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let config = state
        .config
        .credentials
        .slack
        .as_ref()
        .ok_or_else(|| AppError::Upstream("Slack adapter not configured".to_string()))?;

    let timestamp_header = headers
        .get("X-Slack-Request-Timestamp")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Authentication("missing X-Slack-Request-Timestamp".to_string()))?;
    let timestamp: i64 = timestamp_header
        .parse()
        .map_err(|_| AppError::Authentication("malformed request timestamp".to_string()))?;
    let skew = (Utc::now().timestamp() - timestamp).abs();
    if skew > TIMESTAMP_SKEW_LIMIT_SECS {
        return Err(AppError::Authentication("request timestamp outside allowed skew".to_string()));
    }

    let signature = headers
        .get("X-Slack-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Authentication("missing X-Slack-Signature".to_string()))?;

    let base = format!("v0:{timestamp}:{}", String::from_utf8_lossy(&body));
    let expected = format!("v0={}", hmac_sha256_hex(&config.signing_secret, base.as_bytes()));
    if !constant_time_eq(&expected, signature) {
        return Err(AppError::Authentication("invalid Slack signature".to_string()));
    }

    let envelope: SlackEnvelope =
        serde_json::from_slice(&body).map_err(|e| AppError::Decoding(e.to_string()))?;

    if envelope.envelope_type == "url_verification" {
        let challenge = envelope.challenge.unwrap_or_default();
        return Ok(Json(serde_json::json!({ "challenge": challenge })).into_response());
    }

    let Some(event) = envelope.event else {
        return Ok(StatusCode::OK.into_response());
    };
    if event.event_type != "message" || event.bot_id.is_some() {
        return Ok(StatusCode::OK.into_response());
    }
    let (Some(user), Some(text), Some(channel)) = (event.user, event.text, event.channel) else {
        return Ok(StatusCode::OK.into_response());
    };

    if let Some(event_id) = &envelope.event_id {
        if state.dedup.already_seen("slack", event_id).await {
            return Ok(StatusCode::OK.into_response());
        }
    }

    let user_message = UserMessage {
        user_id: format!("slack_{user}"),
        content: text,
        source: MessengerType::Slack,
        timestamp: Utc::now(),
        metadata: HashMap::new(),
    };

    let pipeline = state.pipeline.clone();
    let http = state.http.clone();
    let bot_token = config.bot_token.clone();
    tokio::spawn(async move {
        let response = pipeline.process_message(user_message).await;
        let payload: Value = serde_json::json!({ "channel": channel, "text": response.text });
        if let Err(e) = http
            .post("https://slack.com/api/chat.postMessage")
            .bearer_auth(bot_token)
            .json(&payload)
            .send()
            .await
        {
            tracing::warn!(error = %e, "failed to deliver Slack reply");
        }
    });

    Ok(StatusCode::OK.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_base_string_matches_slack_format() {
        let base = format!("v0:{}:{}", 1531420618, "{\"type\":\"event_callback\"}");
        assert!(base.starts_with("v0:1531420618:"));
    }

    #[test]
    fn timestamp_ten_minutes_old_exceeds_skew_limit() {
        let now = Utc::now().timestamp();
        let ten_minutes_ago = now - 600;
        assert!((now - ten_minutes_ago).abs() > TIMESTAMP_SKEW_LIMIT_SECS);
    }

    #[test]
    fn envelope_carries_optional_event_id() {
        let body = r#"{"type":"event_callback","event_id":"Ev12345","event":{"type":"message","user":"U1","text":"hi","channel":"C1"}}"#;
        let envelope: SlackEnvelope = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.event_id.as_deref(), Some("Ev12345"));
    }
}
