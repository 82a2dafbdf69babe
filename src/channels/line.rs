//! LINE Messaging API adapter.
//!
//! Verification: HMAC-SHA256 of the raw body with the channel secret,
//! base64-encoded, compared against `X-Line-Signature`. Replies are
//! deferred — delivered via the event's single-use reply token to
//! `.../message/reply` in a detached task so the webhook response itself
//! returns immediately.

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

const LINE_REPLY_URL: &str = "https://api.line.me/v2/bot/message/reply";

#[derive(Debug, Deserialize)]
struct LineWebhookBody {
    events: Vec<LineEvent>,
}

#[derive(Debug, Deserialize)]
struct LineEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(rename = "replyToken")]
    reply_token: Option<String>,
    source: Option<LineSource>,
    message: Option<LineMessage>,
}

#[derive(Debug, Deserialize)]
struct LineSource {
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LineMessage {
    id: Option<String>,
    #[serde(rename = "type")]
    message_type: String,
    text: Option<String>,
}

#[derive(Debug, Serialize)]
struct ReplyRequest {
    #[serde(rename = "replyToken")]
    reply_token: String,
    messages: Vec<ReplyMessage>,
}

#[derive(Debug, Serialize)]
struct ReplyMessage {
    #[serde(rename = "type")]
    message_type: &'static str,
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
        .line
        .as_ref()
        .ok_or_else(|| AppError::Upstream("LINE adapter not configured".to_string()))?;

    let signature = headers
        .get("X-Line-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Authentication("missing X-Line-Signature".to_string()))?;

    let expected = hmac_sha256_base64(&config.channel_secret, &body);
    if !constant_time_eq(&expected, signature) {
        return Err(AppError::Authentication("invalid LINE signature".to_string()));
    }

    let parsed: LineWebhookBody =
        serde_json::from_slice(&body).map_err(|e| AppError::Decoding(e.to_string()))?;

    for event in parsed.events {
        if event.event_type != "message" {
            continue;
        }
        let Some(message) = &event.message else { continue };
        if message.message_type != "text" {
            continue;
        }
        let Some(text) = &message.text else { continue };
        let Some(user_id) = event.source.as_ref().and_then(|s| s.user_id.clone()) else {
            continue;
        };
        let Some(reply_token) = event.reply_token.clone() else {
            continue;
        };

        if let Some(message_id) = &message.id {
            if state.dedup.already_seen("line", message_id).await {
                continue;
            }
        }

        let user_message = UserMessage {
            user_id,
            content: text.clone(),
            source: MessengerType::Line,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        };

        let pipeline = state.pipeline.clone();
        let http = state.http.clone();
        let access_token = config.channel_access_token.clone();
        tokio::spawn(async move {
            let response = pipeline.process_message(user_message).await;
            let reply = ReplyRequest {
                reply_token,
                messages: vec![ReplyMessage {
                    message_type: "text",
                    text: response.text,
                }],
            };
            if let Err(e) = http
                .post(LINE_REPLY_URL)
                .bearer_auth(access_token)
                .json(&reply)
                .send()
                .await
            {
                tracing::warn!(error = %e, "failed to deliver LINE reply");
            }
        });
    }

    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_must_match_hmac_of_raw_body() {
        let secret = "shh";
        let body = b"{\"events\":[]}";
        let sig = hmac_sha256_base64(secret, body);
        assert!(constant_time_eq(&sig, &hmac_sha256_base64(secret, body)));
        assert!(!constant_time_eq(&sig, &hmac_sha256_base64("other", body)));
    }

    #[test]
    fn non_text_message_events_are_ignored() {
        let body = r#"{"events":[{"type":"message","replyToken":"t","source":{"userId":"u1"},"message":{"type":"sticker"}}]}"#;
        let parsed: LineWebhookBody = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.events[0].message.as_ref().unwrap().message_type, "sticker");
    }
}
