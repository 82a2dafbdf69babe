//! WhatsApp Cloud API (Meta) adapter.
//!
//! Two endpoints share one path: Meta's subscription `GET` handshake
//! (compare `hub.verify_token`, echo `hub.challenge` back verbatim) and the
//! message `POST`, verified via HMAC-SHA256 of the raw body with the app
//! secret, hex-encoded with a `sha256=` prefix in `X-Hub-Signature-256`.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::channels::common::{constant_time_eq, hmac_sha256_hex};
use crate::channels::ChannelState;
use crate::domain::{MessengerType, UserMessage};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

pub async fn verify(
    State(state): State<ChannelState>,
    Query(query): Query<VerifyQuery>,
) -> Result<impl IntoResponse, AppError> {
    let config = state
        .config
        .credentials
        .whatsapp
        .as_ref()
        .ok_or_else(|| AppError::Upstream("WhatsApp adapter not configured".to_string()))?;

    let mode = query.mode.as_deref().unwrap_or_default();
    let token = query.verify_token.as_deref().unwrap_or_default();
    let challenge = query.challenge.unwrap_or_default();

    if mode != "subscribe" || !constant_time_eq(&config.verify_token, token) {
        return Err(AppError::Authentication("invalid verify token".to_string()));
    }

    Ok(challenge)
}

struct InboundText {
    from: String,
    text: String,
    message_id: Option<String>,
}

fn extract_text_message(body: &Value) -> Option<InboundText> {
    let entry = body.get("entry")?.as_array()?.first()?;
    let change = entry.get("changes")?.as_array()?.first()?;
    let value = change.get("value")?;
    let message = value.get("messages")?.as_array()?.first()?;
    let from = message.get("from")?.as_str()?.to_string();
    let text = message.get("text")?.get("body")?.as_str()?.to_string();
    let message_id = message.get("id").and_then(|v| v.as_str()).map(str::to_string);
    Some(InboundText { from, text, message_id })
}

pub async fn handle_webhook(
    State(state): State<ChannelState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let config = state
        .config
        .credentials
        .whatsapp
        .as_ref()
        .ok_or_else(|| AppError::Upstream("WhatsApp adapter not configured".to_string()))?;

    let header_value = headers
        .get("X-Hub-Signature-256")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Authentication("missing X-Hub-Signature-256".to_string()))?;
    let signature = header_value
        .strip_prefix("sha256=")
        .ok_or_else(|| AppError::Authentication("malformed signature header".to_string()))?;

    let expected = hmac_sha256_hex(&config.app_secret, &body);
    if !constant_time_eq(&expected, signature) {
        return Err(AppError::Authentication("invalid WhatsApp signature".to_string()));
    }

    let parsed: Value = serde_json::from_slice(&body).map_err(|e| AppError::Decoding(e.to_string()))?;

    let Some(inbound) = extract_text_message(&parsed) else {
        return Ok(StatusCode::OK);
    };
    let InboundText { from, text, message_id } = inbound;

    if let Some(id) = &message_id {
        if state.dedup.already_seen("whatsapp", id).await {
            return Ok(StatusCode::OK);
        }
    }

    let user_message = UserMessage {
        user_id: format!("whatsapp_{from}"),
        content: text,
        source: MessengerType::Whatsapp,
        timestamp: Utc::now(),
        metadata: HashMap::new(),
    };

    let pipeline = state.pipeline.clone();
    let http = state.http.clone();
    let phone_number_id = config.phone_number_id.clone();
    let access_token = config.access_token.clone();
    tokio::spawn(async move {
        let response = pipeline.process_message(user_message).await;
        let url = format!("https://graph.facebook.com/v19.0/{phone_number_id}/messages");
        let payload = serde_json::json!({
            "messaging_product": "whatsapp",
            "to": from,
            "text": { "body": response.text },
        });
        if let Err(e) = http
            .post(url)
            .bearer_auth(access_token)
            .json(&payload)
            .send()
            .await
        {
            tracing::warn!(error = %e, "failed to deliver WhatsApp reply");
        }
    });

    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_text_message_from_webhook_shape() {
        let body = serde_json::json!({
            "entry": [{
                "changes": [{
                    "value": {
                        "messages": [{ "from": "15551234567", "text": { "body": "lunch $12" } }]
                    }
                }]
            }]
        });
        let inbound = extract_text_message(&body).unwrap();
        assert_eq!(inbound.from, "15551234567");
        assert_eq!(inbound.text, "lunch $12");
        assert!(inbound.message_id.is_none());
    }

    #[test]
    fn extracts_message_id_when_present() {
        let body = serde_json::json!({
            "entry": [{
                "changes": [{
                    "value": {
                        "messages": [{
                            "id": "wamid.abc123",
                            "from": "15551234567",
                            "text": { "body": "lunch $12" }
                        }]
                    }
                }]
            }]
        });
        let inbound = extract_text_message(&body).unwrap();
        assert_eq!(inbound.message_id.as_deref(), Some("wamid.abc123"));
    }

    #[test]
    fn signature_header_requires_sha256_prefix() {
        let header = "sha256=abcdef";
        assert_eq!(header.strip_prefix("sha256=").unwrap(), "abcdef");
        assert!("abcdef".strip_prefix("sha256=").is_none());
    }
}
