//! Telegram Bot API adapter.
//!
//! Verification is an optional simple-equality secret match against the
//! `X-Telegram-Bot-Api-Secret-Token` header (Telegram's webhook secret
//! mechanism has no HMAC, just a shared string). Telegram numeric user ids
//! are not globally unique across providers, so they are namespaced with a
//! `telegram_` prefix before reaching the pipeline. Replies are delivered
//! via a separate outbound call to `sendMessage`.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::channels::common::constant_time_eq;
use crate::channels::ChannelState;
use crate::domain::{MessengerType, UserMessage};
use crate::error::AppError;

fn send_message_url(bot_token: &str) -> String {
    format!("https://api.telegram.org/bot{bot_token}/sendMessage")
}

#[derive(Debug, Deserialize)]
struct TelegramUpdate {
    message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    message_id: i64,
    chat: TelegramChat,
    from: Option<TelegramUser>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TelegramUser {
    id: i64,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest {
    chat_id: i64,
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
        .telegram
        .as_ref()
        .ok_or_else(|| AppError::Upstream("Telegram adapter not configured".to_string()))?;

    if let Some(expected_secret) = &config.webhook_secret {
        let provided = headers
            .get("X-Telegram-Bot-Api-Secret-Token")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Authentication("missing webhook secret token".to_string()))?;
        if !constant_time_eq(expected_secret, provided) {
            return Err(AppError::Authentication("invalid webhook secret token".to_string()));
        }
    }

    let update: TelegramUpdate =
        serde_json::from_slice(&body).map_err(|e| AppError::Decoding(e.to_string()))?;

    let Some(message) = update.message else {
        return Ok(StatusCode::OK);
    };
    let Some(text) = message.text else {
        return Ok(StatusCode::OK);
    };
    let Some(from) = message.from else {
        return Ok(StatusCode::OK);
    };

    if state
        .dedup
        .already_seen("telegram", &message.message_id.to_string())
        .await
    {
        return Ok(StatusCode::OK);
    }

    let user_message = UserMessage {
        user_id: format!("telegram_{}", from.id),
        content: text,
        source: MessengerType::Telegram,
        timestamp: Utc::now(),
        metadata: HashMap::new(),
    };

    let pipeline = state.pipeline.clone();
    let http = state.http.clone();
    let bot_token = config.bot_token.clone();
    let chat_id = message.chat.id;
    tokio::spawn(async move {
        let response = pipeline.process_message(user_message).await;
        let request = SendMessageRequest {
            chat_id,
            text: response.text,
        };
        if let Err(e) = http
            .post(send_message_url(&bot_token))
            .json(&request)
            .send()
            .await
        {
            tracing::warn!(error = %e, "failed to deliver Telegram reply");
        }
    });

    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telegram_user_id_is_namespaced() {
        let id: i64 = 12345;
        assert_eq!(format!("telegram_{id}"), "telegram_12345");
    }

    #[test]
    fn update_without_message_parses_to_none() {
        let update: TelegramUpdate = serde_json::from_str(r#"{"update_id":1}"#).unwrap();
        assert!(update.message.is_none());
    }
}
