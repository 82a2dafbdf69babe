//! Terminal adapter — a plain HTTP dev/test surface with no signature
//! verification. Unlike every other provider it replies synchronously in
//! the HTTP response body instead of through an outbound call, which
//! makes it the natural harness for local testing and end-to-end tests.

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::channels::ChannelState;
use crate::domain::{MessageResponse, MessengerType, UserMessage};
use crate::error::{AppError, AppResult};

#[derive(Debug, Deserialize)]
pub struct TerminalRequest {
    pub user_id: String,
    pub message: String,
}

/// Wire shape for `POST /api/chat/terminal` (spec.md §6): `{status, message,
/// data}`, distinct from the pipeline's internal `MessageResponse` (`{text,
/// data}`).
#[derive(Debug, Serialize)]
pub struct TerminalResponse {
    pub status: &'static str,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl From<MessageResponse> for TerminalResponse {
    fn from(response: MessageResponse) -> Self {
        Self {
            status: "ok",
            message: response.text,
            data: response.data,
        }
    }
}

pub async fn handle_chat(
    State(state): State<ChannelState>,
    Json(request): Json<TerminalRequest>,
) -> Result<impl IntoResponse, AppError> {
    if request.user_id.trim().is_empty() {
        return Err(AppError::Decoding("user_id must not be empty".to_string()));
    }

    let user_message = UserMessage {
        user_id: request.user_id,
        content: request.message,
        source: MessengerType::Terminal,
        timestamp: Utc::now(),
        metadata: HashMap::new(),
    };

    let response = tokio::time::timeout(
        crate::pipeline::PIPELINE_TIMEOUT,
        state.pipeline.process_message(user_message),
    )
    .await
    .unwrap_or_else(|_| MessageResponse::text("request timed out"));

    Ok(Json(TerminalResponse::from(response)))
}

#[derive(Debug, Deserialize)]
pub struct UserSummaryQuery {
    user_id: String,
}

#[derive(Debug, Serialize)]
pub struct UserSummaryResponse {
    user_id: String,
    messenger_type: MessengerType,
    created_at: chrono::DateTime<Utc>,
    category_count: usize,
    expense_count: usize,
    total_amount_cents: i64,
}

/// `GET /api/chat/terminal/user?user_id=...` — a read-only summary over a
/// Terminal-origin user, used by local and automated test harnesses that
/// never call through a real messenger and so have no other way to inspect
/// what the pipeline persisted.
pub async fn get_user_summary(
    State(state): State<ChannelState>,
    Query(query): Query<UserSummaryQuery>,
) -> AppResult<impl IntoResponse> {
    let user = state
        .repos
        .users
        .get_by_id(&query.user_id)
        .await?
        .ok_or(AppError::NotFound)?;
    let categories = state.repos.categories.get_by_user_id(&query.user_id).await?;
    let expenses = state.repos.expenses.get_by_user_id(&query.user_id).await?;
    let total_amount_cents = expenses.iter().map(|e| e.amount.cents()).sum();

    Ok(Json(UserSummaryResponse {
        user_id: user.user_id,
        messenger_type: user.messenger_type,
        created_at: user.created_at,
        category_count: categories.len(),
        expense_count: expenses.len(),
        total_amount_cents,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_deserializes_from_json() {
        let body = r#"{"user_id":"u1","message":"lunch $10"}"#;
        let request: TerminalRequest = serde_json::from_str(body).unwrap();
        assert_eq!(request.user_id, "u1");
        assert_eq!(request.message, "lunch $10");
    }

    #[test]
    fn response_serializes_to_status_message_data_envelope() {
        let response = TerminalResponse::from(MessageResponse::text("breakfast — 20.00 on 2026-07-28"));
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["message"], "breakfast — 20.00 on 2026-07-28");
        assert!(value.get("data").is_none());
    }
}
