//! Core aggregates shared by every component. See spec.md §3.

mod money;

pub use money::Money;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the seven supported chat platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessengerType {
    Line,
    Telegram,
    Discord,
    Slack,
    Teams,
    Whatsapp,
    Terminal,
}

impl MessengerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessengerType::Line => "line",
            MessengerType::Telegram => "telegram",
            MessengerType::Discord => "discord",
            MessengerType::Slack => "slack",
            MessengerType::Teams => "teams",
            MessengerType::Whatsapp => "whatsapp",
            MessengerType::Terminal => "terminal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "line" => Some(MessengerType::Line),
            "telegram" => Some(MessengerType::Telegram),
            "discord" => Some(MessengerType::Discord),
            "slack" => Some(MessengerType::Slack),
            "teams" => Some(MessengerType::Teams),
            "whatsapp" => Some(MessengerType::Whatsapp),
            "terminal" => Some(MessengerType::Terminal),
            _ => None,
        }
    }
}

impl fmt::Display for MessengerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Five default categories seeded for every new user, in creation order.
pub const DEFAULT_CATEGORIES: [&str; 5] =
    ["Food", "Transport", "Shopping", "Entertainment", "Other"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub messenger_type: MessengerType,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub user_id: String,
    pub name: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryKeyword {
    pub id: i64,
    pub category_id: i64,
    pub keyword: String,
    pub priority: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    pub id: i64,
    pub user_id: String,
    pub description: String,
    pub amount: Money,
    pub category_id: Option<i64>,
    pub expense_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub original_amount: Money,
    pub currency: String,
    pub home_amount: Money,
    pub home_currency: String,
    pub exchange_rate: f64,
}

/// Fields needed to create a new expense row; timestamps and id are
/// assigned by the repository.
#[derive(Debug, Clone)]
pub struct NewExpense {
    pub user_id: String,
    pub description: String,
    pub amount: Money,
    pub category_id: Option<i64>,
    pub expense_date: NaiveDate,
    pub original_amount: Money,
    pub currency: String,
    pub home_amount: Money,
    pub home_currency: String,
    pub exchange_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiOperation {
    ParseExpense,
    SuggestCategory,
}

impl AiOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiOperation::ParseExpense => "parse_expense",
            AiOperation::SuggestCategory => "suggest_category",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiCostLog {
    pub id: i64,
    pub user_id: String,
    pub operation: AiOperation,
    pub provider: String,
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    pub cost: Money,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAiCostLog {
    pub user_id: String,
    pub operation: AiOperation,
    pub provider: String,
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    pub cost: Money,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    pub id: i64,
    pub provider: String,
    pub model: String,
    pub input_price_per_million: Money,
    pub output_price_per_million: Money,
    pub effective_date: NaiveDate,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub key: String,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

/// Transient value produced by the AI service and consumed by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedExpense {
    pub description: String,
    pub amount: Money,
    pub suggested_category: String,
    /// `None` means unresolved — the pipeline resolves it to "today".
    pub date: Option<NaiveDate>,
}

/// Normalized inbound message handed to the pipeline by every adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMessage {
    pub user_id: String,
    pub content: String,
    pub source: MessengerType,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: std::collections::HashMap<String, String>,
}

/// Consolidated outbound reply returned by the pipeline to the adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl MessageResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data: None,
        }
    }
}
