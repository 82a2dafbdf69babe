//! Repository contract + dual SQL backend (spec.md §4.1).
//!
//! One `async_trait` per aggregate, mirroring the teacher's habit of
//! expressing storage as a narrow trait consumed through `Arc<dyn Trait>`
//! (see `crates/bridge/src/bridge.rs`'s use of trait objects for
//! pluggable channel backends). Two implementations exist side by side —
//! `sqlite` (always available, via `rusqlite`) and `postgres` (behind the
//! `postgres` Cargo feature, via `tokio-postgres`) — selected once at
//! startup by [`factory::connect`].

pub mod factory;
pub mod migrations;
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::domain::{
    AiCostLog, AiOperation, Category, CategoryKeyword, Expense, MessengerType, NewAiCostLog,
    NewExpense, Policy, PricingConfig, User,
};
use crate::error::AppResult;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user_id: &str, messenger_type: MessengerType) -> AppResult<User>;
    async fn get_by_id(&self, user_id: &str) -> AppResult<Option<User>>;
}

#[async_trait]
pub trait CategoryRepository: Send + Sync {
    async fn create(&self, user_id: &str, name: &str, is_default: bool) -> AppResult<Category>;
    async fn get_by_id(&self, id: i64) -> AppResult<Option<Category>>;
    async fn get_by_user_id(&self, user_id: &str) -> AppResult<Vec<Category>>;
    async fn get_by_user_id_and_name(&self, user_id: &str, name: &str) -> AppResult<Option<Category>>;
    async fn update(&self, id: i64, name: &str) -> AppResult<()>;
    async fn delete(&self, id: i64) -> AppResult<()>;

    async fn add_keyword(&self, category_id: i64, keyword: &str, priority: i32) -> AppResult<CategoryKeyword>;
    async fn get_keywords(&self, category_id: i64) -> AppResult<Vec<CategoryKeyword>>;
    async fn delete_keyword(&self, id: i64) -> AppResult<()>;
}

#[async_trait]
pub trait ExpenseRepository: Send + Sync {
    async fn create(&self, new_expense: NewExpense) -> AppResult<Expense>;
    async fn get_by_id(&self, id: i64) -> AppResult<Option<Expense>>;
    async fn get_by_user_id(&self, user_id: &str) -> AppResult<Vec<Expense>>;
    async fn get_by_user_id_and_date_range(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> AppResult<Vec<Expense>>;
    async fn get_by_user_id_and_category(&self, user_id: &str, category_id: i64) -> AppResult<Vec<Expense>>;
    async fn update(&self, expense: &Expense) -> AppResult<()>;
    async fn delete(&self, id: i64) -> AppResult<()>;
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyActiveUsers {
    pub date: NaiveDate,
    pub active_users: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExpensesSummary {
    pub total_count: i64,
    pub total_amount_cents: i64,
    pub average_amount_cents: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryTrend {
    pub category_name: String,
    pub total_amount_cents: i64,
    pub expense_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GrowthMetrics {
    pub total_users: i64,
    pub new_users: i64,
    pub total_expenses: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewUsersPerDay {
    pub date: NaiveDate,
    pub new_users: i64,
}

#[async_trait]
pub trait MetricsRepository: Send + Sync {
    async fn get_daily_active_users(&self, from: NaiveDate, to: NaiveDate) -> AppResult<Vec<DailyActiveUsers>>;
    async fn get_expenses_summary(&self, from: NaiveDate, to: NaiveDate) -> AppResult<ExpensesSummary>;
    async fn get_category_trends(&self, user_id: &str, from: NaiveDate, to: NaiveDate) -> AppResult<Vec<CategoryTrend>>;
    async fn get_growth_metrics(&self, days: i64) -> AppResult<GrowthMetrics>;
    async fn get_new_users_per_day(&self, from: NaiveDate, to: NaiveDate) -> AppResult<Vec<NewUsersPerDay>>;
}

#[derive(Debug, Clone, Serialize)]
pub struct AiCostByDay {
    pub date: NaiveDate,
    pub total_cost_cents: i64,
    pub call_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AiCostByOperation {
    pub operation: AiOperation,
    pub total_cost_cents: i64,
    pub call_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AiCostByUser {
    pub user_id: String,
    pub total_cost_cents: i64,
    pub call_count: i64,
}

#[async_trait]
pub trait AiCostRepository: Send + Sync {
    async fn append(&self, entry: NewAiCostLog) -> AppResult<AiCostLog>;
    async fn get_by_user_id(&self, user_id: &str) -> AppResult<Vec<AiCostLog>>;
    async fn get_summary_by_day(&self, from: NaiveDate, to: NaiveDate) -> AppResult<Vec<AiCostByDay>>;
    async fn get_summary_by_operation(&self, from: NaiveDate, to: NaiveDate) -> AppResult<Vec<AiCostByOperation>>;
    async fn get_summary_by_user(&self, from: NaiveDate, to: NaiveDate) -> AppResult<Vec<AiCostByUser>>;
}

#[async_trait]
pub trait PricingRepository: Send + Sync {
    /// At-most-one active row for `(provider, model)` whose `effective_date <= now`.
    async fn get_active(&self, provider: &str, model: &str, now: DateTime<Utc>) -> AppResult<Option<PricingConfig>>;
}

#[async_trait]
pub trait PolicyRepository: Send + Sync {
    async fn get_by_key(&self, key: &str) -> AppResult<Option<Policy>>;
}

/// Bundle of every aggregate's repository, constructed once at startup by
/// [`factory::connect`] and shared behind an `Arc` through the whole app.
pub struct Repositories {
    pub users: Arc<dyn UserRepository>,
    pub categories: Arc<dyn CategoryRepository>,
    pub expenses: Arc<dyn ExpenseRepository>,
    pub metrics: Arc<dyn MetricsRepository>,
    pub ai_costs: Arc<dyn AiCostRepository>,
    pub pricing: Arc<dyn PricingRepository>,
    pub policies: Arc<dyn PolicyRepository>,
}
