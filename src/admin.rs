//! Admin/Metrics Surface (spec.md §4.6).
//!
//! Every route under `/api/metrics` and `/api/ai-cost` is gated by a
//! constant-time `X-API-Key` compare against the configured admin key.
//! `/api/policy/{key}` is deliberately ungated — policy text (terms,
//! privacy) is public-facing legal copy, not administrative data.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::{Duration, NaiveDate, Utc};
use serde::Deserialize;

use crate::channels::common::constant_time_eq;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::repository::Repositories;

#[derive(Clone)]
pub struct AdminState {
    pub repos: Arc<Repositories>,
    pub config: Arc<Config>,
}

#[derive(Debug, Deserialize)]
pub struct DateRangeQuery {
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
}

impl DateRangeQuery {
    /// Defaults to the trailing 30 days (inclusive of today) when either
    /// bound is omitted.
    fn resolve(&self) -> (NaiveDate, NaiveDate) {
        let today = Utc::now().date_naive();
        let to = self.to.unwrap_or(today);
        let from = self.from.unwrap_or(to - Duration::days(30));
        (from, to)
    }
}

fn require_admin_key(headers: &HeaderMap, config: &Config) -> AppResult<()> {
    let provided = headers
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Authentication("missing X-API-Key".to_string()))?;
    if !constant_time_eq(&config.admin_api_key, provided) {
        return Err(AppError::Authentication("invalid admin API key".to_string()));
    }
    Ok(())
}

pub async fn daily_active_users(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Query(range): Query<DateRangeQuery>,
) -> AppResult<impl IntoResponse> {
    require_admin_key(&headers, &state.config)?;
    let (from, to) = range.resolve();
    let result = state.repos.metrics.get_daily_active_users(from, to).await?;
    Ok(Json(result))
}

pub async fn expenses_summary(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Query(range): Query<DateRangeQuery>,
) -> AppResult<impl IntoResponse> {
    require_admin_key(&headers, &state.config)?;
    let (from, to) = range.resolve();
    let result = state.repos.metrics.get_expenses_summary(from, to).await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct CategoryTrendsQuery {
    user_id: String,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
}

pub async fn category_trends(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Query(query): Query<CategoryTrendsQuery>,
) -> AppResult<impl IntoResponse> {
    require_admin_key(&headers, &state.config)?;
    let today = Utc::now().date_naive();
    let to = query.to.unwrap_or(today);
    let from = query.from.unwrap_or(to - Duration::days(30));
    let result = state
        .repos
        .metrics
        .get_category_trends(&query.user_id, from, to)
        .await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct GrowthQuery {
    days: Option<i64>,
}

pub async fn growth_metrics(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Query(query): Query<GrowthQuery>,
) -> AppResult<impl IntoResponse> {
    require_admin_key(&headers, &state.config)?;
    let result = state
        .repos
        .metrics
        .get_growth_metrics(query.days.unwrap_or(30))
        .await?;
    Ok(Json(result))
}

pub async fn new_users_per_day(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Query(range): Query<DateRangeQuery>,
) -> AppResult<impl IntoResponse> {
    require_admin_key(&headers, &state.config)?;
    let (from, to) = range.resolve();
    let result = state.repos.metrics.get_new_users_per_day(from, to).await?;
    Ok(Json(result))
}

pub async fn ai_cost_by_day(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Query(range): Query<DateRangeQuery>,
) -> AppResult<impl IntoResponse> {
    require_admin_key(&headers, &state.config)?;
    let (from, to) = range.resolve();
    let result = state.repos.ai_costs.get_summary_by_day(from, to).await?;
    Ok(Json(result))
}

pub async fn ai_cost_by_operation(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Query(range): Query<DateRangeQuery>,
) -> AppResult<impl IntoResponse> {
    require_admin_key(&headers, &state.config)?;
    let (from, to) = range.resolve();
    let result = state.repos.ai_costs.get_summary_by_operation(from, to).await?;
    Ok(Json(result))
}

pub async fn ai_cost_by_user(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Query(range): Query<DateRangeQuery>,
) -> AppResult<impl IntoResponse> {
    require_admin_key(&headers, &state.config)?;
    let (from, to) = range.resolve();
    let result = state.repos.ai_costs.get_summary_by_user(from, to).await?;
    Ok(Json(result))
}

/// Public, ungated. Policy text is legal copy meant to be linked from a
/// chat reply, not administrative data.
pub async fn get_policy(
    State(state): State<AdminState>,
    Path(key): Path<String>,
) -> AppResult<impl IntoResponse> {
    match state.repos.policies.get_by_key(&key).await? {
        Some(policy) => Ok(Json(policy).into_response()),
        None => Err(AppError::NotFound),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_range_defaults_to_trailing_thirty_days() {
        let query = DateRangeQuery { from: None, to: None };
        let (from, to) = query.resolve();
        assert_eq!((to - from).num_days(), 30);
    }

    #[test]
    fn date_range_honors_explicit_bounds() {
        let from = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2026, 1, 15).unwrap();
        let query = DateRangeQuery { from: Some(from), to: Some(to) };
        assert_eq!(query.resolve(), (from, to));
    }

    #[test]
    fn admin_key_check_rejects_missing_header() {
        let config = test_config();
        let headers = HeaderMap::new();
        assert!(require_admin_key(&headers, &config).is_err());
    }

    #[test]
    fn admin_key_check_accepts_matching_key() {
        let config = test_config();
        let mut headers = HeaderMap::new();
        headers.insert("X-API-Key", "test-admin-key".parse().unwrap());
        assert!(require_admin_key(&headers, &config).is_ok());
    }

    fn test_config() -> Config {
        Config {
            bind_address: "0.0.0.0:8080".to_string(),
            database: crate::config::DatabaseTarget::Sqlite("test.db".to_string()),
            enabled_messengers: vec![crate::domain::MessengerType::Terminal],
            credentials: Default::default(),
            ai: crate::config::AiConfig {
                provider: "gemini".to_string(),
                model: "gemini-1.5-flash".to_string(),
                api_key: None,
                home_currency: "USD".to_string(),
            },
            admin_api_key: "test-admin-key".to_string(),
        }
    }
}
