//! Unified Message Pipeline (spec.md §4.4).
//!
//! `process_message` is the single orchestration every provider adapter
//! calls after normalizing its platform payload into a [`UserMessage`].
//! It is the only place business rules run — auto-signup, parsing,
//! persistence, and consolidated reply composition — so adapters never
//! replicate any of this logic (mirrors the teacher's `Bridge` pattern of
//! one `handle_event` choke point in `crates/bridge/src/bridge.rs`).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;

use crate::ai::AiService;
use crate::cache::CacheManager;
use crate::domain::{
    Category, DEFAULT_CATEGORIES, MessageResponse, NewExpense, UserMessage,
};
use crate::repository::Repositories;

const NO_EXPENSES_GUIDANCE: &str =
    "No valid expense items found. Please provide an amount and item, e.g. 'breakfast $20'.";

pub struct Pipeline {
    repos: Arc<Repositories>,
    cache: Arc<CacheManager>,
    ai: Arc<dyn AiService>,
}

impl Pipeline {
    pub fn new(repos: Arc<Repositories>, cache: Arc<CacheManager>, ai: Arc<dyn AiService>) -> Self {
        Self { repos, cache, ai }
    }

    pub async fn process_message(&self, message: UserMessage) -> MessageResponse {
        self.ensure_signed_up(&message).await;

        let outcome = self.ai.parse_expense(&message.content, &message.user_id).await;
        if outcome.expenses.is_empty() {
            return MessageResponse::text(NO_EXPENSES_GUIDANCE);
        }

        let mut lines = Vec::with_capacity(outcome.expenses.len());
        for parsed in outcome.expenses {
            if !parsed.amount.is_positive() {
                lines.push(format!("{} (invalid amount)", parsed.description));
                continue;
            }

            let expense_date = parsed.date.unwrap_or_else(|| today_for(&message));

            let category_id = self
                .resolve_category(&message.user_id, &parsed.suggested_category)
                .await;

            let new_expense = NewExpense {
                user_id: message.user_id.clone(),
                description: parsed.description.clone(),
                amount: parsed.amount,
                category_id,
                expense_date,
                original_amount: parsed.amount,
                currency: "USD".to_string(),
                home_amount: parsed.amount,
                home_currency: "USD".to_string(),
                exchange_rate: 1.0,
            };

            match self.repos.expenses.create(new_expense).await {
                Ok(expense) => lines.push(format!(
                    "{} — {:.2} on {}",
                    expense.description,
                    expense.amount.as_f64(),
                    expense.expense_date
                )),
                Err(e) => {
                    tracing::warn!(error = %e, description = %parsed.description, "failed to persist expense");
                    lines.push(format!("{} (save failed)", parsed.description));
                }
            }
        }

        MessageResponse::text(lines.join("\n"))
    }

    /// Auto-signup: create the user and seed the five default categories if
    /// absent. Idempotent — a losing create race must not error or
    /// duplicate categories. Failure here is logged but never aborts
    /// processing; a genuinely missing user surfaces later as an explicit
    /// persistence error from `ExpenseRepository::create`.
    async fn ensure_signed_up(&self, message: &UserMessage) {
        if self.cache.get_user(&message.user_id).await.is_some() {
            return;
        }

        if let Ok(Some(user)) = self.repos.users.get_by_id(&message.user_id).await {
            self.cache.put_user(user).await;
            return;
        }

        match self.repos.users.create(&message.user_id, message.source).await {
            Ok(user) => {
                self.cache.put_user(user).await;
                if let Err(e) = self.seed_default_categories(&message.user_id).await {
                    tracing::warn!(error = %e, user_id = %message.user_id, "failed to seed default categories");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, user_id = %message.user_id, "auto-signup failed");
            }
        }
    }

    /// The `existing.is_empty()` check is an optimization, not the
    /// correctness guard: two concurrent first-messages for the same user
    /// can both pass it before either has inserted anything. What makes
    /// this converge on exactly five categories regardless is the
    /// `UNIQUE(user_id, name)` constraint plus `CategoryRepository::create`
    /// treating a conflict on it as success rather than an error.
    async fn seed_default_categories(&self, user_id: &str) -> anyhow::Result<()> {
        let existing = self.repos.categories.get_by_user_id(user_id).await?;
        if !existing.is_empty() {
            return Ok(());
        }
        for name in DEFAULT_CATEGORIES {
            self.repos.categories.create(user_id, name, true).await?;
        }
        self.cache.invalidate_user_data(user_id).await;
        Ok(())
    }

    /// `(user_id, suggested_category)` lookup; on miss, a second opinion
    /// via `SuggestCategory(description)`; if still unresolved, `None`
    /// (the expense is persisted uncategorized).
    async fn resolve_category(&self, user_id: &str, suggested_category: &str) -> Option<i64> {
        if let Some(categories) = self.cache.get_user_categories(user_id).await {
            if let Some(found) = find_by_name(&categories, suggested_category) {
                return Some(found);
            }
        }

        match self.repos.categories.get_by_user_id(user_id).await {
            Ok(categories) => {
                self.cache.put_user_categories(user_id, categories.clone()).await;
                if let Some(found) = find_by_name(&categories, suggested_category) {
                    return Some(found);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, user_id = %user_id, "failed to load categories for resolution");
            }
        }

        let second_opinion = self.ai.suggest_category(suggested_category, user_id).await;
        match self
            .repos
            .categories
            .get_by_user_id_and_name(user_id, &second_opinion.category)
            .await
        {
            Ok(Some(category)) => Some(category.id),
            _ => None,
        }
    }
}

fn find_by_name(categories: &[Category], name: &str) -> Option<i64> {
    categories
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(name))
        .map(|c| c.id)
}

/// Resolves "today" for the message's timezone when the parser left the
/// date unresolved. Falls back to UTC's date if the sender's timezone
/// metadata is absent or unparseable.
fn today_for(message: &UserMessage) -> chrono::NaiveDate {
    message
        .metadata
        .get("timezone")
        .and_then(|tz| tz.parse::<Tz>().ok())
        .map(|tz| Utc::now().with_timezone(&tz).date_naive())
        .unwrap_or_else(|| Utc::now().date_naive())
}

/// Default deadline applied by callers wrapping a pipeline invocation in a
/// cancellation-aware timeout (adapters apply this around the whole
/// `process_message` call so a slow downstream never holds a platform
/// webhook connection open past its retry budget).
pub const PIPELINE_TIMEOUT: Duration = Duration::from_secs(25);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::traits::{ParseOutcome, SuggestOutcome, Usage};
    use crate::domain::{Money, MessengerType, ParsedExpense};
    use crate::repository::sqlite::SqliteRepositories;
    use async_trait::async_trait;
    use rusqlite::Connection;
    use std::collections::HashMap;

    struct StaticAi {
        expenses: Vec<ParsedExpense>,
    }

    #[async_trait]
    impl AiService for StaticAi {
        async fn parse_expense(&self, _text: &str, _user_id: &str) -> ParseOutcome {
            ParseOutcome {
                expenses: self.expenses.clone(),
                usage: Usage::default(),
                used_fallback: true,
            }
        }

        async fn suggest_category(&self, _description: &str, _user_id: &str) -> SuggestOutcome {
            SuggestOutcome {
                category: "Other".to_string(),
                usage: Usage::default(),
                used_fallback: true,
            }
        }
    }

    async fn test_repos(tmp: &tempfile::TempDir) -> Arc<Repositories> {
        let db_path = tmp.path().join("pipeline_test.db");
        let conn = Connection::open(&db_path).unwrap();
        let sql = std::fs::read_to_string(
            std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations/sqlite/001_create_schema.up.sql"),
        )
        .unwrap();
        conn.execute_batch(&sql).unwrap();
        drop(conn);

        let repo = SqliteRepositories::new(&db_path);
        Arc::new(Repositories {
            users: Arc::new(repo.clone()),
            categories: Arc::new(repo.clone()),
            expenses: Arc::new(repo.clone()),
            metrics: Arc::new(repo.clone()),
            ai_costs: Arc::new(repo.clone()),
            pricing: Arc::new(repo.clone()),
            policies: Arc::new(repo),
        })
    }

    #[tokio::test]
    async fn no_expenses_returns_guidance() {
        let tmp = tempfile::tempdir().unwrap();
        let repos = test_repos(&tmp).await;
        let cache = Arc::new(CacheManager::new());
        let ai: Arc<dyn AiService> = Arc::new(StaticAi { expenses: vec![] });
        let pipeline = Pipeline::new(repos, cache, ai);

        let message = UserMessage {
            user_id: "u1".to_string(),
            content: "hello".to_string(),
            source: MessengerType::Terminal,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        };
        let response = pipeline.process_message(message).await;
        assert_eq!(response.text, NO_EXPENSES_GUIDANCE);
    }

    #[tokio::test]
    async fn successful_parse_creates_user_categories_and_expense() {
        let tmp = tempfile::tempdir().unwrap();
        let repos = test_repos(&tmp).await;
        let cache = Arc::new(CacheManager::new());
        let ai: Arc<dyn AiService> = Arc::new(StaticAi {
            expenses: vec![ParsedExpense {
                description: "breakfast".to_string(),
                amount: Money::from_major(20.0),
                suggested_category: "Food".to_string(),
                date: None,
            }],
        });
        let pipeline = Pipeline::new(repos.clone(), cache, ai);

        let message = UserMessage {
            user_id: "u1".to_string(),
            content: "breakfast $20".to_string(),
            source: MessengerType::Terminal,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        };
        let response = pipeline.process_message(message).await;
        assert!(response.text.contains("breakfast"));

        let user = repos.users.get_by_id("u1").await.unwrap();
        assert!(user.is_some());

        let categories = repos.categories.get_by_user_id("u1").await.unwrap();
        assert_eq!(categories.len(), 5);

        let expenses = repos.expenses.get_by_user_id("u1").await.unwrap();
        assert_eq!(expenses.len(), 1);
        assert_eq!(expenses[0].amount.cents(), 2000);
        assert!(expenses[0].category_id.is_some());
    }

    #[tokio::test]
    async fn repeated_signup_does_not_duplicate_categories() {
        let tmp = tempfile::tempdir().unwrap();
        let repos = test_repos(&tmp).await;
        let cache = Arc::new(CacheManager::new());
        let ai: Arc<dyn AiService> = Arc::new(StaticAi { expenses: vec![] });
        let pipeline = Pipeline::new(repos.clone(), cache, ai);

        for _ in 0..3 {
            let message = UserMessage {
                user_id: "u1".to_string(),
                content: "hi".to_string(),
                source: MessengerType::Terminal,
                timestamp: Utc::now(),
                metadata: HashMap::new(),
            };
            pipeline.process_message(message).await;
        }

        let categories = repos.categories.get_by_user_id("u1").await.unwrap();
        assert_eq!(categories.len(), 5);
    }

    /// Unlike `repeated_signup_does_not_duplicate_categories` (sequential,
    /// so the cache is already warm after the first call), this drives
    /// several first-messages for the same brand-new user concurrently,
    /// so multiple calls can pass `ensure_signed_up`'s cache-miss /
    /// repository-miss checks before any of them has inserted a category —
    /// the exact race `UNIQUE(user_id, name)` + idempotent `create` must
    /// resolve to exactly five rows, not ten.
    #[tokio::test]
    async fn concurrent_signup_converges_to_five_categories() {
        let tmp = tempfile::tempdir().unwrap();
        let repos = test_repos(&tmp).await;
        let cache = Arc::new(CacheManager::new());
        let ai: Arc<dyn AiService> = Arc::new(StaticAi { expenses: vec![] });
        let pipeline = Arc::new(Pipeline::new(repos.clone(), cache, ai));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pipeline = pipeline.clone();
            handles.push(tokio::spawn(async move {
                let message = UserMessage {
                    user_id: "u1".to_string(),
                    content: "hi".to_string(),
                    source: MessengerType::Terminal,
                    timestamp: Utc::now(),
                    metadata: HashMap::new(),
                };
                pipeline.process_message(message).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let categories = repos.categories.get_by_user_id("u1").await.unwrap();
        assert_eq!(categories.len(), 5);
        let users = repos.users.get_by_id("u1").await.unwrap();
        assert!(users.is_some());
    }

    #[tokio::test]
    async fn non_positive_amount_is_skipped_not_persisted() {
        let tmp = tempfile::tempdir().unwrap();
        let repos = test_repos(&tmp).await;
        let cache = Arc::new(CacheManager::new());
        let ai: Arc<dyn AiService> = Arc::new(StaticAi {
            expenses: vec![ParsedExpense {
                description: "free sample".to_string(),
                amount: Money::from_major(0.0),
                suggested_category: "Other".to_string(),
                date: None,
            }],
        });
        let pipeline = Pipeline::new(repos.clone(), cache, ai);

        let message = UserMessage {
            user_id: "u1".to_string(),
            content: "free sample 0".to_string(),
            source: MessengerType::Terminal,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        };
        let response = pipeline.process_message(message).await;
        assert!(response.text.contains("invalid amount"));

        let expenses = repos.expenses.get_by_user_id("u1").await.unwrap();
        assert!(expenses.is_empty());
    }
}
