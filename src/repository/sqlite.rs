//! SQLite repository implementation.
//!
//! Follows the teacher's `rusqlite` idiom of opening a fresh `Connection`
//! per call (`crates/bridge/src/cache.rs`) rather than holding one open
//! across awaits; each call is dispatched to `spawn_blocking` since
//! `rusqlite::Connection` is blocking and the surrounding app is async.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::{
    AiCostLog, AiOperation, Category, CategoryKeyword, Expense, MessengerType, Money,
    NewAiCostLog, NewExpense, Policy, PricingConfig, User,
};
use crate::error::{AppError, AppResult};
use crate::repository::{
    AiCostByDay, AiCostByOperation, AiCostByUser, AiCostRepository, CategoryRepository,
    CategoryTrend, DailyActiveUsers, ExpenseRepository, ExpensesSummary, GrowthMetrics,
    MetricsRepository, NewUsersPerDay, PolicyRepository, PricingRepository, UserRepository,
};

fn to_app_err(e: rusqlite::Error) -> AppError {
    AppError::Persistence(anyhow::Error::new(e))
}

fn rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

fn parse_iso_date(s: &str) -> Result<NaiveDate> {
    Ok(NaiveDate::parse_from_str(s, "%Y-%m-%d")?)
}

#[derive(Clone)]
pub struct SqliteRepositories {
    db_path: PathBuf,
}

impl SqliteRepositories {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    pub fn open_connection(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path).context("opening sqlite connection")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .context("setting sqlite busy timeout")?;
        Ok(conn)
    }

    /// Runs `f` against a freshly opened blocking connection on the
    /// blocking thread pool. A busy timeout is set on every connection so
    /// concurrent writers from separate requests (e.g. racing signups for
    /// the same user) retry instead of immediately erroring on `SQLITE_BUSY`.
    async fn with_conn<T, F>(&self, f: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path).map_err(to_app_err)?;
            conn.busy_timeout(std::time::Duration::from_secs(5))
                .map_err(to_app_err)?;
            f(&conn).map_err(to_app_err)
        })
        .await
        .map_err(|e| AppError::Persistence(anyhow::anyhow!("blocking task panicked: {e}")))?
    }
}

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    let messenger_type: String = row.get(1)?;
    Ok(User {
        user_id: row.get(0)?,
        messenger_type: MessengerType::parse(&messenger_type).unwrap_or(MessengerType::Terminal),
        created_at: {
            let s: String = row.get(2)?;
            parse_rfc3339(&s).unwrap_or_else(|_| Utc::now())
        },
    })
}

#[async_trait]
impl UserRepository for SqliteRepositories {
    async fn create(&self, user_id: &str, messenger_type: MessengerType) -> AppResult<User> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let now = Utc::now();
            // Unique-key violation on a concurrent signup race is treated
            // as success: INSERT OR IGNORE followed by a read-back.
            conn.execute(
                "INSERT OR IGNORE INTO users (user_id, messenger_type, created_at) VALUES (?1, ?2, ?3)",
                params![user_id, messenger_type.as_str(), rfc3339(now)],
            )?;
            conn.query_row(
                "SELECT user_id, messenger_type, created_at FROM users WHERE user_id = ?1",
                params![user_id],
                row_to_user,
            )
        })
        .await
    }

    async fn get_by_id(&self, user_id: &str) -> AppResult<Option<User>> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT user_id, messenger_type, created_at FROM users WHERE user_id = ?1",
                params![user_id],
                row_to_user,
            )
            .optional()
        })
        .await
    }
}

fn row_to_category(row: &rusqlite::Row) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        is_default: row.get::<_, i64>(3)? != 0,
        created_at: {
            let s: String = row.get(4)?;
            parse_rfc3339(&s).unwrap_or_else(|_| Utc::now())
        },
    })
}

fn row_to_keyword(row: &rusqlite::Row) -> rusqlite::Result<CategoryKeyword> {
    Ok(CategoryKeyword {
        id: row.get(0)?,
        category_id: row.get(1)?,
        keyword: row.get(2)?,
        priority: row.get(3)?,
    })
}

#[async_trait]
impl CategoryRepository for SqliteRepositories {
    /// Idempotent under the `UNIQUE(user_id, name)` constraint: concurrent
    /// callers racing to create the same category (e.g. two first-messages
    /// seeding defaults at once) both observe success, converging on the
    /// single row the constraint allows rather than erroring or duplicating.
    async fn create(&self, user_id: &str, name: &str, is_default: bool) -> AppResult<Category> {
        let user_id = user_id.to_string();
        let name = name.to_string();
        self.with_conn(move |conn| {
            let now = rfc3339(Utc::now());
            conn.execute(
                "INSERT INTO categories (user_id, name, is_default, created_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id, name) DO NOTHING",
                params![user_id, name, is_default as i64, now],
            )?;
            conn.query_row(
                "SELECT id, user_id, name, is_default, created_at FROM categories WHERE user_id = ?1 AND name = ?2",
                params![user_id, name],
                row_to_category,
            )
        })
        .await
    }

    async fn get_by_id(&self, id: i64) -> AppResult<Option<Category>> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, user_id, name, is_default, created_at FROM categories WHERE id = ?1",
                params![id],
                row_to_category,
            )
            .optional()
        })
        .await
    }

    async fn get_by_user_id(&self, user_id: &str) -> AppResult<Vec<Category>> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, name, is_default, created_at FROM categories WHERE user_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![user_id], row_to_category)?;
            rows.collect()
        })
        .await
    }

    async fn get_by_user_id_and_name(&self, user_id: &str, name: &str) -> AppResult<Option<Category>> {
        let user_id = user_id.to_string();
        let name = name.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, user_id, name, is_default, created_at FROM categories WHERE user_id = ?1 AND name = ?2",
                params![user_id, name],
                row_to_category,
            )
            .optional()
        })
        .await
    }

    async fn update(&self, id: i64, name: &str) -> AppResult<()> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            conn.execute("UPDATE categories SET name = ?1 WHERE id = ?2", params![name, id])?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, id: i64) -> AppResult<()> {
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM category_keywords WHERE category_id = ?1", params![id])?;
            conn.execute("DELETE FROM categories WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }

    async fn add_keyword(&self, category_id: i64, keyword: &str, priority: i32) -> AppResult<CategoryKeyword> {
        let keyword = keyword.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO category_keywords (category_id, keyword, priority) VALUES (?1, ?2, ?3)",
                params![category_id, keyword, priority],
            )?;
            let id = conn.last_insert_rowid();
            conn.query_row(
                "SELECT id, category_id, keyword, priority FROM category_keywords WHERE id = ?1",
                params![id],
                row_to_keyword,
            )
        })
        .await
    }

    async fn get_keywords(&self, category_id: i64) -> AppResult<Vec<CategoryKeyword>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, category_id, keyword, priority FROM category_keywords WHERE category_id = ?1 ORDER BY priority DESC",
            )?;
            let rows = stmt.query_map(params![category_id], row_to_keyword)?;
            rows.collect()
        })
        .await
    }

    async fn delete_keyword(&self, id: i64) -> AppResult<()> {
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM category_keywords WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }
}

fn row_to_expense(row: &rusqlite::Row) -> rusqlite::Result<Expense> {
    let expense_date: String = row.get(5)?;
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;
    Ok(Expense {
        id: row.get(0)?,
        user_id: row.get(1)?,
        description: row.get(2)?,
        amount: Money::from_cents(row.get(3)?),
        category_id: row.get(4)?,
        expense_date: parse_iso_date(&expense_date).unwrap_or_default(),
        created_at: parse_rfc3339(&created_at).unwrap_or_else(|_| Utc::now()),
        updated_at: parse_rfc3339(&updated_at).unwrap_or_else(|_| Utc::now()),
        original_amount: Money::from_cents(row.get(8)?),
        currency: row.get(9)?,
        home_amount: Money::from_cents(row.get(10)?),
        home_currency: row.get(11)?,
        exchange_rate: row.get(12)?,
    })
}

const EXPENSE_COLUMNS: &str = "id, user_id, description, amount_cents, category_id, expense_date, created_at, updated_at, original_amount_cents, currency, home_amount_cents, home_currency, exchange_rate";

#[async_trait]
impl ExpenseRepository for SqliteRepositories {
    async fn create(&self, new_expense: NewExpense) -> AppResult<Expense> {
        self.with_conn(move |conn| {
            let now = rfc3339(Utc::now());
            conn.execute(
                "INSERT INTO expenses (user_id, description, amount_cents, category_id, expense_date, created_at, updated_at, original_amount_cents, currency, home_amount_cents, home_currency, exchange_rate)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    new_expense.user_id,
                    new_expense.description,
                    new_expense.amount.cents(),
                    new_expense.category_id,
                    new_expense.expense_date.format("%Y-%m-%d").to_string(),
                    now,
                    new_expense.original_amount.cents(),
                    new_expense.currency,
                    new_expense.home_amount.cents(),
                    new_expense.home_currency,
                    new_expense.exchange_rate,
                ],
            )?;
            let id = conn.last_insert_rowid();
            conn.query_row(
                &format!("SELECT {EXPENSE_COLUMNS} FROM expenses WHERE id = ?1"),
                params![id],
                row_to_expense,
            )
        })
        .await
    }

    async fn get_by_id(&self, id: i64) -> AppResult<Option<Expense>> {
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {EXPENSE_COLUMNS} FROM expenses WHERE id = ?1"),
                params![id],
                row_to_expense,
            )
            .optional()
        })
        .await
    }

    async fn get_by_user_id(&self, user_id: &str) -> AppResult<Vec<Expense>> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EXPENSE_COLUMNS} FROM expenses WHERE user_id = ?1 ORDER BY expense_date DESC, created_at DESC"
            ))?;
            let rows = stmt.query_map(params![user_id], row_to_expense)?;
            rows.collect()
        })
        .await
    }

    async fn get_by_user_id_and_date_range(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> AppResult<Vec<Expense>> {
        let user_id = user_id.to_string();
        let from = from.format("%Y-%m-%d").to_string();
        let to = to.format("%Y-%m-%d").to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EXPENSE_COLUMNS} FROM expenses WHERE user_id = ?1 AND expense_date BETWEEN ?2 AND ?3 ORDER BY expense_date DESC, created_at DESC"
            ))?;
            let rows = stmt.query_map(params![user_id, from, to], row_to_expense)?;
            rows.collect()
        })
        .await
    }

    async fn get_by_user_id_and_category(&self, user_id: &str, category_id: i64) -> AppResult<Vec<Expense>> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EXPENSE_COLUMNS} FROM expenses WHERE user_id = ?1 AND category_id = ?2 ORDER BY expense_date DESC, created_at DESC"
            ))?;
            let rows = stmt.query_map(params![user_id, category_id], row_to_expense)?;
            rows.collect()
        })
        .await
    }

    async fn update(&self, expense: &Expense) -> AppResult<()> {
        let expense = expense.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE expenses SET description = ?1, amount_cents = ?2, category_id = ?3, expense_date = ?4, updated_at = ?5,
                 original_amount_cents = ?6, currency = ?7, home_amount_cents = ?8, home_currency = ?9, exchange_rate = ?10
                 WHERE id = ?11",
                params![
                    expense.description,
                    expense.amount.cents(),
                    expense.category_id,
                    expense.expense_date.format("%Y-%m-%d").to_string(),
                    rfc3339(Utc::now()),
                    expense.original_amount.cents(),
                    expense.currency,
                    expense.home_amount.cents(),
                    expense.home_currency,
                    expense.exchange_rate,
                    expense.id,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, id: i64) -> AppResult<()> {
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM expenses WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl MetricsRepository for SqliteRepositories {
    async fn get_daily_active_users(&self, from: NaiveDate, to: NaiveDate) -> AppResult<Vec<DailyActiveUsers>> {
        let from = from.format("%Y-%m-%d").to_string();
        let to = to.format("%Y-%m-%d").to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT expense_date, COUNT(DISTINCT user_id) FROM expenses
                 WHERE expense_date BETWEEN ?1 AND ?2 GROUP BY expense_date ORDER BY expense_date",
            )?;
            let rows = stmt.query_map(params![from, to], |row| {
                let date: String = row.get(0)?;
                Ok(DailyActiveUsers {
                    date: parse_iso_date(&date).unwrap_or_default(),
                    active_users: row.get(1)?,
                })
            })?;
            rows.collect()
        })
        .await
    }

    async fn get_expenses_summary(&self, from: NaiveDate, to: NaiveDate) -> AppResult<ExpensesSummary> {
        let from = from.format("%Y-%m-%d").to_string();
        let to = to.format("%Y-%m-%d").to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(amount_cents), 0), COALESCE(AVG(amount_cents), 0)
                 FROM expenses WHERE expense_date BETWEEN ?1 AND ?2",
                params![from, to],
                |row| {
                    Ok(ExpensesSummary {
                        total_count: row.get(0)?,
                        total_amount_cents: row.get(1)?,
                        average_amount_cents: row.get::<_, f64>(2)? as i64,
                    })
                },
            )
        })
        .await
    }

    async fn get_category_trends(&self, user_id: &str, from: NaiveDate, to: NaiveDate) -> AppResult<Vec<CategoryTrend>> {
        let user_id = user_id.to_string();
        let from = from.format("%Y-%m-%d").to_string();
        let to = to.format("%Y-%m-%d").to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT COALESCE(c.name, 'Uncategorized') AS category_name, COALESCE(SUM(e.amount_cents), 0), COUNT(*)
                 FROM expenses e LEFT JOIN categories c ON e.category_id = c.id
                 WHERE e.user_id = ?1 AND e.expense_date BETWEEN ?2 AND ?3
                 GROUP BY category_name ORDER BY SUM(e.amount_cents) DESC",
            )?;
            let rows = stmt.query_map(params![user_id, from, to], |row| {
                Ok(CategoryTrend {
                    category_name: row.get(0)?,
                    total_amount_cents: row.get(1)?,
                    expense_count: row.get(2)?,
                })
            })?;
            rows.collect()
        })
        .await
    }

    async fn get_growth_metrics(&self, days: i64) -> AppResult<GrowthMetrics> {
        self.with_conn(move |conn| {
            let total_users: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
            let total_expenses: i64 = conn.query_row("SELECT COUNT(*) FROM expenses", [], |row| row.get(0))?;
            let cutoff = (Utc::now() - chrono::Duration::days(days)).to_rfc3339();
            let new_users: i64 = conn.query_row(
                "SELECT COUNT(*) FROM users WHERE created_at >= ?1",
                params![cutoff],
                |row| row.get(0),
            )?;
            Ok(GrowthMetrics {
                total_users,
                new_users,
                total_expenses,
            })
        })
        .await
    }

    async fn get_new_users_per_day(&self, from: NaiveDate, to: NaiveDate) -> AppResult<Vec<NewUsersPerDay>> {
        let from = rfc3339(Utc.from_utc_datetime(&from.and_hms_opt(0, 0, 0).unwrap()));
        let to = rfc3339(Utc.from_utc_datetime(&to.and_hms_opt(23, 59, 59).unwrap()));
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT substr(created_at, 1, 10) AS day, COUNT(*) FROM users
                 WHERE created_at BETWEEN ?1 AND ?2 GROUP BY day ORDER BY day",
            )?;
            let rows = stmt.query_map(params![from, to], |row| {
                let date: String = row.get(0)?;
                Ok(NewUsersPerDay {
                    date: parse_iso_date(&date).unwrap_or_default(),
                    new_users: row.get(1)?,
                })
            })?;
            rows.collect()
        })
        .await
    }
}

#[async_trait]
impl AiCostRepository for SqliteRepositories {
    async fn append(&self, entry: NewAiCostLog) -> AppResult<AiCostLog> {
        self.with_conn(move |conn| {
            let now = rfc3339(Utc::now());
            conn.execute(
                "INSERT INTO ai_cost_logs (user_id, operation, provider, model, input_tokens, output_tokens, total_tokens, cost_cents, currency, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    entry.user_id,
                    entry.operation.as_str(),
                    entry.provider,
                    entry.model,
                    entry.input_tokens,
                    entry.output_tokens,
                    entry.total_tokens,
                    entry.cost.cents(),
                    entry.currency,
                    now,
                ],
            )?;
            let id = conn.last_insert_rowid();
            conn.query_row(
                "SELECT id, user_id, operation, provider, model, input_tokens, output_tokens, total_tokens, cost_cents, currency, created_at FROM ai_cost_logs WHERE id = ?1",
                params![id],
                row_to_ai_cost_log,
            )
        })
        .await
    }

    async fn get_by_user_id(&self, user_id: &str) -> AppResult<Vec<AiCostLog>> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, operation, provider, model, input_tokens, output_tokens, total_tokens, cost_cents, currency, created_at
                 FROM ai_cost_logs WHERE user_id = ?1 ORDER BY created_at DESC",
            )?;
            let rows = stmt.query_map(params![user_id], row_to_ai_cost_log)?;
            rows.collect()
        })
        .await
    }

    async fn get_summary_by_day(&self, from: NaiveDate, to: NaiveDate) -> AppResult<Vec<AiCostByDay>> {
        let from = from.format("%Y-%m-%d").to_string();
        let to = to.format("%Y-%m-%d").to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT substr(created_at, 1, 10) AS day, COALESCE(SUM(cost_cents), 0), COUNT(*)
                 FROM ai_cost_logs WHERE substr(created_at, 1, 10) BETWEEN ?1 AND ?2 GROUP BY day ORDER BY day",
            )?;
            let rows = stmt.query_map(params![from, to], |row| {
                let date: String = row.get(0)?;
                Ok(AiCostByDay {
                    date: parse_iso_date(&date).unwrap_or_default(),
                    total_cost_cents: row.get(1)?,
                    call_count: row.get(2)?,
                })
            })?;
            rows.collect()
        })
        .await
    }

    async fn get_summary_by_operation(&self, from: NaiveDate, to: NaiveDate) -> AppResult<Vec<AiCostByOperation>> {
        let from = from.format("%Y-%m-%d").to_string();
        let to = to.format("%Y-%m-%d").to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT operation, COALESCE(SUM(cost_cents), 0), COUNT(*)
                 FROM ai_cost_logs WHERE substr(created_at, 1, 10) BETWEEN ?1 AND ?2 GROUP BY operation",
            )?;
            let rows = stmt.query_map(params![from, to], |row| {
                let op: String = row.get(0)?;
                Ok(AiCostByOperation {
                    operation: if op == "suggest_category" {
                        AiOperation::SuggestCategory
                    } else {
                        AiOperation::ParseExpense
                    },
                    total_cost_cents: row.get(1)?,
                    call_count: row.get(2)?,
                })
            })?;
            rows.collect()
        })
        .await
    }

    async fn get_summary_by_user(&self, from: NaiveDate, to: NaiveDate) -> AppResult<Vec<AiCostByUser>> {
        let from = from.format("%Y-%m-%d").to_string();
        let to = to.format("%Y-%m-%d").to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, COALESCE(SUM(cost_cents), 0), COUNT(*)
                 FROM ai_cost_logs WHERE substr(created_at, 1, 10) BETWEEN ?1 AND ?2 GROUP BY user_id ORDER BY SUM(cost_cents) DESC",
            )?;
            let rows = stmt.query_map(params![from, to], |row| {
                Ok(AiCostByUser {
                    user_id: row.get(0)?,
                    total_cost_cents: row.get(1)?,
                    call_count: row.get(2)?,
                })
            })?;
            rows.collect()
        })
        .await
    }
}

fn row_to_ai_cost_log(row: &rusqlite::Row) -> rusqlite::Result<AiCostLog> {
    let op: String = row.get(2)?;
    let created_at: String = row.get(10)?;
    Ok(AiCostLog {
        id: row.get(0)?,
        user_id: row.get(1)?,
        operation: if op == "suggest_category" {
            AiOperation::SuggestCategory
        } else {
            AiOperation::ParseExpense
        },
        provider: row.get(3)?,
        model: row.get(4)?,
        input_tokens: row.get(5)?,
        output_tokens: row.get(6)?,
        total_tokens: row.get(7)?,
        cost: Money::from_cents(row.get(8)?),
        currency: row.get(9)?,
        created_at: parse_rfc3339(&created_at).unwrap_or_else(|_| Utc::now()),
    })
}

#[async_trait]
impl PricingRepository for SqliteRepositories {
    async fn get_active(&self, provider: &str, model: &str, now: DateTime<Utc>) -> AppResult<Option<PricingConfig>> {
        let provider = provider.to_string();
        let model = model.to_string();
        let now_date = now.format("%Y-%m-%d").to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, provider, model, input_price_per_million_cents, output_price_per_million_cents, effective_date, is_active
                 FROM ai_pricing_config
                 WHERE provider = ?1 AND model = ?2 AND is_active = 1 AND effective_date <= ?3
                 ORDER BY effective_date DESC LIMIT 1",
                params![provider, model, now_date],
                |row| {
                    let effective_date: String = row.get(5)?;
                    Ok(PricingConfig {
                        id: row.get(0)?,
                        provider: row.get(1)?,
                        model: row.get(2)?,
                        input_price_per_million: Money::from_cents(row.get(3)?),
                        output_price_per_million: Money::from_cents(row.get(4)?),
                        effective_date: parse_iso_date(&effective_date).unwrap_or_default(),
                        is_active: row.get::<_, i64>(6)? != 0,
                    })
                },
            )
            .optional()
        })
        .await
    }
}

#[async_trait]
impl PolicyRepository for SqliteRepositories {
    async fn get_by_key(&self, key: &str) -> AppResult<Option<Policy>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT key, content, updated_at FROM policies WHERE key = ?1",
                params![key],
                |row| {
                    let updated_at: String = row.get(2)?;
                    Ok(Policy {
                        key: row.get(0)?,
                        content: row.get(1)?,
                        updated_at: parse_rfc3339(&updated_at).unwrap_or_else(|_| Utc::now()),
                    })
                },
            )
            .optional()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::migrations;

    fn migrated_repo(tmp: &tempfile::TempDir) -> SqliteRepositories {
        let db_path = tmp.path().join("test.db");
        let conn = Connection::open(&db_path).unwrap();
        let sql = std::fs::read_to_string(
            Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations/sqlite/001_create_schema.up.sql"),
        )
        .unwrap();
        conn.execute_batch(&sql).unwrap();
        let _ = migrations::load_migrations; // keep module linked for other tests
        SqliteRepositories::new(db_path)
    }

    #[tokio::test]
    async fn create_user_is_idempotent_on_race() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = migrated_repo(&tmp);
        let a = UserRepository::create(&repo, "u1", MessengerType::Line).await.unwrap();
        let b = UserRepository::create(&repo, "u1", MessengerType::Line).await.unwrap();
        assert_eq!(a.user_id, b.user_id);
    }

    #[tokio::test]
    async fn expense_crud_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = migrated_repo(&tmp);
        UserRepository::create(&repo, "u1", MessengerType::Terminal).await.unwrap();
        let new_expense = NewExpense {
            user_id: "u1".to_string(),
            description: "lunch".to_string(),
            amount: Money::from_major(12.50),
            category_id: None,
            expense_date: NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
            original_amount: Money::from_major(12.50),
            currency: "USD".to_string(),
            home_amount: Money::from_major(12.50),
            home_currency: "USD".to_string(),
            exchange_rate: 1.0,
        };
        let created = ExpenseRepository::create(&repo, new_expense).await.unwrap();
        assert_eq!(created.amount.cents(), 1250);

        let fetched = repo.get_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(fetched.description, "lunch");

        let by_user = repo.get_by_user_id("u1").await.unwrap();
        assert_eq!(by_user.len(), 1);
    }

    #[tokio::test]
    async fn expenses_ordered_by_date_then_created_desc() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = migrated_repo(&tmp);
        UserRepository::create(&repo, "u1", MessengerType::Terminal).await.unwrap();
        for (day, desc) in [(1, "early"), (5, "late")] {
            let new_expense = NewExpense {
                user_id: "u1".to_string(),
                description: desc.to_string(),
                amount: Money::from_major(1.0),
                category_id: None,
                expense_date: NaiveDate::from_ymd_opt(2026, 7, day).unwrap(),
                original_amount: Money::from_major(1.0),
                currency: "USD".to_string(),
                home_amount: Money::from_major(1.0),
                home_currency: "USD".to_string(),
                exchange_rate: 1.0,
            };
            ExpenseRepository::create(&repo, new_expense).await.unwrap();
        }
        let results = repo.get_by_user_id("u1").await.unwrap();
        assert_eq!(results[0].description, "late");
        assert_eq!(results[1].description, "early");
    }

    #[tokio::test]
    async fn create_category_is_idempotent_under_unique_name_conflict() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = migrated_repo(&tmp);
        UserRepository::create(&repo, "u1", MessengerType::Terminal).await.unwrap();

        let first = CategoryRepository::create(&repo, "u1", "Food", true).await.unwrap();
        let second = CategoryRepository::create(&repo, "u1", "Food", true).await.unwrap();
        assert_eq!(first.id, second.id);

        let categories = repo.get_by_user_id("u1").await.unwrap();
        assert_eq!(categories.iter().filter(|c| c.name == "Food").count(), 1);
    }

    #[tokio::test]
    async fn concurrent_create_category_converges_to_one_row() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = migrated_repo(&tmp);
        UserRepository::create(&repo, "u1", MessengerType::Terminal).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                CategoryRepository::create(&repo, "u1", "Food", true).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let categories = repo.get_by_user_id("u1").await.unwrap();
        assert_eq!(categories.iter().filter(|c| c.name == "Food").count(), 1);
    }

    #[tokio::test]
    async fn category_keyword_lifecycle() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = migrated_repo(&tmp);
        UserRepository::create(&repo, "u1", MessengerType::Terminal).await.unwrap();
        let cat = CategoryRepository::create(&repo, "u1", "Food", true)
            .await
            .unwrap();
        let kw = repo.add_keyword(cat.id, "coffee", 10).await.unwrap();
        let keywords = repo.get_keywords(cat.id).await.unwrap();
        assert_eq!(keywords.len(), 1);
        repo.delete_keyword(kw.id).await.unwrap();
        assert!(repo.get_keywords(cat.id).await.unwrap().is_empty());
    }
}
