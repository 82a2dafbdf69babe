//! Postgres repository implementation (feature `postgres`).
//!
//! Uses `tokio-postgres` directly against a shared `Arc<Client>` rather than
//! the teacher's synchronous `postgres` crate pairing, since the rest of
//! this service is built on `tokio`/`axum` end to end; a blocking driver
//! would need its own thread pool for no benefit. `tokio-postgres-rustls`
//! supplies TLS the same way the teacher wires `rustls` elsewhere for its
//! outbound HTTP clients.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rustls::ClientConfig;
use tokio_postgres::{Client, NoTls, Row};
use tokio_postgres_rustls::MakeRustlsConnect;

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

fn to_app_err(e: tokio_postgres::Error) -> AppError {
    AppError::Persistence(anyhow::Error::new(e))
}

#[derive(Clone)]
pub struct PostgresRepositories {
    client: Arc<Client>,
}

impl PostgresRepositories {
    /// Connects with TLS when the connection string requests `sslmode`,
    /// otherwise plain TCP; the driver's background connection task is
    /// spawned onto the runtime and logged if it ever exits with an error.
    pub async fn connect(connection_string: &str) -> anyhow::Result<Self> {
        let use_tls = connection_string.contains("sslmode=require")
            || connection_string.contains("sslmode=verify");

        let client = if use_tls {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            let tls_config = ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth();
            let connector = MakeRustlsConnect::new(tls_config);
            let (client, connection) = tokio_postgres::connect(connection_string, connector)
                .await
                .context("connecting to postgres over tls")?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::error!(error = %e, "postgres connection task exited");
                }
            });
            client
        } else {
            let (client, connection) = tokio_postgres::connect(connection_string, NoTls)
                .await
                .context("connecting to postgres")?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::error!(error = %e, "postgres connection task exited");
                }
            });
            client
        };

        Ok(Self {
            client: Arc::new(client),
        })
    }

    pub fn client(&self) -> Arc<Client> {
        self.client.clone()
    }
}

fn row_to_user(row: &Row) -> User {
    let messenger_type: String = row.get(1);
    User {
        user_id: row.get(0),
        messenger_type: MessengerType::parse(&messenger_type).unwrap_or(MessengerType::Terminal),
        created_at: row.get(2),
    }
}

#[async_trait]
impl UserRepository for PostgresRepositories {
    async fn create(&self, user_id: &str, messenger_type: MessengerType) -> AppResult<User> {
        let now = Utc::now();
        self.client
            .execute(
                "INSERT INTO users (user_id, messenger_type, created_at) VALUES ($1, $2, $3) ON CONFLICT (user_id) DO NOTHING",
                &[&user_id, &messenger_type.as_str(), &now],
            )
            .await
            .map_err(to_app_err)?;
        let row = self
            .client
            .query_one(
                "SELECT user_id, messenger_type, created_at FROM users WHERE user_id = $1",
                &[&user_id],
            )
            .await
            .map_err(to_app_err)?;
        Ok(row_to_user(&row))
    }

    async fn get_by_id(&self, user_id: &str) -> AppResult<Option<User>> {
        let row = self
            .client
            .query_opt(
                "SELECT user_id, messenger_type, created_at FROM users WHERE user_id = $1",
                &[&user_id],
            )
            .await
            .map_err(to_app_err)?;
        Ok(row.map(|r| row_to_user(&r)))
    }
}

fn row_to_category(row: &Row) -> Category {
    Category {
        id: row.get(0),
        user_id: row.get(1),
        name: row.get(2),
        is_default: row.get(3),
        created_at: row.get(4),
    }
}

fn row_to_keyword(row: &Row) -> CategoryKeyword {
    CategoryKeyword {
        id: row.get(0),
        category_id: row.get(1),
        keyword: row.get(2),
        priority: row.get(3),
    }
}

#[async_trait]
impl CategoryRepository for PostgresRepositories {
    /// Idempotent under the `UNIQUE(user_id, name)` constraint: the
    /// `DO UPDATE` is a no-op write (`name = EXCLUDED.name`) used only so
    /// `RETURNING` still yields the existing row on conflict — two callers
    /// racing to create the same category (e.g. concurrent default-category
    /// seeding) both succeed and converge on one row.
    async fn create(&self, user_id: &str, name: &str, is_default: bool) -> AppResult<Category> {
        let now = Utc::now();
        let row = self
            .client
            .query_one(
                "INSERT INTO categories (user_id, name, is_default, created_at) VALUES ($1, $2, $3, $4)
                 ON CONFLICT (user_id, name) DO UPDATE SET name = EXCLUDED.name
                 RETURNING id, user_id, name, is_default, created_at",
                &[&user_id, &name, &is_default, &now],
            )
            .await
            .map_err(to_app_err)?;
        Ok(row_to_category(&row))
    }

    async fn get_by_id(&self, id: i64) -> AppResult<Option<Category>> {
        let row = self
            .client
            .query_opt(
                "SELECT id, user_id, name, is_default, created_at FROM categories WHERE id = $1",
                &[&id],
            )
            .await
            .map_err(to_app_err)?;
        Ok(row.map(|r| row_to_category(&r)))
    }

    async fn get_by_user_id(&self, user_id: &str) -> AppResult<Vec<Category>> {
        let rows = self
            .client
            .query(
                "SELECT id, user_id, name, is_default, created_at FROM categories WHERE user_id = $1 ORDER BY id",
                &[&user_id],
            )
            .await
            .map_err(to_app_err)?;
        Ok(rows.iter().map(row_to_category).collect())
    }

    async fn get_by_user_id_and_name(&self, user_id: &str, name: &str) -> AppResult<Option<Category>> {
        let row = self
            .client
            .query_opt(
                "SELECT id, user_id, name, is_default, created_at FROM categories WHERE user_id = $1 AND name = $2",
                &[&user_id, &name],
            )
            .await
            .map_err(to_app_err)?;
        Ok(row.map(|r| row_to_category(&r)))
    }

    async fn update(&self, id: i64, name: &str) -> AppResult<()> {
        self.client
            .execute("UPDATE categories SET name = $1 WHERE id = $2", &[&name, &id])
            .await
            .map_err(to_app_err)?;
        Ok(())
    }

    async fn delete(&self, id: i64) -> AppResult<()> {
        self.client
            .execute("DELETE FROM category_keywords WHERE category_id = $1", &[&id])
            .await
            .map_err(to_app_err)?;
        self.client
            .execute("DELETE FROM categories WHERE id = $1", &[&id])
            .await
            .map_err(to_app_err)?;
        Ok(())
    }

    async fn add_keyword(&self, category_id: i64, keyword: &str, priority: i32) -> AppResult<CategoryKeyword> {
        let row = self
            .client
            .query_one(
                "INSERT INTO category_keywords (category_id, keyword, priority) VALUES ($1, $2, $3)
                 RETURNING id, category_id, keyword, priority",
                &[&category_id, &keyword, &priority],
            )
            .await
            .map_err(to_app_err)?;
        Ok(row_to_keyword(&row))
    }

    async fn get_keywords(&self, category_id: i64) -> AppResult<Vec<CategoryKeyword>> {
        let rows = self
            .client
            .query(
                "SELECT id, category_id, keyword, priority FROM category_keywords WHERE category_id = $1 ORDER BY priority DESC",
                &[&category_id],
            )
            .await
            .map_err(to_app_err)?;
        Ok(rows.iter().map(row_to_keyword).collect())
    }

    async fn delete_keyword(&self, id: i64) -> AppResult<()> {
        self.client
            .execute("DELETE FROM category_keywords WHERE id = $1", &[&id])
            .await
            .map_err(to_app_err)?;
        Ok(())
    }
}

fn row_to_expense(row: &Row) -> Expense {
    Expense {
        id: row.get(0),
        user_id: row.get(1),
        description: row.get(2),
        amount: Money::from_cents(row.get(3)),
        category_id: row.get(4),
        expense_date: row.get(5),
        created_at: row.get(6),
        updated_at: row.get(7),
        original_amount: Money::from_cents(row.get(8)),
        currency: row.get(9),
        home_amount: Money::from_cents(row.get(10)),
        home_currency: row.get(11),
        exchange_rate: row.get(12),
    }
}

const EXPENSE_COLUMNS: &str = "id, user_id, description, amount_cents, category_id, expense_date, created_at, updated_at, original_amount_cents, currency, home_amount_cents, home_currency, exchange_rate";

#[async_trait]
impl ExpenseRepository for PostgresRepositories {
    async fn create(&self, new_expense: NewExpense) -> AppResult<Expense> {
        let now = Utc::now();
        let row = self
            .client
            .query_one(
                &format!(
                    "INSERT INTO expenses (user_id, description, amount_cents, category_id, expense_date, created_at, updated_at, original_amount_cents, currency, home_amount_cents, home_currency, exchange_rate)
                     VALUES ($1, $2, $3, $4, $5, $6, $6, $7, $8, $9, $10, $11)
                     RETURNING {EXPENSE_COLUMNS}"
                ),
                &[
                    &new_expense.user_id,
                    &new_expense.description,
                    &new_expense.amount.cents(),
                    &new_expense.category_id,
                    &new_expense.expense_date,
                    &now,
                    &new_expense.original_amount.cents(),
                    &new_expense.currency,
                    &new_expense.home_amount.cents(),
                    &new_expense.home_currency,
                    &new_expense.exchange_rate,
                ],
            )
            .await
            .map_err(to_app_err)?;
        Ok(row_to_expense(&row))
    }

    async fn get_by_id(&self, id: i64) -> AppResult<Option<Expense>> {
        let row = self
            .client
            .query_opt(&format!("SELECT {EXPENSE_COLUMNS} FROM expenses WHERE id = $1"), &[&id])
            .await
            .map_err(to_app_err)?;
        Ok(row.map(|r| row_to_expense(&r)))
    }

    async fn get_by_user_id(&self, user_id: &str) -> AppResult<Vec<Expense>> {
        let rows = self
            .client
            .query(
                &format!("SELECT {EXPENSE_COLUMNS} FROM expenses WHERE user_id = $1 ORDER BY expense_date DESC, created_at DESC"),
                &[&user_id],
            )
            .await
            .map_err(to_app_err)?;
        Ok(rows.iter().map(row_to_expense).collect())
    }

    async fn get_by_user_id_and_date_range(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> AppResult<Vec<Expense>> {
        let rows = self
            .client
            .query(
                &format!("SELECT {EXPENSE_COLUMNS} FROM expenses WHERE user_id = $1 AND expense_date BETWEEN $2 AND $3 ORDER BY expense_date DESC, created_at DESC"),
                &[&user_id, &from, &to],
            )
            .await
            .map_err(to_app_err)?;
        Ok(rows.iter().map(row_to_expense).collect())
    }

    async fn get_by_user_id_and_category(&self, user_id: &str, category_id: i64) -> AppResult<Vec<Expense>> {
        let rows = self
            .client
            .query(
                &format!("SELECT {EXPENSE_COLUMNS} FROM expenses WHERE user_id = $1 AND category_id = $2 ORDER BY expense_date DESC, created_at DESC"),
                &[&user_id, &category_id],
            )
            .await
            .map_err(to_app_err)?;
        Ok(rows.iter().map(row_to_expense).collect())
    }

    async fn update(&self, expense: &Expense) -> AppResult<()> {
        self.client
            .execute(
                "UPDATE expenses SET description = $1, amount_cents = $2, category_id = $3, expense_date = $4, updated_at = $5,
                 original_amount_cents = $6, currency = $7, home_amount_cents = $8, home_currency = $9, exchange_rate = $10
                 WHERE id = $11",
                &[
                    &expense.description,
                    &expense.amount.cents(),
                    &expense.category_id,
                    &expense.expense_date,
                    &Utc::now(),
                    &expense.original_amount.cents(),
                    &expense.currency,
                    &expense.home_amount.cents(),
                    &expense.home_currency,
                    &expense.exchange_rate,
                    &expense.id,
                ],
            )
            .await
            .map_err(to_app_err)?;
        Ok(())
    }

    async fn delete(&self, id: i64) -> AppResult<()> {
        self.client
            .execute("DELETE FROM expenses WHERE id = $1", &[&id])
            .await
            .map_err(to_app_err)?;
        Ok(())
    }
}

#[async_trait]
impl MetricsRepository for PostgresRepositories {
    async fn get_daily_active_users(&self, from: NaiveDate, to: NaiveDate) -> AppResult<Vec<DailyActiveUsers>> {
        let rows = self
            .client
            .query(
                "SELECT expense_date, COUNT(DISTINCT user_id) FROM expenses
                 WHERE expense_date BETWEEN $1 AND $2 GROUP BY expense_date ORDER BY expense_date",
                &[&from, &to],
            )
            .await
            .map_err(to_app_err)?;
        Ok(rows
            .iter()
            .map(|r| DailyActiveUsers {
                date: r.get(0),
                active_users: r.get(1),
            })
            .collect())
    }

    async fn get_expenses_summary(&self, from: NaiveDate, to: NaiveDate) -> AppResult<ExpensesSummary> {
        let row = self
            .client
            .query_one(
                "SELECT COUNT(*), COALESCE(SUM(amount_cents), 0), COALESCE(AVG(amount_cents), 0)
                 FROM expenses WHERE expense_date BETWEEN $1 AND $2",
                &[&from, &to],
            )
            .await
            .map_err(to_app_err)?;
        Ok(ExpensesSummary {
            total_count: row.get(0),
            total_amount_cents: row.get(1),
            average_amount_cents: row.get::<_, f64>(2) as i64,
        })
    }

    async fn get_category_trends(&self, user_id: &str, from: NaiveDate, to: NaiveDate) -> AppResult<Vec<CategoryTrend>> {
        let rows = self
            .client
            .query(
                "SELECT COALESCE(c.name, 'Uncategorized') AS category_name, COALESCE(SUM(e.amount_cents), 0), COUNT(*)
                 FROM expenses e LEFT JOIN categories c ON e.category_id = c.id
                 WHERE e.user_id = $1 AND e.expense_date BETWEEN $2 AND $3
                 GROUP BY category_name ORDER BY SUM(e.amount_cents) DESC",
                &[&user_id, &from, &to],
            )
            .await
            .map_err(to_app_err)?;
        Ok(rows
            .iter()
            .map(|r| CategoryTrend {
                category_name: r.get(0),
                total_amount_cents: r.get(1),
                expense_count: r.get(2),
            })
            .collect())
    }

    async fn get_growth_metrics(&self, days: i64) -> AppResult<GrowthMetrics> {
        let total_users: i64 = self
            .client
            .query_one("SELECT COUNT(*) FROM users", &[])
            .await
            .map_err(to_app_err)?
            .get(0);
        let total_expenses: i64 = self
            .client
            .query_one("SELECT COUNT(*) FROM expenses", &[])
            .await
            .map_err(to_app_err)?
            .get(0);
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let new_users: i64 = self
            .client
            .query_one("SELECT COUNT(*) FROM users WHERE created_at >= $1", &[&cutoff])
            .await
            .map_err(to_app_err)?
            .get(0);
        Ok(GrowthMetrics {
            total_users,
            new_users,
            total_expenses,
        })
    }

    async fn get_new_users_per_day(&self, from: NaiveDate, to: NaiveDate) -> AppResult<Vec<NewUsersPerDay>> {
        let from_dt: DateTime<Utc> = DateTime::from_naive_utc_and_offset(from.and_hms_opt(0, 0, 0).unwrap(), Utc);
        let to_dt: DateTime<Utc> = DateTime::from_naive_utc_and_offset(to.and_hms_opt(23, 59, 59).unwrap(), Utc);
        let rows = self
            .client
            .query(
                "SELECT created_at::date AS day, COUNT(*) FROM users
                 WHERE created_at BETWEEN $1 AND $2 GROUP BY day ORDER BY day",
                &[&from_dt, &to_dt],
            )
            .await
            .map_err(to_app_err)?;
        Ok(rows
            .iter()
            .map(|r| NewUsersPerDay {
                date: r.get(0),
                new_users: r.get(1),
            })
            .collect())
    }
}

fn row_to_ai_cost_log(row: &Row) -> AiCostLog {
    let op: String = row.get(2);
    AiCostLog {
        id: row.get(0),
        user_id: row.get(1),
        operation: if op == "suggest_category" {
            AiOperation::SuggestCategory
        } else {
            AiOperation::ParseExpense
        },
        provider: row.get(3),
        model: row.get(4),
        input_tokens: row.get(5),
        output_tokens: row.get(6),
        total_tokens: row.get(7),
        cost: Money::from_cents(row.get(8)),
        currency: row.get(9),
        created_at: row.get(10),
    }
}

#[async_trait]
impl AiCostRepository for PostgresRepositories {
    async fn append(&self, entry: NewAiCostLog) -> AppResult<AiCostLog> {
        let now = Utc::now();
        let row = self
            .client
            .query_one(
                "INSERT INTO ai_cost_logs (user_id, operation, provider, model, input_tokens, output_tokens, total_tokens, cost_cents, currency, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                 RETURNING id, user_id, operation, provider, model, input_tokens, output_tokens, total_tokens, cost_cents, currency, created_at",
                &[
                    &entry.user_id,
                    &entry.operation.as_str(),
                    &entry.provider,
                    &entry.model,
                    &entry.input_tokens,
                    &entry.output_tokens,
                    &entry.total_tokens,
                    &entry.cost.cents(),
                    &entry.currency,
                    &now,
                ],
            )
            .await
            .map_err(to_app_err)?;
        Ok(row_to_ai_cost_log(&row))
    }

    async fn get_by_user_id(&self, user_id: &str) -> AppResult<Vec<AiCostLog>> {
        let rows = self
            .client
            .query(
                "SELECT id, user_id, operation, provider, model, input_tokens, output_tokens, total_tokens, cost_cents, currency, created_at
                 FROM ai_cost_logs WHERE user_id = $1 ORDER BY created_at DESC",
                &[&user_id],
            )
            .await
            .map_err(to_app_err)?;
        Ok(rows.iter().map(row_to_ai_cost_log).collect())
    }

    async fn get_summary_by_day(&self, from: NaiveDate, to: NaiveDate) -> AppResult<Vec<AiCostByDay>> {
        let rows = self
            .client
            .query(
                "SELECT created_at::date AS day, COALESCE(SUM(cost_cents), 0), COUNT(*)
                 FROM ai_cost_logs WHERE created_at::date BETWEEN $1 AND $2 GROUP BY day ORDER BY day",
                &[&from, &to],
            )
            .await
            .map_err(to_app_err)?;
        Ok(rows
            .iter()
            .map(|r| AiCostByDay {
                date: r.get(0),
                total_cost_cents: r.get(1),
                call_count: r.get(2),
            })
            .collect())
    }

    async fn get_summary_by_operation(&self, from: NaiveDate, to: NaiveDate) -> AppResult<Vec<AiCostByOperation>> {
        let rows = self
            .client
            .query(
                "SELECT operation, COALESCE(SUM(cost_cents), 0), COUNT(*)
                 FROM ai_cost_logs WHERE created_at::date BETWEEN $1 AND $2 GROUP BY operation",
                &[&from, &to],
            )
            .await
            .map_err(to_app_err)?;
        Ok(rows
            .iter()
            .map(|r| {
                let op: String = r.get(0);
                AiCostByOperation {
                    operation: if op == "suggest_category" {
                        AiOperation::SuggestCategory
                    } else {
                        AiOperation::ParseExpense
                    },
                    total_cost_cents: r.get(1),
                    call_count: r.get(2),
                }
            })
            .collect())
    }

    async fn get_summary_by_user(&self, from: NaiveDate, to: NaiveDate) -> AppResult<Vec<AiCostByUser>> {
        let rows = self
            .client
            .query(
                "SELECT user_id, COALESCE(SUM(cost_cents), 0), COUNT(*)
                 FROM ai_cost_logs WHERE created_at::date BETWEEN $1 AND $2 GROUP BY user_id ORDER BY SUM(cost_cents) DESC",
                &[&from, &to],
            )
            .await
            .map_err(to_app_err)?;
        Ok(rows
            .iter()
            .map(|r| AiCostByUser {
                user_id: r.get(0),
                total_cost_cents: r.get(1),
                call_count: r.get(2),
            })
            .collect())
    }
}

#[async_trait]
impl PricingRepository for PostgresRepositories {
    async fn get_active(&self, provider: &str, model: &str, now: DateTime<Utc>) -> AppResult<Option<PricingConfig>> {
        let now_date = now.date_naive();
        let row = self
            .client
            .query_opt(
                "SELECT id, provider, model, input_price_per_million_cents, output_price_per_million_cents, effective_date, is_active
                 FROM ai_pricing_config
                 WHERE provider = $1 AND model = $2 AND is_active = true AND effective_date <= $3
                 ORDER BY effective_date DESC LIMIT 1",
                &[&provider, &model, &now_date],
            )
            .await
            .map_err(to_app_err)?;
        Ok(row.map(|r| PricingConfig {
            id: r.get(0),
            provider: r.get(1),
            model: r.get(2),
            input_price_per_million: Money::from_cents(r.get(3)),
            output_price_per_million: Money::from_cents(r.get(4)),
            effective_date: r.get(5),
            is_active: r.get(6),
        }))
    }
}

#[async_trait]
impl PolicyRepository for PostgresRepositories {
    async fn get_by_key(&self, key: &str) -> AppResult<Option<Policy>> {
        let row = self
            .client
            .query_opt("SELECT key, content, updated_at FROM policies WHERE key = $1", &[&key])
            .await
            .map_err(to_app_err)?;
        Ok(row.map(|r| Policy {
            key: r.get(0),
            content: r.get(1),
            updated_at: r.get(2),
        }))
    }
}
