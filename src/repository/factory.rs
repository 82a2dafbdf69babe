//! Dialect selection + migration bootstrap (spec.md §4.1).
//!
//! `connect` inspects [`crate::config::DatabaseTarget`] and builds the
//! matching `Repositories` bundle, running pending migrations from the
//! dialect-named subdirectory under `migrations/` first. A dirty row
//! refuses to start per the spec's fatal-on-interrupted-apply rule.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use rusqlite::Connection;

use crate::config::{Config, DatabaseTarget};
use crate::repository::migrations::{self, dirty_migration_error, Migration};
use crate::repository::sqlite::SqliteRepositories;
use crate::repository::Repositories;

#[cfg(feature = "postgres")]
use crate::repository::postgres::PostgresRepositories;

fn migrations_dir(base: &Path, dialect: &str) -> PathBuf {
    base.join(dialect)
}

pub async fn connect(config: &Config) -> Result<Repositories> {
    let migrations_base =
        std::env::var("MIGRATIONS_DIR").unwrap_or_else(|_| "migrations".to_string());
    let migrations_base = PathBuf::from(migrations_base);

    match &config.database {
        DatabaseTarget::Sqlite(path) => {
            let path = path.clone();
            let dir = migrations_dir(&migrations_base, "sqlite");
            let path_for_migrate = path.clone();
            tokio::task::spawn_blocking(move || apply_sqlite_migrations(&path_for_migrate, &dir))
                .await
                .context("migration task panicked")??;

            let repo = SqliteRepositories::new(&path);
            Ok(Repositories {
                users: Arc::new(repo.clone()),
                categories: Arc::new(repo.clone()),
                expenses: Arc::new(repo.clone()),
                metrics: Arc::new(repo.clone()),
                ai_costs: Arc::new(repo.clone()),
                pricing: Arc::new(repo.clone()),
                policies: Arc::new(repo),
            })
        }
        #[cfg(feature = "postgres")]
        DatabaseTarget::Postgres(url) => {
            let dir = migrations_dir(&migrations_base, "postgres");
            let repo = PostgresRepositories::connect(url).await?;
            apply_postgres_migrations(&repo, &dir).await?;
            Ok(Repositories {
                users: Arc::new(repo.clone()),
                categories: Arc::new(repo.clone()),
                expenses: Arc::new(repo.clone()),
                metrics: Arc::new(repo.clone()),
                ai_costs: Arc::new(repo.clone()),
                pricing: Arc::new(repo.clone()),
                policies: Arc::new(repo),
            })
        }
        #[cfg(not(feature = "postgres"))]
        DatabaseTarget::Postgres(_) => {
            bail!("this build was compiled without the `postgres` feature")
        }
    }
}

const SCHEMA_MIGRATIONS_TABLE_SQLITE: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    dirty INTEGER NOT NULL,
    applied_at TEXT NOT NULL
)";

fn apply_sqlite_migrations(db_path: &Path, dir: &Path) -> Result<()> {
    let mut conn = Connection::open(db_path).context("opening sqlite connection for migration")?;
    conn.execute(SCHEMA_MIGRATIONS_TABLE_SQLITE, [])?;

    let pending = migrations::load_migrations(dir)?;
    for migration in pending {
        let row: Option<bool> = conn
            .query_row(
                "SELECT dirty FROM schema_migrations WHERE version = ?1",
                [migration.version],
                |row| row.get::<_, i64>(0),
            )
            .map(|v| v != 0)
            .ok();

        match migrations::status_of(row) {
            migrations::MigrationStatus::Applied => continue,
            migrations::MigrationStatus::Dirty => return Err(dirty_migration_error(migration.version)),
            migrations::MigrationStatus::Pending => {}
        }

        apply_one_sqlite(&mut conn, &migration)?;
    }
    Ok(())
}

fn apply_one_sqlite(conn: &mut Connection, migration: &Migration) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version, dirty, applied_at) VALUES (?1, 1, ?2)",
        rusqlite::params![migration.version, chrono::Utc::now().to_rfc3339()],
    )?;

    let tx = conn.transaction()?;
    tx.execute_batch(&migration.up_sql)
        .with_context(|| format!("applying migration {} ({})", migration.version, migration.description))?;
    tx.commit()?;

    conn.execute(
        "UPDATE schema_migrations SET dirty = 0 WHERE version = ?1",
        rusqlite::params![migration.version],
    )?;
    Ok(())
}

#[cfg(feature = "postgres")]
const SCHEMA_MIGRATIONS_TABLE_POSTGRES: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    dirty BOOLEAN NOT NULL,
    applied_at TIMESTAMPTZ NOT NULL
)";

#[cfg(feature = "postgres")]
async fn apply_postgres_migrations(repo: &PostgresRepositories, dir: &Path) -> Result<()> {
    let client = repo.client();
    client.batch_execute(SCHEMA_MIGRATIONS_TABLE_POSTGRES).await?;

    let pending = migrations::load_migrations(dir)?;
    for migration in pending {
        let row = client
            .query_opt(
                "SELECT dirty FROM schema_migrations WHERE version = $1",
                &[&migration.version],
            )
            .await?;
        let dirty: Option<bool> = row.map(|r| r.get(0));

        match migrations::status_of(dirty) {
            migrations::MigrationStatus::Applied => continue,
            migrations::MigrationStatus::Dirty => return Err(dirty_migration_error(migration.version)),
            migrations::MigrationStatus::Pending => {}
        }

        client
            .execute(
                "INSERT INTO schema_migrations (version, dirty, applied_at) VALUES ($1, true, $2)",
                &[&migration.version, &chrono::Utc::now()],
            )
            .await?;

        client
            .batch_execute(&migration.up_sql)
            .await
            .with_context(|| format!("applying migration {} ({})", migration.version, migration.description))?;

        client
            .execute(
                "UPDATE schema_migrations SET dirty = false WHERE version = $1",
                &[&migration.version],
            )
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_migrations_apply_idempotently() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("test.db");
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations/sqlite");

        apply_sqlite_migrations(&db_path, &dir).unwrap();
        apply_sqlite_migrations(&db_path, &dir).unwrap();

        let conn = Connection::open(&db_path).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
        let dirty: i64 = conn
            .query_row("SELECT dirty FROM schema_migrations WHERE version = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(dirty, 0);
    }

    #[test]
    fn dirty_migration_blocks_future_starts() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("test.db");
        let conn = Connection::open(&db_path).unwrap();
        conn.execute(SCHEMA_MIGRATIONS_TABLE_SQLITE, []).unwrap();
        conn.execute(
            "INSERT INTO schema_migrations (version, dirty, applied_at) VALUES (1, 1, ?1)",
            rusqlite::params![chrono::Utc::now().to_rfc3339()],
        )
        .unwrap();
        drop(conn);

        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations/sqlite");
        let result = apply_sqlite_migrations(&db_path, &dir);
        assert!(result.is_err());
    }
}
