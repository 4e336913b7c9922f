//! SQLite connection pool.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::config::Config;

/// Open the store named by `[db].path`, creating the file and its parent
/// directory when missing.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database: {}", db_path.display()))?;

    Ok(pool)
}

/// Fresh migrated database in a temporary directory.
#[cfg(test)]
pub(crate) async fn open_temp() -> (tempfile::TempDir, SqlitePool) {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut config = Config::minimal();
    config.db.path = tmp.path().join("data").join("kt.sqlite");
    let pool = connect(&config).await.unwrap();
    crate::migrate::apply(&pool).await.unwrap();
    (tmp, pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_creates_parent_dir() {
        let (tmp, pool) = open_temp().await;
        assert!(tmp.path().join("data").join("kt.sqlite").exists());
        pool.close().await;
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let (_tmp, pool) = open_temp().await;
        crate::migrate::apply(&pool).await.unwrap();
        let tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN \
             ('projects','files','documentation','kt_plans','user_progress','file_index','file_index_fts')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(tables, 7);
    }
}
