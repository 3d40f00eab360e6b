//! SQLite-backed context store implementation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::error::CoreError;

use super::{ContextStore, ContextStoreProvider, ContextValue};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// SQLite-backed context store.
///
/// Entries are scoped by workflow run name so several runs can share a
/// database file. Every write hits the database immediately, which is
/// what makes runs resumable after a crash.
#[derive(Clone)]
pub struct SqliteContextStore {
    pool: SqlitePool,
    scope: String,
}

impl SqliteContextStore {
    /// Create a store on an existing pool, scoped to `workflow_name`.
    pub fn new(pool: SqlitePool, workflow_name: impl Into<String>) -> Self {
        Self {
            pool,
            scope: workflow_name.into(),
        }
    }

    /// Create and initialize a store from a file path.
    ///
    /// Handles all setup: creates parent directories and the database
    /// file if missing, connects with sensible defaults, and runs all
    /// migrations.
    pub async fn from_path(
        path: impl AsRef<Path>,
        workflow_name: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::StoreError {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let path_str = path.to_string_lossy();
        let url = format!("sqlite:{}?mode=rwc", path_str);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| CoreError::StoreError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| CoreError::StoreError {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self {
            pool,
            scope: workflow_name.into(),
        })
    }
}

#[async_trait]
impl ContextStore for SqliteContextStore {
    async fn save(&self, key: &str, value: ContextValue) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO context_entries (scope, key, type_name, value, updated_at)
            VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(scope, key) DO UPDATE SET
                type_name=excluded.type_name,
                value=excluded.value,
                updated_at=excluded.updated_at
            "#,
        )
        .bind(&self.scope)
        .bind(key)
        .bind(&value.type_name)
        .bind(serde_json::to_string(&value.value)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<ContextValue>, CoreError> {
        let row: Option<(String, String)> = sqlx::query_as(
            r#"
            SELECT type_name, value
            FROM context_entries
            WHERE scope = ? AND key = ?
            "#,
        )
        .bind(&self.scope)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            None => Ok(None),
            Some((type_name, raw)) => Ok(Some(ContextValue {
                type_name,
                value: serde_json::from_str(&raw)?,
            })),
        }
    }

    async fn has_key(&self, key: &str) -> Result<bool, CoreError> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM context_entries
            WHERE scope = ? AND key = ?
            "#,
        )
        .bind(&self.scope)
        .bind(key)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.0 > 0)
    }

    async fn export(&self) -> Result<HashMap<String, ContextValue>, CoreError> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            r#"
            SELECT key, type_name, value
            FROM context_entries
            WHERE scope = ?
            "#,
        )
        .bind(&self.scope)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = HashMap::with_capacity(rows.len());
        for (key, type_name, raw) in rows {
            entries.insert(
                key,
                ContextValue {
                    type_name,
                    value: serde_json::from_str(&raw)?,
                },
            );
        }

        Ok(entries)
    }

    async fn import(&self, entries: HashMap<String, ContextValue>) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await?;

        for (key, value) in entries {
            sqlx::query(
                r#"
                INSERT INTO context_entries (scope, key, type_name, value, updated_at)
                VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
                ON CONFLICT(scope, key) DO UPDATE SET
                    type_name=excluded.type_name,
                    value=excluded.value,
                    updated_at=excluded.updated_at
                "#,
            )
            .bind(&self.scope)
            .bind(&key)
            .bind(&value.type_name)
            .bind(serde_json::to_string(&value.value)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn open(&self) -> Result<(), CoreError> {
        // The pool is already connected and migrated; verify it answers.
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), CoreError> {
        // Pools are shared between runs; nothing to tear down per run.
        Ok(())
    }
}

/// Provider creating [`SqliteContextStore`]s on a shared database file.
#[derive(Clone)]
pub struct SqliteContextProvider {
    path: PathBuf,
}

impl SqliteContextProvider {
    /// Create a provider backed by the database file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ContextStoreProvider for SqliteContextProvider {
    async fn create(&self, workflow_name: &str) -> Result<Box<dyn ContextStore>, CoreError> {
        let store = SqliteContextStore::from_path(&self.path, workflow_name).await?;
        Ok(Box::new(store))
    }
}
