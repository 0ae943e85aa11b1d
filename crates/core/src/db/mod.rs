pub mod repository;
pub mod resilience;
pub mod sqlite;

use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::info;

use crate::config::DmsConfig;
use crate::error::Result;
use crate::schema::SchemaProvider;

use resilience::ResilientDocumentStore;
use sqlite::SqliteDocumentStore;

pub enum DatabasePool {
    Sqlite(SqlitePool),
}

impl DatabasePool {
    /// Create a new SQLite database pool from a connection string and run migrations.
    pub async fn new_sqlite(path: &str) -> Result<Self> {
        let pool = SqlitePool::connect(path).await?;
        Self::run_migrations(&pool).await?;
        Ok(DatabasePool::Sqlite(pool))
    }

    /// Create a new in-memory SQLite database pool and run migrations. Useful for testing.
    pub async fn new_sqlite_memory() -> Result<Self> {
        let pool = SqlitePool::connect(":memory:").await?;
        Self::run_migrations(&pool).await?;
        Ok(DatabasePool::Sqlite(pool))
    }

    pub fn sqlite(&self) -> &SqlitePool {
        match self {
            DatabasePool::Sqlite(pool) => pool,
        }
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<()> {
        sqlx::query("PRAGMA foreign_keys = ON;")
            .execute(pool)
            .await?;

        let migrations: &[&str] = &[include_str!(
            "../../../../migrations/sqlite/001_documents.sql"
        )];

        for migration_sql in migrations {
            for statement in migration_sql.split(';') {
                let trimmed = statement.trim();
                if !trimmed.is_empty() && !trimmed.starts_with("PRAGMA") {
                    let result = sqlx::query(trimmed).execute(pool).await;
                    if let Err(e) = &result {
                        if e.to_string().contains("already exists") {
                            continue;
                        }
                        result?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Open the configured database and wrap its document store in the configured
/// resilience policy.
pub async fn open_document_store(
    config: &DmsConfig,
    schemas: Arc<SchemaProvider>,
) -> Result<ResilientDocumentStore> {
    let pool = DatabasePool::new_sqlite(&config.dms.database.connection_string()).await?;
    info!(path = %config.dms.database.path, "document store opened");
    let store = SqliteDocumentStore::new(pool.sqlite().clone(), schemas);
    Ok(ResilientDocumentStore::new(Arc::new(store), config.resilience.policy()))
}
