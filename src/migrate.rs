use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the record store schema on an open pool. Idempotent.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // One row per library document; content is either embedded (base64)
    // or referenced by storage_url.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            owner_user_id TEXT NOT NULL,
            session_id TEXT,
            title TEXT NOT NULL,
            file_type TEXT NOT NULL DEFAULT 'other',
            storage_url TEXT,
            embedded_content TEXT,
            timestamp TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(owner_user_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_owner_session ON documents(owner_user_id, session_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
