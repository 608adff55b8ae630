use crate::StorageError;
use sqlx::SqlitePool;

/// Idempotent schema migration, run once at open. This file owns `accounts`,
/// `messages`, `insights` and `indexing_status`; embedding tables belong to
/// the vector store and are never created here.
pub async fn migrate(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY,
            address TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            provider TEXT NOT NULL,
            imap_host TEXT NOT NULL,
            imap_port INTEGER NOT NULL,
            smtp_host TEXT NOT NULL,
            smtp_port INTEGER NOT NULL,
            auth_kind TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            last_synced_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            folder TEXT NOT NULL,
            uid TEXT NOT NULL,
            message_id TEXT NOT NULL DEFAULT '',
            thread_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            from_name TEXT NOT NULL,
            from_address TEXT NOT NULL,
            to_addresses TEXT NOT NULL,
            date INTEGER NOT NULL,
            snippet TEXT NOT NULL,
            body_html TEXT,
            body_plain TEXT,
            is_read INTEGER NOT NULL DEFAULT 0,
            is_starred INTEGER NOT NULL DEFAULT 0,
            has_attachments INTEGER NOT NULL DEFAULT 0,
            labels TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS insights (
            message_id TEXT PRIMARY KEY,
            summary TEXT,
            priority TEXT NOT NULL DEFAULT 'MEDIUM',
            priority_score REAL NOT NULL DEFAULT 0.5,
            category TEXT,
            insights TEXT,
            action_items TEXT,
            has_deadline INTEGER NOT NULL DEFAULT 0,
            has_meeting INTEGER NOT NULL DEFAULT 0,
            has_financial INTEGER NOT NULL DEFAULT 0,
            sentiment TEXT,
            indexed_at INTEGER NOT NULL,
            FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS indexing_status (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            is_running INTEGER NOT NULL DEFAULT 0,
            total INTEGER NOT NULL DEFAULT 0,
            processed INTEGER NOT NULL DEFAULT 0,
            last_run_at INTEGER,
            error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("INSERT OR IGNORE INTO indexing_status (id) VALUES (1)")
        .execute(pool)
        .await?;

    for statement in [
        "CREATE INDEX IF NOT EXISTS idx_messages_date ON messages(date DESC)",
        "CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id)",
        "CREATE INDEX IF NOT EXISTS idx_messages_account ON messages(account_id)",
        "CREATE INDEX IF NOT EXISTS idx_messages_folder ON messages(account_id, folder)",
        "CREATE INDEX IF NOT EXISTS idx_insights_priority ON insights(priority_score DESC)",
        "CREATE INDEX IF NOT EXISTS idx_insights_category ON insights(category)",
    ] {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}
