use crate::{schema, StorageError};
use chrono::Utc;
use skiff_core::{
    Account, AuthKind, EmailHeader, EmailInsight, EmailMessage, EmailWithInsight, IndexingStatus,
    Priority, Provider,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Relational store for accounts, messages, insights and the indexing status
/// row. One process-wide handle; the pool is capped at a single connection so
/// every statement is serialized.
#[derive(Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
}

const WITH_INSIGHT_COLUMNS: &str = r#"
    m.id, m.thread_id, m.subject, m.from_name, m.from_address, m.to_addresses,
    m.date, m.snippet, m.is_read, m.is_starred, m.has_attachments,
    COALESCE(i.priority, 'MEDIUM') AS priority,
    COALESCE(i.priority_score, 0.5) AS priority_score,
    i.category, i.summary
"#;

impl MetadataStore {
    pub async fn open(db_path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db_url = format!("sqlite://{}", db_path.to_string_lossy());
        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        schema::migrate(&pool).await?;

        Ok(Self { pool })
    }

    // ---- accounts ----

    pub async fn store_account(&self, account: &Account) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (
              id, address, display_name, provider, imap_host, imap_port,
              smtp_host, smtp_port, auth_kind, is_active, created_at, last_synced_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(id) DO UPDATE SET
              address = excluded.address,
              display_name = excluded.display_name,
              provider = excluded.provider,
              imap_host = excluded.imap_host,
              imap_port = excluded.imap_port,
              smtp_host = excluded.smtp_host,
              smtp_port = excluded.smtp_port,
              auth_kind = excluded.auth_kind,
              is_active = excluded.is_active,
              last_synced_at = excluded.last_synced_at
            "#,
        )
        .bind(&account.id)
        .bind(&account.address)
        .bind(&account.display_name)
        .bind(account.provider.as_str())
        .bind(&account.imap_host)
        .bind(account.imap_port as i64)
        .bind(&account.smtp_host)
        .bind(account.smtp_port as i64)
        .bind(account.auth_kind.as_str())
        .bind(account.is_active)
        .bind(account.created_at)
        .bind(account.last_synced_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>, StorageError> {
        let rows = sqlx::query("SELECT * FROM accounts ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_account).collect()
    }

    pub async fn get_account(&self, account_id: &str) -> Result<Option<Account>, StorageError> {
        let row = sqlx::query("SELECT * FROM accounts WHERE id = ?1")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_account).transpose()
    }

    pub async fn get_active_account(&self) -> Result<Option<Account>, StorageError> {
        let row = sqlx::query("SELECT * FROM accounts WHERE is_active = 1 LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_account).transpose()
    }

    /// Exactly one account is active at a time.
    pub async fn set_active_account(&self, account_id: &str) -> Result<(), StorageError> {
        sqlx::query("UPDATE accounts SET is_active = 0")
            .execute(&self.pool)
            .await?;
        let result = sqlx::query("UPDATE accounts SET is_active = 1 WHERE id = ?1")
            .bind(account_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(account_id.to_string()));
        }
        Ok(())
    }

    pub async fn mark_synced(&self, account_id: &str) -> Result<(), StorageError> {
        sqlx::query("UPDATE accounts SET last_synced_at = ?1 WHERE id = ?2")
            .bind(Utc::now().timestamp())
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Removes the account and all of its messages; insights cascade with
    /// their message rows.
    pub async fn remove_account(&self, account_id: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM messages WHERE account_id = ?1")
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM accounts WHERE id = ?1")
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---- messages ----

    /// Idempotent on `message.id`: the second store of the same id updates the
    /// mutable fields and `updated_at` while `created_at` stays put.
    pub async fn store_message(&self, message: &EmailMessage) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO messages (
              id, account_id, folder, uid, message_id, thread_id, subject,
              from_name, from_address, to_addresses, date, snippet, body_html,
              body_plain, is_read, is_starred, has_attachments, labels,
              created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                      ?14, ?15, ?16, ?17, ?18, ?19, ?20)
            ON CONFLICT(id) DO UPDATE SET
              thread_id = excluded.thread_id,
              subject = excluded.subject,
              from_name = excluded.from_name,
              from_address = excluded.from_address,
              to_addresses = excluded.to_addresses,
              date = excluded.date,
              snippet = excluded.snippet,
              body_html = excluded.body_html,
              body_plain = excluded.body_plain,
              is_read = excluded.is_read,
              is_starred = excluded.is_starred,
              has_attachments = excluded.has_attachments,
              labels = excluded.labels,
              updated_at = excluded.updated_at
            "#,
        )
        .bind(&message.id)
        .bind(&message.account_id)
        .bind(&message.folder)
        .bind(&message.uid)
        .bind(&message.message_id)
        .bind(&message.thread_id)
        .bind(&message.subject)
        .bind(&message.from_name)
        .bind(&message.from_address)
        .bind(serde_json::to_string(&message.to)?)
        .bind(message.date)
        .bind(&message.snippet)
        .bind(&message.body_html)
        .bind(&message.body_plain)
        .bind(message.is_read)
        .bind(message.is_starred)
        .bind(message.has_attachments)
        .bind(serde_json::to_string(&message.labels)?)
        .bind(message.created_at)
        .bind(message.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_message(&self, id: &str) -> Result<Option<EmailMessage>, StorageError> {
        let row = sqlx::query("SELECT * FROM messages WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_message).transpose()
    }

    pub async fn delete_message(&self, id: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM messages WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn cached_headers(&self, limit: i64) -> Result<Vec<EmailHeader>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, folder, uid, thread_id, subject, from_name,
                   from_address, date, snippet, is_read, is_starred, has_attachments
            FROM messages ORDER BY date DESC LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_header).collect()
    }

    /// Reply chain for a thread, oldest first.
    pub async fn messages_in_thread(
        &self,
        thread_id: &str,
    ) -> Result<Vec<EmailMessage>, StorageError> {
        let rows = sqlx::query("SELECT * FROM messages WHERE thread_id = ?1 ORDER BY date ASC")
            .bind(thread_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_message).collect()
    }

    pub async fn all_message_ids(&self, limit: i64) -> Result<Vec<String>, StorageError> {
        let rows = sqlx::query("SELECT id FROM messages ORDER BY date DESC LIMIT ?1")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| row.get::<String, _>("id"))
            .collect())
    }

    pub async fn message_count(&self) -> Result<i64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM messages")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    pub async fn clear_messages(&self) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM messages").execute(&self.pool).await?;
        sqlx::query(
            "UPDATE indexing_status SET is_running = 0, total = 0, processed = 0,
             last_run_at = NULL, error = NULL WHERE id = 1",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ---- insights ----

    pub async fn store_insight(&self, insight: &EmailInsight) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO insights (
              message_id, summary, priority, priority_score, category, insights,
              action_items, has_deadline, has_meeting, has_financial, sentiment,
              indexed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&insight.message_id)
        .bind(&insight.summary)
        .bind(insight.priority.as_str())
        .bind(insight.priority_score)
        .bind(&insight.category)
        .bind(serde_json::to_string(&insight.insights)?)
        .bind(serde_json::to_string(&insight.action_items)?)
        .bind(insight.has_deadline)
        .bind(insight.has_meeting)
        .bind(insight.has_financial)
        .bind(&insight.sentiment)
        .bind(insight.indexed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn indexed_count(&self) -> Result<i64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM insights")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    // ---- joined retrieval queries ----

    /// Priority inbox: messages joined with insights, highest score first,
    /// newest first within a score.
    pub async fn smart_inbox(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<EmailWithInsight>, StorageError> {
        let sql = format!(
            "SELECT {WITH_INSIGHT_COLUMNS}
             FROM messages m LEFT JOIN insights i ON m.id = i.message_id
             ORDER BY COALESCE(i.priority_score, 0.5) DESC, m.date DESC
             LIMIT ?1 OFFSET ?2"
        );
        let rows = sqlx::query(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_with_insight).collect()
    }

    pub async fn by_category(
        &self,
        category: &str,
        limit: i64,
    ) -> Result<Vec<EmailWithInsight>, StorageError> {
        let sql = format!(
            "SELECT {WITH_INSIGHT_COLUMNS}
             FROM messages m INNER JOIN insights i ON m.id = i.message_id
             WHERE i.category = ?1
             ORDER BY i.priority_score DESC, m.date DESC
             LIMIT ?2"
        );
        let rows = sqlx::query(&sql)
            .bind(category)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_with_insight).collect()
    }

    pub async fn messages_from_today(&self) -> Result<Vec<EmailWithInsight>, StorageError> {
        let midnight = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight is a valid time")
            .and_utc()
            .timestamp();

        let sql = format!(
            "SELECT {WITH_INSIGHT_COLUMNS}
             FROM messages m LEFT JOIN insights i ON m.id = i.message_id
             WHERE m.date >= ?1
             ORDER BY m.date DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(midnight)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_with_insight).collect()
    }

    /// Case-insensitive substring search over subject, sender and body.
    pub async fn keyword_search(
        &self,
        query: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<EmailWithInsight>, StorageError> {
        let pattern = format!("%{query}%");
        let sql = format!(
            "SELECT {WITH_INSIGHT_COLUMNS}
             FROM messages m LEFT JOIN insights i ON m.id = i.message_id
             WHERE m.subject LIKE ?1 OR m.from_name LIKE ?1 OR m.from_address LIKE ?1
                OR m.snippet LIKE ?1 OR COALESCE(m.body_plain, '') LIKE ?1
                OR COALESCE(i.summary, '') LIKE ?1
             ORDER BY m.date DESC
             LIMIT ?2 OFFSET ?3"
        );
        let rows = sqlx::query(&sql)
            .bind(&pattern)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_with_insight).collect()
    }

    pub async fn get_with_insight(
        &self,
        id: &str,
    ) -> Result<Option<EmailWithInsight>, StorageError> {
        let sql = format!(
            "SELECT {WITH_INSIGHT_COLUMNS}
             FROM messages m LEFT JOIN insights i ON m.id = i.message_id
             WHERE m.id = ?1"
        );
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;

        row.as_ref().map(row_to_with_insight).transpose()
    }

    // ---- indexing status ----

    pub async fn indexing_status(&self) -> Result<IndexingStatus, StorageError> {
        let row = sqlx::query(
            "SELECT is_running, total, processed, last_run_at, error
             FROM indexing_status WHERE id = 1",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(IndexingStatus {
            is_running: row.get("is_running"),
            total: row.get("total"),
            processed: row.get("processed"),
            last_run_at: row.get("last_run_at"),
            error: row.get("error"),
        })
    }

    pub async fn update_indexing_status(
        &self,
        is_running: bool,
        total: Option<i64>,
        processed: Option<i64>,
        error: Option<String>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE indexing_status SET
               is_running = ?1,
               total = COALESCE(?2, total),
               processed = COALESCE(?3, processed),
               error = ?4
             WHERE id = 1",
        )
        .bind(is_running)
        .bind(total)
        .bind(processed)
        .bind(&error)
        .execute(&self.pool)
        .await?;

        if !is_running {
            sqlx::query("UPDATE indexing_status SET last_run_at = ?1 WHERE id = 1")
                .bind(Utc::now().timestamp())
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }

    /// Recovery hatch for a wedged `is_running` flag.
    pub async fn reset_indexing_status(&self) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE indexing_status SET is_running = 0, total = 0, processed = 0, error = NULL
             WHERE id = 1",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_account(row: &SqliteRow) -> Result<Account, StorageError> {
    Ok(Account {
        id: row.get("id"),
        address: row.get("address"),
        display_name: row.get("display_name"),
        provider: Provider::parse(row.get::<String, _>("provider").as_str()),
        imap_host: row.get("imap_host"),
        imap_port: row.get::<i64, _>("imap_port") as u16,
        smtp_host: row.get("smtp_host"),
        smtp_port: row.get::<i64, _>("smtp_port") as u16,
        auth_kind: AuthKind::parse(row.get::<String, _>("auth_kind").as_str()),
        is_active: row.get("is_active"),
        created_at: row.get("created_at"),
        last_synced_at: row.get("last_synced_at"),
    })
}

fn row_to_message(row: &SqliteRow) -> Result<EmailMessage, StorageError> {
    Ok(EmailMessage {
        id: row.get("id"),
        account_id: row.get("account_id"),
        folder: row.get("folder"),
        uid: row.get("uid"),
        message_id: row.get("message_id"),
        thread_id: row.get("thread_id"),
        subject: row.get("subject"),
        from_name: row.get("from_name"),
        from_address: row.get("from_address"),
        to: serde_json::from_str(row.get::<String, _>("to_addresses").as_str())
            .unwrap_or_default(),
        date: row.get("date"),
        snippet: row.get("snippet"),
        body_html: row.get("body_html"),
        body_plain: row.get("body_plain"),
        is_read: row.get("is_read"),
        is_starred: row.get("is_starred"),
        has_attachments: row.get("has_attachments"),
        labels: serde_json::from_str(row.get::<String, _>("labels").as_str()).unwrap_or_default(),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_header(row: &SqliteRow) -> Result<EmailHeader, StorageError> {
    Ok(EmailHeader {
        id: row.get("id"),
        account_id: row.get("account_id"),
        folder: row.get("folder"),
        uid: row.get("uid"),
        thread_id: row.get("thread_id"),
        subject: row.get("subject"),
        from_name: row.get("from_name"),
        from_address: row.get("from_address"),
        date: row.get("date"),
        snippet: row.get("snippet"),
        is_read: row.get("is_read"),
        is_starred: row.get("is_starred"),
        has_attachments: row.get("has_attachments"),
    })
}

fn row_to_with_insight(row: &SqliteRow) -> Result<EmailWithInsight, StorageError> {
    Ok(EmailWithInsight {
        id: row.get("id"),
        thread_id: row.get("thread_id"),
        subject: row.get("subject"),
        from_name: row.get("from_name"),
        from_address: row.get("from_address"),
        to: serde_json::from_str(row.get::<String, _>("to_addresses").as_str())
            .unwrap_or_default(),
        date: row.get("date"),
        snippet: row.get("snippet"),
        is_read: row.get("is_read"),
        is_starred: row.get("is_starred"),
        has_attachments: row.get("has_attachments"),
        priority: Priority::parse(row.get::<String, _>("priority").as_str()),
        priority_score: row.get("priority_score"),
        category: row.get("category"),
        summary: row.get("summary"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_core::compose_message_id;

    async fn open_store(dir: &tempfile::TempDir) -> MetadataStore {
        MetadataStore::open(&dir.path().join("messages.sqlite"))
            .await
            .unwrap()
    }

    fn sample_message(uid: u32, subject: &str) -> EmailMessage {
        let now = Utc::now().timestamp();
        EmailMessage {
            id: compose_message_id("acct-1", "INBOX", &uid.to_string()),
            account_id: "acct-1".to_string(),
            folder: "INBOX".to_string(),
            uid: uid.to_string(),
            message_id: format!("<{uid}@example.com>"),
            thread_id: format!("<{uid}@example.com>"),
            subject: subject.to_string(),
            from_name: "Dana Smith".to_string(),
            from_address: "dana@example.com".to_string(),
            to: vec!["me@example.com".to_string()],
            date: now - uid as i64,
            snippet: format!("{subject} snippet"),
            body_html: None,
            body_plain: Some(format!("{subject} body text")),
            is_read: false,
            is_starred: false,
            has_attachments: false,
            labels: vec!["INBOX".to_string()],
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_insight(message_id: &str, score: f64) -> EmailInsight {
        EmailInsight {
            message_id: message_id.to_string(),
            summary: Some("summary".to_string()),
            priority: Priority::from_score(score),
            priority_score: score,
            category: Some("general".to_string()),
            insights: vec![],
            action_items: vec![],
            has_deadline: false,
            has_meeting: false,
            has_financial: false,
            sentiment: None,
            indexed_at: Utc::now().timestamp(),
        }
    }

    #[tokio::test]
    async fn store_message_is_idempotent_and_preserves_created_at() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        let mut message = sample_message(1, "First");
        message.created_at = 1_000;
        message.updated_at = 1_000;
        store.store_message(&message).await.unwrap();

        message.subject = "First (edited)".to_string();
        message.is_read = true;
        message.created_at = 9_999; // must be ignored on conflict
        message.updated_at = 2_000;
        store.store_message(&message).await.unwrap();

        assert_eq!(store.message_count().await.unwrap(), 1);
        let stored = store.get_message(&message.id).await.unwrap().unwrap();
        assert_eq!(stored.subject, "First (edited)");
        assert!(stored.is_read);
        assert_eq!(stored.created_at, 1_000);
        assert_eq!(stored.updated_at, 2_000);
    }

    #[tokio::test]
    async fn deleting_a_message_cascades_to_its_insight() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        let message = sample_message(7, "Doomed");
        store.store_message(&message).await.unwrap();
        store
            .store_insight(&sample_insight(&message.id, 0.5))
            .await
            .unwrap();
        assert_eq!(store.indexed_count().await.unwrap(), 1);

        store.delete_message(&message.id).await.unwrap();
        assert_eq!(store.indexed_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn smart_inbox_orders_by_score_then_date() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        for (uid, subject, score) in [(1, "low", 0.2), (2, "high", 0.9), (3, "mid", 0.5)] {
            let message = sample_message(uid, subject);
            store.store_message(&message).await.unwrap();
            store
                .store_insight(&sample_insight(&message.id, score))
                .await
                .unwrap();
        }

        let inbox = store.smart_inbox(10, 0).await.unwrap();
        let subjects: Vec<_> = inbox.iter().map(|m| m.subject.as_str()).collect();
        assert_eq!(subjects, vec!["high", "mid", "low"]);
        assert_eq!(inbox[0].priority, Priority::High);
    }

    #[tokio::test]
    async fn keyword_search_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        store
            .store_message(&sample_message(1, "URGENT: deck review"))
            .await
            .unwrap();
        store
            .store_message(&sample_message(2, "Lunch plans"))
            .await
            .unwrap();

        let hits = store.keyword_search("urgent", 10, 0).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].subject, "URGENT: deck review");

        let offset_hits = store.keyword_search("urgent", 10, 1).await.unwrap();
        assert!(offset_hits.is_empty());
    }

    #[tokio::test]
    async fn exactly_one_account_is_active() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        let first = Account::new(
            "one@example.com".to_string(),
            "One".to_string(),
            Provider::Gmail,
            "imap.gmail.com".to_string(),
            993,
            "smtp.gmail.com".to_string(),
            465,
            AuthKind::Oauth,
        );
        let second = Account::new(
            "two@example.com".to_string(),
            "Two".to_string(),
            Provider::Yahoo,
            "imap.mail.yahoo.com".to_string(),
            993,
            "smtp.mail.yahoo.com".to_string(),
            465,
            AuthKind::AppPassword,
        );
        store.store_account(&first).await.unwrap();
        store.store_account(&second).await.unwrap();

        store.set_active_account(&second.id).await.unwrap();

        let active: Vec<_> = store
            .list_accounts()
            .await
            .unwrap()
            .into_iter()
            .filter(|a| a.is_active)
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second.id);
    }

    #[tokio::test]
    async fn indexing_status_is_singleton_and_resettable() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        store
            .update_indexing_status(true, Some(10), Some(3), None)
            .await
            .unwrap();
        let status = store.indexing_status().await.unwrap();
        assert!(status.is_running);
        assert_eq!(status.total, 10);
        assert_eq!(status.processed, 3);

        store.reset_indexing_status().await.unwrap();
        let status = store.indexing_status().await.unwrap();
        assert!(!status.is_running);
        assert_eq!(status.processed, 0);
        assert!(status.error.is_none());
    }

    #[tokio::test]
    async fn threads_list_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        for uid in [1u32, 2, 3] {
            let mut message = sample_message(uid, &format!("Re: topic {uid}"));
            message.thread_id = "<root@example.com>".to_string();
            message.date = 1_000 + uid as i64;
            store.store_message(&message).await.unwrap();
        }
        let mut unrelated = sample_message(9, "Other");
        unrelated.thread_id = "<other@example.com>".to_string();
        store.store_message(&unrelated).await.unwrap();

        let thread = store.messages_in_thread("<root@example.com>").await.unwrap();
        assert_eq!(thread.len(), 3);
        assert!(thread.windows(2).all(|pair| pair[0].date <= pair[1].date));
    }

    #[tokio::test]
    async fn removing_an_account_drops_its_messages() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        let message = sample_message(5, "Bye");
        store.store_message(&message).await.unwrap();
        store
            .store_insight(&sample_insight(&message.id, 0.4))
            .await
            .unwrap();

        store.remove_account("acct-1").await.unwrap();
        assert_eq!(store.message_count().await.unwrap(), 0);
        assert_eq!(store.indexed_count().await.unwrap(), 0);
    }
}
