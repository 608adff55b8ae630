use crate::VectorError;
use chrono::Utc;
use skiff_core::EmbeddingStatus;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct SimilarMessage {
    pub message_id: String,
    pub similarity: f32,
}

/// Dense-vector store. Owns `vectors.sqlite` exclusively and creates only the
/// `embeddings` and `embedding_state` tables; message rows live in the
/// metadata store. Vectors are little-endian f32 BLOBs.
#[derive(Clone)]
pub struct VectorStore {
    pool: SqlitePool,
}

impl VectorStore {
    pub async fn open(db_path: &Path) -> Result<Self, VectorError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db_url = format!("sqlite://{}", db_path.to_string_lossy());
        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS embeddings (
                message_id TEXT PRIMARY KEY,
                vector BLOB NOT NULL,
                model_id TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS embedding_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                is_running INTEGER NOT NULL DEFAULT 0,
                total INTEGER NOT NULL DEFAULT 0,
                embedded INTEGER NOT NULL DEFAULT 0,
                current_model TEXT,
                last_run_at INTEGER,
                error TEXT
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query("INSERT OR IGNORE INTO embedding_state (id) VALUES (1)")
            .execute(&pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_embeddings_model ON embeddings(model_id)")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    /// Replaces any prior vector stored for the id.
    pub async fn upsert(
        &self,
        message_id: &str,
        vector: &[f32],
        model_id: &str,
    ) -> Result<(), VectorError> {
        sqlx::query(
            "INSERT OR REPLACE INTO embeddings (message_id, vector, model_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(message_id)
        .bind(vector_to_bytes(vector))
        .bind(model_id)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, message_id: &str) -> Result<Option<Vec<f32>>, VectorError> {
        let row = sqlx::query("SELECT vector FROM embeddings WHERE message_id = ?1")
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let blob: Vec<u8> = row.get("vector");
                Ok(Some(bytes_to_vector(message_id, &blob)?))
            }
            None => Ok(None),
        }
    }

    /// Ids already embedded with the given model.
    pub async fn embedded_ids(&self, model_id: &str) -> Result<HashSet<String>, VectorError> {
        let rows = sqlx::query("SELECT message_id FROM embeddings WHERE model_id = ?1")
            .bind(model_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| row.get::<String, _>("message_id"))
            .collect())
    }

    /// Cosine top-k over all vectors of the given model. Ties break toward the
    /// lower message id so results are stable.
    pub async fn top_k(
        &self,
        query: &[f32],
        model_id: &str,
        k: usize,
    ) -> Result<Vec<SimilarMessage>, VectorError> {
        self.search(query, model_id, k, None).await
    }

    /// Nearest neighbors of a stored message, excluding the message itself.
    pub async fn neighbors(
        &self,
        message_id: &str,
        model_id: &str,
        k: usize,
    ) -> Result<Vec<SimilarMessage>, VectorError> {
        let probe = self
            .get(message_id)
            .await?
            .ok_or_else(|| VectorError::NotFound(message_id.to_string()))?;
        self.search(&probe, model_id, k, Some(message_id)).await
    }

    async fn search(
        &self,
        query: &[f32],
        model_id: &str,
        k: usize,
        exclude: Option<&str>,
    ) -> Result<Vec<SimilarMessage>, VectorError> {
        let rows = sqlx::query("SELECT message_id, vector FROM embeddings WHERE model_id = ?1")
            .bind(model_id)
            .fetch_all(&self.pool)
            .await?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.get("message_id");
            if exclude == Some(id.as_str()) {
                continue;
            }
            let blob: Vec<u8> = row.get("vector");
            let vector = match bytes_to_vector(&id, &blob) {
                Ok(vector) => vector,
                Err(err) => {
                    tracing::warn!(message_id = %id, error = %err, "skipping corrupt vector");
                    continue;
                }
            };
            scored.push(SimilarMessage {
                message_id: id,
                similarity: cosine_similarity(query, &vector),
            });
        }

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.message_id.cmp(&b.message_id))
        });
        scored.truncate(k);

        Ok(scored)
    }

    pub async fn count(&self) -> Result<i64, VectorError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM embeddings")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    pub async fn delete(&self, message_id: &str) -> Result<(), VectorError> {
        sqlx::query("DELETE FROM embeddings WHERE message_id = ?1")
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), VectorError> {
        sqlx::query("DELETE FROM embeddings").execute(&self.pool).await?;
        sqlx::query("UPDATE embedding_state SET embedded = 0, is_running = 0 WHERE id = 1")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Lazy cleanup of vectors from retired embedder models.
    pub async fn purge_other_models(&self, model_id: &str) -> Result<u64, VectorError> {
        let result = sqlx::query("DELETE FROM embeddings WHERE model_id != ?1")
            .bind(model_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // ---- embedding state ----

    pub async fn embedding_status(&self) -> Result<EmbeddingStatus, VectorError> {
        let row = sqlx::query(
            "SELECT is_running, total, embedded, current_model, last_run_at, error
             FROM embedding_state WHERE id = 1",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(EmbeddingStatus {
            is_running: row.get("is_running"),
            total: row.get("total"),
            embedded: row.get("embedded"),
            current_model: row.get("current_model"),
            last_run_at: row.get("last_run_at"),
            error: row.get("error"),
        })
    }

    pub async fn update_embedding_status(
        &self,
        is_running: bool,
        total: Option<i64>,
        embedded: Option<i64>,
        current_model: Option<&str>,
        error: Option<String>,
    ) -> Result<(), VectorError> {
        sqlx::query(
            "UPDATE embedding_state SET
               is_running = ?1,
               total = COALESCE(?2, total),
               embedded = COALESCE(?3, embedded),
               current_model = COALESCE(?4, current_model),
               error = ?5
             WHERE id = 1",
        )
        .bind(is_running)
        .bind(total)
        .bind(embedded)
        .bind(current_model)
        .bind(&error)
        .execute(&self.pool)
        .await?;

        if !is_running {
            sqlx::query("UPDATE embedding_state SET last_run_at = ?1 WHERE id = 1")
                .bind(Utc::now().timestamp())
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }
}

fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn bytes_to_vector(message_id: &str, bytes: &[u8]) -> Result<Vec<f32>, VectorError> {
    if bytes.len() % 4 != 0 {
        return Err(VectorError::CorruptVector(message_id.to_string()));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for i in 0..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = "test-embed-v1";

    async fn open_store(dir: &tempfile::TempDir) -> VectorStore {
        VectorStore::open(&dir.path().join("vectors.sqlite"))
            .await
            .unwrap()
    }

    #[test]
    fn blob_codec_roundtrip() {
        let vector = vec![0.1f32, -0.5, 1.0, 42.0];
        let decoded = bytes_to_vector("id", &vector_to_bytes(&vector)).unwrap();
        assert_eq!(vector.len(), decoded.len());
        for (a, b) in vector.iter().zip(decoded.iter()) {
            assert!((a - b).abs() < 1e-6);
        }

        assert!(bytes_to_vector("id", &[1, 2, 3]).is_err());
    }

    #[test]
    fn cosine_basics() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &[1.0, 0.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &[0.0, 1.0, 0.0]).abs() < 1e-6);
        assert!((cosine_similarity(&a, &[-1.0, 0.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn upsert_get_roundtrip_and_self_similarity() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        let vector = vec![0.6f32, 0.8, 0.0];
        store.upsert("m-1", &vector, MODEL).await.unwrap();

        let stored = store.get("m-1").await.unwrap().unwrap();
        assert_eq!(stored, vector);

        let top = store.top_k(&vector, MODEL, 1).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].message_id, "m-1");
        assert!((top[0].similarity - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn upsert_replaces_prior_vector() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        store.upsert("m-1", &[1.0, 0.0], MODEL).await.unwrap();
        store.upsert("m-1", &[0.0, 1.0], MODEL).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.get("m-1").await.unwrap().unwrap(), vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn top_k_ignores_other_models() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        store.upsert("current", &[1.0, 0.0], MODEL).await.unwrap();
        store
            .upsert("stale", &[1.0, 0.0], "retired-model")
            .await
            .unwrap();

        let top = store.top_k(&[1.0, 0.0], MODEL, 10).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].message_id, "current");

        let purged = store.purge_other_models(MODEL).await.unwrap();
        assert_eq!(purged, 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn ties_break_toward_lower_message_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        store.upsert("b", &[1.0, 0.0], MODEL).await.unwrap();
        store.upsert("a", &[1.0, 0.0], MODEL).await.unwrap();

        let top = store.top_k(&[1.0, 0.0], MODEL, 2).await.unwrap();
        assert_eq!(top[0].message_id, "a");
        assert_eq!(top[1].message_id, "b");
    }

    #[tokio::test]
    async fn neighbors_excludes_the_probe() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        store.upsert("m-1", &[1.0, 0.0], MODEL).await.unwrap();
        store.upsert("m-2", &[0.9, 0.1], MODEL).await.unwrap();
        store.upsert("m-3", &[0.0, 1.0], MODEL).await.unwrap();

        let neighbors = store.neighbors("m-1", MODEL, 2).await.unwrap();
        assert_eq!(neighbors.len(), 2);
        assert!(neighbors.iter().all(|n| n.message_id != "m-1"));
        assert_eq!(neighbors[0].message_id, "m-2");
    }

    #[tokio::test]
    async fn clear_resets_state_counters() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        store.upsert("m-1", &[1.0], MODEL).await.unwrap();
        store
            .update_embedding_status(true, Some(1), Some(1), Some(MODEL), None)
            .await
            .unwrap();

        store.clear().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);

        let status = store.embedding_status().await.unwrap();
        assert!(!status.is_running);
        assert_eq!(status.embedded, 0);
        assert_eq!(status.current_model.as_deref(), Some(MODEL));
    }
}
