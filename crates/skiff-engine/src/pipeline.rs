use crate::state::EmailEngine;
use crate::{EmbeddingProgress, EngineError, EngineEvent};
use chrono::Utc;
use skiff_ai::prepare_email_text;
use skiff_core::{EmailHeader, EmailInsight, EmailMessage, Priority};
use skiff_mail::{with_retry, MailBackend};
use std::sync::Arc;
use tokio::sync::watch;

const URGENCY_KEYWORDS: [&str; 4] = ["urgent", "asap", "critical", "emergency"];
const ACTION_KEYWORDS: [&str; 3] = ["please review", "need your", "action required"];
const MEETING_CATEGORY_KEYWORDS: [&str; 3] = ["meeting", "call", "calendar"];
const MEETING_FLAG_KEYWORDS: [&str; 4] = ["meet", "meeting", "call", "schedule"];
const FINANCIAL_KEYWORDS: [&str; 4] = ["invoice", "payment", "$", "usd"];
const DEADLINE_KEYWORDS: [&str; 3] = ["deadline", "due", "by"];
const AUTOMATED_SENDERS: [&str; 3] = ["noreply", "no-reply", "notifications@"];

/// Rule-based priority score over lowercased subject+body. Starts at 0.5,
/// climbs on urgency/action keywords and the star flag, clamped to [0, 1].
pub(crate) fn priority_score(text: &str, is_starred: bool) -> f64 {
    let mut score = 0.5;

    if URGENCY_KEYWORDS.iter().any(|kw| text.contains(kw)) {
        score += 0.3;
    }
    if ACTION_KEYWORDS.iter().any(|kw| text.contains(kw)) {
        score += 0.2;
    }
    if is_starred {
        score += 0.2;
    }

    score.clamp(0.0, 1.0)
}

/// First matching category wins.
pub(crate) fn categorize(message: &EmailMessage, body: &str) -> String {
    let subject = message.subject.to_lowercase();
    let body = body.to_lowercase();
    let combined = format!("{subject} {body}");
    let sender = message.from_address.to_lowercase();

    if MEETING_CATEGORY_KEYWORDS.iter().any(|kw| combined.contains(kw)) {
        return "meetings".to_string();
    }
    if FINANCIAL_KEYWORDS[..3].iter().any(|kw| combined.contains(kw)) {
        return "financial".to_string();
    }
    if combined.contains("unsubscribe") {
        return "newsletters".to_string();
    }
    if AUTOMATED_SENDERS.iter().any(|kw| sender.contains(kw)) {
        return "notifications".to_string();
    }
    let is_reply = !message.message_id.is_empty() && message.thread_id != message.message_id;
    if subject.starts_with("re:") || subject.starts_with("fwd:") || is_reply {
        return "conversation".to_string();
    }

    "general".to_string()
}

/// Boolean OR of the keyword sets over lowercased subject+body.
pub(crate) fn insight_flags(text: &str) -> (bool, bool, bool) {
    let has_deadline = DEADLINE_KEYWORDS.iter().any(|kw| text.contains(kw));
    let has_meeting = MEETING_FLAG_KEYWORDS.iter().any(|kw| text.contains(kw));
    let has_financial = FINANCIAL_KEYWORDS.iter().any(|kw| text.contains(kw));
    (has_deadline, has_meeting, has_financial)
}

impl EmailEngine {
    /// Kick a background indexing run over the active account's inbox.
    /// Returns `Busy` while a run is in flight; progress streams on the bus.
    pub async fn start_indexing(&self, max_messages: usize) -> Result<(), EngineError> {
        let cancel_rx = {
            let _gate = self.indexing_gate.lock().await;
            let status = self.storage.indexing_status().await?;
            if status.is_running {
                return Err(EngineError::Busy("indexing".to_string()));
            }
            self.storage
                .update_indexing_status(true, Some(0), Some(0), None)
                .await?;

            let (cancel_tx, cancel_rx) = watch::channel(false);
            *self
                .indexing_cancel
                .lock()
                .unwrap_or_else(|e| e.into_inner()) = Some(cancel_tx);
            cancel_rx
        };

        self.events.emit(EngineEvent::IndexingStarted);

        let engine = self.engine_handle()?;
        tokio::spawn(async move {
            if let Err(err) = engine.clone().run_indexing(max_messages, cancel_rx).await {
                tracing::error!(error = %err, "indexing run failed");
                let _ = engine
                    .storage
                    .update_indexing_status(false, None, None, Some(err.to_string()))
                    .await;
                engine.events.emit(EngineEvent::IndexingError {
                    message: err.to_string(),
                });
            }
        });

        Ok(())
    }

    pub fn cancel_indexing(&self) {
        if let Some(tx) = self
            .indexing_cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            let _ = tx.send(true);
        }
    }

    pub fn cancel_embedding(&self) {
        if let Some(tx) = self
            .embedding_cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            let _ = tx.send(true);
        }
    }

    async fn run_indexing(
        self: Arc<Self>,
        max_messages: usize,
        cancel_rx: watch::Receiver<bool>,
    ) -> Result<(), EngineError> {
        let account = self.active_account().await?;
        let backend = self.backend_for(&account).await?;

        let headers = with_retry("fetch_headers", || {
            backend.fetch_headers("INBOX", max_messages as u32, 0, None)
        })
        .await?;

        let total = headers.len() as i64;
        self.storage
            .update_indexing_status(true, Some(total), Some(0), None)
            .await?;

        let mut processed: i64 = 0;
        for header in &headers {
            if *cancel_rx.borrow() {
                self.storage
                    .update_indexing_status(false, None, Some(processed), Some("cancelled".to_string()))
                    .await?;
                self.events.emit(EngineEvent::IndexingError {
                    message: "cancelled".to_string(),
                });
                return Ok(());
            }

            // One bad message never stalls the batch.
            if let Err(err) = self.enrich_one(backend.as_ref(), header).await {
                tracing::warn!(message_id = %header.id, error = %err, "skipping message");
            }

            processed += 1;
            self.storage
                .update_indexing_status(true, None, Some(processed), None)
                .await?;
            let percent = ((processed * 100) / total.max(1)) as u8;
            self.events.emit(EngineEvent::IndexingProgress { percent });

            tokio::task::yield_now().await;
        }

        if total == 0 {
            self.events.emit(EngineEvent::IndexingProgress { percent: 100 });
        }

        self.storage.mark_synced(&account.id).await?;
        self.storage
            .update_indexing_status(false, None, None, None)
            .await?;
        self.events.emit(EngineEvent::IndexingComplete);
        tracing::info!(processed, "indexing complete");

        // Freshly indexed mail flows straight into the vector store.
        if self.active_embedder().await.is_some() {
            if let Err(err) = self.embed_all().await {
                tracing::debug!(error = %err, "auto-embed not started");
            }
        }

        Ok(())
    }

    async fn enrich_one(
        &self,
        backend: &dyn MailBackend,
        header: &EmailHeader,
    ) -> Result<(), EngineError> {
        let message = with_retry("fetch_full", || {
            backend.fetch_full(&header.folder, &header.uid)
        })
        .await?;

        // Message row lands before its insight.
        self.storage.store_message(&message).await?;
        let insight = self.build_insight(&message).await;
        self.storage.store_insight(&insight).await?;
        Ok(())
    }

    pub(crate) async fn build_insight(&self, message: &EmailMessage) -> EmailInsight {
        let body = message.body().to_string();
        let text = format!("{} {}", message.subject, body).to_lowercase();

        let score = priority_score(&text, message.is_starred);
        let category = categorize(message, &body);
        let (has_deadline, has_meeting, has_financial) = insight_flags(&text);

        let summary = match self
            .summarizer
            .summarize(&message.subject, &message.from_name, &body)
            .await
        {
            Ok(summary) => Some(summary),
            Err(err) => {
                tracing::warn!(message_id = %message.id, error = %err, "summarization failed");
                None
            }
        };
        let insights = self
            .summarizer
            .insight_lines(&message.subject, &body)
            .await
            .unwrap_or_default();
        let action_items = self
            .summarizer
            .action_items(&body)
            .await
            .unwrap_or_default();

        EmailInsight {
            message_id: message.id.clone(),
            summary,
            priority: Priority::from_score(score),
            priority_score: score,
            category: Some(category),
            insights,
            action_items,
            has_deadline,
            has_meeting,
            has_financial,
            sentiment: None,
            indexed_at: Utc::now().timestamp(),
        }
    }

    /// Embed every stored message the active encoder has not seen yet.
    pub async fn embed_all(&self) -> Result<(), EngineError> {
        let embedder = self
            .active_embedder()
            .await
            .ok_or(EngineError::ModelUnavailable)?;

        let (missing, total, cancel_rx) = {
            let _gate = self.embedding_gate.lock().await;
            let status = self.vectors.embedding_status().await?;
            if status.is_running {
                return Err(EngineError::Busy("embedding".to_string()));
            }

            let all_ids = self.storage.all_message_ids(10_000).await?;
            let embedded = self.vectors.embedded_ids(embedder.model_id()).await?;
            let missing: Vec<String> = all_ids
                .into_iter()
                .filter(|id| !embedded.contains(id))
                .collect();
            let total = missing.len() as i64;

            self.vectors
                .update_embedding_status(true, Some(total), Some(0), Some(embedder.model_id()), None)
                .await?;

            let (cancel_tx, cancel_rx) = watch::channel(false);
            *self
                .embedding_cancel
                .lock()
                .unwrap_or_else(|e| e.into_inner()) = Some(cancel_tx);
            (missing, total, cancel_rx)
        };

        self.events.emit(EngineEvent::EmbeddingStarted { total });

        let engine = self.engine_handle()?;
        tokio::spawn(async move {
            if let Err(err) = engine
                .clone()
                .run_embedding(embedder, missing, total, cancel_rx)
                .await
            {
                tracing::error!(error = %err, "embedding run failed");
                let _ = engine
                    .vectors
                    .update_embedding_status(false, None, None, None, Some(err.to_string()))
                    .await;
                engine.events.emit(EngineEvent::EmbeddingError {
                    message: err.to_string(),
                });
            }
        });

        Ok(())
    }

    async fn run_embedding(
        self: Arc<Self>,
        embedder: Arc<dyn skiff_ai::Embedder>,
        missing: Vec<String>,
        total: i64,
        cancel_rx: watch::Receiver<bool>,
    ) -> Result<(), EngineError> {
        let mut done: i64 = 0;

        for id in missing {
            if *cancel_rx.borrow() {
                self.vectors
                    .update_embedding_status(false, None, Some(done), None, Some("cancelled".to_string()))
                    .await?;
                self.events.emit(EngineEvent::EmbeddingError {
                    message: "cancelled".to_string(),
                });
                return Ok(());
            }

            let Some(message) = self.storage.get_message(&id).await? else {
                continue;
            };
            let text =
                prepare_email_text(&message.subject, &message.from_address, message.body());

            let encoder = embedder.clone();
            let encoded = tokio::task::spawn_blocking(move || encoder.encode(&text)).await;
            let vector = match encoded {
                Ok(Ok(vector)) => vector,
                Ok(Err(err)) => {
                    tracing::warn!(message_id = %id, error = %err, "embedding failed, skipping");
                    continue;
                }
                Err(err) => {
                    tracing::warn!(message_id = %id, error = %err, "embedding task failed, skipping");
                    continue;
                }
            };

            if let Err(err) = self.vectors.upsert(&id, &vector, embedder.model_id()).await {
                tracing::warn!(message_id = %id, error = %err, "vector upsert failed, skipping");
                continue;
            }

            done += 1;
            self.events
                .emit(EngineEvent::EmbeddingProgress(EmbeddingProgress {
                    total,
                    done,
                    id: id.clone(),
                }));
            if done % 10 == 0 {
                let _ = self
                    .vectors
                    .update_embedding_status(true, Some(total), Some(done), None, None)
                    .await;
            }

            tokio::task::yield_now().await;
        }

        self.vectors
            .update_embedding_status(false, Some(total), Some(done), None, None)
            .await?;
        self.events
            .emit(EngineEvent::EmbeddingComplete { count: done });
        tracing::info!(done, "embedding complete");
        Ok(())
    }
}
