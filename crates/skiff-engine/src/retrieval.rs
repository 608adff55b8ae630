use crate::state::EmailEngine;
use crate::{EngineError, EngineEvent};
use serde::{Deserialize, Serialize};
use skiff_core::{EmailWithInsight, Priority};
use skiff_vector::SimilarMessage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub message_id: String,
    pub similarity: f32,
    pub subject: Option<String>,
    pub from: Option<String>,
    pub snippet: Option<String>,
}

#[derive(Debug)]
enum QueryIntent {
    Today,
    Important,
    Search(String),
    General,
}

/// Intent shortcuts applied before any retrieval.
fn detect_intent(query: &str) -> QueryIntent {
    let q = query.to_lowercase();

    if q.contains("today") {
        return QueryIntent::Today;
    }
    if q.contains("important") || q.contains("priority") || q.contains("urgent") {
        return QueryIntent::Important;
    }
    for prefix in ["search ", "find ", "from "] {
        if let Some(term) = q.strip_prefix(prefix) {
            if !term.trim().is_empty() {
                return QueryIntent::Search(term.trim().to_string());
            }
        }
    }

    QueryIntent::General
}

fn is_identity_query(query: &str) -> bool {
    let q = query.to_lowercase();
    q.contains("who are you")
        || q.contains("what are you")
        || q.contains("what can you do")
        || q.contains("which model")
        || q.contains("what model")
        || q.contains("your name")
}

fn identity_response() -> String {
    "I'm your local email assistant. I can summarize messages, surface important \
     or time-sensitive mail, search your inbox by keyword or meaning, and answer \
     questions about what you've received. Everything runs on this device."
        .to_string()
}

/// Compact context block handed to the model: one bulleted line per message.
fn format_context(emails: &[EmailWithInsight], max_entries: usize) -> String {
    emails
        .iter()
        .take(max_entries)
        .map(|email| {
            let gist = email
                .summary
                .clone()
                .unwrap_or_else(|| email.snippet.chars().take(100).collect());
            format!(
                "- From: {} | Subject: {} | Priority: {} | {}",
                email.from_name,
                email.subject,
                email.priority.as_str(),
                gist
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl EmailEngine {
    /// Priority inbox: highest score first, newest first within a score.
    pub async fn smart_inbox(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<EmailWithInsight>, EngineError> {
        Ok(self.storage.smart_inbox(limit, offset).await?)
    }

    pub async fn by_category(
        &self,
        category: &str,
        limit: i64,
    ) -> Result<Vec<EmailWithInsight>, EngineError> {
        Ok(self.storage.by_category(category, limit).await?)
    }

    pub async fn keyword_search(
        &self,
        query: &str,
        limit: i64,
    ) -> Result<Vec<EmailWithInsight>, EngineError> {
        Ok(self.storage.keyword_search(query, limit, 0).await?)
    }

    /// Cosine search over the vector store, enriched with message metadata.
    pub async fn semantic_search(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<SearchResult>, EngineError> {
        let embedder = self
            .active_embedder()
            .await
            .ok_or(EngineError::ModelUnavailable)?;

        let text = query.to_string();
        let encoder = embedder.clone();
        let vector = tokio::task::spawn_blocking(move || encoder.encode(&text))
            .await
            .map_err(|err| EngineError::Internal(err.to_string()))??;

        let hits = self.vectors.top_k(&vector, embedder.model_id(), k).await?;
        self.enrich_hits(hits).await
    }

    /// Messages most similar to a stored message, excluding itself.
    pub async fn neighbors(
        &self,
        message_id: &str,
        k: usize,
    ) -> Result<Vec<SearchResult>, EngineError> {
        let embedder = self
            .active_embedder()
            .await
            .ok_or(EngineError::ModelUnavailable)?;

        let hits = self
            .vectors
            .neighbors(message_id, embedder.model_id(), k)
            .await?;
        self.enrich_hits(hits).await
    }

    async fn enrich_hits(
        &self,
        hits: Vec<SimilarMessage>,
    ) -> Result<Vec<SearchResult>, EngineError> {
        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let meta = self.storage.get_with_insight(&hit.message_id).await?;
            results.push(SearchResult {
                similarity: hit.similarity,
                subject: meta.as_ref().map(|m| m.subject.clone()),
                from: meta.as_ref().map(|m| m.from_name.clone()),
                snippet: meta.as_ref().map(|m| m.snippet.clone()),
                message_id: hit.message_id,
            });
        }
        Ok(results)
    }

    /// Retrieval-augmented answer: intent shortcuts, then semantic retrieval,
    /// then generation (or the deterministic fallback when no model is up).
    /// Tokens additionally stream on `ai:token`.
    pub async fn chat(&self, query: &str, k: usize) -> Result<String, EngineError> {
        if is_identity_query(query) {
            return Ok(identity_response());
        }

        let intent = detect_intent(query);
        let context = match &intent {
            QueryIntent::Today => {
                let emails = self.storage.messages_from_today().await?;
                if emails.is_empty() {
                    return Ok("You haven't received any emails today yet.".to_string());
                }
                Some(format_context(&emails, 8))
            }
            QueryIntent::Important => {
                let emails: Vec<_> = self
                    .storage
                    .smart_inbox(20, 0)
                    .await?
                    .into_iter()
                    .filter(|email| email.priority == Priority::High)
                    .collect();
                if emails.is_empty() {
                    return Ok("You don't have any high priority emails right now.".to_string());
                }
                Some(format_context(&emails, 8))
            }
            QueryIntent::Search(term) => {
                let emails = self.storage.keyword_search(term, 10, 0).await?;
                if emails.is_empty() {
                    return Ok(format!("I couldn't find any emails matching '{term}'."));
                }
                Some(format_context(&emails, 8))
            }
            QueryIntent::General => match self.semantic_search(query, k).await {
                Ok(hits) if !hits.is_empty() => Some(
                    hits.iter()
                        .map(|hit| {
                            format!(
                                "- Subject: {} | From: {} | {}",
                                hit.subject.as_deref().unwrap_or("(unknown)"),
                                hit.from.as_deref().unwrap_or("(unknown)"),
                                hit.snippet.as_deref().unwrap_or(""),
                            )
                        })
                        .collect::<Vec<_>>()
                        .join("\n"),
                ),
                Ok(_) => None,
                // No embedder yet: fall back to a keyword pass.
                Err(EngineError::ModelUnavailable) => {
                    let emails = self.storage.keyword_search(query, 10, 0).await?;
                    if emails.is_empty() {
                        None
                    } else {
                        Some(format_context(&emails, 8))
                    }
                }
                Err(err) => return Err(err),
            },
        };

        let events = self.events.clone();
        let answer = self
            .summarizer
            .chat(query, context.as_deref(), move |token| {
                events.emit(EngineEvent::AiToken {
                    token: token.to_string(),
                });
            })
            .await?;

        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::{engine_with_backend, synth_message};
    use crate::EmailEngine;
    use chrono::Utc;
    use skiff_ai::{AiError, Embedder};
    use skiff_core::{EmailInsight, Priority};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    /// Deterministic 3-dimensional topic encoder for tests.
    struct TestEmbedder;

    const TOPICS: [&[&str]; 3] = [
        &["invoice", "billing", "payment", "document"],
        &["lunch", "team", "food"],
        &["server", "outage", "post-mortem", "incident"],
    ];

    impl Embedder for TestEmbedder {
        fn model_id(&self) -> &str {
            "test-embed-v1"
        }

        fn dim(&self) -> usize {
            TOPICS.len()
        }

        fn encode(&self, text: &str) -> Result<Vec<f32>, AiError> {
            let lower = text.to_lowercase();
            let mut vector: Vec<f32> = TOPICS
                .iter()
                .map(|words| {
                    words
                        .iter()
                        .map(|word| lower.matches(word).count() as f32)
                        .sum()
                })
                .collect();
            if vector.iter().all(|v| *v == 0.0) {
                vector[0] = 1e-3;
            }
            Ok(vector)
        }
    }

    fn insight(message_id: &str, score: f64) -> EmailInsight {
        EmailInsight {
            message_id: message_id.to_string(),
            summary: None,
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

    async fn wait_for_embedding_complete(engine: &Arc<EmailEngine>) {
        let mut events = engine.events().subscribe();
        engine.embed_all().await.unwrap();
        timeout(Duration::from_secs(10), async {
            loop {
                match events.recv().await.unwrap() {
                    EngineEvent::EmbeddingComplete { .. } => break,
                    EngineEvent::EmbeddingError { message } => {
                        panic!("embedding failed: {message}")
                    }
                    _ => {}
                }
            }
        })
        .await
        .expect("embedding did not finish in time");
    }

    #[tokio::test]
    async fn semantic_search_ranks_the_related_message_first() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_backend(&dir, vec![], None).await;

        for (uid, subject, body) in [
            (1, "Invoice #42", "your invoice and payment details"),
            (2, "Team lunch", "who's in for food on friday"),
            (3, "Server outage post-mortem", "incident review attached"),
        ] {
            let (_, message) = synth_message(uid, subject, body, false);
            engine.storage.store_message(&message).await.unwrap();
        }

        engine.install_embedder(Arc::new(TestEmbedder)).await;
        wait_for_embedding_complete(&engine).await;

        let hits = engine.semantic_search("billing document", 3).await.unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].subject.as_deref(), Some("Invoice #42"));
        assert!(hits[0].similarity > 0.9);
    }

    #[tokio::test]
    async fn neighbors_surface_the_same_topic() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_backend(&dir, vec![], None).await;

        for (uid, subject, body) in [
            (1, "Invoice #42", "invoice payment"),
            (2, "Invoice #43", "another invoice payment"),
            (3, "Team lunch", "food"),
        ] {
            let (_, message) = synth_message(uid, subject, body, false);
            engine.storage.store_message(&message).await.unwrap();
        }

        engine.install_embedder(Arc::new(TestEmbedder)).await;
        wait_for_embedding_complete(&engine).await;

        let probe_id = "acct-test:INBOX:1";
        let neighbors = engine.neighbors(probe_id, 2).await.unwrap();
        assert!(neighbors.iter().all(|n| n.message_id != probe_id));
        assert_eq!(neighbors[0].subject.as_deref(), Some("Invoice #43"));
    }

    #[tokio::test]
    async fn important_intent_answers_only_from_high_priority_mail() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_backend(&dir, vec![], None).await;

        let (_, urgent) = synth_message(1, "Budget approval needed", "urgent", false);
        let (_, casual) = synth_message(2, "Cat pictures", "enjoy", false);
        engine.storage.store_message(&urgent).await.unwrap();
        engine.storage.store_message(&casual).await.unwrap();
        engine
            .storage
            .store_insight(&insight(&urgent.id, 0.9))
            .await
            .unwrap();
        engine
            .storage
            .store_insight(&insight(&casual.id, 0.2))
            .await
            .unwrap();

        let answer = engine.chat("show me important emails", 5).await.unwrap();
        assert!(answer.contains("Budget approval needed"));
        assert!(!answer.contains("Cat pictures"));
    }

    #[tokio::test]
    async fn today_intent_filters_by_date() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_backend(&dir, vec![], None).await;

        let (_, mut fresh) = synth_message(1, "Fresh news", "today's mail", false);
        fresh.date = Utc::now().timestamp();
        let (_, mut stale) = synth_message(2, "Old news", "ancient mail", false);
        stale.date = Utc::now().timestamp() - 7 * 24 * 3600;
        engine.storage.store_message(&fresh).await.unwrap();
        engine.storage.store_message(&stale).await.unwrap();

        let answer = engine.chat("what arrived today?", 5).await.unwrap();
        assert!(answer.contains("Fresh news"));
        assert!(!answer.contains("Old news"));
    }

    #[tokio::test]
    async fn empty_important_set_gets_a_direct_answer() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_backend(&dir, vec![], None).await;

        let answer = engine.chat("any important emails?", 5).await.unwrap();
        assert!(answer.contains("don't have any high priority"));
    }

    #[tokio::test]
    async fn identity_queries_never_touch_retrieval() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_backend(&dir, vec![], None).await;

        let answer = engine.chat("who are you?", 5).await.unwrap();
        assert!(answer.contains("email assistant"));
    }

    #[test]
    fn intent_detection() {
        assert!(matches!(detect_intent("today's mail"), QueryIntent::Today));
        assert!(matches!(
            detect_intent("important stuff"),
            QueryIntent::Important
        ));
        assert!(matches!(
            detect_intent("find quarterly report"),
            QueryIntent::Search(term) if term == "quarterly report"
        ));
        assert!(matches!(
            detect_intent("what did alice say about the launch"),
            QueryIntent::General
        ));
    }
}
