use crate::{
    format_prompt, stop_sequences, strip_html, summary_budget, truncate_chars, AiError,
    GenerationParams, LlmRuntime,
};
use std::sync::Arc;

/// Email summarization and analysis over the LLM runtime, with deterministic
/// keyword fallbacks whenever no model is activated. The pipeline never sees
/// `ModelUnavailable` from here.
#[derive(Clone)]
pub struct Summarizer {
    runtime: Arc<LlmRuntime>,
}

impl Summarizer {
    pub fn new(runtime: Arc<LlmRuntime>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &Arc<LlmRuntime> {
        &self.runtime
    }

    pub async fn summarize(
        &self,
        subject: &str,
        from: &str,
        body: &str,
    ) -> Result<String, AiError> {
        let body_text = strip_html(body);
        let word_count = body_text.split_whitespace().count();

        let Some(family) = self.runtime.active_family().await else {
            return Ok(fallback_summary(subject, from, &body_text, word_count));
        };

        let max_body_chars = if word_count > 800 { 4000 } else { 2000 };
        let body_preview = truncate_chars(&body_text, max_body_chars);
        let (max_tokens, instruction) = summary_budget(word_count);

        let system = format!(
            "You are a helpful email assistant. {instruction} Do not miss any important information."
        );
        let user =
            format!("Summarize this email:\n\nFrom: {from}\nSubject: {subject}\n\n{body_preview}");
        let prompt = format_prompt(family, &system, &user);

        let params = GenerationParams {
            max_tokens,
            temperature: 0.3,
            stop_sequences: stop_sequences(),
            ..Default::default()
        };

        match self.runtime.generate(prompt, params, |_| {}).await {
            Ok(text) => Ok(text.trim().to_string()),
            Err(AiError::ModelUnavailable) => {
                Ok(fallback_summary(subject, from, &body_text, word_count))
            }
            Err(err) => Err(err),
        }
    }

    pub async fn insight_lines(&self, subject: &str, body: &str) -> Result<Vec<String>, AiError> {
        let body_text = strip_html(body);

        let Some(family) = self.runtime.active_family().await else {
            return Ok(fallback_insights(subject, &body_text));
        };

        let body_preview = truncate_chars(&body_text, 1500);
        let system = "You are an email analysis assistant. List 1-3 key insights about emails. \
                      Each insight is one short sentence, one per line.";
        let user = format!("Analyze this email:\n\nSubject: {subject}\n\n{body_preview}");
        let prompt = format_prompt(family, system, &user);

        let params = GenerationParams {
            max_tokens: 150,
            temperature: 0.3,
            stop_sequences: stop_sequences(),
            ..Default::default()
        };

        match self.runtime.generate(prompt, params, |_| {}).await {
            Ok(response) => {
                let lines: Vec<String> = response
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .take(5)
                    .collect();
                if lines.is_empty() {
                    Ok(fallback_insights(subject, &body_text))
                } else {
                    Ok(lines)
                }
            }
            Err(AiError::ModelUnavailable) => Ok(fallback_insights(subject, &body_text)),
            Err(err) => Err(err),
        }
    }

    /// One short line per action item found in the message body.
    pub async fn action_items(&self, body: &str) -> Result<Vec<String>, AiError> {
        let body_text = strip_html(body);

        let Some(family) = self.runtime.active_family().await else {
            return Ok(fallback_action_items(&body_text));
        };

        let body_preview = truncate_chars(&body_text, 1500);
        let system = "You are an email assistant. Extract action items from emails \
                      as one short line each. Output only the items, one per line.";
        let user = format!("Extract action items from this email:\n\n{body_preview}");
        let prompt = format_prompt(family, system, &user);

        let params = GenerationParams {
            max_tokens: 120,
            temperature: 0.2,
            stop_sequences: stop_sequences(),
            ..Default::default()
        };

        match self.runtime.generate(prompt, params, |_| {}).await {
            Ok(response) => Ok(response
                .lines()
                .map(|line| line.trim().trim_start_matches('-').trim().to_string())
                .filter(|line| !line.is_empty())
                .take(5)
                .collect()),
            Err(AiError::ModelUnavailable) => Ok(fallback_action_items(&body_text)),
            Err(err) => Err(err),
        }
    }

    /// Conversational answer, optionally grounded in retrieved email context.
    pub async fn chat<F>(
        &self,
        query: &str,
        context: Option<&str>,
        on_token: F,
    ) -> Result<String, AiError>
    where
        F: FnMut(&str) + Send + 'static,
    {
        let Some(family) = self.runtime.active_family().await else {
            return Ok(fallback_chat(context));
        };

        let system = if context.is_some() {
            "You are an intelligent email assistant. Help users understand their emails. \
             Be concise and conversational. Only reference information from the provided context."
        } else {
            "You are an intelligent email assistant. Be helpful and concise."
        };
        let user = match context {
            Some(ctx) => format!("Email context:\n{ctx}\n\nUser: {query}"),
            None => query.to_string(),
        };
        let prompt = format_prompt(family, system, &user);

        let params = GenerationParams {
            max_tokens: 300,
            temperature: 0.7,
            stop_sequences: stop_sequences(),
            ..Default::default()
        };

        match self.runtime.generate(prompt, params, on_token).await {
            Ok(text) => Ok(text.trim().to_string()),
            Err(AiError::ModelUnavailable) => Ok(fallback_chat(context)),
            Err(err) => Err(err),
        }
    }
}

/// Keyword summary used whenever no model is loaded: sender, subject and a
/// preview scaled to the email's length.
fn fallback_summary(subject: &str, from: &str, body_text: &str, word_count: usize) -> String {
    let sender = from.split('<').next().unwrap_or(from).trim();
    let words: Vec<&str> = body_text.split_whitespace().collect();

    let preview_words = match word_count {
        0..=50 => word_count,
        51..=150 => 40,
        151..=400 => 60,
        401..=800 => 80,
        _ => 100,
    };

    if words.len() > preview_words {
        let preview = words[..preview_words].join(" ");
        format!("Email from {sender} regarding \"{subject}\": {preview}...")
    } else {
        format!("Email from {sender} regarding \"{subject}\": {body_text}")
    }
}

fn fallback_insights(subject: &str, body_text: &str) -> Vec<String> {
    let combined = format!("{subject} {body_text}").to_lowercase();
    let mut insights = Vec::new();

    if combined.contains("urgent") || combined.contains("asap") {
        insights.push("Urgent: requires immediate attention".to_string());
    }
    if combined.contains("meeting") || combined.contains("call") || combined.contains("schedule") {
        insights.push("Action: schedule or attend a meeting".to_string());
    }
    if combined.contains("deadline") || combined.contains("due date") {
        insights.push("Deadline: time-sensitive task".to_string());
    }
    if combined.contains('?') {
        insights.push("Requires response: questions asked".to_string());
    }
    if combined.contains("invoice") || combined.contains("payment") || combined.contains('$') {
        insights.push("Financial: payment or invoice related".to_string());
    }

    if insights.is_empty() {
        insights.push("Informational: no immediate action required".to_string());
    }
    insights
}

/// Sentence-level action extraction: a sentence counts when it asks the
/// reader to do something.
fn fallback_action_items(body_text: &str) -> Vec<String> {
    const MARKERS: [&str; 6] = [
        "please ",
        "could you",
        "can you",
        "action required",
        "need your",
        "don't forget",
    ];

    body_text
        .split(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|sentence| {
            let lower = sentence.to_lowercase();
            !sentence.is_empty() && MARKERS.iter().any(|marker| lower.contains(marker))
        })
        .map(|sentence| truncate_chars(sentence, 120))
        .take(5)
        .collect()
}

fn fallback_chat(context: Option<&str>) -> String {
    match context {
        Some(ctx) => format!(
            "Here's what I found:\n\n{ctx}\n\n(The AI model is not loaded, so this is a plain listing.)"
        ),
        None => "I'm your email assistant. I can help you find and understand your emails; \
                 try asking about today's emails, important messages, or a topic to search for."
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModelManager;

    fn fallback_only(dir: &tempfile::TempDir) -> Summarizer {
        let manager = ModelManager::new(dir.path().to_path_buf()).unwrap();
        Summarizer::new(Arc::new(LlmRuntime::new(manager, None)))
    }

    #[tokio::test]
    async fn summarize_without_model_uses_keyword_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let summarizer = fallback_only(&dir);

        let summary = summarizer
            .summarize(
                "Quarterly numbers",
                "Pat Doe <pat@example.com>",
                "The numbers look fine this quarter.",
            )
            .await
            .unwrap();

        assert!(summary.contains("Pat Doe"));
        assert!(summary.contains("Quarterly numbers"));
        assert!(summary.contains("numbers look fine"));
    }

    #[tokio::test]
    async fn short_fallback_summary_keeps_whole_body() {
        let dir = tempfile::tempdir().unwrap();
        let summarizer = fallback_only(&dir);

        let summary = summarizer
            .summarize("Hi", "a@example.com", "<p>Tiny note</p>")
            .await
            .unwrap();
        assert!(summary.ends_with("Tiny note"));
        assert!(!summary.ends_with("..."));
    }

    #[tokio::test]
    async fn fallback_insights_hit_keyword_sets() {
        let dir = tempfile::tempdir().unwrap();
        let summarizer = fallback_only(&dir);

        let insights = summarizer
            .insight_lines("URGENT invoice", "Payment due, please schedule a call?")
            .await
            .unwrap();

        assert!(insights.iter().any(|line| line.starts_with("Urgent")));
        assert!(insights.iter().any(|line| line.starts_with("Financial")));
        assert!(insights.iter().any(|line| line.starts_with("Action")));
    }

    #[tokio::test]
    async fn fallback_action_items_pick_request_sentences() {
        let dir = tempfile::tempdir().unwrap();
        let summarizer = fallback_only(&dir);

        let items = summarizer
            .action_items(
                "The report is attached. Please review the numbers by Friday. \
                 Weather is nice. Can you forward this to Sam?",
            )
            .await
            .unwrap();

        assert_eq!(items.len(), 2);
        assert!(items[0].contains("review the numbers"));
        assert!(items[1].contains("forward this to Sam"));
    }

    #[tokio::test]
    async fn chat_without_model_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let summarizer = fallback_only(&dir);

        let no_context = summarizer.chat("hello", None, |_| {}).await.unwrap();
        assert!(no_context.contains("email assistant"));

        let with_context = summarizer
            .chat("what's new", Some("- Invoice #42"), |_| {})
            .await
            .unwrap();
        assert!(with_context.contains("Invoice #42"));
    }
}
