use crate::{strip_html, truncate_chars, AiError};
use std::path::Path;
use std::sync::Mutex;

/// Output dimension of the default sentence encoder (all-MiniLM class).
pub const EMBEDDING_DIM: usize = 384;

const FASTEMBED_MODEL_ID: &str = "fastembed:all-MiniLM-L6-v2";

/// Fixed-dimension sentence encoder. The `model_id` is stored alongside every
/// vector so retired models can be filtered out at query time.
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> &str;
    fn dim(&self) -> usize;
    fn encode(&self, text: &str) -> Result<Vec<f32>, AiError>;
}

/// Production encoder on `fastembed`. The ONNX session is not `Sync`, so the
/// handle serializes access behind a mutex.
pub struct FastEmbedder {
    model: Mutex<fastembed::TextEmbedding>,
}

impl FastEmbedder {
    pub fn try_new(cache_dir: &Path) -> Result<Self, AiError> {
        std::fs::create_dir_all(cache_dir)?;

        let options =
            fastembed::TextInitOptions::new(fastembed::EmbeddingModel::AllMiniLML6V2)
                .with_cache_dir(cache_dir.to_path_buf())
                .with_show_download_progress(false);

        let mut model = fastembed::TextEmbedding::try_new(options)
            .map_err(|err| AiError::Embedding(err.to_string()))?;

        let sanity = model
            .embed(vec!["hello"], Some(1))
            .map_err(|err| AiError::Embedding(err.to_string()))?;
        let dim = sanity.first().map(|v| v.len()).unwrap_or_default();
        if dim != EMBEDDING_DIM {
            return Err(AiError::Embedding(format!(
                "unexpected embedding dimension {dim}, wanted {EMBEDDING_DIM}"
            )));
        }

        Ok(Self {
            model: Mutex::new(model),
        })
    }
}

impl Embedder for FastEmbedder {
    fn model_id(&self) -> &str {
        FASTEMBED_MODEL_ID
    }

    fn dim(&self) -> usize {
        EMBEDDING_DIM
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>, AiError> {
        let mut model = self.model.lock().unwrap_or_else(|e| e.into_inner());
        let mut vectors = model
            .embed(vec![text], None)
            .map_err(|err| AiError::Embedding(err.to_string()))?;

        let vector = vectors
            .pop()
            .ok_or_else(|| AiError::Embedding("encoder returned no vector".to_string()))?;
        if vector.len() != EMBEDDING_DIM {
            return Err(AiError::Embedding(format!(
                "unexpected embedding dimension {}",
                vector.len()
            )));
        }
        Ok(vector)
    }
}

/// Embedding input composed from the message: subject, sender and a bounded
/// slice of the stripped body.
pub fn prepare_email_text(subject: &str, from: &str, body: &str) -> String {
    let clean_body = strip_html(body);
    let truncated = truncate_chars(&clean_body, 1000);
    format!("{subject}\n{from}\n{truncated}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepared_text_contains_all_three_fields() {
        let text = prepare_email_text(
            "Meeting Tomorrow",
            "John Doe",
            "<html><body>Let's meet at 3pm</body></html>",
        );
        let lines: Vec<&str> = text.splitn(3, '\n').collect();
        assert_eq!(lines[0], "Meeting Tomorrow");
        assert_eq!(lines[1], "John Doe");
        assert!(lines[2].contains("meet at 3pm"));
        assert!(!lines[2].contains("<body>"));
    }

    #[test]
    fn prepared_text_bounds_the_body() {
        let body = "word ".repeat(2000);
        let text = prepare_email_text("S", "F", &body);
        assert!(text.len() < 1100);
        assert!(text.ends_with("..."));
    }
}
