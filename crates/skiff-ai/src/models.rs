use crate::AiError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// A curated, user-selectable language model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelOption {
    pub id: String,
    pub name: String,
    pub repo: String,
    pub filename: String,
    pub size_mb: u32,
    pub description: String,
    pub min_ram_gb: u32,
    pub speed_class: String,
}

pub fn model_catalog() -> Vec<ModelOption> {
    vec![
        ModelOption {
            id: "lfm2.5-1.2b-q4".to_string(),
            name: "LFM2.5 1.2B (Recommended)".to_string(),
            repo: "LiquidAI/LFM2.5-1.2B-Instruct-GGUF".to_string(),
            filename: "LFM2.5-1.2B-Instruct-Q4_K_M.gguf".to_string(),
            size_mb: 731,
            description: "Fastest, most efficient. Great for email tasks.".to_string(),
            min_ram_gb: 2,
            speed_class: "200+ tok/s".to_string(),
        },
        ModelOption {
            id: "lfm2.5-1.2b-q8".to_string(),
            name: "LFM2.5 1.2B High Quality".to_string(),
            repo: "LiquidAI/LFM2.5-1.2B-Instruct-GGUF".to_string(),
            filename: "LFM2.5-1.2B-Instruct-Q8_0.gguf".to_string(),
            size_mb: 1250,
            description: "Higher quality, still very fast.".to_string(),
            min_ram_gb: 4,
            speed_class: "150+ tok/s".to_string(),
        },
        ModelOption {
            id: "qwen2.5-3b-q4".to_string(),
            name: "Qwen 2.5 3B".to_string(),
            repo: "Qwen/Qwen2.5-3B-Instruct-GGUF".to_string(),
            filename: "qwen2.5-3b-instruct-q4_k_m.gguf".to_string(),
            size_mb: 2000,
            description: "Larger model, better reasoning.".to_string(),
            min_ram_gb: 8,
            speed_class: "70-90 tok/s".to_string(),
        },
    ]
}

/// Download/activation state reported to the shell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModelStatus {
    NotDownloaded,
    Downloading { progress: f32 },
    Downloaded,
    Loading,
    Ready,
    Error { message: String },
}

/// Manages the on-disk model cache under `<data>/models/<repo>/<filename>`.
#[derive(Debug, Clone)]
pub struct ModelManager {
    models_dir: PathBuf,
    http: reqwest::Client,
}

impl ModelManager {
    pub fn new(models_dir: PathBuf) -> Result<Self, AiError> {
        std::fs::create_dir_all(&models_dir)?;
        Ok(Self {
            models_dir,
            http: reqwest::Client::new(),
        })
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn get_model(&self, model_id: &str) -> Option<ModelOption> {
        model_catalog().into_iter().find(|m| m.id == model_id)
    }

    pub fn model_path(&self, model: &ModelOption) -> PathBuf {
        self.models_dir.join(&model.repo).join(&model.filename)
    }

    pub fn is_downloaded(&self, model_id: &str) -> bool {
        self.get_model(model_id)
            .map(|model| self.model_path(&model).is_file())
            .unwrap_or(false)
    }

    pub fn list_downloaded(&self) -> Vec<ModelOption> {
        model_catalog()
            .into_iter()
            .filter(|model| self.model_path(model).is_file())
            .collect()
    }

    pub fn find_any_downloaded(&self) -> Option<(ModelOption, PathBuf)> {
        model_catalog().into_iter().find_map(|model| {
            let path = self.model_path(&model);
            path.is_file().then_some((model, path))
        })
    }

    /// Streams the model file into the cache, reporting percent progress.
    /// Returns the final path; a completed prior download short-circuits.
    pub async fn download<F>(&self, model_id: &str, on_progress: F) -> Result<PathBuf, AiError>
    where
        F: Fn(f32) + Send + Sync,
    {
        let model = self
            .get_model(model_id)
            .ok_or_else(|| AiError::UnknownModel(model_id.to_string()))?;
        let target = self.model_path(&model);

        if target.is_file() {
            on_progress(100.0);
            return Ok(target);
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let url = format!(
            "https://huggingface.co/{}/resolve/main/{}",
            model.repo, model.filename
        );
        tracing::info!(model_id, %url, "downloading model");
        on_progress(0.0);

        let mut response = self.http.get(&url).send().await?.error_for_status()?;
        let total = response
            .content_length()
            .unwrap_or((model.size_mb as u64) * 1024 * 1024);

        let partial = target.with_extension("partial");
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut written: u64 = 0;

        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            if total > 0 {
                let pct = (written as f64 / total as f64 * 100.0).min(99.0);
                on_progress(pct as f32);
            }
        }

        file.flush().await?;
        drop(file);
        tokio::fs::rename(&partial, &target).await?;
        on_progress(100.0);

        Ok(target)
    }

    pub fn delete(&self, model_id: &str) -> Result<(), AiError> {
        let model = self
            .get_model(model_id)
            .ok_or_else(|| AiError::UnknownModel(model_id.to_string()))?;
        let path = self.model_path(&model);
        if path.is_file() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}
