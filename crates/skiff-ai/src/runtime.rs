use crate::{
    AiError, GenerationParams, GeneratorFactory, ModelFamily, ModelManager, ModelStatus,
    TextGenerator,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock, Semaphore};

#[derive(Clone)]
struct ActiveModel {
    id: String,
    family: ModelFamily,
    generator: Arc<dyn TextGenerator>,
}

/// Process-wide language-model runtime. One model is active at a time behind
/// an activation lock; a single generation may be in flight.
pub struct LlmRuntime {
    manager: ModelManager,
    factory: Option<Arc<dyn GeneratorFactory>>,
    active: RwLock<Option<ActiveModel>>,
    activation: Mutex<()>,
    generate_permits: Arc<Semaphore>,
    loading: AtomicBool,
}

impl LlmRuntime {
    pub fn new(manager: ModelManager, factory: Option<Arc<dyn GeneratorFactory>>) -> Self {
        Self {
            manager,
            factory,
            active: RwLock::new(None),
            activation: Mutex::new(()),
            generate_permits: Arc::new(Semaphore::new(1)),
            loading: AtomicBool::new(false),
        }
    }

    pub fn manager(&self) -> &ModelManager {
        &self.manager
    }

    pub async fn is_ready(&self) -> bool {
        self.active.read().await.is_some()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    pub async fn active_model_id(&self) -> Option<String> {
        self.active.read().await.as_ref().map(|m| m.id.clone())
    }

    pub async fn active_family(&self) -> Option<ModelFamily> {
        self.active.read().await.as_ref().map(|m| m.family)
    }

    pub async fn status(&self) -> ModelStatus {
        if self.loading.load(Ordering::SeqCst) {
            return ModelStatus::Loading;
        }
        if self.is_ready().await {
            return ModelStatus::Ready;
        }
        if self.manager.find_any_downloaded().is_some() {
            ModelStatus::Downloaded
        } else {
            ModelStatus::NotDownloaded
        }
    }

    /// Unloads the prior model and loads the requested one as the active
    /// generator. Serialized by the activation lock.
    pub async fn activate(&self, model_id: &str) -> Result<(), AiError> {
        let _guard = self.activation.lock().await;

        let model = self
            .manager
            .get_model(model_id)
            .ok_or_else(|| AiError::UnknownModel(model_id.to_string()))?;
        let path = self.manager.model_path(&model);
        if !path.is_file() {
            return Err(AiError::NotDownloaded(model_id.to_string()));
        }

        let factory = self.factory.clone().ok_or(AiError::ModelUnavailable)?;
        let family = ModelFamily::from_filename(&model.filename);

        // Explicit teardown before the swap; the accelerator holds one model.
        *self.active.write().await = None;
        self.loading.store(true, Ordering::SeqCst);

        let loaded =
            tokio::task::spawn_blocking(move || factory.load(&path, family))
                .await
                .map_err(|err| AiError::Load(err.to_string()));
        self.loading.store(false, Ordering::SeqCst);

        let generator = loaded??;
        tracing::info!(model_id, "model activated");
        *self.active.write().await = Some(ActiveModel {
            id: model_id.to_string(),
            family,
            generator,
        });

        Ok(())
    }

    pub async fn deactivate(&self) {
        let _guard = self.activation.lock().await;
        *self.active.write().await = None;
    }

    /// Refuses to delete the active model.
    pub async fn delete_model(&self, model_id: &str) -> Result<(), AiError> {
        if self.active_model_id().await.as_deref() == Some(model_id) {
            return Err(AiError::DeleteActive(model_id.to_string()));
        }
        self.manager.delete(model_id)
    }

    /// Runs one generation on the blocking pool, waiting for the in-flight
    /// permit. Tokens stream through `on_token`; the wall-clock ceiling in
    /// `params` ends the stream cleanly.
    pub async fn generate<F>(
        &self,
        prompt: String,
        params: GenerationParams,
        on_token: F,
    ) -> Result<String, AiError>
    where
        F: FnMut(&str) + Send + 'static,
    {
        let permit = self
            .generate_permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AiError::Busy)?;
        self.generate_with_permit(permit, prompt, params, on_token)
            .await
    }

    /// Like [`generate`], but returns `Busy` instead of queueing.
    pub async fn try_generate<F>(
        &self,
        prompt: String,
        params: GenerationParams,
        on_token: F,
    ) -> Result<String, AiError>
    where
        F: FnMut(&str) + Send + 'static,
    {
        let permit = self
            .generate_permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| AiError::Busy)?;
        self.generate_with_permit(permit, prompt, params, on_token)
            .await
    }

    async fn generate_with_permit<F>(
        &self,
        permit: tokio::sync::OwnedSemaphorePermit,
        prompt: String,
        params: GenerationParams,
        mut on_token: F,
    ) -> Result<String, AiError>
    where
        F: FnMut(&str) + Send + 'static,
    {
        let generator = self
            .active
            .read()
            .await
            .as_ref()
            .map(|m| m.generator.clone())
            .ok_or(AiError::ModelUnavailable)?;

        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let deadline = Instant::now() + params.wall_clock;
            let mut callback = |token: &str| -> bool {
                if Instant::now() >= deadline {
                    return false;
                }
                on_token(token);
                true
            };
            generator.generate_stream(&prompt, &params, &mut callback)
        })
        .await
        .map_err(|err| AiError::Inference(err.to_string()))?;

        result
    }
}
