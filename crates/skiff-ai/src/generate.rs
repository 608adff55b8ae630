use crate::{AiError, ModelFamily};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Generation parameters handed to the inference kernel.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub stop_sequences: Vec<String>,
    /// Wall-clock ceiling on the whole generation; the stream ends cleanly
    /// when it elapses.
    pub wall_clock: Duration,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            temperature: 0.7,
            top_p: 0.9,
            stop_sequences: vec![],
            wall_clock: Duration::from_secs(120),
        }
    }
}

/// The low-level inference kernel, consumed as a black box. Implementations
/// are compute-bound and blocking; the runtime always dispatches them on a
/// dedicated blocking worker.
///
/// The token sequence is lazy, finite and non-restartable. `on_token` returns
/// `false` to end the stream early (cancellation, wall-clock ceiling); the
/// implementation must stop promptly and return the text produced so far.
pub trait TextGenerator: Send + Sync {
    fn generate_stream(
        &self,
        prompt: &str,
        params: &GenerationParams,
        on_token: &mut dyn FnMut(&str) -> bool,
    ) -> Result<String, AiError>;
}

/// Loads a [`TextGenerator`] from a downloaded model file. Provided by the
/// embedding application; when absent the engine runs in fallback mode.
pub trait GeneratorFactory: Send + Sync {
    fn load(
        &self,
        model_path: &Path,
        family: ModelFamily,
    ) -> Result<Arc<dyn TextGenerator>, AiError>;
}
