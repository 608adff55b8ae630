mod embed;
mod error;
mod generate;
mod models;
mod prompts;
mod runtime;
mod summarizer;
mod text;

pub use embed::{prepare_email_text, Embedder, FastEmbedder, EMBEDDING_DIM};
pub use error::AiError;
pub use generate::{GenerationParams, GeneratorFactory, TextGenerator};
pub use models::{model_catalog, ModelManager, ModelOption, ModelStatus};
pub use prompts::{format_prompt, stop_sequences, summary_budget, ModelFamily};
pub use runtime::LlmRuntime;
pub use summarizer::Summarizer;
pub use text::{strip_html, truncate_chars};
