mod error;
mod manager;
mod model;

pub use error::ConfigError;
pub use manager::{ConfigManager, Paths};
pub use model::Settings;
