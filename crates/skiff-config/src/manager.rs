use crate::{ConfigError, Settings};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

const ORG: &str = "io";
const AUTHOR: &str = "Skiff";
const APP: &str = "Skiff";

/// Filesystem layout under the platform application-data directory.
///
/// Every component that persists anything receives its location from here, so
/// the metadata store, the vector store and the model cache can never disagree
/// about where the data lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    data_dir: PathBuf,
}

impl Paths {
    pub fn resolve() -> Result<Self, ConfigError> {
        let dirs = ProjectDirs::from(ORG, AUTHOR, APP).ok_or(ConfigError::MissingDirectories)?;
        Self::at(dirs.data_dir())
    }

    /// Root the layout at an explicit directory (tests, portable installs).
    pub fn at(data_dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(data_dir.join("db"))?;
        fs::create_dir_all(data_dir.join("models"))?;
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn metadata_db(&self) -> PathBuf {
        self.data_dir.join("db").join("messages.sqlite")
    }

    pub fn vector_db(&self) -> PathBuf {
        self.data_dir.join("db").join("vectors.sqlite")
    }

    pub fn models_dir(&self) -> PathBuf {
        self.data_dir.join("models")
    }

    pub fn embedder_cache_dir(&self) -> PathBuf {
        self.data_dir.join("models").join("fastembed")
    }

    pub fn credentials_file(&self) -> PathBuf {
        self.data_dir.join("credentials.json")
    }

    pub fn settings_file(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }
}

#[derive(Debug, Clone)]
pub struct ConfigManager {
    paths: Paths,
}

impl ConfigManager {
    pub fn new() -> Result<Self, ConfigError> {
        Ok(Self {
            paths: Paths::resolve()?,
        })
    }

    pub fn with_paths(paths: Paths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn load(&self) -> Result<Settings, ConfigError> {
        let path = self.paths.settings_file();
        if !path.exists() {
            let initial = Settings::default();
            self.save(&initial)?;
            return Ok(initial);
        }

        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, settings: &Settings) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(settings)?;
        fs::write(self.paths.settings_file(), content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_roundtrip_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::with_paths(Paths::at(dir.path()).unwrap());

        let initial = manager.load().unwrap();
        assert!(initial.auto_sync_on_start);
        assert_eq!(initial.retention_days, 30);

        let mut edited = initial.clone();
        edited.retention_days = 7;
        manager.save(&edited).unwrap();

        let reloaded = manager.load().unwrap();
        assert_eq!(reloaded.retention_days, 7);
    }

    #[test]
    fn one_resolution_serves_every_store() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::at(dir.path()).unwrap();

        assert_eq!(paths.metadata_db().parent(), paths.vector_db().parent());
        assert!(paths.models_dir().starts_with(paths.data_dir()));
        assert!(paths.embedder_cache_dir().starts_with(paths.models_dir()));
        assert!(paths.metadata_db().parent().unwrap().exists());
    }
}
