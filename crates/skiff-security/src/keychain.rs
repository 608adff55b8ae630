use crate::SecurityError;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct SecretKey {
    pub namespace: String,
    pub id: String,
}

impl SecretKey {
    pub fn new(namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            id: id.into(),
        }
    }

    pub fn as_username(&self) -> String {
        format!("{}:{}", self.namespace, self.id)
    }
}

/// Secret material store. Prefers the OS keychain; when the platform has no
/// usable keychain every operation falls through to a user-scoped JSON file
/// with restrictive permissions.
pub struct SecretStore {
    service_name: String,
    fallback_file: PathBuf,
    /// Serializes read-modify-write cycles on the fallback file.
    file_lock: Mutex<()>,
}

impl SecretStore {
    pub fn new(service_name: impl Into<String>, fallback_file: PathBuf) -> Self {
        Self {
            service_name: service_name.into(),
            fallback_file,
            file_lock: Mutex::new(()),
        }
    }

    pub fn set(&self, key: &SecretKey, value: &str) -> Result<(), SecurityError> {
        match keyring::Entry::new(&self.service_name, &key.as_username()) {
            Ok(entry) => match entry.set_password(value) {
                Ok(()) => Ok(()),
                Err(keyring::Error::PlatformFailure(_)) | Err(keyring::Error::NoStorageAccess(_)) => {
                    self.file_set(key, value)
                }
                Err(err) => Err(err.into()),
            },
            Err(_) => self.file_set(key, value),
        }
    }

    pub fn get(&self, key: &SecretKey) -> Result<Option<String>, SecurityError> {
        match keyring::Entry::new(&self.service_name, &key.as_username()) {
            Ok(entry) => match entry.get_password() {
                Ok(secret) => Ok(Some(secret)),
                Err(keyring::Error::NoEntry) => self.file_get(key),
                Err(keyring::Error::PlatformFailure(_)) | Err(keyring::Error::NoStorageAccess(_)) => {
                    self.file_get(key)
                }
                Err(err) => Err(err.into()),
            },
            Err(_) => self.file_get(key),
        }
    }

    pub fn delete(&self, key: &SecretKey) -> Result<(), SecurityError> {
        if let Ok(entry) = keyring::Entry::new(&self.service_name, &key.as_username()) {
            match entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => {}
                Err(keyring::Error::PlatformFailure(_)) | Err(keyring::Error::NoStorageAccess(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }

        self.file_delete(key)
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    fn file_set(&self, key: &SecretKey, value: &str) -> Result<(), SecurityError> {
        let _guard = self.file_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut map = self.read_file()?;
        map.insert(key.as_username(), value.to_string());
        self.write_file(&map)
    }

    fn file_get(&self, key: &SecretKey) -> Result<Option<String>, SecurityError> {
        let _guard = self.file_lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.read_file()?.get(&key.as_username()).cloned())
    }

    fn file_delete(&self, key: &SecretKey) -> Result<(), SecurityError> {
        let _guard = self.file_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut map = self.read_file()?;
        if map.remove(&key.as_username()).is_some() {
            self.write_file(&map)?;
        }
        Ok(())
    }

    fn read_file(&self) -> Result<BTreeMap<String, String>, SecurityError> {
        if !self.fallback_file.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.fallback_file)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn write_file(&self, map: &BTreeMap<String, String>) -> Result<(), SecurityError> {
        if let Some(parent) = self.fallback_file.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.fallback_file, serde_json::to_string_pretty(map)?)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.fallback_file, fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }
}

impl std::fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretStore")
            .field("service_name", &self.service_name)
            .field("fallback_file", &self.fallback_file)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_only_store(dir: &std::path::Path) -> SecretStore {
        // An unlikely service name keeps tests off the real keychain entries;
        // on headless CI the keyring backend fails over to the file anyway.
        SecretStore::new(
            "io.skiff.test-suite",
            dir.join("credentials.json"),
        )
    }

    #[test]
    fn fallback_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_only_store(dir.path());
        let key = SecretKey::new("app_password", "acct-1");

        store.file_set(&key, "hunter2").unwrap();
        assert_eq!(store.file_get(&key).unwrap().as_deref(), Some("hunter2"));

        store.file_delete(&key).unwrap();
        assert_eq!(store.file_get(&key).unwrap(), None);
    }

    #[cfg(unix)]
    #[test]
    fn fallback_file_is_user_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = file_only_store(dir.path());
        store
            .file_set(&SecretKey::new("app_password", "acct-1"), "s3cret")
            .unwrap();

        let mode = std::fs::metadata(dir.path().join("credentials.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
