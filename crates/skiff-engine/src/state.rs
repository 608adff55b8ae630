use crate::{EngineError, EngineEvent, EventBus};
use skiff_ai::{Embedder, GeneratorFactory, LlmRuntime, ModelManager, Summarizer};
use skiff_config::{ConfigManager, Paths, Settings};
use skiff_core::{Account, AuthKind};
use skiff_mail::{
    GmailBackend, IdleManager, ImapSmtpBackend, MailBackend, MailCredentials, MailError,
    NewMailEvent, ServerConfig,
};
use skiff_security::{CredentialStore, SecretStore};
use skiff_storage::MetadataStore;
use skiff_vector::VectorStore;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock, Weak};
use tokio::sync::{watch, RwLock};

const KEYCHAIN_SERVICE: &str = "io.skiff.mail";

/// An authorization flow the shell has opened but not yet completed, keyed by
/// its CSRF state.
#[derive(Debug, Clone)]
pub(crate) struct PendingOAuth {
    pub provider: skiff_core::Provider,
    pub pkce_verifier: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// The engine: owns every subsystem and serves the command surface. One
/// instance per process, shared behind an `Arc`.
pub struct EmailEngine {
    pub(crate) self_weak: Weak<EmailEngine>,
    pub(crate) paths: Paths,
    pub(crate) config: ConfigManager,
    pub(crate) settings: RwLock<Settings>,
    pub(crate) storage: MetadataStore,
    pub(crate) vectors: VectorStore,
    pub(crate) credentials: CredentialStore,
    pub(crate) llm: Arc<LlmRuntime>,
    pub(crate) summarizer: Summarizer,
    pub(crate) embedder: RwLock<Option<Arc<dyn Embedder>>>,
    pub(crate) events: EventBus,
    pub(crate) idle: IdleManager,
    pub(crate) indexing_cancel: StdMutex<Option<watch::Sender<bool>>>,
    pub(crate) embedding_cancel: StdMutex<Option<watch::Sender<bool>>>,
    /// Serialize the check-and-set of the singleton running flags.
    pub(crate) indexing_gate: tokio::sync::Mutex<()>,
    pub(crate) embedding_gate: tokio::sync::Mutex<()>,
    pub(crate) oauth_sessions: RwLock<HashMap<String, PendingOAuth>>,
    /// Test seam: replaces per-account transport construction.
    pub(crate) backend_override: StdRwLock<Option<Arc<dyn MailBackend>>>,
}

impl EmailEngine {
    /// Initialize against the platform application-data directory.
    pub async fn initialize(
        generator_factory: Option<Arc<dyn GeneratorFactory>>,
    ) -> Result<Arc<Self>, EngineError> {
        let config = ConfigManager::new()?;
        Self::initialize_with(config, generator_factory).await
    }

    /// Initialize against an explicit data directory (tests, portable mode).
    pub async fn initialize_at(
        data_dir: &Path,
        generator_factory: Option<Arc<dyn GeneratorFactory>>,
    ) -> Result<Arc<Self>, EngineError> {
        let config = ConfigManager::with_paths(Paths::at(data_dir)?);
        Self::initialize_with(config, generator_factory).await
    }

    async fn initialize_with(
        config: ConfigManager,
        generator_factory: Option<Arc<dyn GeneratorFactory>>,
    ) -> Result<Arc<Self>, EngineError> {
        let paths = config.paths().clone();
        let settings = config.load()?;

        // Every store gets its location from the same `Paths` resolution.
        let storage = MetadataStore::open(&paths.metadata_db()).await?;
        let vectors = VectorStore::open(&paths.vector_db()).await?;
        let secrets = Arc::new(SecretStore::new(
            KEYCHAIN_SERVICE,
            paths.credentials_file(),
        ));
        let credentials = CredentialStore::new(secrets);

        let manager = ModelManager::new(paths.models_dir())?;
        let llm = Arc::new(LlmRuntime::new(manager, generator_factory));
        let summarizer = Summarizer::new(llm.clone());

        let engine = Arc::new_cyclic(|weak| EmailEngine {
            self_weak: weak.clone(),
            paths,
            config,
            settings: RwLock::new(settings),
            storage,
            vectors,
            credentials,
            llm,
            summarizer,
            embedder: RwLock::new(None),
            events: EventBus::default(),
            idle: IdleManager::new(),
            indexing_cancel: StdMutex::new(None),
            embedding_cancel: StdMutex::new(None),
            indexing_gate: tokio::sync::Mutex::new(()),
            embedding_gate: tokio::sync::Mutex::new(()),
            oauth_sessions: RwLock::new(HashMap::new()),
            backend_override: StdRwLock::new(None),
        });

        tracing::info!(data_dir = %engine.paths.data_dir().display(), "engine initialized");
        Ok(engine)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub async fn settings(&self) -> Settings {
        self.settings.read().await.clone()
    }

    pub async fn update_settings(&self, next: Settings) -> Result<(), EngineError> {
        self.config.save(&next)?;
        *self.settings.write().await = next;
        Ok(())
    }

    /// Install a sentence encoder. Normally the fastembed encoder from
    /// `init_rag`, but any [`Embedder`] implementation works.
    pub async fn install_embedder(&self, embedder: Arc<dyn Embedder>) {
        *self.embedder.write().await = Some(embedder);
    }

    pub(crate) async fn active_embedder(&self) -> Option<Arc<dyn Embedder>> {
        self.embedder.read().await.clone()
    }

    pub(crate) async fn active_account(&self) -> Result<Account, EngineError> {
        self.storage
            .get_active_account()
            .await?
            .ok_or_else(|| EngineError::AuthRequired("no active account".to_string()))
    }

    /// Transport for the account, selected by its provider tag.
    pub(crate) async fn backend_for(
        &self,
        account: &Account,
    ) -> Result<Arc<dyn MailBackend>, EngineError> {
        if let Some(backend) = self
            .backend_override
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            return Ok(backend);
        }

        if account.provider.uses_native_api() {
            let token = self.credentials.access_token(account).await?;
            return Ok(Arc::new(GmailBackend::new(account.id.clone(), token)));
        }

        let server = ServerConfig {
            imap_host: account.imap_host.clone(),
            imap_port: account.imap_port,
            smtp_host: account.smtp_host.clone(),
            smtp_port: account.smtp_port,
        };
        let creds = match account.auth_kind {
            AuthKind::Oauth => MailCredentials::OAuth2 {
                user: account.address.clone(),
                access_token: self.credentials.access_token(account).await?,
            },
            AuthKind::AppPassword => MailCredentials::Password {
                user: account.address.clone(),
                password: self.credentials.app_password(&account.id)?,
            },
        };

        Ok(Arc::new(ImapSmtpBackend::new(
            account.id.clone(),
            server,
            creds,
        )))
    }

    /// Start push notifications for an IMAP account. Native-API accounts have
    /// no IDLE; they rely on the incremental sync passes.
    pub(crate) async fn start_idle_for(&self, account: &Account) {
        if account.provider.uses_native_api() {
            return;
        }
        // Scripted transports have no live connection to watch.
        if self
            .backend_override
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
        {
            return;
        }

        let creds_store = self.credentials.clone();
        let factory_account = account.clone();
        let factory = Arc::new(move || idle_backend(&factory_account, &creds_store));

        let weak = self.self_weak.clone();
        let notify = Arc::new(move |event: NewMailEvent| {
            let Some(engine) = weak.upgrade() else { return };
            engine.events.emit(EngineEvent::MailNew {
                account_id: event.account_id.clone(),
                folder: event.folder.clone(),
            });

            // Incremental pass for the affected mailbox, bounded small.
            tokio::spawn(async move {
                if let Err(err) = engine.start_indexing(50).await {
                    tracing::debug!(error = %err, "incremental indexing not started");
                }
            });
        });

        self.idle.start(account.id.clone(), factory, notify).await;
    }

    pub(crate) fn engine_handle(&self) -> Result<Arc<EmailEngine>, EngineError> {
        self.self_weak
            .upgrade()
            .ok_or_else(|| EngineError::Internal("engine is shutting down".to_string()))
    }

    #[cfg(test)]
    pub(crate) fn set_backend_override(&self, backend: Arc<dyn MailBackend>) {
        *self
            .backend_override
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(backend);
    }
}

/// Fresh IDLE connection from the stored secrets; invoked on every reconnect.
fn idle_backend(
    account: &Account,
    creds_store: &CredentialStore,
) -> Result<ImapSmtpBackend, MailError> {
    let server = ServerConfig {
        imap_host: account.imap_host.clone(),
        imap_port: account.imap_port,
        smtp_host: account.smtp_host.clone(),
        smtp_port: account.smtp_port,
    };

    let creds = match account.auth_kind {
        AuthKind::Oauth => {
            let tokens = creds_store
                .load_tokens(&account.id)
                .map_err(|err| MailError::Auth(err.to_string()))?
                .ok_or_else(|| MailError::Auth(format!("no tokens for {}", account.id)))?;
            MailCredentials::OAuth2 {
                user: account.address.clone(),
                access_token: tokens.access_token,
            }
        }
        AuthKind::AppPassword => MailCredentials::Password {
            user: account.address.clone(),
            password: creds_store
                .app_password(&account.id)
                .map_err(|err| MailError::Auth(err.to_string()))?,
        },
    };

    Ok(ImapSmtpBackend::new(account.id.clone(), server, creds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stores_agree_on_the_data_directory() {
        let dir = tempfile::tempdir().unwrap();
        let engine = EmailEngine::initialize_at(dir.path(), None).await.unwrap();

        // The regression this guards against: the metadata DB, the vector DB
        // and the model cache resolving different platform directories.
        let paths = engine.paths();
        assert_eq!(paths.metadata_db().parent(), paths.vector_db().parent());
        assert!(paths.models_dir().starts_with(paths.data_dir()));
        assert!(paths.metadata_db().exists() || paths.metadata_db().parent().unwrap().exists());

        let settings = engine.settings().await;
        assert_eq!(settings.retention_days, 30);
    }

    #[tokio::test]
    async fn active_account_is_required() {
        let dir = tempfile::tempdir().unwrap();
        let engine = EmailEngine::initialize_at(dir.path(), None).await.unwrap();

        assert!(matches!(
            engine.active_account().await,
            Err(EngineError::AuthRequired(_))
        ));
    }
}
