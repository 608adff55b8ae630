use crate::state::EmailEngine;
use crate::{EngineError, EngineEvent};
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use skiff_ai::{model_catalog, FastEmbedder, ModelOption, ModelStatus};
use skiff_core::{
    Account, AuthKind, EmailHeader, EmailMessage, EmailWithInsight, EmbeddingStatus,
    IndexingStatus, MailFlag, OutgoingEmail, Provider,
};
use skiff_mail::{default_auth_kind, detect_provider, server_preset, with_retry};
use skiff_security::{oauth_profile_for, OAuthPkceSession, OAuthWorkflow, TokenData};
use std::sync::Arc;

/// How long an opened consent flow stays redeemable.
const OAUTH_SESSION_TTL_MINUTES: i64 = 15;

#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in_secs: Option<u64>,
}

impl std::fmt::Debug for OAuthTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokens")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_in_secs", &self.expires_in_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailSummary {
    pub summary: String,
    pub insights: Vec<String>,
    pub priority: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageInfo {
    pub message_count: i64,
    pub indexed_count: i64,
    pub embedded_count: i64,
    pub metadata_db_bytes: u64,
    pub vector_db_bytes: u64,
}

/// Parameters for `sign_in` / `add_account`. Secrets arrive here once and move
/// straight into the credential store.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SignInRequest {
    pub address: String,
    pub display_name: String,
    /// Provider tag; detected from the address domain when absent.
    pub provider: Option<String>,
    pub imap_host: Option<String>,
    pub imap_port: Option<u16>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub auth_kind: Option<String>,
    pub app_password: Option<String>,
    pub oauth: Option<OAuthTokens>,
}

impl EmailEngine {
    // ---- accounts & session ----

    pub async fn sign_in(&self, request: SignInRequest) -> Result<Account, EngineError> {
        let account = self.add_account(request).await?;
        self.set_active_account(&account.id).await?;
        Ok(account)
    }

    /// Tears down the active account: IDLE task, credentials, messages.
    pub async fn sign_out(&self) -> Result<(), EngineError> {
        let account = self.active_account().await?;
        self.remove_account(&account.id).await
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>, EngineError> {
        Ok(self.storage.list_accounts().await?)
    }

    pub async fn add_account(&self, request: SignInRequest) -> Result<Account, EngineError> {
        let provider = request
            .provider
            .as_deref()
            .map(Provider::parse)
            .unwrap_or_else(|| detect_provider(&request.address));
        let auth_kind = request
            .auth_kind
            .as_deref()
            .map(AuthKind::parse)
            .unwrap_or_else(|| default_auth_kind(provider));

        let (imap_host, imap_port, smtp_host, smtp_port) = match server_preset(provider) {
            Some(preset) => (
                request.imap_host.unwrap_or(preset.imap_host),
                request.imap_port.unwrap_or(preset.imap_port),
                request.smtp_host.unwrap_or(preset.smtp_host),
                request.smtp_port.unwrap_or(preset.smtp_port),
            ),
            None => (
                request.imap_host.ok_or_else(|| {
                    EngineError::Internal("imap_host required for a custom provider".to_string())
                })?,
                request.imap_port.unwrap_or(993),
                request.smtp_host.ok_or_else(|| {
                    EngineError::Internal("smtp_host required for a custom provider".to_string())
                })?,
                request.smtp_port.unwrap_or(465),
            ),
        };

        let account = Account::new(
            request.address,
            request.display_name,
            provider,
            imap_host,
            imap_port,
            smtp_host,
            smtp_port,
            auth_kind,
        );

        match auth_kind {
            AuthKind::Oauth => {
                let tokens = request.oauth.ok_or_else(|| {
                    EngineError::AuthRequired("oauth tokens required for this account".to_string())
                })?;
                let expires_at = Utc::now()
                    + ChronoDuration::seconds(tokens.expires_in_secs.unwrap_or(3600) as i64);
                self.credentials.store_tokens(
                    &account.id,
                    &TokenData {
                        access_token: tokens.access_token,
                        refresh_token: tokens.refresh_token,
                        expires_at,
                    },
                )?;
            }
            AuthKind::AppPassword => {
                let password = request.app_password.ok_or_else(|| {
                    EngineError::AuthRequired("app password required for this account".to_string())
                })?;
                self.credentials.put(
                    &account.id,
                    skiff_security::SecretKind::AppPassword,
                    &password,
                )?;
            }
        }

        self.storage.store_account(&account).await?;
        self.start_idle_for(&account).await;
        tracing::info!(account_id = %account.id, provider = provider.as_str(), "account added");

        Ok(account)
    }

    pub async fn remove_account(&self, account_id: &str) -> Result<(), EngineError> {
        self.idle.stop(account_id).await;

        // Vectors for this account's messages go with it.
        let prefix = format!("{account_id}:");
        for id in self.storage.all_message_ids(100_000).await? {
            if id.starts_with(&prefix) {
                let _ = self.vectors.delete(&id).await;
            }
        }

        self.storage.remove_account(account_id).await?;
        self.credentials.clear_account(account_id)?;
        Ok(())
    }

    pub async fn set_active_account(&self, account_id: &str) -> Result<(), EngineError> {
        Ok(self.storage.set_active_account(account_id).await?)
    }

    // ---- oauth consent plumbing ----

    /// Open a PKCE authorization session for the provider. The shell sends the
    /// user's browser to the returned URL; the redirect lands on localhost.
    pub async fn begin_oauth_pkce(&self, provider: &str) -> Result<OAuthPkceSession, EngineError> {
        let provider = Provider::parse(provider);
        let profile = oauth_profile_for(provider).ok_or_else(|| {
            EngineError::AuthRequired(format!(
                "no oauth profile for provider {}",
                provider.as_str()
            ))
        })?;

        let workflow = OAuthWorkflow::new(profile)?;
        let session = workflow.begin_pkce_session()?;

        let mut sessions = self.oauth_sessions.write().await;
        sessions.retain(|_, pending| {
            Utc::now() - pending.created_at < ChronoDuration::minutes(OAUTH_SESSION_TTL_MINUTES)
        });
        sessions.insert(
            session.csrf_state.clone(),
            crate::state::PendingOAuth {
                provider,
                pkce_verifier: session.pkce_verifier.clone(),
                created_at: Utc::now(),
            },
        );

        Ok(session)
    }

    /// Exchange the redirect's code for tokens. The state must match an open
    /// session from `begin_oauth_pkce`.
    pub async fn complete_oauth_pkce(
        &self,
        state: &str,
        code: &str,
    ) -> Result<OAuthTokens, EngineError> {
        let pending = self
            .oauth_sessions
            .write()
            .await
            .remove(state)
            .ok_or_else(|| {
                EngineError::AuthRequired("unknown or expired oauth session".to_string())
            })?;

        let profile = oauth_profile_for(pending.provider).ok_or_else(|| {
            EngineError::AuthRequired("oauth profile no longer available".to_string())
        })?;
        let workflow = OAuthWorkflow::new(profile)?;
        let result = workflow.exchange_code(code, &pending.pkce_verifier).await?;

        Ok(OAuthTokens {
            access_token: result.access_token,
            refresh_token: result.refresh_token,
            expires_in_secs: result.expires_in_secs,
        })
    }

    // ---- mail operations ----

    /// Cache-first listing; hits the server only when the cache is empty or a
    /// refresh is forced.
    pub async fn fetch_emails(
        &self,
        limit: Option<u32>,
        force_refresh: bool,
    ) -> Result<Vec<EmailHeader>, EngineError> {
        let limit = limit.unwrap_or(50);

        if !force_refresh {
            let cached = self.storage.cached_headers(limit as i64).await?;
            if !cached.is_empty() {
                return Ok(cached);
            }
        }

        let account = self.active_account().await?;
        let backend = self.backend_for(&account).await?;
        let headers = with_retry("fetch_headers", || {
            backend.fetch_headers("INBOX", limit, 0, None)
        })
        .await?;

        Ok(headers)
    }

    pub async fn get_email(&self, id: &str) -> Result<EmailMessage, EngineError> {
        if let Some(message) = self.storage.get_message(id).await? {
            return Ok(message);
        }

        let (account_id, folder, uid) = split_composite_id(id)?;
        let account = self
            .storage
            .get_account(&account_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        let backend = self.backend_for(&account).await?;

        let message = with_retry("fetch_full", || backend.fetch_full(&folder, &uid)).await?;
        self.storage.store_message(&message).await?;
        Ok(message)
    }

    pub async fn send_email(&self, outgoing: OutgoingEmail) -> Result<(), EngineError> {
        let account = self.active_account().await?;
        let backend = self.backend_for(&account).await?;
        backend.send(&outgoing).await?;
        Ok(())
    }

    pub async fn mark_read(&self, id: &str, read: bool) -> Result<(), EngineError> {
        let (account_id, folder, uid) = split_composite_id(id)?;
        let account = self
            .storage
            .get_account(&account_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        let backend = self.backend_for(&account).await?;
        backend
            .set_flags(&folder, &uid, &[MailFlag::Seen], read)
            .await?;

        self.patch_local(id, |message| message.is_read = read).await
    }

    pub async fn star(&self, id: &str, starred: bool) -> Result<(), EngineError> {
        let (account_id, folder, uid) = split_composite_id(id)?;
        let account = self
            .storage
            .get_account(&account_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        let backend = self.backend_for(&account).await?;
        backend
            .set_flags(&folder, &uid, &[MailFlag::Flagged], starred)
            .await?;

        self.patch_local(id, |message| message.is_starred = starred)
            .await
    }

    pub async fn archive(&self, id: &str) -> Result<(), EngineError> {
        let (account_id, folder, uid) = split_composite_id(id)?;
        let account = self
            .storage
            .get_account(&account_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        let backend = self.backend_for(&account).await?;

        let target = if account.provider.uses_native_api() {
            "ARCHIVE"
        } else {
            "Archive"
        };
        backend.move_message(&folder, &uid, target).await?;
        self.drop_local(id).await
    }

    pub async fn trash(&self, id: &str) -> Result<(), EngineError> {
        let (account_id, folder, uid) = split_composite_id(id)?;
        let account = self
            .storage
            .get_account(&account_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        let backend = self.backend_for(&account).await?;

        let target = if account.provider.uses_native_api() {
            "TRASH"
        } else {
            "Trash"
        };
        backend.move_message(&folder, &uid, target).await?;
        self.drop_local(id).await
    }

    /// The insight cascades with the message row; the embedding lives in the
    /// vector file and is dropped explicitly.
    async fn drop_local(&self, id: &str) -> Result<(), EngineError> {
        self.storage.delete_message(id).await?;
        self.vectors.delete(id).await?;
        Ok(())
    }

    async fn patch_local(
        &self,
        id: &str,
        patch: impl FnOnce(&mut EmailMessage),
    ) -> Result<(), EngineError> {
        if let Some(mut message) = self.storage.get_message(id).await? {
            patch(&mut message);
            message.updated_at = Utc::now().timestamp();
            self.storage.store_message(&message).await?;
        }
        Ok(())
    }

    /// Full reply chain for a thread, oldest first.
    pub async fn get_thread_messages(
        &self,
        thread_id: &str,
    ) -> Result<Vec<EmailMessage>, EngineError> {
        Ok(self.storage.messages_in_thread(thread_id).await?)
    }

    // ---- intelligence & retrieval ----

    /// Schema is applied at engine start; this probes that the store answers.
    pub async fn init_database(&self) -> Result<(), EngineError> {
        self.storage.indexing_status().await?;
        Ok(())
    }

    pub async fn get_smart_inbox(
        &self,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<EmailWithInsight>, EngineError> {
        self.smart_inbox(limit.unwrap_or(50), offset.unwrap_or(0))
            .await
    }

    pub async fn get_emails_by_category(
        &self,
        category: &str,
        limit: Option<i64>,
    ) -> Result<Vec<EmailWithInsight>, EngineError> {
        self.by_category(category, limit.unwrap_or(50)).await
    }

    pub async fn search_smart_emails(
        &self,
        query: &str,
        limit: Option<i64>,
    ) -> Result<Vec<EmailWithInsight>, EngineError> {
        self.keyword_search(query, limit.unwrap_or(50)).await
    }

    pub async fn get_indexing_status(&self) -> Result<IndexingStatus, EngineError> {
        Ok(self.storage.indexing_status().await?)
    }

    /// Recovery hatch for a stuck `is_running` flag.
    pub async fn reset_indexing_status(&self) -> Result<(), EngineError> {
        self.cancel_indexing();
        Ok(self.storage.reset_indexing_status().await?)
    }

    pub async fn start_email_indexing(&self, max_emails: Option<usize>) -> Result<(), EngineError> {
        self.start_indexing(max_emails.unwrap_or(100)).await
    }

    pub async fn chat_query(&self, query: &str) -> Result<String, EngineError> {
        self.chat(query, 5).await
    }

    /// On-demand analysis of a stored message: summary, insight lines and
    /// rule-based priority.
    pub async fn summarize_email(&self, message_id: &str) -> Result<EmailSummary, EngineError> {
        let message = self
            .storage
            .get_message(message_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(message_id.to_string()))?;

        let insight = self.build_insight(&message).await;
        Ok(EmailSummary {
            summary: insight.summary.unwrap_or_default(),
            insights: insight.insights,
            priority: insight.priority.as_str().to_string(),
        })
    }

    pub async fn chat_with_context(
        &self,
        query: &str,
        k: Option<usize>,
    ) -> Result<String, EngineError> {
        self.chat(query, k.unwrap_or(5)).await
    }

    // ---- embeddings / RAG ----

    /// Loads the sentence encoder (downloading its model on first use).
    /// Returns whether semantic features are available.
    pub async fn init_rag(&self) -> Result<bool, EngineError> {
        if self.embedder.read().await.is_some() {
            return Ok(true);
        }

        let cache_dir = self.paths.embedder_cache_dir();
        let loaded =
            tokio::task::spawn_blocking(move || FastEmbedder::try_new(&cache_dir))
                .await
                .map_err(|err| EngineError::Internal(err.to_string()))?;

        match loaded {
            Ok(embedder) => {
                self.install_embedder(Arc::new(embedder)).await;
                Ok(true)
            }
            Err(err) => {
                tracing::warn!(error = %err, "embedder initialization failed, semantic search disabled");
                Ok(false)
            }
        }
    }

    pub async fn is_rag_ready(&self) -> bool {
        self.embedder.read().await.is_some()
    }

    pub async fn get_embedding_status(&self) -> Result<EmbeddingStatus, EngineError> {
        Ok(self.vectors.embedding_status().await?)
    }

    pub async fn embed_all_emails(&self) -> Result<(), EngineError> {
        self.embed_all().await
    }

    pub async fn search_emails_semantic(
        &self,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<crate::SearchResult>, EngineError> {
        self.semantic_search(query, limit.unwrap_or(10)).await
    }

    pub async fn find_similar_emails(
        &self,
        message_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<crate::SearchResult>, EngineError> {
        self.neighbors(message_id, limit.unwrap_or(10)).await
    }

    pub async fn clear_embeddings(&self) -> Result<(), EngineError> {
        self.cancel_embedding();
        Ok(self.vectors.clear().await?)
    }

    // ---- cache & storage ----

    pub async fn get_storage_info(&self) -> Result<StorageInfo, EngineError> {
        let metadata_db_bytes = std::fs::metadata(self.paths.metadata_db())
            .map(|meta| meta.len())
            .unwrap_or(0);
        let vector_db_bytes = std::fs::metadata(self.paths.vector_db())
            .map(|meta| meta.len())
            .unwrap_or(0);

        Ok(StorageInfo {
            message_count: self.storage.message_count().await?,
            indexed_count: self.storage.indexed_count().await?,
            embedded_count: self.vectors.count().await?,
            metadata_db_bytes,
            vector_db_bytes,
        })
    }

    /// Drops every cached message, insight and embedding; accounts and
    /// credentials stay.
    pub async fn clear_email_cache(&self) -> Result<(), EngineError> {
        self.cancel_indexing();
        self.cancel_embedding();
        self.storage.clear_messages().await?;
        self.vectors.clear().await?;
        Ok(())
    }

    // ---- language models ----

    pub async fn check_model_status(&self) -> ModelStatus {
        self.llm.status().await
    }

    pub async fn is_model_loading(&self) -> bool {
        self.llm.is_loading()
    }

    /// Streams the model to disk, with progress on `model:*` topics.
    pub async fn download_model(&self, model_id: &str) -> Result<(), EngineError> {
        let events = self.events.clone();
        let progress_events = events.clone();

        let result = self
            .llm
            .manager()
            .download(model_id, move |percent| {
                progress_events.emit(EngineEvent::ModelProgress { percent });
            })
            .await;

        match result {
            Ok(_path) => {
                events.emit(EngineEvent::ModelComplete {
                    model_id: model_id.to_string(),
                });
                Ok(())
            }
            Err(err) => {
                events.emit(EngineEvent::ModelError {
                    message: err.to_string(),
                });
                Err(err.into())
            }
        }
    }

    pub async fn activate_model(&self, model_id: &str) -> Result<(), EngineError> {
        Ok(self.llm.activate(model_id).await?)
    }

    pub async fn delete_model(&self, model_id: &str) -> Result<(), EngineError> {
        Ok(self.llm.delete_model(model_id).await?)
    }

    pub async fn get_available_ai_models(&self) -> Vec<ModelOption> {
        model_catalog()
    }

    pub async fn get_downloaded_models(&self) -> Vec<ModelOption> {
        self.llm.manager().list_downloaded()
    }
}

/// Split a composite `{account_id}:{folder}:{uid}` id. Folders may themselves
/// contain colons, so the account is everything before the first separator and
/// the uid everything after the last.
fn split_composite_id(id: &str) -> Result<(String, String, String), EngineError> {
    let first = id.find(':');
    let last = id.rfind(':');
    match (first, last) {
        (Some(first), Some(last)) if first < last => Ok((
            id[..first].to_string(),
            id[first + 1..last].to_string(),
            id[last + 1..].to_string(),
        )),
        _ => Err(EngineError::NotFound(format!("malformed message id: {id}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::{engine_with_backend, synth_message};

    #[test]
    fn composite_id_splitting() {
        assert_eq!(
            split_composite_id("acct:INBOX:42").unwrap(),
            ("acct".to_string(), "INBOX".to_string(), "42".to_string())
        );
        // Folder paths can carry separators of their own.
        assert_eq!(
            split_composite_id("acct:Parent:Child:42").unwrap(),
            (
                "acct".to_string(),
                "Parent:Child".to_string(),
                "42".to_string()
            )
        );
        assert!(split_composite_id("no-separators").is_err());
        assert!(split_composite_id("only:one").is_err());
    }

    #[tokio::test]
    async fn fetch_emails_prefers_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_backend(&dir, vec![], None).await;

        let (_, cached) = synth_message(1, "Cached", "already here", false);
        engine.storage.store_message(&cached).await.unwrap();

        let listed = engine.fetch_emails(Some(10), false).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].subject, "Cached");
    }

    #[tokio::test]
    async fn fetch_emails_refresh_hits_the_backend() {
        let dir = tempfile::tempdir().unwrap();
        let items = vec![synth_message(7, "Live", "from the server", false)];
        let engine = engine_with_backend(&dir, items, None).await;

        let listed = engine.fetch_emails(Some(10), true).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].subject, "Live");
    }

    #[tokio::test]
    async fn mark_read_updates_the_local_row() {
        let dir = tempfile::tempdir().unwrap();
        let items = vec![synth_message(3, "Unread", "body", false)];
        let engine = engine_with_backend(&dir, items.clone(), None).await;

        let (_, message) = &items[0];
        engine.storage.store_message(message).await.unwrap();

        engine.mark_read(&message.id, true).await.unwrap();
        let stored = engine.storage.get_message(&message.id).await.unwrap().unwrap();
        assert!(stored.is_read);

        engine.star(&message.id, true).await.unwrap();
        let stored = engine.storage.get_message(&message.id).await.unwrap().unwrap();
        assert!(stored.is_starred);
    }

    #[tokio::test]
    async fn get_email_falls_back_to_the_transport() {
        let dir = tempfile::tempdir().unwrap();
        let items = vec![synth_message(9, "Remote only", "not yet cached", false)];
        let engine = engine_with_backend(&dir, items.clone(), None).await;

        let id = items[0].1.id.clone();
        let fetched = engine.get_email(&id).await.unwrap();
        assert_eq!(fetched.subject, "Remote only");

        // Fetched messages land in the cache.
        assert!(engine.storage.get_message(&id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn custom_provider_requires_server_hosts() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_backend(&dir, vec![], None).await;

        let result = engine
            .add_account(SignInRequest {
                address: "me@corp.example".to_string(),
                display_name: "Me".to_string(),
                app_password: Some("secret".to_string()),
                ..Default::default()
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn sign_in_with_app_password_activates_the_account() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_backend(&dir, vec![], None).await;

        let account = engine
            .sign_in(SignInRequest {
                address: "me@yahoo.com".to_string(),
                display_name: "Me".to_string(),
                app_password: Some("app-secret".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(account.provider, Provider::Yahoo);
        assert_eq!(account.auth_kind, AuthKind::AppPassword);
        assert_eq!(account.imap_host, "imap.mail.yahoo.com");

        let active = engine.active_account().await.unwrap();
        assert_eq!(active.id, account.id);

        engine.sign_out().await.unwrap();
        assert!(engine.active_account().await.is_err());
    }

    #[tokio::test]
    async fn oauth_session_must_exist_to_complete() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_backend(&dir, vec![], None).await;

        let result = engine.complete_oauth_pkce("no-such-state", "code").await;
        assert!(matches!(result, Err(EngineError::AuthRequired(_))));
    }

    #[tokio::test]
    async fn summarize_email_reports_priority_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_backend(&dir, vec![], None).await;

        let (_, message) = synth_message(6, "URGENT: server down", "please review the incident", false);
        engine.storage.store_message(&message).await.unwrap();

        let analysis = engine.summarize_email(&message.id).await.unwrap();
        assert_eq!(analysis.priority, "HIGH");
        assert!(analysis.summary.contains("URGENT: server down"));
        assert!(!analysis.insights.is_empty());

        assert!(matches!(
            engine.summarize_email("acct-test:INBOX:404").await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn storage_info_counts_both_stores() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_backend(&dir, vec![], None).await;

        let (_, message) = synth_message(1, "Counted", "body", false);
        engine.storage.store_message(&message).await.unwrap();
        engine
            .vectors
            .upsert(&message.id, &[1.0, 0.0], "test-embed-v1")
            .await
            .unwrap();

        let info = engine.get_storage_info().await.unwrap();
        assert_eq!(info.message_count, 1);
        assert_eq!(info.embedded_count, 1);
        assert!(info.metadata_db_bytes > 0);

        engine.clear_email_cache().await.unwrap();
        let info = engine.get_storage_info().await.unwrap();
        assert_eq!(info.message_count, 0);
        assert_eq!(info.embedded_count, 0);
    }

    #[tokio::test]
    async fn trashing_a_message_removes_insight_and_embedding() {
        let dir = tempfile::tempdir().unwrap();
        let items = vec![synth_message(4, "Doomed", "goodbye", false)];
        let engine = engine_with_backend(&dir, items.clone(), None).await;

        let (_, message) = &items[0];
        engine.storage.store_message(message).await.unwrap();
        let insight = engine.build_insight(message).await;
        engine.storage.store_insight(&insight).await.unwrap();
        engine
            .vectors
            .upsert(&message.id, &[0.1, 0.2], "test-embed-v1")
            .await
            .unwrap();

        engine.trash(&message.id).await.unwrap();

        assert!(engine.storage.get_message(&message.id).await.unwrap().is_none());
        assert_eq!(engine.storage.indexed_count().await.unwrap(), 0);
        assert!(engine.vectors.get(&message.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn model_catalog_round_trips_through_commands() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_backend(&dir, vec![], None).await;

        let available = engine.get_available_ai_models().await;
        assert!(available.iter().any(|m| m.id == "lfm2.5-1.2b-q4"));
        assert!(engine.get_downloaded_models().await.is_empty());
        assert_eq!(engine.check_model_status().await, ModelStatus::NotDownloaded);
    }
}
