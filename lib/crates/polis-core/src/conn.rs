//! Concurrency and reconnect harness: serializes access to a
//! single store handle behind one mutex per handle, and lazily
//! re-authenticates from the credential file after a connection loss,
//! instead of trusting a cached password in memory.

use std::path::PathBuf;
use tokio::sync::Mutex;
use zeroize::Zeroize;

use async_trait::async_trait;

use polis_common::{BlockedRequest, OttMapping, ValueException};

use crate::error::{CoreError, CoreResult};
use crate::store::{ConsumeOutcome, CreateOutcome, RedisStateStore, StateStore};

/// Wraps a [`RedisStateStore`] behind a single mutex so every caller shares
/// one physical connection, and reconnects lazily (re-reading the password
/// file, never an in-memory copy) when a health probe fails before the call.
///
/// Grounded in `toolbox-server::state::AppState`'s single-client-behind-a-
/// handle shape, generalized here with an explicit reconnect path.
pub struct ManagedConnection {
    inner: Mutex<RedisStateStore>,
    valkey_url: String,
    user: String,
    password_file: PathBuf,
}

impl ManagedConnection {
    /// Establish the initial connection, reading the password from
    /// `password_file`.
    ///
    /// # Errors
    ///
    /// Returns an error if the password file cannot be read or the initial
    /// connection fails.
    pub async fn connect(
        valkey_url: &str,
        user: &str,
        password_file: impl Into<PathBuf>,
    ) -> anyhow::Result<Self> {
        let password_file = password_file.into();
        let mut password = read_password(&password_file)?;
        let result = RedisStateStore::connect(valkey_url, user, &password).await;
        password.zeroize();
        let store = result?;

        Ok(Self {
            inner: Mutex::new(store),
            valkey_url: valkey_url.to_string(),
            user: user.to_string(),
            password_file,
        })
    }

    /// Ensure the held handle is healthy, reconnecting (re-reading the
    /// password file) if a PING fails. Must be called with the mutex held.
    async fn ensure_healthy(&self, guard: &mut RedisStateStore) -> CoreResult<()> {
        if guard.is_healthy().await {
            return Ok(());
        }

        let mut password = read_password(&self.password_file)
            .map_err(|e| CoreError::StoreUnavailable(e.to_string()))?;
        let result = RedisStateStore::connect(&self.valkey_url, &self.user, &password).await;
        password.zeroize();

        match result {
            Ok(fresh) => {
                *guard = fresh;
                tracing::info!("state store reconnected");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "state store reconnect failed");
                Err(CoreError::StoreUnavailable(e.to_string()))
            }
        }
    }
}

fn read_password(path: &std::path::Path) -> anyhow::Result<String> {
    use anyhow::Context;
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read password file: {}", path.display()))?;
    Ok(raw.trim_end_matches('\n').to_string())
}

#[async_trait]
impl StateStore for ManagedConnection {
    async fn create_ott(
        &self,
        ott: &str,
        mapping: &OttMapping,
        ttl_secs: u64,
    ) -> CoreResult<CreateOutcome> {
        let mut guard = self.inner.lock().await;
        self.ensure_healthy(&mut guard).await?;
        guard.create_ott(ott, mapping, ttl_secs).await
    }

    async fn resolve_ott(&self, ott: &str) -> CoreResult<Option<OttMapping>> {
        let mut guard = self.inner.lock().await;
        self.ensure_healthy(&mut guard).await?;
        guard.resolve_ott(ott).await
    }

    async fn consume_ott(&self, ott: &str) -> CoreResult<ConsumeOutcome> {
        let mut guard = self.inner.lock().await;
        self.ensure_healthy(&mut guard).await?;
        guard.consume_ott(ott).await
    }

    async fn get_blocked(&self, request_id: &str) -> CoreResult<Option<BlockedRequest>> {
        let mut guard = self.inner.lock().await;
        self.ensure_healthy(&mut guard).await?;
        guard.get_blocked(request_id).await
    }

    async fn put_blocked(&self, request: &BlockedRequest) -> CoreResult<()> {
        let mut guard = self.inner.lock().await;
        self.ensure_healthy(&mut guard).await?;
        guard.put_blocked(request).await
    }

    async fn append_audit(
        &self,
        event_type: &str,
        request_id: Option<&str>,
        details: &str,
    ) -> CoreResult<()> {
        let mut guard = self.inner.lock().await;
        self.ensure_healthy(&mut guard).await?;
        guard.append_audit(event_type, request_id, details).await
    }

    async fn commit_approval(
        &self,
        blocked: &BlockedRequest,
        ott: &str,
        approval_ttl_secs: u64,
    ) -> CoreResult<()> {
        let mut guard = self.inner.lock().await;
        self.ensure_healthy(&mut guard).await?;
        guard.commit_approval(blocked, ott, approval_ttl_secs).await
    }

    async fn commit_exception(
        &self,
        blocked: &BlockedRequest,
        ott: &str,
        ttl_secs: Option<u64>,
    ) -> CoreResult<()> {
        let mut guard = self.inner.lock().await;
        self.ensure_healthy(&mut guard).await?;
        guard.commit_exception(blocked, ott, ttl_secs).await
    }

    async fn find_exception(
        &self,
        credential_hash: &str,
        host: &str,
    ) -> CoreResult<Option<ValueException>> {
        let mut guard = self.inner.lock().await;
        self.ensure_healthy(&mut guard).await?;
        guard.find_exception(credential_hash, host).await
    }
}
