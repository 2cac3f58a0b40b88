//! OTT store adapter: atomic create/resolve/consume of OTT
//! mappings, and the audit-before-destruction commit sequences for approval
//! and exception.
//!
//! Expressed as an async trait so the commit sequences can be
//! exercised against [`MockStateStore`] without a live Valkey connection.
//! The production implementation, [`RedisStateStore`], drives a `fred`
//! client over mTLS, reusing the connection-bootstrap shape already present
//! in `toolbox-server::state::AppState::new`.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

use fred::prelude::*;
use fred::types::config::{TlsConfig, TlsConnector, TlsHostMapping};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use polis_common::{
    approved_key, blocked_key, exception_value_key,
    redis_keys::{keys, ttl},
    BlockedRequest, OttMapping, SecurityLogEntry, ValueException,
};

use crate::audit::escape_json_string;
use crate::error::{CoreError, CoreResult};

/// Outcome of a `create(ott, mapping)` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The mapping was stored.
    Created,
    /// The key already existed (SETNX failed); caller should retry with a
    /// freshly minted OTT.
    Collision,
}

/// Outcome of a `consume(ott)` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// The mapping existed and was deleted.
    Consumed,
    /// No mapping existed under that OTT.
    NotFound,
}

/// Atomic state-store operations required by REQMOD/RESPMOD/DLP.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// SET-if-not-exists an OTT mapping with the configured TTL.
    async fn create_ott(&self, ott: &str, mapping: &OttMapping, ttl_secs: u64)
        -> CoreResult<CreateOutcome>;

    /// Fetch and parse an OTT mapping, if present.
    async fn resolve_ott(&self, ott: &str) -> CoreResult<Option<OttMapping>>;

    /// Delete an OTT mapping. Must be the last mutation in a commit
    /// sequence.
    async fn consume_ott(&self, ott: &str) -> CoreResult<ConsumeOutcome>;

    /// Fetch a blocked-request snapshot, if present.
    async fn get_blocked(&self, request_id: &str) -> CoreResult<Option<BlockedRequest>>;

    /// Persist a blocked-request record with the standard TTL.
    async fn put_blocked(&self, request: &BlockedRequest) -> CoreResult<()>;

    /// Append an audit entry. MUST be called before any destructive
    /// mutation in the same commit sequence.
    async fn append_audit(&self, event_type: &str, request_id: Option<&str>, details: &str)
        -> CoreResult<()>;

    /// Ordered composite: audit, then delete `blocked`, create `approved`,
    /// delete `ott`.
    async fn commit_approval(
        &self,
        blocked: &BlockedRequest,
        ott: &str,
        approval_ttl_secs: u64,
    ) -> CoreResult<()>;

    /// Ordered composite: audit, then create the value exception, delete
    /// `blocked`, delete `ott`. Fails with
    /// [`CoreError::MissingCredentialHash`] if `blocked.credential_hash` is
    /// absent.
    async fn commit_exception(
        &self,
        blocked: &BlockedRequest,
        ott: &str,
        ttl_secs: Option<u64>,
    ) -> CoreResult<()>;

    /// Look up a value exception by full credential hash and destination,
    /// falling back to the wildcard entry. Verifies the full hash (not just
    /// the 16-char key prefix) before reporting a match.
    async fn find_exception(
        &self,
        credential_hash: &str,
        host: &str,
    ) -> CoreResult<Option<ValueException>>;
}

// ===================================================================
// In-memory fake, for unit/property tests without a live store.
// ===================================================================

#[derive(Default)]
struct MockInner {
    ott: HashMap<String, (OttMapping, u64)>,
    blocked: HashMap<String, BlockedRequest>,
    approved: HashMap<String, String>,
    exceptions: HashMap<String, ValueException>,
    audit: Vec<SecurityLogEntry>,
}

/// In-memory [`StateStore`] used by tests. TTLs are recorded but not
/// actively expired — tests assert on presence/absence directly.
#[derive(Default)]
pub struct MockStateStore {
    inner: Mutex<MockInner>,
}

impl MockStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: seed a blocked request directly.
    pub fn seed_blocked(&self, request: BlockedRequest) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.blocked.insert(request.request_id.clone(), request);
    }

    /// Test helper: number of audit entries recorded so far.
    pub fn audit_len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .audit
            .len()
    }

    /// Test helper: whether an approval record exists.
    pub fn has_approved(&self, request_id: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .approved
            .contains_key(request_id)
    }

    /// Test helper: whether a blocked record still exists.
    pub fn has_blocked(&self, request_id: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .blocked
            .contains_key(request_id)
    }
}

#[async_trait]
impl StateStore for MockStateStore {
    async fn create_ott(
        &self,
        ott: &str,
        mapping: &OttMapping,
        ttl_secs: u64,
    ) -> CoreResult<CreateOutcome> {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if inner.ott.contains_key(ott) {
            return Ok(CreateOutcome::Collision);
        }
        inner.ott.insert(ott.to_string(), (mapping.clone(), ttl_secs));
        Ok(CreateOutcome::Created)
    }

    async fn resolve_ott(&self, ott: &str) -> CoreResult<Option<OttMapping>> {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(inner.ott.get(ott).map(|(m, _)| m.clone()))
    }

    async fn consume_ott(&self, ott: &str) -> CoreResult<ConsumeOutcome> {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if inner.ott.remove(ott).is_some() {
            Ok(ConsumeOutcome::Consumed)
        } else {
            Ok(ConsumeOutcome::NotFound)
        }
    }

    async fn get_blocked(&self, request_id: &str) -> CoreResult<Option<BlockedRequest>> {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(inner.blocked.get(request_id).cloned())
    }

    async fn put_blocked(&self, request: &BlockedRequest) -> CoreResult<()> {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.blocked.insert(request.request_id.clone(), request.clone());
        Ok(())
    }

    async fn append_audit(
        &self,
        event_type: &str,
        request_id: Option<&str>,
        details: &str,
    ) -> CoreResult<()> {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.audit.push(SecurityLogEntry {
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            request_id: request_id.map(str::to_string),
            details: details.to_string(),
        });
        Ok(())
    }

    async fn commit_approval(
        &self,
        blocked: &BlockedRequest,
        ott: &str,
        approval_ttl_secs: u64,
    ) -> CoreResult<()> {
        let _ = approval_ttl_secs;
        self.append_audit(
            "approved_via_proxy",
            Some(&blocked.request_id),
            &format!(
                "{{\"blocked_request\":{}}}",
                escape_json_string(&serde_json::to_string(blocked).unwrap_or_default())
            ),
        )
        .await?;

        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.blocked.remove(&blocked.request_id);
        inner
            .approved
            .insert(blocked.request_id.clone(), "approved".to_string());
        inner.ott.remove(ott);
        Ok(())
    }

    async fn commit_exception(
        &self,
        blocked: &BlockedRequest,
        ott: &str,
        ttl_secs: Option<u64>,
    ) -> CoreResult<()> {
        let credential_hash = blocked.credential_hash.clone().ok_or_else(|| {
            CoreError::MissingCredentialHash {
                request_id: blocked.request_id.clone(),
            }
        })?;

        self.append_audit(
            "exception_created_via_proxy",
            Some(&blocked.request_id),
            &format!(
                "{{\"blocked_request\":{}}}",
                escape_json_string(&serde_json::to_string(blocked).unwrap_or_default())
            ),
        )
        .await?;

        let exception = ValueException {
            credential_hash: credential_hash.clone(),
            credential_prefix: blocked.credential_prefix.clone().unwrap_or_default(),
            destination: blocked.destination.clone(),
            pattern_name: blocked.pattern_name.clone().unwrap_or_default(),
            created_at: Utc::now(),
            source: polis_common::ExceptionSource::Proxy,
            ttl_secs,
        };

        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let key = format!("{}:{}", &credential_hash[..16], blocked.destination);
        inner.exceptions.insert(key, exception);
        inner.blocked.remove(&blocked.request_id);
        inner.ott.remove(ott);
        Ok(())
    }

    async fn find_exception(
        &self,
        credential_hash: &str,
        host: &str,
    ) -> CoreResult<Option<ValueException>> {
        polis_common::validate_credential_hash(credential_hash)
            .map_err(|e| CoreError::InvalidInput(e.to_string()))?;
        let prefix = &credential_hash[..16];
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        for candidate_host in [host, "*"] {
            let key = format!("{prefix}:{candidate_host}");
            if let Some(exc) = inner.exceptions.get(&key) {
                if exc.credential_hash == credential_hash {
                    return Ok(Some(exc.clone()));
                }
            }
        }
        Ok(None)
    }
}

// ===================================================================
// Production implementation backed by `fred` over mTLS.
// ===================================================================

const DEFAULT_VALKEY_CA_PATH: &str = "/etc/valkey/tls/ca.crt";
const DEFAULT_VALKEY_CLIENT_CERT_PATH: &str = "/etc/valkey/tls/client.crt";
const DEFAULT_VALKEY_CLIENT_KEY_PATH: &str = "/etc/valkey/tls/client.key";

/// `fred`-backed [`StateStore`] over an mTLS connection, matching the
/// bootstrap shape in `toolbox-server::state::AppState::new`.
#[derive(Clone)]
pub struct RedisStateStore {
    client: Client,
}

impl RedisStateStore {
    /// Connect to Valkey with mTLS (rustls) and ACL username/password auth.
    ///
    /// # Errors
    ///
    /// Returns an error if certificate material cannot be read/parsed, the
    /// connection cannot be established, or the startup PING fails.
    pub async fn connect(valkey_url: &str, user: &str, password: &str) -> anyhow::Result<Self> {
        use anyhow::Context;

        let ca_path = std::env::var("POLIS_CORE_VALKEY_CA")
            .unwrap_or_else(|_| DEFAULT_VALKEY_CA_PATH.to_string());
        let cert_path = std::env::var("POLIS_CORE_VALKEY_CLIENT_CERT")
            .unwrap_or_else(|_| DEFAULT_VALKEY_CLIENT_CERT_PATH.to_string());
        let key_path = std::env::var("POLIS_CORE_VALKEY_CLIENT_KEY")
            .unwrap_or_else(|_| DEFAULT_VALKEY_CLIENT_KEY_PATH.to_string());

        let ca_file =
            File::open(&ca_path).with_context(|| format!("failed to open CA cert: {ca_path}"))?;
        let mut ca_reader = BufReader::new(ca_file);
        let ca_certs = rustls_pemfile::certs(&mut ca_reader)
            .collect::<Result<Vec<_>, _>>()
            .context("failed to parse CA cert")?;

        let mut root_store = rustls::RootCertStore::empty();
        for cert in ca_certs {
            root_store
                .add(cert)
                .context("failed to add CA cert to root store")?;
        }

        let cert_file = File::open(&cert_path)
            .with_context(|| format!("failed to open client cert: {cert_path}"))?;
        let mut cert_reader = BufReader::new(cert_file);
        let client_certs = rustls_pemfile::certs(&mut cert_reader)
            .collect::<Result<Vec<_>, _>>()
            .context("failed to parse client cert")?;

        let key_file = File::open(&key_path)
            .with_context(|| format!("failed to open client key: {key_path}"))?;
        let mut key_reader = BufReader::new(key_file);
        let client_key = rustls_pemfile::private_key(&mut key_reader)
            .context("failed to parse client key")?
            .context("no private key found in file")?;

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_client_auth_cert(client_certs, client_key)
            .context("failed to build TLS config with client auth")?;

        let mut config = Config::from_url(valkey_url)?;
        config.tls = Some(TlsConfig {
            connector: TlsConnector::Rustls(Arc::new(tls_config).into()),
            hostnames: TlsHostMapping::None,
        });
        config.username = Some(user.to_string());
        config.password = Some(password.to_string());

        let client = Builder::from_config(config)
            .with_connection_config(|conn_config| {
                conn_config.connection_timeout = std::time::Duration::from_secs(5);
                conn_config.internal_command_timeout = std::time::Duration::from_secs(10);
            })
            .set_policy(ReconnectPolicy::new_exponential(0, 100, 5000, 5))
            .build()?;

        client.init().await?;
        client
            .ping::<String>(None)
            .await
            .context("Valkey startup PING failed")?;

        tracing::info!(
            ca = %ca_path,
            cert = %cert_path,
            key = %key_path,
            "state store connection ready with mTLS (rustls)"
        );

        Ok(Self { client })
    }

    fn store_err<E: std::fmt::Display>(e: E) -> CoreError {
        CoreError::StoreUnavailable(e.to_string())
    }

    /// Health probe used by [`crate::conn::ManagedConnection`] before
    /// dispatching a call on a possibly-stale handle.
    pub async fn is_healthy(&self) -> bool {
        self.client.ping::<String>(None).await.is_ok()
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn create_ott(
        &self,
        ott: &str,
        mapping: &OttMapping,
        ttl_secs: u64,
    ) -> CoreResult<CreateOutcome> {
        let key = polis_common::ott_key(ott);
        let json = serde_json::to_string(mapping)
            .map_err(|e| CoreError::InvalidInput(e.to_string()))?;

        let set: Option<String> = self
            .client
            .set(
                &key,
                json,
                Some(Expiration::EX(ttl_secs as i64)),
                Some(SetOptions::NX),
                false,
            )
            .await
            .map_err(Self::store_err)?;

        Ok(if set.is_some() {
            CreateOutcome::Created
        } else {
            CreateOutcome::Collision
        })
    }

    async fn resolve_ott(&self, ott: &str) -> CoreResult<Option<OttMapping>> {
        let key = polis_common::ott_key(ott);
        let raw: Option<String> = self.client.get(&key).await.map_err(Self::store_err)?;
        match raw {
            None => Ok(None),
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| CoreError::InvalidInput(format!("malformed OTT mapping: {e}"))),
        }
    }

    async fn consume_ott(&self, ott: &str) -> CoreResult<ConsumeOutcome> {
        let key = polis_common::ott_key(ott);
        let deleted: i64 = self.client.del(&key).await.map_err(Self::store_err)?;
        Ok(if deleted > 0 {
            ConsumeOutcome::Consumed
        } else {
            ConsumeOutcome::NotFound
        })
    }

    async fn get_blocked(&self, request_id: &str) -> CoreResult<Option<BlockedRequest>> {
        let key = blocked_key(request_id);
        let raw: Option<String> = self.client.get(&key).await.map_err(Self::store_err)?;
        match raw {
            None => Ok(None),
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| CoreError::InvalidInput(format!("malformed blocked record: {e}"))),
        }
    }

    async fn put_blocked(&self, request: &BlockedRequest) -> CoreResult<()> {
        let key = blocked_key(&request.request_id);
        let json = serde_json::to_string(request)
            .map_err(|e| CoreError::InvalidInput(e.to_string()))?;
        self.client
            .set::<(), _, _>(
                &key,
                json,
                Some(Expiration::EX(ttl::BLOCKED_REQUEST_SECS as i64)),
                None,
                false,
            )
            .await
            .map_err(Self::store_err)?;
        Ok(())
    }

    async fn append_audit(
        &self,
        event_type: &str,
        request_id: Option<&str>,
        details: &str,
    ) -> CoreResult<()> {
        let entry = SecurityLogEntry {
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            request_id: request_id.map(str::to_string),
            details: details.to_string(),
        };
        let json = serde_json::to_string(&entry)
            .map_err(|e| CoreError::InvalidInput(e.to_string()))?;
        let score = entry.timestamp.timestamp() as f64;

        self.client
            .zadd::<(), _, _>(keys::EVENT_LOG, None, None, false, false, (score, json.as_str()))
            .await
            .map_err(Self::store_err)?;

        tracing::info!(
            event_type = %entry.event_type,
            request_id = ?entry.request_id,
            "audit entry recorded",
        );

        let count: i64 = self.client.zcard(keys::EVENT_LOG).await.map_err(Self::store_err)?;
        if count > ttl::MAX_EXCEPTIONS as i64 {
            self.client
                .zremrangebyrank::<(), _>(keys::EVENT_LOG, 0, count - (ttl::MAX_EXCEPTIONS as i64) - 1)
                .await
                .map_err(Self::store_err)?;
        }
        Ok(())
    }

    async fn commit_approval(
        &self,
        blocked: &BlockedRequest,
        ott: &str,
        approval_ttl_secs: u64,
    ) -> CoreResult<()> {
        // 1. audit-before-destruction.
        self.append_audit(
            "approved_via_proxy",
            Some(&blocked.request_id),
            &serde_json::to_string(blocked).unwrap_or_default(),
        )
        .await?;

        // 2-4. delete blocked, create approved, delete ott — atomically, so a
        // crash or concurrent interleave never leaves blocked deleted without
        // approved set (or vice versa).
        let blocked_k = blocked_key(&blocked.request_id);
        let approved_k = approved_key(&blocked.request_id);
        let ott_k = polis_common::ott_key(ott);

        let trx = self.client.multi();
        let _: () = trx.del(&blocked_k).await.map_err(Self::store_err)?;
        let _: () = trx
            .set(
                &approved_k,
                "approved",
                Some(Expiration::EX(approval_ttl_secs as i64)),
                None,
                false,
            )
            .await
            .map_err(Self::store_err)?;
        let _: () = trx.del(&ott_k).await.map_err(Self::store_err)?;
        let _: ((), (), ()) = trx.exec(true).await.map_err(Self::store_err)?;

        tracing::info!(request_id = %blocked.request_id, "approved via proxy");
        Ok(())
    }

    async fn commit_exception(
        &self,
        blocked: &BlockedRequest,
        ott: &str,
        ttl_secs: Option<u64>,
    ) -> CoreResult<()> {
        let credential_hash = blocked.credential_hash.clone().ok_or_else(|| {
            CoreError::MissingCredentialHash {
                request_id: blocked.request_id.clone(),
            }
        })?;

        // 1. audit-before-destruction.
        self.append_audit(
            "exception_created_via_proxy",
            Some(&blocked.request_id),
            &serde_json::to_string(blocked).unwrap_or_default(),
        )
        .await?;

        let exception = ValueException {
            credential_hash: credential_hash.clone(),
            credential_prefix: blocked.credential_prefix.clone().unwrap_or_default(),
            destination: blocked.destination.clone(),
            pattern_name: blocked.pattern_name.clone().unwrap_or_default(),
            created_at: Utc::now(),
            source: polis_common::ExceptionSource::Proxy,
            ttl_secs,
        };
        let exc_json = serde_json::to_string(&exception)
            .map_err(|e| CoreError::InvalidInput(e.to_string()))?;

        let exc_key = exception_value_key(&credential_hash[..16], &blocked.destination);
        let blocked_k = blocked_key(&blocked.request_id);
        let ott_k = polis_common::ott_key(ott);

        // 2-4. create exception, delete blocked, delete ott — atomically, so
        // a crash or concurrent interleave never leaves blocked deleted
        // without the exception recorded (proxy path always carries a TTL;
        // never permanent, never wildcard — enforced by the caller).
        let trx = self.client.multi();
        let _: () = trx
            .set(&exc_key, exc_json, ttl_secs.map(|s| Expiration::EX(s as i64)), None, false)
            .await
            .map_err(Self::store_err)?;
        let _: () = trx.del(&blocked_k).await.map_err(Self::store_err)?;
        let _: () = trx.del(&ott_k).await.map_err(Self::store_err)?;
        let _: ((), (), ()) = trx.exec(true).await.map_err(Self::store_err)?;

        tracing::info!(request_id = %blocked.request_id, "exception committed via proxy");
        Ok(())
    }

    async fn find_exception(
        &self,
        credential_hash: &str,
        host: &str,
    ) -> CoreResult<Option<ValueException>> {
        polis_common::validate_credential_hash(credential_hash)
            .map_err(|e| CoreError::InvalidInput(e.to_string()))?;
        let prefix = &credential_hash[..16];

        for candidate_host in [host, "*"] {
            let key = exception_value_key(prefix, candidate_host);
            let raw: Option<String> = self.client.get(&key).await.map_err(Self::store_err)?;
            if let Some(json) = raw {
                let exc: ValueException = serde_json::from_str(&json)
                    .map_err(|e| CoreError::InvalidInput(format!("malformed exception: {e}")))?;
                // Full-hash verification — the key is only a 16-char prefix.
                if exc.credential_hash == credential_hash {
                    return Ok(Some(exc));
                }
            }
        }
        Ok(None)
    }
}
