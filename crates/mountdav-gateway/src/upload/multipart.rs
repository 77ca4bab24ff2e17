//! Multipart upload sessions.
//!
//! A session owns one backend multipart upload from creation until it is
//! completed or aborted. Dropping a session that is still open (the handler
//! future was cancelled by a client disconnect) schedules a best-effort abort.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mountdav_core::{BackendError, CompletedPart, ObjectStore};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Lifecycle of an upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initiated,
    InProgress,
    Completed,
    Aborted,
}

/// What `/health` reports about a live session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub mount_id: String,
    pub key: String,
    pub part_size: u64,
    pub started_at: DateTime<Utc>,
}

/// Live multipart sessions across all requests.
#[derive(Default)]
pub struct UploadRegistry {
    sessions: DashMap<String, SessionInfo>,
}

impl UploadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions neither completed nor aborted.
    pub fn active(&self) -> usize {
        self.sessions.len()
    }

    /// Live sessions, oldest first.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        sessions.sort_by_key(|info| info.started_at);
        sessions
    }

    fn register(&self, id: String, info: SessionInfo) {
        self.sessions.insert(id, info);
    }

    fn remove(&self, id: &str) {
        self.sessions.remove(id);
    }
}

/// Retry policy for part uploads.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Sleep with exponential backoff + jitter.
    async fn backoff_sleep(&self, attempt: u32) {
        let base = self.base_delay * 2u32.saturating_pow(attempt);
        let jitter = Duration::from_millis(rand_jitter());
        tokio::time::sleep(base + jitter).await;
    }
}

/// Simple jitter (0-49ms) without pulling in rand crate.
fn rand_jitter() -> u64 {
    use std::time::SystemTime;
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64 % 50)
        .unwrap_or(0)
}

/// Target of a multipart upload.
pub struct SessionTarget {
    pub store: Arc<dyn ObjectStore>,
    pub mount_id: String,
    pub key: String,
    pub content_type: Option<String>,
}

/// One in-flight multipart upload.
pub struct UploadSession {
    id: String,
    store: Arc<dyn ObjectStore>,
    key: String,
    upload_id: String,
    parts: Vec<CompletedPart>,
    state: SessionState,
    retry: RetryPolicy,
    registry: Arc<UploadRegistry>,
}

impl UploadSession {
    /// Start a backend multipart upload and register the session.
    pub async fn create(
        target: SessionTarget,
        part_size: u64,
        declared_length: Option<u64>,
        retry: RetryPolicy,
        registry: Arc<UploadRegistry>,
    ) -> Result<Self, BackendError> {
        let upload_id = target
            .store
            .create_multipart(&target.key, target.content_type.as_deref())
            .await?;
        let id = uuid::Uuid::new_v4().to_string();

        registry.register(
            id.clone(),
            SessionInfo {
                id: id.clone(),
                mount_id: target.mount_id,
                key: target.key.clone(),
                part_size,
                started_at: Utc::now(),
            },
        );
        info!(
            session = %id,
            key = %target.key,
            part_size,
            declared_length,
            "Started multipart upload"
        );

        Ok(Self {
            id,
            store: target.store,
            key: target.key,
            upload_id,
            parts: Vec::new(),
            state: SessionState::Initiated,
            retry,
            registry,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Upload the next part, retrying transient failures with backoff.
    pub async fn upload_part(&mut self, body: Bytes) -> Result<(), BackendError> {
        let part_number = self.parts.len() as i32 + 1;
        self.state = SessionState::InProgress;

        for attempt in 0..=self.retry.max_retries {
            match self
                .store
                .upload_part(&self.key, &self.upload_id, part_number, body.clone())
                .await
            {
                Ok(etag) => {
                    debug!(
                        session = %self.id,
                        part_number,
                        size = body.len(),
                        "Uploaded part"
                    );
                    self.parts.push(CompletedPart { part_number, etag });
                    return Ok(());
                }
                Err(e) if e.is_transient() && attempt < self.retry.max_retries => {
                    warn!(
                        session = %self.id,
                        part_number,
                        attempt,
                        error = %e,
                        "Part upload failed, retrying"
                    );
                    self.retry.backoff_sleep(attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(BackendError::Transient(format!(
            "part {} of {} exhausted its retries",
            part_number, self.key
        )))
    }

    /// Number of parts uploaded so far.
    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    pub async fn complete(mut self) -> Result<(), BackendError> {
        self.store
            .complete_multipart(&self.key, &self.upload_id, &self.parts)
            .await?;
        self.state = SessionState::Completed;
        self.registry.remove(&self.id);
        info!(session = %self.id, parts = self.parts.len(), "Completed multipart upload");
        Ok(())
    }

    /// Best-effort abort. Failures are logged and swallowed.
    pub async fn abort(mut self) {
        self.state = SessionState::Aborted;
        self.registry.remove(&self.id);
        if let Err(e) = self.store.abort_multipart(&self.key, &self.upload_id).await {
            warn!(session = %self.id, error = %e, "Failed to abort multipart upload");
        } else {
            info!(session = %self.id, "Aborted multipart upload");
        }
    }
}

impl Drop for UploadSession {
    fn drop(&mut self) {
        if matches!(self.state, SessionState::Completed | SessionState::Aborted) {
            return;
        }
        self.registry.remove(&self.id);

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(session = %self.id, "No runtime to abort abandoned multipart upload");
            return;
        };
        let store = Arc::clone(&self.store);
        let key = self.key.clone();
        let upload_id = self.upload_id.clone();
        let id = self.id.clone();
        handle.spawn(async move {
            match store.abort_multipart(&key, &upload_id).await {
                Ok(()) => info!(session = %id, "Aborted abandoned multipart upload"),
                Err(e) => warn!(session = %id, error = %e, "Failed to abort abandoned multipart upload"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use mountdav_core::{ListPage, MemoryStore, ObjectData, ObjectMeta, PresignedPut};

    /// Fails the first `failures` part uploads with the given error.
    struct FlakyParts {
        inner: MemoryStore,
        failures: AtomicU32,
        error: BackendError,
    }

    #[async_trait]
    impl ObjectStore for FlakyParts {
        fn backend_name(&self) -> &'static str {
            "flaky"
        }
        fn identity(&self) -> &str {
            self.inner.identity()
        }
        fn min_part_size(&self) -> u64 {
            self.inner.min_part_size()
        }
        async fn head(&self, key: &str) -> Result<ObjectMeta, BackendError> {
            self.inner.head(key).await
        }
        async fn get(&self, key: &str) -> Result<ObjectData, BackendError> {
            self.inner.get(key).await
        }
        async fn put(&self, key: &str, body: Bytes, ct: Option<&str>) -> Result<(), BackendError> {
            self.inner.put(key, body, ct).await
        }
        async fn list(
            &self,
            prefix: &str,
            delimiter: Option<&str>,
            continuation: Option<&str>,
            max_keys: usize,
        ) -> Result<ListPage, BackendError> {
            self.inner.list(prefix, delimiter, continuation, max_keys).await
        }
        async fn copy(&self, from: &str, to: &str) -> Result<(), BackendError> {
            self.inner.copy(from, to).await
        }
        async fn delete(&self, key: &str) -> Result<(), BackendError> {
            self.inner.delete(key).await
        }
        async fn create_multipart(&self, key: &str, ct: Option<&str>) -> Result<String, BackendError> {
            self.inner.create_multipart(key, ct).await
        }
        async fn upload_part(
            &self,
            key: &str,
            upload_id: &str,
            part_number: i32,
            body: Bytes,
        ) -> Result<String, BackendError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(self.error.clone());
            }
            self.inner.upload_part(key, upload_id, part_number, body).await
        }
        async fn complete_multipart(
            &self,
            key: &str,
            upload_id: &str,
            parts: &[CompletedPart],
        ) -> Result<(), BackendError> {
            self.inner.complete_multipart(key, upload_id, parts).await
        }
        async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<(), BackendError> {
            self.inner.abort_multipart(key, upload_id).await
        }
        async fn presign_put(
            &self,
            key: &str,
            ct: Option<&str>,
            expires_in: Duration,
        ) -> Result<PresignedPut, BackendError> {
            self.inner.presign_put(key, ct, expires_in).await
        }
    }

    fn flaky(failures: u32, error: BackendError) -> Arc<FlakyParts> {
        Arc::new(FlakyParts {
            inner: MemoryStore::new("mem://flaky").with_min_part_size(1),
            failures: AtomicU32::new(failures),
            error,
        })
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    async fn session(store: Arc<FlakyParts>, registry: Arc<UploadRegistry>) -> UploadSession {
        UploadSession::create(
            SessionTarget {
                store,
                mount_id: "m1".to_string(),
                key: "big.bin".to_string(),
                content_type: None,
            },
            4,
            None,
            fast_retry(),
            registry,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let store = flaky(2, BackendError::Transient("503".to_string()));
        let registry = Arc::new(UploadRegistry::new());
        let mut s = session(Arc::clone(&store), Arc::clone(&registry)).await;
        assert_eq!(registry.active(), 1);
        let live = registry.sessions();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, s.id());
        assert_eq!(live[0].part_size, 4);

        s.upload_part(Bytes::from_static(b"abcd")).await.unwrap();
        s.upload_part(Bytes::from_static(b"ef")).await.unwrap();
        assert_eq!(s.part_count(), 2);
        s.complete().await.unwrap();

        assert_eq!(registry.active(), 0);
        let data = store.get("big.bin").await.unwrap().into_bytes().await.unwrap();
        assert_eq!(&data[..], b"abcdef");
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let store = flaky(10, BackendError::Transient("503".to_string()));
        let registry = Arc::new(UploadRegistry::new());
        let mut s = session(Arc::clone(&store), Arc::clone(&registry)).await;
        let err = s.upload_part(Bytes::from_static(b"abcd")).await.unwrap_err();
        assert!(err.is_transient());
        // 1 attempt + 3 retries consumed
        assert_eq!(store.failures.load(Ordering::SeqCst), 6);

        s.abort().await;
        assert_eq!(registry.active(), 0);
        assert_eq!(store.inner.pending_uploads(), 0);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let store = flaky(2, BackendError::Permanent("403".to_string()));
        let registry = Arc::new(UploadRegistry::new());
        let mut s = session(Arc::clone(&store), registry).await;
        let err = s.upload_part(Bytes::from_static(b"abcd")).await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(store.failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_session_aborts() {
        let store = flaky(0, BackendError::Transient("unused".to_string()));
        let registry = Arc::new(UploadRegistry::new());
        let mut s = session(Arc::clone(&store), Arc::clone(&registry)).await;
        s.upload_part(Bytes::from_static(b"abcd")).await.unwrap();
        assert_eq!(s.state(), SessionState::InProgress);
        drop(s);

        assert_eq!(registry.active(), 0);
        for _ in 0..50 {
            if store.inner.pending_uploads() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(store.inner.pending_uploads(), 0);
    }
}
