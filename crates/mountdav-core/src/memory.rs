use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::BackendError;
use crate::store::{
    CompletedPart, ListPage, ObjectData, ObjectMeta, ObjectStore, PresignedPut,
    DEFAULT_MIN_PART_SIZE,
};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    meta: ObjectMeta,
}

#[derive(Debug, Default)]
struct PendingUpload {
    key: String,
    content_type: Option<String>,
    parts: BTreeMap<i32, (String, Bytes)>,
}

/// In-process object store.
///
/// Behaves like an S3 bucket for everything the gateway needs: delimiter
/// listings with continuation tokens, multipart uploads with per-part ETags,
/// and copy/delete. Presigning only works when an endpoint was configured
/// with [`MemoryStore::with_presign_endpoint`]; writes through that URL land
/// wherever the endpoint points, not in this store.
pub struct MemoryStore {
    identity: String,
    min_part_size: u64,
    presign_endpoint: Option<String>,
    objects: RwLock<BTreeMap<String, StoredObject>>,
    uploads: Mutex<HashMap<String, PendingUpload>>,
}

impl MemoryStore {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            min_part_size: DEFAULT_MIN_PART_SIZE,
            presign_endpoint: None,
            objects: RwLock::new(BTreeMap::new()),
            uploads: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_min_part_size(mut self, min_part_size: u64) -> Self {
        self.min_part_size = min_part_size;
        self
    }

    pub fn with_presign_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.presign_endpoint = Some(endpoint.into().trim_end_matches('/').to_string());
        self
    }

    /// Number of multipart uploads that were created and neither completed nor aborted.
    pub fn pending_uploads(&self) -> usize {
        self.uploads.lock().expect("memory store poisoned").len()
    }

    /// All stored keys, in order.
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .read()
            .expect("memory store poisoned")
            .keys()
            .cloned()
            .collect()
    }

    fn etag_for(data: &[u8]) -> String {
        let digest = Sha256::digest(data);
        format!("\"{}\"", &hex::encode(digest)[..32])
    }

    fn insert(&self, key: &str, data: Bytes, content_type: Option<String>, etag: String) {
        let meta = ObjectMeta {
            key: key.to_string(),
            size: data.len() as u64,
            etag: Some(etag),
            last_modified: Some(Utc::now()),
            content_type,
        };
        self.objects
            .write()
            .expect("memory store poisoned")
            .insert(key.to_string(), StoredObject { data, meta });
    }

    fn lookup(&self, key: &str) -> Result<StoredObject, BackendError> {
        self.objects
            .read()
            .expect("memory store poisoned")
            .get(key)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(key.to_string()))
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn identity(&self) -> &str {
        &self.identity
    }

    fn min_part_size(&self) -> u64 {
        self.min_part_size
    }

    async fn head(&self, key: &str) -> Result<ObjectMeta, BackendError> {
        Ok(self.lookup(key)?.meta)
    }

    async fn get(&self, key: &str) -> Result<ObjectData, BackendError> {
        let object = self.lookup(key)?;
        let body = futures::stream::once(async move { Ok(object.data) });
        Ok(ObjectData {
            meta: object.meta,
            body: Box::pin(body),
        })
    }

    async fn put(
        &self,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> Result<(), BackendError> {
        let etag = Self::etag_for(&body);
        self.insert(key, body, content_type.map(str::to_string), etag);
        Ok(())
    }

    async fn list(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        continuation: Option<&str>,
        max_keys: usize,
    ) -> Result<ListPage, BackendError> {
        let objects = self.objects.read().expect("memory store poisoned");
        let mut page = ListPage::default();
        let mut emitted = 0usize;
        let mut last_emitted: Option<String> = None;

        let range = objects.range::<str, _>((Bound::Included(prefix), Bound::Unbounded));
        for (key, object) in range {
            if !key.starts_with(prefix) {
                break;
            }
            if let Some(token) = continuation {
                // A token ending in the delimiter is a rolled-up prefix: skip its whole subtree.
                let rolled_up = delimiter.is_some_and(|d| token.ends_with(d));
                if key.as_str() <= token || (rolled_up && key.starts_with(token)) {
                    continue;
                }
            }

            let rest = &key[prefix.len()..];
            let common_prefix = delimiter
                .and_then(|d| rest.find(d).map(|idx| format!("{}{}", prefix, &rest[..idx + d.len()])));

            if let Some(common_prefix) = common_prefix {
                if page.common_prefixes.last() == Some(&common_prefix) {
                    continue;
                }
                if emitted == max_keys {
                    page.next_token = last_emitted;
                    break;
                }
                last_emitted = Some(common_prefix.clone());
                page.common_prefixes.push(common_prefix);
            } else {
                if emitted == max_keys {
                    page.next_token = last_emitted;
                    break;
                }
                last_emitted = Some(key.clone());
                page.objects.push(object.meta.clone());
            }
            emitted += 1;
        }

        debug!(
            prefix,
            objects = page.objects.len(),
            prefixes = page.common_prefixes.len(),
            "memory list"
        );
        Ok(page)
    }

    async fn copy(&self, from: &str, to: &str) -> Result<(), BackendError> {
        let object = self.lookup(from)?;
        let etag = object
            .meta
            .etag
            .clone()
            .unwrap_or_else(|| Self::etag_for(&object.data));
        self.insert(to, object.data, object.meta.content_type, etag);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        self.objects
            .write()
            .expect("memory store poisoned")
            .remove(key);
        Ok(())
    }

    async fn create_multipart(
        &self,
        key: &str,
        content_type: Option<&str>,
    ) -> Result<String, BackendError> {
        let upload_id = uuid::Uuid::new_v4().to_string();
        self.uploads.lock().expect("memory store poisoned").insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                content_type: content_type.map(str::to_string),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String, BackendError> {
        let mut uploads = self.uploads.lock().expect("memory store poisoned");
        let upload = uploads
            .get_mut(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| BackendError::NotFound(format!("upload {}", upload_id)))?;
        let etag = Self::etag_for(&body);
        upload.parts.insert(part_number, (etag.clone(), body));
        Ok(etag)
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), BackendError> {
        let upload = self
            .uploads
            .lock()
            .expect("memory store poisoned")
            .remove(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| BackendError::NotFound(format!("upload {}", upload_id)))?;

        if parts.is_empty() {
            return Err(BackendError::Permanent(
                "multipart upload needs at least one part".to_string(),
            ));
        }

        let mut data = BytesMut::new();
        for (index, part) in parts.iter().enumerate() {
            let (etag, bytes) = upload.parts.get(&part.part_number).ok_or_else(|| {
                BackendError::Permanent(format!("part {} was never uploaded", part.part_number))
            })?;
            if *etag != part.etag {
                return Err(BackendError::Permanent(format!(
                    "part {} ETag mismatch",
                    part.part_number
                )));
            }
            let is_last = index + 1 == parts.len();
            if !is_last && (bytes.len() as u64) < self.min_part_size {
                return Err(BackendError::Permanent(format!(
                    "part {} is smaller than the minimum part size",
                    part.part_number
                )));
            }
            data.extend_from_slice(bytes);
        }

        let etag = format!(
            "\"{}-{}\"",
            Self::etag_for(&data).trim_matches('"'),
            parts.len()
        );
        self.insert(key, data.freeze(), upload.content_type, etag);
        Ok(())
    }

    async fn abort_multipart(&self, _key: &str, upload_id: &str) -> Result<(), BackendError> {
        self.uploads
            .lock()
            .expect("memory store poisoned")
            .remove(upload_id);
        Ok(())
    }

    async fn presign_put(
        &self,
        key: &str,
        content_type: Option<&str>,
        expires_in: Duration,
    ) -> Result<PresignedPut, BackendError> {
        let endpoint = self.presign_endpoint.as_ref().ok_or_else(|| {
            BackendError::Permanent("presigned URLs are not supported by this store".to_string())
        })?;
        let mut headers = Vec::new();
        if let Some(ct) = content_type {
            headers.push(("content-type".to_string(), ct.to_string()));
        }
        Ok(PresignedPut {
            url: format!("{}/{}", endpoint, key),
            headers,
            expires_in,
        })
    }
}
