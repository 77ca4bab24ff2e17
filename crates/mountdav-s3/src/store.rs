use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart};
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use mountdav_core::{
    BackendError, CompletedPart, ListPage, ObjectData, ObjectMeta, ObjectStore, PresignedPut,
};
use tracing::{debug, instrument};

use crate::config::S3BackendConfig;

/// Object store over one S3-compatible bucket.
#[derive(Clone)]
pub struct S3Store {
    s3_client: S3Client,
    bucket_name: String,
    identity: String,
}

impl S3Store {
    pub fn new(s3_client: S3Client, bucket_name: String, identity: String) -> Self {
        Self {
            s3_client,
            bucket_name,
            identity,
        }
    }

    /// Build the SDK client for `config` and wrap it.
    pub async fn connect(config: &S3BackendConfig) -> Self {
        let client = config.build_client().await;
        Self::new(client, config.bucket.clone(), config.identity())
    }

    /// `x-amz-copy-source` value: bucket and key, each segment percent-encoded.
    fn copy_source(&self, key: &str) -> String {
        let encoded = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{}", self.bucket_name, encoded)
    }
}

/// Map an SDK error onto the closed backend error kinds.
///
/// 404 is `NotFound`; 429, 500–504, timeouts and dispatch failures are
/// `Transient`; everything else is `Permanent`.
fn classify<E>(operation: &str, key: &str, err: SdkError<E>) -> BackendError
where
    E: std::error::Error + 'static,
{
    let status = match &err {
        SdkError::ServiceError(e) => Some(e.raw().status().as_u16()),
        SdkError::ResponseError(e) => Some(e.raw().status().as_u16()),
        _ => None,
    };
    let transport_failure = matches!(
        err,
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_)
    );
    let detail = format!("{} {}: {}", operation, key, DisplayErrorContext(&err));

    match status {
        Some(404) => BackendError::NotFound(key.to_string()),
        Some(s) if s == 429 || (500..=504).contains(&s) => BackendError::Transient(detail),
        _ if transport_failure => BackendError::Transient(detail),
        _ => BackendError::Permanent(detail),
    }
}

fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

#[async_trait]
impl ObjectStore for S3Store {
    fn backend_name(&self) -> &'static str {
        "s3"
    }

    fn identity(&self) -> &str {
        &self.identity
    }

    #[instrument(skip(self), level = "debug")]
    async fn head(&self, key: &str) -> Result<ObjectMeta, BackendError> {
        let output = self
            .s3_client
            .head_object()
            .bucket(&self.bucket_name)
            .key(key)
            .send()
            .await
            .map_err(|e| classify("head_object", key, e))?;

        Ok(ObjectMeta {
            key: key.to_string(),
            size: output.content_length().unwrap_or(0).max(0) as u64,
            etag: output.e_tag().map(str::to_string),
            last_modified: output.last_modified().and_then(to_chrono),
            content_type: output.content_type().map(str::to_string),
        })
    }

    #[instrument(skip(self), level = "debug")]
    async fn get(&self, key: &str) -> Result<ObjectData, BackendError> {
        let output = self
            .s3_client
            .get_object()
            .bucket(&self.bucket_name)
            .key(key)
            .send()
            .await
            .map_err(|e| classify("get_object", key, e))?;

        let meta = ObjectMeta {
            key: key.to_string(),
            size: output.content_length().unwrap_or(0).max(0) as u64,
            etag: output.e_tag().map(str::to_string),
            last_modified: output.last_modified().and_then(to_chrono),
            content_type: output.content_type().map(str::to_string),
        };

        let object_key = key.to_string();
        let body = futures::stream::unfold(output.body, move |mut body| {
            let object_key = object_key.clone();
            async move {
                body.next().await.map(|chunk| {
                    let chunk = chunk.map_err(|e| {
                        BackendError::Transient(format!(
                            "failed to read body of {}: {}",
                            object_key, e
                        ))
                    });
                    (chunk, body)
                })
            }
        });

        Ok(ObjectData {
            meta,
            body: Box::pin(body),
        })
    }

    #[instrument(skip(self, body), level = "debug", fields(body_len = body.len()))]
    async fn put(
        &self,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> Result<(), BackendError> {
        self.s3_client
            .put_object()
            .bucket(&self.bucket_name)
            .key(key)
            .set_content_type(content_type.map(str::to_string))
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| classify("put_object", key, e))?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn list(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        continuation: Option<&str>,
        max_keys: usize,
    ) -> Result<ListPage, BackendError> {
        let output = self
            .s3_client
            .list_objects_v2()
            .bucket(&self.bucket_name)
            .prefix(prefix)
            .set_delimiter(delimiter.map(str::to_string))
            .set_continuation_token(continuation.map(str::to_string))
            .max_keys(max_keys.min(1000) as i32)
            .send()
            .await
            .map_err(|e| classify("list_objects_v2", prefix, e))?;

        let objects = output
            .contents()
            .iter()
            .filter_map(|obj| {
                obj.key().map(|key| ObjectMeta {
                    key: key.to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    etag: obj.e_tag().map(str::to_string),
                    last_modified: obj.last_modified().and_then(to_chrono),
                    content_type: None,
                })
            })
            .collect::<Vec<_>>();

        let common_prefixes = output
            .common_prefixes()
            .iter()
            .filter_map(|p| p.prefix().map(str::to_string))
            .collect::<Vec<_>>();

        let next_token = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        debug!(
            prefix,
            objects = objects.len(),
            prefixes = common_prefixes.len(),
            more = next_token.is_some(),
            "Listed S3 page"
        );

        Ok(ListPage {
            objects,
            common_prefixes,
            next_token,
        })
    }

    #[instrument(skip(self), level = "debug")]
    async fn copy(&self, from: &str, to: &str) -> Result<(), BackendError> {
        self.s3_client
            .copy_object()
            .bucket(&self.bucket_name)
            .copy_source(self.copy_source(from))
            .key(to)
            .send()
            .await
            .map_err(|e| classify("copy_object", from, e))?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        self.s3_client
            .delete_object()
            .bucket(&self.bucket_name)
            .key(key)
            .send()
            .await
            .map_err(|e| classify("delete_object", key, e))?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn create_multipart(
        &self,
        key: &str,
        content_type: Option<&str>,
    ) -> Result<String, BackendError> {
        let output = self
            .s3_client
            .create_multipart_upload()
            .bucket(&self.bucket_name)
            .key(key)
            .set_content_type(content_type.map(str::to_string))
            .send()
            .await
            .map_err(|e| classify("create_multipart_upload", key, e))?;

        output.upload_id().map(str::to_string).ok_or_else(|| {
            BackendError::Permanent(format!("no upload id returned for {}", key))
        })
    }

    #[instrument(skip(self, body), level = "debug", fields(body_len = body.len()))]
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String, BackendError> {
        let output = self
            .s3_client
            .upload_part()
            .bucket(&self.bucket_name)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| classify("upload_part", key, e))?;

        output.e_tag().map(str::to_string).ok_or_else(|| {
            BackendError::Permanent(format!("no ETag returned for part {} of {}", part_number, key))
        })
    }

    #[instrument(skip(self, parts), level = "debug", fields(parts = parts.len()))]
    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), BackendError> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .iter()
                    .map(|p| {
                        S3CompletedPart::builder()
                            .part_number(p.part_number)
                            .e_tag(&p.etag)
                            .build()
                    })
                    .collect(),
            ))
            .build();

        self.s3_client
            .complete_multipart_upload()
            .bucket(&self.bucket_name)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| classify("complete_multipart_upload", key, e))?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<(), BackendError> {
        self.s3_client
            .abort_multipart_upload()
            .bucket(&self.bucket_name)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| classify("abort_multipart_upload", key, e))?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn presign_put(
        &self,
        key: &str,
        content_type: Option<&str>,
        expires_in: Duration,
    ) -> Result<PresignedPut, BackendError> {
        let presigning = PresigningConfig::expires_in(expires_in)
            .map_err(|e| BackendError::Permanent(format!("invalid presign lifetime: {}", e)))?;

        let request = self
            .s3_client
            .put_object()
            .bucket(&self.bucket_name)
            .key(key)
            .set_content_type(content_type.map(str::to_string))
            .presigned(presigning)
            .await
            .map_err(|e| classify("presign put_object", key, e))?;

        Ok(PresignedPut {
            url: request.uri().to_string(),
            headers: request
                .headers()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            expires_in,
        })
    }
}
