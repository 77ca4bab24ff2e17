//! Adaptive PUT ingestion.
//!
//! Every body ends up in the backend one of three ways: buffered and written
//! with a single PUT, streamed to a presigned URL, or cut into parts for a
//! multipart upload. [`strategy::choose_strategy`] picks one up front; the
//! engine falls back to multipart in `auto` mode when the first choice fails
//! before the body was consumed (including a presigned URL that could not be
//! reached at all).

pub mod accumulator;
pub mod multipart;
pub mod proxy;
pub mod strategy;

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::StreamExt;
use mountdav_core::{BackendError, ObjectStore};
use reqwest::Client as HttpClient;
use tracing::{debug, info, warn};

use crate::error::{DavError, Result};
use accumulator::PartAccumulator;
use multipart::{RetryPolicy, SessionTarget, UploadRegistry, UploadSession};
use proxy::Forwarded;
use strategy::{
    choose_strategy, max_upload_size, negotiate_part_size, ClientHints, Strategy, UploadMode,
    UploadPolicy,
};

/// Shortfalls below this many bytes are always tolerated.
const SHORTFALL_TOLERANCE_BYTES: u64 = 1024 * 1024;

/// Request body as a stream of chunks.
pub type InboundBody = BoxStream<'static, std::result::Result<Bytes, std::io::Error>>;

/// One PUT to ingest.
pub struct UploadRequest {
    pub store: Arc<dyn ObjectStore>,
    pub mount_id: String,
    pub key: String,
    pub content_type: Option<String>,
    pub declared_length: Option<u64>,
    pub hints: ClientHints,
}

pub struct UploadEngine<'a> {
    pub policy: &'a UploadPolicy,
    pub sessions: &'a Arc<UploadRegistry>,
    pub http_client: &'a HttpClient,
}

fn read_error(e: std::io::Error) -> DavError {
    DavError::BadRequest(format!("failed to read request body: {}", e))
}

fn part_failure(e: BackendError) -> DavError {
    DavError::BadGateway(format!("part upload failed: {}", e))
}

/// Whether a body `total` bytes long is close enough to `declared`.
fn shortfall_tolerated(declared: u64, total: u64) -> bool {
    let missing = declared.saturating_sub(total);
    missing == 0 || missing < SHORTFALL_TOLERANCE_BYTES || missing < declared / 100
}

impl UploadEngine<'_> {
    /// Ingest `body` into `request.key`. Returns the strategy that finally
    /// wrote the object.
    pub async fn ingest(&self, request: UploadRequest, body: InboundBody) -> Result<Strategy> {
        let limit = max_upload_size(request.store.max_part_size());
        if let Some(declared) = request.declared_length.filter(|len| *len > limit) {
            return Err(DavError::PayloadTooLarge(format!(
                "declared length {} exceeds the backend limit of {} bytes",
                declared, limit
            )));
        }
        let strategy = choose_strategy(request.declared_length, &request.hints, self.policy);
        debug!(
            key = %request.key,
            declared_length = request.declared_length,
            ?strategy,
            "Ingesting upload"
        );

        match strategy {
            Strategy::Empty => {
                request
                    .store
                    .put(&request.key, Bytes::new(), request.content_type.as_deref())
                    .await?;
                Ok(Strategy::Empty)
            }
            Strategy::Direct => self.direct(request, body).await,
            Strategy::Proxy => self.proxy(request, body).await,
            Strategy::Multipart => {
                self.multipart(&request, None, body).await?;
                Ok(Strategy::Multipart)
            }
        }
    }

    fn auto(&self) -> bool {
        self.policy.mode == UploadMode::Auto
    }

    async fn direct(&self, request: UploadRequest, mut body: InboundBody) -> Result<Strategy> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk.map_err(read_error)?);
            if self.auto() && buf.len() as u64 > self.policy.small_threshold {
                debug!(key = %request.key, "Body outgrew the direct threshold, switching to multipart");
                self.multipart(&request, Some(buf.freeze()), body).await?;
                return Ok(Strategy::Multipart);
            }
        }

        let bytes = buf.freeze();
        match request
            .store
            .put(&request.key, bytes.clone(), request.content_type.as_deref())
            .await
        {
            Ok(()) => Ok(Strategy::Direct),
            Err(e) if self.auto() => {
                warn!(key = %request.key, error = %e, "Direct upload failed, retrying as multipart");
                self.multipart(&request, Some(bytes), futures::stream::empty().boxed())
                    .await?;
                Ok(Strategy::Multipart)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn proxy(&self, request: UploadRequest, body: InboundBody) -> Result<Strategy> {
        let presigned = request
            .store
            .presign_put(
                &request.key,
                request.content_type.as_deref(),
                self.policy.presign_ttl,
            )
            .await;

        match presigned {
            Ok(presigned) => {
                let forwarded = proxy::forward(
                    self.http_client,
                    &presigned,
                    request.content_type.as_deref(),
                    request.declared_length,
                    body,
                )
                .await?;
                match forwarded {
                    Forwarded::Stored => {
                        info!(key = %request.key, "Proxied upload to presigned URL");
                        Ok(Strategy::Proxy)
                    }
                    Forwarded::Unsent { body, error } if self.auto() => {
                        warn!(key = %request.key, %error, "Presigned URL unreachable, falling back to multipart");
                        self.multipart(&request, None, body).await?;
                        Ok(Strategy::Multipart)
                    }
                    Forwarded::Unsent { error, .. } => Err(DavError::BadGateway(format!(
                        "presigned upload failed: {}",
                        error
                    ))),
                }
            }
            Err(e) if self.auto() => {
                warn!(key = %request.key, error = %e, "Presign failed, falling back to multipart");
                self.multipart(&request, None, body).await?;
                Ok(Strategy::Multipart)
            }
            Err(e) => Err(DavError::BadGateway(format!(
                "backend cannot accept proxied uploads: {}",
                e
            ))),
        }
    }

    async fn multipart(
        &self,
        request: &UploadRequest,
        buffered: Option<Bytes>,
        body: InboundBody,
    ) -> Result<()> {
        let part_size = negotiate_part_size(
            self.policy.part_size,
            request.store.min_part_size(),
            request.store.max_part_size(),
            request.declared_length,
        );
        let retry = RetryPolicy {
            max_retries: self.policy.part_retries,
            base_delay: self.policy.retry_base_delay,
        };
        let mut session = UploadSession::create(
            SessionTarget {
                store: Arc::clone(&request.store),
                mount_id: request.mount_id.clone(),
                key: request.key.clone(),
                content_type: request.content_type.clone(),
            },
            part_size,
            request.declared_length,
            retry,
            Arc::clone(self.sessions),
        )
        .await?;

        let total = match feed(&mut session, part_size, buffered, body).await {
            Ok(total) => total,
            Err(e) => {
                session.abort().await;
                return Err(e);
            }
        };

        if total == 0 {
            session.abort().await;
            request
                .store
                .put(&request.key, Bytes::new(), request.content_type.as_deref())
                .await?;
            return Ok(());
        }

        if let Some(declared) = request.declared_length {
            if total < declared {
                if !shortfall_tolerated(declared, total) {
                    session.abort().await;
                    return Err(DavError::BadRequest(format!(
                        "body ended after {} of {} declared bytes",
                        total, declared
                    )));
                }
                warn!(
                    key = %request.key,
                    declared,
                    received = total,
                    "Upload shorter than declared, keeping it"
                );
            }
        }

        session.complete().await?;
        Ok(())
    }
}

/// Push the whole body through the session, part by part. Returns the byte count.
async fn feed(
    session: &mut UploadSession,
    part_size: u64,
    buffered: Option<Bytes>,
    mut body: InboundBody,
) -> Result<u64> {
    let mut accumulator = PartAccumulator::new(part_size as usize);
    if let Some(bytes) = buffered {
        for part in accumulator.push(bytes) {
            session.upload_part(part).await.map_err(part_failure)?;
        }
    }
    while let Some(chunk) = body.next().await {
        for part in accumulator.push(chunk.map_err(read_error)?) {
            session.upload_part(part).await.map_err(part_failure)?;
        }
    }
    let total = accumulator.total();
    if let Some(last) = accumulator.finish() {
        session.upload_part(last).await.map_err(part_failure)?;
    }
    Ok(total)
}
