use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use mountdav_core::PresignedPut;
use reqwest::Client as HttpClient;
use tracing::debug;

use super::InboundBody;
use crate::error::{DavError, Result};

/// How a forward attempt ended.
pub enum Forwarded {
    Stored,
    /// The connection to the presigned URL was never made. Nothing was read
    /// from the body, so it is handed back.
    Unsent {
        body: InboundBody,
        error: reqwest::Error,
    },
}

/// Body handle that can be taken back as long as nothing has read from it.
#[derive(Clone)]
struct Lease {
    slot: Arc<Mutex<LeaseSlot>>,
}

struct LeaseSlot {
    body: Option<InboundBody>,
    read: bool,
}

impl Lease {
    fn new(body: InboundBody) -> Self {
        Self {
            slot: Arc::new(Mutex::new(LeaseSlot {
                body: Some(body),
                read: false,
            })),
        }
    }

    fn reclaim(&self) -> Option<InboundBody> {
        let mut slot = self.slot.lock().expect("body lease poisoned");
        if slot.read {
            None
        } else {
            slot.body.take()
        }
    }
}

impl Stream for Lease {
    type Item = std::result::Result<Bytes, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut slot = self.slot.lock().expect("body lease poisoned");
        slot.read = true;
        match slot.body.as_mut() {
            Some(body) => body.poll_next_unpin(cx),
            None => Poll::Ready(None),
        }
    }
}

/// Stream a request body straight into a presigned PUT URL.
///
/// Once the body starts flowing any failure is final; only a failed connect
/// gives the body back.
pub async fn forward(
    http_client: &HttpClient,
    presigned: &PresignedPut,
    content_type: Option<&str>,
    content_length: Option<u64>,
    body: InboundBody,
) -> Result<Forwarded> {
    let mut request = http_client.put(&presigned.url);

    let mut signed_content_type = false;
    for (name, value) in &presigned.headers {
        if name.eq_ignore_ascii_case("host") {
            continue;
        }
        signed_content_type |= name.eq_ignore_ascii_case("content-type");
        request = request.header(name, value);
    }
    if let (Some(content_type), false) = (content_type, signed_content_type) {
        request = request.header(reqwest::header::CONTENT_TYPE, content_type);
    }
    if let Some(len) = content_length {
        request = request.header(reqwest::header::CONTENT_LENGTH, len);
    }

    debug!(content_length, "Forwarding body to presigned URL");

    let lease = Lease::new(body);
    let sent = request
        .body(reqwest::Body::wrap_stream(lease.clone()))
        .send()
        .await;

    let response = match sent {
        Ok(response) => response,
        Err(error) => {
            if error.is_connect() {
                if let Some(body) = lease.reclaim() {
                    return Ok(Forwarded::Unsent { body, error });
                }
            }
            return Err(DavError::BadGateway(format!(
                "presigned upload failed: {}",
                error
            )));
        }
    };

    let status = response.status();
    if !status.is_success() {
        return Err(DavError::BadGateway(format!(
            "backend rejected presigned upload with status {}",
            status
        )));
    }
    Ok(Forwarded::Stored)
}
