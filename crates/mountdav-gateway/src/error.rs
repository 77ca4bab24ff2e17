//! Error types for the WebDAV gateway.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use mountdav_core::{BackendError, RegistryError};
use tracing::error;

use crate::xml;

/// Verbs advertised in `Allow`.
pub const ALLOWED_METHODS: &str =
    "OPTIONS, PROPFIND, GET, HEAD, PUT, DELETE, MKCOL, MOVE, COPY, LOCK, UNLOCK, PROPPATCH";

/// Challenge sent with every 401.
pub const AUTH_CHALLENGE: &str = r#"Basic realm="WebDAV", Bearer realm="WebDAV""#;

/// Protocol-level errors.
#[derive(Debug, thiserror::Error)]
pub enum DavError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Bad gateway: {0}")]
    BadGateway(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Body format of an error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorFormat {
    Text,
    /// Minimal `<D:error>` document
    Xml,
}

impl DavError {
    pub fn status(&self) -> StatusCode {
        match self {
            DavError::Unauthorized => StatusCode::UNAUTHORIZED,
            DavError::Forbidden(_) => StatusCode::FORBIDDEN,
            DavError::NotFound(_) => StatusCode::NOT_FOUND,
            DavError::BadRequest(_) => StatusCode::BAD_REQUEST,
            DavError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            DavError::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            DavError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            DavError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            DavError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            DavError::Backend(BackendError::NotFound(_)) => StatusCode::NOT_FOUND,
            DavError::Backend(_) | DavError::Registry(_) | DavError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Render the error in the requested body format.
    ///
    /// Server-side failures are logged under a fresh incident id; only the id
    /// reaches the client.
    pub fn into_dav_response(self, format: ErrorFormat) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            let incident = uuid::Uuid::new_v4();
            error!(%incident, error = %self, "Request failed");
            format!("Internal server error (incident {})", incident)
        } else {
            self.to_string()
        };

        let mut response = match format {
            ErrorFormat::Text => (
                status,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                message,
            )
                .into_response(),
            ErrorFormat::Xml => (
                status,
                [(header::CONTENT_TYPE, xml::CONTENT_TYPE)],
                xml::error_document(&message),
            )
                .into_response(),
        };

        let headers = response.headers_mut();
        match status {
            StatusCode::UNAUTHORIZED => {
                headers.insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static(AUTH_CHALLENGE),
                );
            }
            StatusCode::METHOD_NOT_ALLOWED => {
                headers.insert(header::ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
            }
            _ => {}
        }
        response
    }
}

impl IntoResponse for DavError {
    fn into_response(self) -> Response {
        self.into_dav_response(ErrorFormat::Text)
    }
}

pub type Result<T> = std::result::Result<T, DavError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_not_found_is_404() {
        let err = DavError::from(BackendError::NotFound("k".to_string()));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        let err = DavError::from(BackendError::Transient("slow down".to_string()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_internal_error_hides_detail() {
        let err = DavError::Backend(BackendError::Permanent("secret bucket name".to_string()));
        let response = err.into_dav_response(ErrorFormat::Text);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("incident"));
        assert!(!text.contains("secret bucket name"));
    }

    #[tokio::test]
    async fn test_xml_format_escapes_message() {
        let err = DavError::BadRequest("bad <depth> & stuff".to_string());
        let response = err.into_dav_response(ErrorFormat::Xml);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("<D:error"));
        assert!(text.contains("bad &lt;depth&gt; &amp; stuff"));
    }

    #[test]
    fn test_challenge_headers() {
        let response = DavError::Unauthorized.into_response();
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            AUTH_CHALLENGE
        );
        let response = DavError::MethodNotAllowed("TRACE".to_string()).into_response();
        assert_eq!(response.headers().get(header::ALLOW).unwrap(), ALLOWED_METHODS);
    }
}
