//! WebDAV gateway over object-storage mounts.
//!
//! This crate:
//! - Serves a virtual tree under a fixed prefix, built from the mounts a
//!   principal can see
//! - Translates WebDAV verbs into object-store operations per mount
//! - Ingests PUT bodies adaptively (direct, presigned proxy, multipart)
//! - Keeps directory listings cached and invalidated by writes

pub mod auth;
pub mod cache;
pub mod conditional;
pub mod config;
pub mod content_type;
pub mod error;
pub mod handlers;
pub mod registry;
pub mod resolver;
pub mod state;
pub mod upload;
pub mod xml;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::{Config, GatewaySettings};
pub use registry::{AdminCredentials, StaticRegistry};
pub use state::AppState;

use handlers::{dav_handler, health_handler};

/// Build the HTTP router: `/health` plus every DAV request as the fallback.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .fallback(dav_handler)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
