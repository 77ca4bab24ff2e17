//! mountdav: WebDAV gateway over object-storage mounts.
//!
//! This binary:
//! - Loads backends, mounts and API keys from the registry file
//! - Serves the virtual tree under the DAV prefix (Basic or Bearer auth)
//! - Exposes GET /health outside the prefix

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use mountdav_gateway::{router, AdminCredentials, AppState, Config, StaticRegistry};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    let settings = config.settings();

    info!("Starting mountdav v{}", env!("CARGO_PKG_VERSION"));
    info!("  Host: {}", config.host);
    info!("  Port: {}", config.port);
    info!(
        "  DAV prefix: {}",
        if settings.prefix.is_empty() {
            "/"
        } else {
            settings.prefix.as_str()
        }
    );
    info!("  Registry: {}", config.registry_file.display());
    info!("  Upload mode: {:?}", settings.upload.mode);

    let admin = AdminCredentials {
        username: config.admin_username.clone(),
        password: config.admin_password.clone(),
        session_tokens: config.admin_session_tokens.clone(),
    };
    if admin.username.is_none() && admin.session_tokens.is_empty() {
        warn!("  Admin access: DISABLED (no admin credentials configured)");
        warn!("  Set ADMIN_USERNAME/ADMIN_PASSWORD or ADMIN_SESSION_TOKENS to enable it");
    }

    let registry = Arc::new(StaticRegistry::load(&config.registry_file, admin).await?);
    info!("  Mounts: {}", mountdav_core::MountRegistry::mount_count(registry.as_ref()));

    let state = AppState::new(settings, registry)?;
    let app = router(state);

    // Bind and serve
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Received Ctrl+C, initiating shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
        info!("Received SIGTERM, initiating shutdown");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
