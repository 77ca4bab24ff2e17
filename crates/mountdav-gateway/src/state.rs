use std::sync::Arc;

use mountdav_core::{
    ContentTypes, CredentialVerifier, ListingCache, MountRegistry, PermissionChecker,
};
use reqwest::Client as HttpClient;

use crate::auth::AuthCache;
use crate::cache::MokaListingCache;
use crate::config::GatewaySettings;
use crate::content_type::MimeGuessTypes;
use crate::registry::StaticRegistry;
use crate::upload::multipart::UploadRegistry;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<GatewaySettings>,
    pub registry: Arc<dyn MountRegistry>,
    pub permissions: Arc<dyn PermissionChecker>,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub content_types: Arc<dyn ContentTypes>,
    pub listing_cache: Arc<dyn ListingCache>,
    pub auth_cache: AuthCache,
    pub uploads: Arc<UploadRegistry>,
    /// Client for presigned-URL uploads
    pub http_client: HttpClient,
}

impl AppState {
    /// Wire the static registry into every collaborator slot.
    pub fn new(
        settings: GatewaySettings,
        registry: Arc<StaticRegistry>,
    ) -> Result<Self, reqwest::Error> {
        let http_client = HttpClient::builder()
            .timeout(settings.proxy_timeout)
            .build()?;

        Ok(Self {
            listing_cache: Arc::new(MokaListingCache::new(
                settings.listing_cache_capacity,
                settings.listing_cache_ttl,
            )),
            auth_cache: AuthCache::new(settings.auth_cache_ttl),
            settings: Arc::new(settings),
            registry: registry.clone(),
            permissions: registry.clone(),
            verifier: registry,
            content_types: Arc::new(MimeGuessTypes),
            uploads: Arc::new(UploadRegistry::new()),
            http_client,
        })
    }

    /// Replace the listing cache (tests substitute a recording one).
    pub fn with_listing_cache(mut self, cache: Arc<dyn ListingCache>) -> Self {
        self.listing_cache = cache;
        self
    }
}
