use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::resolver::PathRules;
use crate::upload::strategy::{UploadMode, UploadPolicy};

/// Configuration for the mountdav gateway.
#[derive(Parser, Debug, Clone)]
#[command(name = "mountdav")]
#[command(about = "WebDAV gateway exposing object-storage mounts as one virtual tree")]
pub struct Config {
    /// TCP host to bind to
    #[arg(long, default_value = "0.0.0.0", env = "HOST")]
    pub host: String,

    /// TCP port to bind to
    #[arg(long, default_value = "8080", env = "PORT")]
    pub port: u16,

    /// URL prefix the WebDAV tree is served under
    #[arg(long, default_value = "/dav", env = "DAV_PREFIX")]
    pub prefix: String,

    /// JSON file declaring backends, mounts and API keys
    #[arg(long, env = "MOUNTDAV_REGISTRY")]
    pub registry_file: PathBuf,

    /// Admin username for Basic auth
    #[arg(long, env = "ADMIN_USERNAME")]
    pub admin_username: Option<String>,

    /// Admin password for Basic auth
    #[arg(long, env = "ADMIN_PASSWORD")]
    pub admin_password: Option<String>,

    /// Admin session tokens accepted as Bearer credentials (comma-separated)
    #[arg(long, env = "ADMIN_SESSION_TOKENS", value_delimiter = ',')]
    pub admin_session_tokens: Vec<String>,

    /// Upload strategy: auto, direct, proxy or multipart
    #[arg(long, value_enum, default_value = "auto", env = "UPLOAD_MODE")]
    pub upload_mode: UploadMode,

    /// Bodies up to this size are buffered and written in one PUT (auto mode)
    #[arg(long, default_value = "10485760", env = "UPLOAD_SMALL_THRESHOLD")]
    pub small_upload_threshold: u64,

    /// Bodies above this size are streamed to a presigned URL (auto mode)
    #[arg(long, default_value = "52428800", env = "UPLOAD_LARGE_THRESHOLD")]
    pub large_upload_threshold: u64,

    /// Preferred multipart part size in bytes
    #[arg(long, default_value = "8388608", env = "UPLOAD_PART_SIZE")]
    pub part_size: u64,

    /// Retries per multipart part on transient backend errors
    #[arg(long, default_value = "3", env = "UPLOAD_PART_RETRIES")]
    pub part_retries: u32,

    /// Lifetime of presigned upload URLs in seconds
    #[arg(long, default_value = "900", env = "PRESIGN_TTL_SECS")]
    pub presign_ttl_secs: u64,

    /// Maximum PROPFIND entries per response
    #[arg(long, default_value = "10000", env = "PROPFIND_MAX_ITEMS")]
    pub propfind_max_items: usize,

    /// Keys requested per backend list page
    #[arg(long, default_value = "1000", env = "PROPFIND_PAGE_SIZE")]
    pub propfind_page_size: usize,

    /// Maximum backend list pages fetched per PROPFIND
    #[arg(long, default_value = "100", env = "PROPFIND_PAGE_CEILING")]
    pub propfind_page_ceiling: usize,

    /// How long a client stays recognised without credentials, in seconds
    #[arg(long, default_value = "1800", env = "AUTH_CACHE_TTL_SECS")]
    pub auth_cache_ttl_secs: u64,

    /// Directory-listing cache TTL in seconds
    #[arg(long, default_value = "60", env = "LISTING_CACHE_TTL_SECS")]
    pub listing_cache_ttl_secs: u64,

    /// Directory-listing cache capacity (entries)
    #[arg(long, default_value = "10000", env = "LISTING_CACHE_CAPACITY")]
    pub listing_cache_capacity: u64,

    /// Maximum decoded request path length in bytes
    #[arg(long, default_value = "1024", env = "MAX_PATH_LENGTH")]
    pub max_path_length: usize,

    /// Accept percent-encoded slashes in request paths
    #[arg(long, env = "ALLOW_ENCODED_SLASH")]
    pub allow_encoded_slash: bool,

    /// Timeout for presigned-URL uploads in seconds
    #[arg(long, default_value = "3600", env = "PROXY_TIMEOUT_SECS")]
    pub proxy_timeout_secs: u64,
}

impl Config {
    pub fn settings(&self) -> GatewaySettings {
        GatewaySettings {
            prefix: normalize_prefix(&self.prefix),
            path_rules: PathRules {
                max_length: self.max_path_length,
                allow_encoded_slash: self.allow_encoded_slash,
            },
            upload: UploadPolicy {
                mode: self.upload_mode,
                small_threshold: self.small_upload_threshold,
                large_threshold: self.large_upload_threshold,
                part_size: self.part_size,
                part_retries: self.part_retries,
                presign_ttl: Duration::from_secs(self.presign_ttl_secs),
                ..UploadPolicy::default()
            },
            propfind_max_items: self.propfind_max_items.max(1),
            propfind_page_size: self.propfind_page_size.clamp(1, 1000),
            propfind_page_ceiling: self.propfind_page_ceiling.max(1),
            auth_cache_ttl: Duration::from_secs(self.auth_cache_ttl_secs),
            listing_cache_ttl: Duration::from_secs(self.listing_cache_ttl_secs),
            listing_cache_capacity: self.listing_cache_capacity,
            proxy_timeout: Duration::from_secs(self.proxy_timeout_secs),
        }
    }
}

/// Runtime settings derived from [`Config`].
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// DAV prefix without trailing slash (`""` when served at the root)
    pub prefix: String,
    pub path_rules: PathRules,
    pub upload: UploadPolicy,
    pub propfind_max_items: usize,
    pub propfind_page_size: usize,
    pub propfind_page_ceiling: usize,
    pub auth_cache_ttl: Duration,
    pub listing_cache_ttl: Duration,
    pub listing_cache_capacity: u64,
    pub proxy_timeout: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            prefix: "/dav".to_string(),
            path_rules: PathRules::default(),
            upload: UploadPolicy::default(),
            propfind_max_items: 10_000,
            propfind_page_size: 1000,
            propfind_page_ceiling: 100,
            auth_cache_ttl: Duration::from_secs(30 * 60),
            listing_cache_ttl: Duration::from_secs(60),
            listing_cache_capacity: 10_000,
            proxy_timeout: Duration::from_secs(3600),
        }
    }
}

/// `/dav/` and `dav` become `/dav`; `/` becomes `""`.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}
