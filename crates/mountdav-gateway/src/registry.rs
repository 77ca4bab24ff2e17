//! File-backed registry of backends, mounts and API keys.
//!
//! The registry file is read once at start-up. It implements the three
//! collaborator traits the gateway consumes: [`MountRegistry`],
//! [`PermissionChecker`] and [`CredentialVerifier`].

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mountdav_core::{
    normalize_mount_path, CredentialVerifier, Credentials, MemoryStore, Mount, MountRegistry,
    ObjectStore, PermissionChecker, PermissionTier, Principal, PrincipalKind, RegistryError,
};
use mountdav_s3::{S3BackendConfig, S3Store};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::info;

/// Backend declaration in the registry file.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendDecl {
    S3(S3BackendConfig),
    Memory {
        #[serde(default)]
        min_part_size: Option<u64>,
    },
}

/// A path-prefix grant.
#[derive(Debug, Clone, Deserialize)]
pub struct PathPermission {
    pub path: String,
    pub tier: PermissionTier,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeyRecord {
    pub id: String,
    pub name: String,
    /// Hex SHA-256 of the raw key
    pub key_sha256: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub permissions: Vec<PathPermission>,
}

fn default_true() -> bool {
    true
}

/// Registry file layout.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryFile {
    #[serde(default)]
    pub backends: HashMap<String, BackendDecl>,
    #[serde(default)]
    pub mounts: Vec<Mount>,
    #[serde(default)]
    pub api_keys: Vec<ApiKeyRecord>,
}

/// Administrator credentials, from the command line or environment.
#[derive(Debug, Clone, Default)]
pub struct AdminCredentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub session_tokens: Vec<String>,
}

pub fn hash_key(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

/// Whether `path` equals `base` or lies below it.
fn is_within(path: &str, base: &str) -> bool {
    base == "/"
        || path == base
        || path
            .strip_prefix(base)
            .is_some_and(|rest| rest.starts_with('/'))
}

pub struct StaticRegistry {
    mounts: Vec<Mount>,
    stores: HashMap<String, Arc<dyn ObjectStore>>,
    api_keys: Vec<ApiKeyRecord>,
    admin: AdminCredentials,
    last_used: DashMap<String, DateTime<Utc>>,
}

impl StaticRegistry {
    /// Read and validate a registry file, connecting every declared backend.
    pub async fn load(path: &Path, admin: AdminCredentials) -> Result<Self, RegistryError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RegistryError::Io(format!("{}: {}", path.display(), e)))?;
        let file: RegistryFile =
            serde_json::from_str(&raw).map_err(|e| RegistryError::Parse(e.to_string()))?;

        let mut stores: HashMap<String, Arc<dyn ObjectStore>> = HashMap::new();
        for (name, decl) in &file.backends {
            let store: Arc<dyn ObjectStore> = match decl {
                BackendDecl::S3(config) => Arc::new(S3Store::connect(config).await),
                BackendDecl::Memory { min_part_size } => {
                    let store = MemoryStore::new(format!("memory://{}", name));
                    Arc::new(match min_part_size {
                        Some(size) => store.with_min_part_size(*size),
                        None => store,
                    })
                }
            };
            info!(backend = %name, kind = store.backend_name(), identity = store.identity(), "Configured backend");
            stores.insert(name.clone(), store);
        }

        Self::new(file.mounts, stores, file.api_keys, admin)
    }

    /// Validate mounts and permissions against already-built stores.
    pub fn new(
        mounts: Vec<Mount>,
        stores: HashMap<String, Arc<dyn ObjectStore>>,
        api_keys: Vec<ApiKeyRecord>,
        admin: AdminCredentials,
    ) -> Result<Self, RegistryError> {
        let mut seen = HashSet::new();
        let mut normalized = Vec::with_capacity(mounts.len());
        for mount in mounts {
            let mount = mount.normalized()?;
            if !stores.contains_key(&mount.backend) {
                return Err(RegistryError::UnknownBackend {
                    mount: mount.mount_path,
                    backend: mount.backend,
                });
            }
            if mount.active && !seen.insert(mount.mount_path.clone()) {
                return Err(RegistryError::DuplicateMountPath(mount.mount_path));
            }
            normalized.push(mount);
        }

        let mut keys = Vec::with_capacity(api_keys.len());
        for mut key in api_keys {
            for permission in &mut key.permissions {
                permission.path = normalize_mount_path(&permission.path)?;
            }
            key.key_sha256 = key.key_sha256.to_ascii_lowercase();
            keys.push(key);
        }

        Ok(Self {
            mounts: normalized,
            stores,
            api_keys: keys,
            admin,
            last_used: DashMap::new(),
        })
    }

    /// When a mount was last used through the gateway.
    pub fn last_used(&self, mount_id: &str) -> Option<DateTime<Utc>> {
        self.last_used.get(mount_id).map(|entry| *entry.value())
    }

    fn admin_principal(&self) -> Principal {
        Principal {
            id: "admin".to_string(),
            name: self
                .admin
                .username
                .clone()
                .unwrap_or_else(|| "admin".to_string()),
            kind: PrincipalKind::Admin,
        }
    }

    fn api_key_by_raw(&self, raw: &str) -> Option<&ApiKeyRecord> {
        let hash = hash_key(raw);
        self.api_keys
            .iter()
            .find(|key| key.active && key.key_sha256 == hash)
    }

    fn api_key_by_id(&self, id: &str) -> Option<&ApiKeyRecord> {
        self.api_keys.iter().find(|key| key.id == id)
    }

    fn key_principal(key: &ApiKeyRecord) -> Principal {
        Principal {
            id: key.id.clone(),
            name: key.name.clone(),
            kind: PrincipalKind::ApiKey,
        }
    }
}

#[async_trait]
impl MountRegistry for StaticRegistry {
    async fn mounts_for(&self, principal: &Principal) -> Result<Vec<Mount>, RegistryError> {
        let active = self.mounts.iter().filter(|m| m.active);
        if principal.is_admin() {
            return Ok(active.cloned().collect());
        }
        let Some(key) = self.api_key_by_id(&principal.id) else {
            return Ok(Vec::new());
        };
        Ok(active
            .filter(|mount| {
                key.permissions.iter().any(|p| {
                    is_within(&mount.mount_path, &p.path) || is_within(&p.path, &mount.mount_path)
                })
            })
            .cloned()
            .collect())
    }

    async fn store_for(&self, mount: &Mount) -> Result<Arc<dyn ObjectStore>, RegistryError> {
        self.stores
            .get(&mount.backend)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownBackend {
                mount: mount.mount_path.clone(),
                backend: mount.backend.clone(),
            })
    }

    async fn touch_last_used(&self, mount_id: &str) -> Result<(), RegistryError> {
        self.last_used.insert(mount_id.to_string(), Utc::now());
        Ok(())
    }

    fn mount_count(&self) -> usize {
        self.mounts.iter().filter(|m| m.active).count()
    }
}

#[async_trait]
impl PermissionChecker for StaticRegistry {
    async fn allows(&self, principal: &Principal, path: &str, tier: PermissionTier) -> bool {
        if principal.is_admin() {
            return true;
        }
        let Some(key) = self.api_key_by_id(&principal.id).filter(|k| k.active) else {
            return false;
        };
        key.permissions.iter().any(|p| {
            (is_within(path, &p.path) && p.tier >= tier)
                // Ancestors of a grant are browsable so the grant can be reached.
                || (tier == PermissionTier::Navigation && is_within(&p.path, path))
        })
    }
}

#[async_trait]
impl CredentialVerifier for StaticRegistry {
    async fn verify(&self, credentials: &Credentials) -> Option<Principal> {
        match credentials {
            Credentials::Basic { username, password } => {
                if self.admin.username.as_deref() == Some(username.as_str())
                    && self.admin.password.as_deref() == Some(password.as_str())
                {
                    return Some(self.admin_principal());
                }
                if username == password {
                    return self.api_key_by_raw(password).map(Self::key_principal);
                }
                None
            }
            Credentials::Bearer(token) => {
                if self.admin.session_tokens.iter().any(|t| t == token) {
                    return Some(self.admin_principal());
                }
                self.api_key_by_raw(token).map(Self::key_principal)
            }
        }
    }

    async fn revalidate(&self, principal: &Principal) -> bool {
        match principal.kind {
            PrincipalKind::Admin => true,
            PrincipalKind::ApiKey => self
                .api_key_by_id(&principal.id)
                .is_some_and(|key| key.active),
        }
    }
}
