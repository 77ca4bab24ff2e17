use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// A named virtual directory bound to one backend bucket/prefix.
///
/// Mounts are owned by the registry; the gateway only reads them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub id: String,
    /// Display name ("Photos", "Team share", ...)
    pub name: String,
    /// Virtual absolute path, e.g. `/team/share`
    pub mount_path: String,
    /// Name of the backend declaration this mount points at
    pub backend: String,
    /// Key prefix inside the backend bucket (`""` for the bucket root)
    #[serde(default)]
    pub root_prefix: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub sort_order: i32,
    /// Lifetime of cached directory listings for this mount
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl Mount {
    /// Return the mount with `mount_path` and `root_prefix` in canonical form.
    pub fn normalized(mut self) -> Result<Self, RegistryError> {
        self.mount_path = normalize_mount_path(&self.mount_path)?;
        if self.mount_path == "/" {
            return Err(RegistryError::InvalidMountPath {
                path: self.mount_path,
                reason: "the root is always virtual and cannot be mounted",
            });
        }
        self.root_prefix = normalize_root_prefix(&self.root_prefix);
        Ok(self)
    }

    /// Backend key for a path below this mount.
    ///
    /// `sub_path` is relative (no leading slash); `collection` appends the
    /// trailing slash that marks a directory key.
    pub fn object_key(&self, sub_path: &str, collection: bool) -> String {
        let sub_path = sub_path.trim_matches('/');
        let mut key = format!("{}{}", self.root_prefix, sub_path);
        if collection && !sub_path.is_empty() {
            key.push('/');
        }
        key
    }

    /// Listing prefix for a directory below this mount (`root_prefix` for the mount root).
    pub fn directory_prefix(&self, sub_path: &str) -> String {
        self.object_key(sub_path, true)
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_secs.map(Duration::from_secs)
    }
}

/// Canonical mount path: leading slash, no trailing slash (except the root),
/// no empty, `.` or `..` segments.
pub fn normalize_mount_path(path: &str) -> Result<String, RegistryError> {
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(RegistryError::InvalidMountPath {
                    path: path.to_string(),
                    reason: "parent segments are not allowed",
                })
            }
            s if s.chars().any(|c| c.is_control() || c == '\\') => {
                return Err(RegistryError::InvalidMountPath {
                    path: path.to_string(),
                    reason: "control characters and backslashes are not allowed",
                })
            }
            s => segments.push(s),
        }
    }
    Ok(format!("/{}", segments.join("/")))
}

/// Canonical root prefix: no leading slash, trailing slash unless empty.
pub fn normalize_root_prefix(prefix: &str) -> String {
    let trimmed = prefix
        .split('/')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    if trimmed.is_empty() {
        trimmed
    } else {
        format!("{}/", trimmed)
    }
}
