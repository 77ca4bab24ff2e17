//! Virtual path resolution.
//!
//! A request path either lands inside a mount (longest `mount_path` wins) or
//! on an ancestor of one or more mounts, in which case it is a synthetic
//! directory whose children are derived from the mount paths below it.

use mountdav_core::Mount;
use thiserror::Error;

/// Limits applied when decoding a request path.
#[derive(Debug, Clone)]
pub struct PathRules {
    /// Maximum decoded path length in bytes
    pub max_length: usize,
    /// Accept `%2F` inside a segment (decoded to a separator)
    pub allow_encoded_slash: bool,
}

impl Default for PathRules {
    fn default() -> Self {
        Self {
            max_length: 1024,
            allow_encoded_slash: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("encoded slashes are not allowed")]
    EncodedSlash,
    #[error("path is not valid UTF-8 once decoded")]
    InvalidEncoding,
    #[error("path contains control characters or backslashes")]
    ReservedCharacter,
    #[error("parent segments are not allowed")]
    ParentSegment,
    #[error("path exceeds {0} bytes")]
    TooLong(usize),
}

/// A decoded, normalized request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPath {
    /// Leading slash, no trailing slash (except `/`), no empty segments
    pub path: String,
    /// The client sent a trailing slash
    pub collection_hint: bool,
}

impl RequestPath {
    pub fn root() -> Self {
        Self {
            path: "/".to_string(),
            collection_hint: true,
        }
    }

    pub fn is_root(&self) -> bool {
        self.path == "/"
    }

    /// Last path segment (`""` for the root).
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or("")
    }
}

/// Percent-decode and normalize a path relative to the DAV prefix.
pub fn decode_request_path(raw: &str, rules: &PathRules) -> Result<RequestPath, PathError> {
    if !rules.allow_encoded_slash && raw.to_ascii_lowercase().contains("%2f") {
        return Err(PathError::EncodedSlash);
    }
    let decoded = urlencoding::decode(raw).map_err(|_| PathError::InvalidEncoding)?;
    if decoded.len() > rules.max_length {
        return Err(PathError::TooLong(rules.max_length));
    }

    let mut segments = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(PathError::ParentSegment),
            s if s.chars().any(|c| c.is_ascii_control() || c == '\\') => {
                return Err(PathError::ReservedCharacter)
            }
            s => segments.push(s),
        }
    }

    Ok(RequestPath {
        path: format!("/{}", segments.join("/")),
        collection_hint: decoded.ends_with('/') || segments.is_empty(),
    })
}

/// Child of a synthetic directory.
#[derive(Debug, Clone, PartialEq)]
pub enum VirtualChild {
    /// Intermediate segment leading to deeper mounts
    Directory(String),
    /// A mount nested directly below the directory
    Mount(Mount),
}

impl VirtualChild {
    /// Path segment of the child.
    pub fn segment(&self) -> &str {
        match self {
            VirtualChild::Directory(name) => name,
            VirtualChild::Mount(mount) => mount.mount_path.rsplit('/').next().unwrap_or(""),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VirtualDirectory {
    pub path: String,
    pub children: Vec<VirtualChild>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Inside a mount; `sub_path` is relative, empty for the mount root
    Mount { mount: Mount, sub_path: String },
    Virtual(VirtualDirectory),
}

/// Resolve a normalized path against a set of mounts with unique paths.
///
/// Returns `None` when the path is neither inside a mount nor an ancestor of one.
pub fn resolve(path: &str, mounts: &[Mount]) -> Option<Resolution> {
    if path != "/" {
        let mut by_depth: Vec<&Mount> = mounts.iter().collect();
        by_depth.sort_by(|a, b| b.mount_path.len().cmp(&a.mount_path.len()));

        for mount in by_depth {
            let mp = mount.mount_path.as_str();
            if path == mp {
                return Some(Resolution::Mount {
                    mount: mount.clone(),
                    sub_path: String::new(),
                });
            }
            if let Some(rest) = path.strip_prefix(mp).and_then(|r| r.strip_prefix('/')) {
                return Some(Resolution::Mount {
                    mount: mount.clone(),
                    sub_path: rest.to_string(),
                });
            }
        }
    }

    let base = if path == "/" {
        "/".to_string()
    } else {
        format!("{}/", path)
    };

    let mut directories: Vec<String> = Vec::new();
    let mut nested: Vec<&Mount> = Vec::new();
    for mount in mounts {
        let Some(rest) = mount.mount_path.strip_prefix(&base) else {
            continue;
        };
        match rest.split_once('/') {
            None => nested.push(mount),
            Some((segment, _)) => {
                if !directories.iter().any(|d| d == segment) {
                    directories.push(segment.to_string());
                }
            }
        }
    }

    if path != "/" && directories.is_empty() && nested.is_empty() {
        return None;
    }

    // A segment that is both a mount and an ancestor of a deeper mount is the mount.
    directories.retain(|d| {
        !nested
            .iter()
            .any(|m| m.mount_path.rsplit('/').next() == Some(d.as_str()))
    });
    directories.sort();
    nested.sort_by(|a, b| {
        a.sort_order
            .cmp(&b.sort_order)
            .then_with(|| a.name.cmp(&b.name))
    });

    let children = directories
        .into_iter()
        .map(VirtualChild::Directory)
        .chain(nested.into_iter().cloned().map(VirtualChild::Mount))
        .collect();

    Some(Resolution::Virtual(VirtualDirectory {
        path: path.to_string(),
        children,
    }))
}
