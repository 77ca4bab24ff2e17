use std::sync::Arc;

use async_trait::async_trait;

use crate::access::Principal;
use crate::error::RegistryError;
use crate::mount::Mount;
use crate::store::ObjectStore;

/// Source of mounts and their backing stores.
#[async_trait]
pub trait MountRegistry: Send + Sync {
    /// Active mounts the principal may see. Paths are normalized and unique.
    async fn mounts_for(&self, principal: &Principal) -> Result<Vec<Mount>, RegistryError>;

    /// The object store configured for a mount.
    async fn store_for(&self, mount: &Mount) -> Result<Arc<dyn ObjectStore>, RegistryError>;

    /// Record that a mount was just used.
    async fn touch_last_used(&self, mount_id: &str) -> Result<(), RegistryError>;

    /// Number of active mounts across all principals.
    fn mount_count(&self) -> usize;
}

/// Filename to MIME type lookup.
pub trait ContentTypes: Send + Sync {
    fn content_type_for(&self, file_name: &str) -> String;
}
