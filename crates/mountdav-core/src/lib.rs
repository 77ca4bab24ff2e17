//! Core traits and types for mountdav.
//!
//! This crate defines the abstractions shared between the gateway and its backends:
//! - `ObjectStore`: head/get/put/list/copy/delete and multipart operations on one bucket
//! - `MountRegistry`: the mounts visible to a principal and the store behind each
//! - `PermissionChecker` / `CredentialVerifier`: access decisions made outside the gateway
//! - `ListingCache`: directory-listing cache keyed by backend identity and prefix
//! - `MemoryStore`: an in-process `ObjectStore` used for development and tests

mod access;
mod error;
mod listing;
mod memory;
mod mount;
mod registry;
mod store;

pub use access::{
    CredentialVerifier, Credentials, PermissionChecker, PermissionTier, Principal, PrincipalKind,
};
pub use error::{BackendError, RegistryError};
pub use listing::{DirectoryListing, ListingCache, ListingEntry, ListingKey};
pub use memory::MemoryStore;
pub use mount::{normalize_mount_path, normalize_root_prefix, Mount};
pub use registry::{ContentTypes, MountRegistry};
pub use store::{
    ByteStream, CompletedPart, ListPage, ObjectData, ObjectMeta, ObjectStore, PresignedPut,
    DEFAULT_MAX_PART_SIZE, DEFAULT_MIN_PART_SIZE,
};
