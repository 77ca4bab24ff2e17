//! S3-compatible object store for mountdav mounts.
//!
//! Works against AWS S3, Cloudflare R2 and other S3-compatible services.
//! SDK errors are classified into the closed [`BackendError`] kinds here so
//! nothing above this crate ever inspects an SDK error shape.
//!
//! [`BackendError`]: mountdav_core::BackendError

mod config;
mod store;

pub use config::S3BackendConfig;
pub use store::S3Store;
