use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Strictness of an access check, weakest first.
///
/// `Navigation` lets a caller see that a path exists (browse through virtual
/// directories), `Read` lets it fetch content, `Operation` lets it mutate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionTier {
    Navigation,
    Read,
    Operation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrincipalKind {
    Admin,
    ApiKey,
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub name: String,
    pub kind: PrincipalKind,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.kind == PrincipalKind::Admin
    }
}

/// Credentials as presented in an `Authorization` header.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Basic { username: String, password: String },
    Bearer(String),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Credentials::Bearer(_) => f.debug_tuple("Bearer").field(&"<redacted>").finish(),
        }
    }
}

/// Verifies credentials and re-validates cached principals.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Resolve credentials to a principal, or `None` if they are not valid.
    async fn verify(&self, credentials: &Credentials) -> Option<Principal>;

    /// Whether a previously verified principal is still allowed in
    /// (API key not revoked or deactivated since it was cached).
    async fn revalidate(&self, principal: &Principal) -> bool;
}

/// Path-prefix permission decisions.
#[async_trait]
pub trait PermissionChecker: Send + Sync {
    /// Whether `principal` may act on the virtual `path` at `tier`.
    async fn allows(&self, principal: &Principal, path: &str, tier: PermissionTier) -> bool;
}
