//! Identity resolution: mapping an alert's username to a person and their manager.
//!
//! - [`IdentityResolver`] is the capability the alert pipeline depends on
//! - [`LdapResolver`] looks people up in an LDAP directory
//! - [`CachingResolver`] wraps any resolver with a TTL cache

pub mod cache;
pub mod ldap;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use cache::CachingResolver;
pub use ldap::LdapResolver;

/// A person known to the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    /// Unique login name.
    pub username: String,
    /// Name for display in tickets.
    pub display_name: String,
    /// Mail address.
    pub email: String,
}

/// A user's manager. Same shape as any other identity.
pub type ManagerIdentity = Identity;

/// A resolved user together with their manager, if the directory has one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub user: Identity,
    pub manager: Option<ManagerIdentity>,
}

/// Errors returned by identity resolvers.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No directory entry matches the username
    #[error("user {username:?} not found in directory")]
    NotFound { username: String },

    /// More than one directory entry matches the username
    #[error("username {username:?} matches {count} directory entries")]
    Ambiguous { username: String, count: usize },

    /// The entry exists but lacks attributes a ticket needs
    #[error("directory entry for {username:?} is unusable: {reason}")]
    InvalidRecord { username: String, reason: String },

    /// The directory could not be reached or answered with an error
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

impl ResolveError {
    /// Short classification for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Ambiguous { .. } => "ambiguous",
            Self::InvalidRecord { .. } => "invalid_record",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

/// Looks up a username in a directory.
///
/// Implementations must be safe to call concurrently from many requests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Name of the backing directory, for logs.
    fn name(&self) -> &'static str;

    /// Resolve `username` to the user and their manager.
    async fn resolve(&self, username: &str) -> Result<ResolvedIdentity, ResolveError>;
}
