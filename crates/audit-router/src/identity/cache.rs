//! Time-bounded identity cache.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::{IdentityResolver, ResolveError, ResolvedIdentity};

struct CachedIdentity {
    identity: ResolvedIdentity,
    stored_at: Instant,
}

/// Caches successful lookups of another resolver, keyed by exact username.
///
/// Entries are never served once they are `ttl` old. Failures are not cached.
/// Expired entries are swept whenever a new one is stored, so the map only
/// holds users seen within the last `ttl`.
pub struct CachingResolver {
    inner: Arc<dyn IdentityResolver>,
    ttl: Duration,
    entries: DashMap<String, CachedIdentity>,
}

impl CachingResolver {
    #[must_use]
    pub fn new(inner: Arc<dyn IdentityResolver>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: DashMap::new(),
        }
    }

    /// Number of entries currently held, fresh or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn fresh(&self, username: &str) -> Option<ResolvedIdentity> {
        let now = Instant::now();
        {
            let entry = self.entries.get(username)?;
            if now.duration_since(entry.stored_at) < self.ttl {
                return Some(entry.identity.clone());
            }
        }

        // The shard guard above must be released before removing.
        self.entries
            .remove_if(username, |_, e| now.duration_since(e.stored_at) >= self.ttl);
        None
    }
}

#[async_trait]
impl IdentityResolver for CachingResolver {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn resolve(&self, username: &str) -> Result<ResolvedIdentity, ResolveError> {
        if let Some(identity) = self.fresh(username) {
            debug!(username, "Identity cache hit");
            return Ok(identity);
        }

        let identity = self.inner.resolve(username).await?;

        let now = Instant::now();
        self.entries
            .retain(|_, e| now.duration_since(e.stored_at) < self.ttl);
        self.entries.insert(
            username.to_string(),
            CachedIdentity {
                identity: identity.clone(),
                stored_at: now,
            },
        );
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Identity, MockIdentityResolver};

    fn resolved(username: &str) -> ResolvedIdentity {
        ResolvedIdentity {
            user: Identity {
                username: username.to_string(),
                display_name: username.to_uppercase(),
                email: format!("{username}@example.com"),
            },
            manager: None,
        }
    }

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn test_hit_within_ttl() {
        let mut inner = MockIdentityResolver::new();
        inner
            .expect_resolve()
            .times(1)
            .returning(|u| Ok(resolved(u)));
        let cache = CachingResolver::new(Arc::new(inner), TTL);

        let first = cache.resolve("jdoe").await.unwrap();
        tokio::time::advance(Duration::from_secs(59)).await;
        let second = cache.resolve("jdoe").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_are_refetched() {
        let mut inner = MockIdentityResolver::new();
        inner
            .expect_resolve()
            .times(2)
            .returning(|u| Ok(resolved(u)));
        let cache = CachingResolver::new(Arc::new(inner), TTL);

        cache.resolve("jdoe").await.unwrap();
        tokio::time::advance(TTL).await;
        cache.resolve("jdoe").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_exact() {
        let mut inner = MockIdentityResolver::new();
        inner
            .expect_resolve()
            .times(2)
            .returning(|u| Ok(resolved(u)));
        let cache = CachingResolver::new(Arc::new(inner), TTL);

        assert_eq!(cache.resolve("jdoe").await.unwrap().user.username, "jdoe");
        assert_eq!(cache.resolve("JDoe").await.unwrap().user.username, "JDoe");
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_not_cached() {
        let mut inner = MockIdentityResolver::new();
        inner.expect_resolve().times(2).returning(|u| {
            Err(ResolveError::NotFound {
                username: u.to_string(),
            })
        });
        let cache = CachingResolver::new(Arc::new(inner), TTL);

        assert!(cache.resolve("ghost").await.is_err());
        assert!(cache.resolve("ghost").await.is_err());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_entry_evicted_when_refresh_fails() {
        let mut inner = MockIdentityResolver::new();
        let mut calls = 0;
        inner.expect_resolve().times(2).returning(move |u| {
            calls += 1;
            if calls == 1 {
                Ok(resolved(u))
            } else {
                Err(ResolveError::Unavailable("timeout".to_string()))
            }
        });
        let cache = CachingResolver::new(Arc::new(inner), TTL);

        cache.resolve("jdoe").await.unwrap();
        tokio::time::advance(TTL + Duration::from_secs(1)).await;

        assert!(matches!(
            cache.resolve("jdoe").await,
            Err(ResolveError::Unavailable(_))
        ));
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_of_other_users_are_swept() {
        let mut inner = MockIdentityResolver::new();
        inner
            .expect_resolve()
            .times(3)
            .returning(|u| Ok(resolved(u)));
        let cache = CachingResolver::new(Arc::new(inner), TTL);

        cache.resolve("jdoe").await.unwrap();
        cache.resolve("asmith").await.unwrap();
        assert_eq!(cache.len(), 2);

        tokio::time::advance(TTL).await;
        cache.resolve("bjones").await.unwrap();

        assert_eq!(cache.len(), 1);
    }
}
