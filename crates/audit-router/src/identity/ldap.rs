//! LDAP-backed identity resolver.
//!
//! Users are found with a subtree search on the configured username
//! attribute. The entry's `manager` attribute holds the manager's DN, which is
//! read with a second, base-scoped search on the same connection.

use async_trait::async_trait;
use ldap3::{
    ldap_escape, Ldap, LdapConnAsync, LdapConnSettings, LdapError, LdapResult, Scope,
    SearchEntry, SearchResult,
};
use tracing::{debug, warn};

use super::{Identity, IdentityResolver, ManagerIdentity, ResolveError, ResolvedIdentity};
use crate::config::LdapConfig;

/// LDAP result code for a DN that does not exist.
const RC_NO_SUCH_OBJECT: u32 = 32;

/// Resolves identities against an LDAP directory.
///
/// A fresh connection is opened per lookup, so nothing is shared between
/// concurrent requests.
#[derive(Debug, Clone)]
pub struct LdapResolver {
    config: LdapConfig,
}

impl LdapResolver {
    #[must_use]
    pub fn new(config: LdapConfig) -> Self {
        Self { config }
    }

    fn attributes(&self) -> Vec<&str> {
        vec![
            self.config.user_attribute.as_str(),
            "cn",
            "displayName",
            "mail",
            "manager",
        ]
    }

    async fn connect(&self) -> Result<Ldap, ResolveError> {
        let settings = LdapConnSettings::new().set_conn_timeout(self.config.connect_timeout);
        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &self.config.url)
            .await
            .map_err(|e| unavailable("connect", &e))?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection closed with error");
            }
        });

        if let Some(bind_dn) = &self.config.bind_dn {
            let password = self.config.bind_password.as_deref().unwrap_or_default();
            ldap.simple_bind(bind_dn, password)
                .await
                .and_then(LdapResult::success)
                .map_err(|e| unavailable("bind", &e))?;
        }

        Ok(ldap)
    }

    async fn lookup(
        &self,
        ldap: &mut Ldap,
        username: &str,
    ) -> Result<ResolvedIdentity, ResolveError> {
        let filter = user_filter(&self.config.user_attribute, username);
        let (entries, _) = ldap
            .search(&self.config.base_dn, Scope::Subtree, &filter, self.attributes())
            .await
            .and_then(SearchResult::success)
            .map_err(|e| unavailable("search", &e))?;

        let mut entries: Vec<SearchEntry> = entries.into_iter().map(SearchEntry::construct).collect();
        let entry = match entries.len() {
            0 => {
                return Err(ResolveError::NotFound {
                    username: username.to_string(),
                })
            }
            1 => entries.remove(0),
            count => {
                return Err(ResolveError::Ambiguous {
                    username: username.to_string(),
                    count,
                })
            }
        };

        let user = identity_from_entry(&entry, &self.config.user_attribute).map_err(|reason| {
            ResolveError::InvalidRecord {
                username: username.to_string(),
                reason,
            }
        })?;

        let manager = match manager_dn(&entry) {
            Some(dn) => self.lookup_manager(ldap, dn).await?,
            None => None,
        };

        Ok(ResolvedIdentity { user, manager })
    }

    async fn lookup_manager(
        &self,
        ldap: &mut Ldap,
        dn: &str,
    ) -> Result<Option<ManagerIdentity>, ResolveError> {
        let SearchResult(entries, result) = ldap
            .search(dn, Scope::Base, "(objectClass=*)", self.attributes())
            .await
            .map_err(|e| unavailable("manager search", &e))?;

        if result.rc == RC_NO_SUCH_OBJECT {
            warn!(manager_dn = %dn, "Manager entry does not exist");
            return Ok(None);
        }
        result
            .success()
            .map_err(|e| unavailable("manager search", &e))?;

        let Some(entry) = entries.into_iter().next().map(SearchEntry::construct) else {
            warn!(manager_dn = %dn, "Manager entry does not exist");
            return Ok(None);
        };

        match identity_from_entry(&entry, &self.config.user_attribute) {
            Ok(manager) => Ok(Some(manager)),
            Err(reason) => {
                warn!(manager_dn = %dn, %reason, "Ignoring unusable manager entry");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl IdentityResolver for LdapResolver {
    fn name(&self) -> &'static str {
        "ldap"
    }

    async fn resolve(&self, username: &str) -> Result<ResolvedIdentity, ResolveError> {
        debug!(username, "Resolving user in LDAP");

        let mut ldap = self.connect().await?;
        let result = self.lookup(&mut ldap, username).await;

        if let Err(e) = ldap.unbind().await {
            debug!(error = %e, "LDAP unbind failed");
        }

        result
    }
}

/// Equality filter on `attribute` with the username escaped.
pub fn user_filter(attribute: &str, username: &str) -> String {
    format!("({attribute}={})", ldap_escape(username))
}

fn first<'a>(entry: &'a SearchEntry, attribute: &str) -> Option<&'a str> {
    entry
        .attrs
        .get(attribute)
        .and_then(|values| values.first())
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
}

/// Build an identity from a directory entry.
pub fn identity_from_entry(entry: &SearchEntry, user_attribute: &str) -> Result<Identity, String> {
    let username = first(entry, user_attribute)
        .ok_or_else(|| format!("{} has no {user_attribute} attribute", entry.dn))?;
    let email = first(entry, "mail").ok_or_else(|| format!("{} has no mail attribute", entry.dn))?;
    let display_name = first(entry, "displayName")
        .or_else(|| first(entry, "cn"))
        .unwrap_or(username);

    Ok(Identity {
        username: username.to_string(),
        display_name: display_name.to_string(),
        email: email.to_string(),
    })
}

fn manager_dn(entry: &SearchEntry) -> Option<&str> {
    first(entry, "manager")
}

fn unavailable(operation: &str, err: &LdapError) -> ResolveError {
    ResolveError::Unavailable(format!("LDAP {operation} failed: {err}"))
}
