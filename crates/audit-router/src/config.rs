//! Configuration for the audit router.
//!
//! Everything is read from environment variables once at startup. The
//! resulting values are immutable and handed to the components that need
//! them; nothing reads the environment after `Config::from_env` returns.

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::decoder::{DecodeMode, DecoderConfig};

/// Default maximum accepted alert body (1 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 1_048_576;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required key is missing or empty
    #[error("{0} must be set")]
    Missing(&'static str),

    /// A key is present but could not be parsed
    #[error("{key} has an invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Audit router configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to.
    pub listen_addr: SocketAddr,
    /// Log route registration and other chatty startup details.
    pub verbose: bool,
    /// Upper bound for a whole HTTP request.
    pub request_timeout: Duration,
    /// Alert pipeline settings.
    pub pipeline: PipelineConfig,
    /// How long resolved identities stay cached. `None` disables the cache.
    pub identity_cache_ttl: Option<Duration>,
    /// Directory settings.
    pub ldap: LdapConfig,
    /// Issue tracker settings.
    pub jira: JiraConfig,
}

/// Settings the alert pipeline is constructed with.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Body decoding limits and strictness.
    pub decoder: DecoderConfig,
    /// Upper bound for one identity lookup.
    pub resolve_timeout: Duration,
    /// Upper bound for each issue tracker call.
    pub dispatch_timeout: Duration,
}

impl PipelineConfig {
    /// Longest a single run can take: body read, lookup, ticket and watcher.
    pub fn worst_case(&self) -> Duration {
        self.decoder.read_timeout + self.resolve_timeout + self.dispatch_timeout * 2
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            decoder: DecoderConfig::default(),
            resolve_timeout: Duration::from_secs(10),
            dispatch_timeout: Duration::from_secs(30),
        }
    }
}

/// LDAP directory configuration.
#[derive(Debug, Clone)]
pub struct LdapConfig {
    /// Server URL, e.g. `ldaps://ldap.corp.example.com`.
    pub url: String,
    /// Search base for user entries.
    pub base_dn: String,
    /// DN for simple bind. Anonymous bind when unset.
    pub bind_dn: Option<String>,
    /// Password for simple bind.
    pub bind_password: Option<String>,
    /// Attribute holding the username.
    pub user_attribute: String,
    /// Connection establishment timeout.
    pub connect_timeout: Duration,
}

/// Jira REST API configuration.
#[derive(Debug, Clone)]
pub struct JiraConfig {
    /// Instance URL, e.g. `https://issues.example.com`.
    pub base_url: String,
    /// API token (personal access token or cloud API token).
    pub api_token: String,
    /// Username for basic auth. Bearer auth with the token when unset.
    pub username: Option<String>,
    /// Project tickets are filed in.
    pub project_key: String,
    /// Issue type of created tickets.
    pub issue_type: String,
    /// Labels applied to created tickets.
    pub labels: Vec<String>,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let mode = if vars.parse_bool("STRICT_DECODING")?.unwrap_or(false) {
            DecodeMode::Strict
        } else {
            DecodeMode::Lenient
        };

        let pipeline = PipelineConfig {
            decoder: DecoderConfig {
                max_body_bytes: vars
                    .parse("MAX_BODY_BYTES")?
                    .unwrap_or(DEFAULT_MAX_BODY_BYTES),
                mode,
                read_timeout: vars
                    .millis("BODY_READ_TIMEOUT_MS")?
                    .unwrap_or(Duration::from_secs(10)),
            },
            resolve_timeout: vars
                .millis("RESOLVE_TIMEOUT_MS")?
                .unwrap_or(Duration::from_secs(10)),
            dispatch_timeout: vars
                .millis("DISPATCH_TIMEOUT_MS")?
                .unwrap_or(Duration::from_secs(30)),
        };

        let identity_cache_ttl = vars
            .parse::<u64>("IDENTITY_CACHE_TTL_SECS")?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let ldap = LdapConfig {
            url: vars.required("LDAP_URL")?,
            base_dn: vars.required("LDAP_BASE_DN")?,
            bind_dn: vars.get("LDAP_BIND_DN"),
            bind_password: vars.get("LDAP_BIND_PASSWORD"),
            user_attribute: vars
                .get("LDAP_USER_ATTRIBUTE")
                .unwrap_or_else(|| "uid".to_string()),
            connect_timeout: pipeline.resolve_timeout,
        };

        let jira = JiraConfig {
            base_url: vars
                .required("JIRA_BASE_URL")?
                .trim_end_matches('/')
                .to_string(),
            api_token: vars.required("JIRA_API_TOKEN")?,
            username: vars.get("JIRA_USERNAME"),
            project_key: vars.required("JIRA_PROJECT_KEY")?,
            issue_type: vars.get("JIRA_ISSUE_TYPE").unwrap_or_else(|| "Task".to_string()),
            labels: vars
                .get("JIRA_LABELS")
                .map(|s| {
                    s.split(',')
                        .map(str::trim)
                        .filter(|l| !l.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_else(|| vec!["compliance-audit".to_string()]),
        };

        // The HTTP layer timeout answers without a body, so it must never fire
        // before the pipeline's own timeouts do.
        let request_timeout = vars
            .millis("REQUEST_TIMEOUT_MS")?
            .unwrap_or(Duration::from_secs(90));
        let worst_case = pipeline.worst_case();
        if request_timeout <= worst_case {
            return Err(ConfigError::Invalid {
                key: "REQUEST_TIMEOUT_MS",
                value: request_timeout.as_millis().to_string(),
                reason: format!(
                    "must exceed {} ms, the body read, lookup and ticket timeouts combined",
                    worst_case.as_millis()
                ),
            });
        }

        Ok(Self {
            listen_addr: vars
                .parse("LISTEN_ADDR")?
                .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8080))),
            verbose: vars.parse_bool("VERBOSE")?.unwrap_or(false),
            request_timeout,
            pipeline,
            identity_cache_ttl,
            ldap,
            jira,
        })
    }
}

/// Typed access to a key lookup. Empty values count as unset.
struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|s| !s.trim().is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    fn parse<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key)
            .map(|value| {
                let parsed: Result<T, T::Err> = value.trim().parse();
                parsed.map_err(|e| ConfigError::Invalid {
                    key,
                    reason: e.to_string(),
                    value,
                })
            })
            .transpose()
    }

    fn parse_bool(&self, key: &'static str) -> Result<Option<bool>, ConfigError> {
        self.get(key)
            .map(|value| match value.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(ConfigError::Invalid {
                    key,
                    value,
                    reason: "expected true or false".to_string(),
                }),
            })
            .transpose()
    }

    fn millis(&self, key: &'static str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.parse::<u64>(key)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn required() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("LDAP_URL", "ldap://ldap.test"),
            ("LDAP_BASE_DN", "ou=users,dc=example,dc=com"),
            ("JIRA_BASE_URL", "https://issues.test/"),
            ("JIRA_API_TOKEN", "token"),
            ("JIRA_PROJECT_KEY", "AUDIT"),
        ])
    }

    fn load(vars: &HashMap<&'static str, &'static str>) -> Result<Config, ConfigError> {
        Config::from_lookup(|key| vars.get(key).map(|v| (*v).to_string()))
    }

    #[test]
    fn test_defaults() {
        let config = load(&required()).unwrap();

        assert_eq!(config.listen_addr, SocketAddr::from(([0, 0, 0, 0], 8080)));
        assert!(!config.verbose);
        assert_eq!(config.pipeline.decoder.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
        assert_eq!(config.pipeline.decoder.mode, DecodeMode::Lenient);
        assert_eq!(config.pipeline.resolve_timeout, Duration::from_secs(10));
        assert_eq!(config.pipeline.dispatch_timeout, Duration::from_secs(30));
        assert_eq!(config.request_timeout, Duration::from_secs(90));
        assert!(config.request_timeout > config.pipeline.worst_case());
        assert!(config.identity_cache_ttl.is_none());
        assert_eq!(config.ldap.user_attribute, "uid");
        assert!(config.ldap.bind_dn.is_none());
        assert_eq!(config.jira.base_url, "https://issues.test");
        assert_eq!(config.jira.issue_type, "Task");
        assert_eq!(config.jira.labels, vec!["compliance-audit"]);
    }

    #[test]
    fn test_overrides() {
        let mut vars = required();
        vars.insert("LISTEN_ADDR", "127.0.0.1:9000");
        vars.insert("VERBOSE", "1");
        vars.insert("STRICT_DECODING", "true");
        vars.insert("MAX_BODY_BYTES", "2048");
        vars.insert("RESOLVE_TIMEOUT_MS", "250");
        vars.insert("IDENTITY_CACHE_TTL_SECS", "300");
        vars.insert("JIRA_LABELS", "sox, audit ,,");
        vars.insert("JIRA_USERNAME", "svc-audit");

        let config = load(&vars).unwrap();

        assert_eq!(config.listen_addr.port(), 9000);
        assert!(config.verbose);
        assert_eq!(config.pipeline.decoder.mode, DecodeMode::Strict);
        assert_eq!(config.pipeline.decoder.max_body_bytes, 2048);
        assert_eq!(config.pipeline.resolve_timeout, Duration::from_millis(250));
        assert_eq!(config.ldap.connect_timeout, Duration::from_millis(250));
        assert_eq!(config.identity_cache_ttl, Some(Duration::from_secs(300)));
        assert_eq!(config.jira.labels, vec!["sox", "audit"]);
        assert_eq!(config.jira.username.as_deref(), Some("svc-audit"));
    }

    #[test]
    fn test_zero_ttl_disables_cache() {
        let mut vars = required();
        vars.insert("IDENTITY_CACHE_TTL_SECS", "0");

        assert!(load(&vars).unwrap().identity_cache_ttl.is_none());
    }

    #[test]
    fn test_missing_required_key() {
        let mut vars = required();
        vars.remove("JIRA_API_TOKEN");

        let err = load(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("JIRA_API_TOKEN")));
        assert_eq!(err.to_string(), "JIRA_API_TOKEN must be set");
    }

    #[test]
    fn test_invalid_values_name_the_key() {
        let mut vars = required();
        vars.insert("MAX_BODY_BYTES", "lots");
        let err = load(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "MAX_BODY_BYTES", .. }));

        let mut vars = required();
        vars.insert("VERBOSE", "sometimes");
        let err = load(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "VERBOSE", .. }));
    }

    #[test]
    fn test_request_timeout_must_cover_pipeline_timeouts() {
        let mut vars = required();
        vars.insert("REQUEST_TIMEOUT_MS", "60000");
        let err = load(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "REQUEST_TIMEOUT_MS", .. }));
        assert!(err.to_string().contains("80000 ms"));

        let mut vars = required();
        vars.insert("REQUEST_TIMEOUT_MS", "5000");
        vars.insert("BODY_READ_TIMEOUT_MS", "1000");
        vars.insert("RESOLVE_TIMEOUT_MS", "1000");
        vars.insert("DISPATCH_TIMEOUT_MS", "1000");
        assert_eq!(
            load(&vars).unwrap().request_timeout,
            Duration::from_secs(5)
        );
    }
}
