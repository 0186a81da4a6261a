//! Compliance audit router.
//!
//! Receives alerts from Splunk, resolves the alerting user and their manager
//! in an LDAP directory and opens a Jira ticket assigned to the user with the
//! manager watching.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use audit_router::{build_router, AlertPipeline, Config, JiraDispatcher, LdapResolver};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::from_env()?;
//! let pipeline = AlertPipeline::new(
//!     config.pipeline.clone(),
//!     Arc::new(LdapResolver::new(config.ldap.clone())),
//!     Arc::new(JiraDispatcher::new(config.jira.clone())?),
//! );
//! let app = build_router(Arc::new(pipeline), config.verbose, config.request_timeout);
//! let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`AlertDecoder`] validates the inbound body into an [`AlertPayload`]
//! - [`IdentityResolver`] maps the alert's user to an identity and manager
//! - [`TicketDispatcher`] opens the ticket
//! - [`AlertPipeline`] sequences the three and maps failures to responses
//! - [`server`] holds the route table and health endpoints

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod alert;
pub mod config;
pub mod decoder;
pub mod identity;
pub mod pipeline;
pub mod server;
pub mod ticket;

pub use alert::{AlertPayload, AlertResult};
pub use config::{Config, ConfigError, JiraConfig, LdapConfig, PipelineConfig};
pub use decoder::{AlertDecoder, DecodeError, DecodeMode, DecoderConfig, MalformedRequest};
pub use identity::{
    CachingResolver, Identity, IdentityResolver, LdapResolver, ManagerIdentity, ResolveError,
    ResolvedIdentity,
};
pub use pipeline::{AlertPipeline, PipelineOutcome, Stage};
pub use server::{build_router, shutdown_signal, ROUTES};
pub use ticket::{DispatchError, JiraDispatcher, TicketDispatcher, TicketId, TicketRequest};
