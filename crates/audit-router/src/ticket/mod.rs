//! Ticket dispatch: opening a tracking ticket for a resolved alert.

pub mod jira;

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

use crate::alert::{AlertPayload, AlertResult};
use crate::identity::{Identity, ManagerIdentity, ResolvedIdentity};

pub use jira::JiraDispatcher;

/// Identifier of a created ticket, e.g. `AUDIT-123`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketId(pub String);

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything needed to open one ticket. Lives for a single pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct TicketRequest {
    /// Search id of the alert.
    pub sid: String,
    /// Alert name shown in the ticket summary.
    pub alert_name: String,
    /// Link back to the search results.
    pub results_link: Option<String>,
    /// Assignee.
    pub user: Identity,
    /// Watcher, when the directory knows one.
    pub manager: Option<ManagerIdentity>,
    /// The result row that fired the alert.
    pub result: AlertResult,
}

impl TicketRequest {
    /// Combine a decoded alert with the identities resolved for it.
    #[must_use]
    pub fn new(alert: AlertPayload, identity: ResolvedIdentity) -> Self {
        let alert_name = alert.display_name().to_string();
        Self {
            sid: alert.sid,
            alert_name,
            results_link: alert.results_link,
            user: identity.user,
            manager: identity.manager,
            result: alert.result,
        }
    }
}

/// Errors returned by ticket dispatchers.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The tracker rejected the ticket
    #[error("issue tracker returned {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The call did not finish in time
    #[error("issue tracker call timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Opens tickets in an issue tracker.
///
/// `create_ticket` is called at most once per alert; implementations must not
/// retry on their own. `add_watcher` runs after a ticket exists, so its
/// failures never undo the ticket.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TicketDispatcher: Send + Sync {
    /// Name of the backing tracker, for logs.
    fn name(&self) -> &'static str;

    /// Create a ticket and return its identifier.
    async fn create_ticket(&self, request: &TicketRequest) -> Result<TicketId, DispatchError>;

    /// Subscribe someone to an existing ticket.
    async fn add_watcher(&self, ticket: &TicketId, watcher: &Identity) -> Result<(), DispatchError>;
}
