//! The alert pipeline.
//!
//! One run per inbound request, strictly linear:
//!
//! ```text
//! Received -> Decoded -> Resolved -> Dispatched -> Responded
//!     |          |           |
//! DecodeFailed ResolveFailed DispatchFailed  -> Responded
//! ```
//!
//! Each stage consumes the previous stage's value and either produces the
//! next one or a terminal [`PipelineOutcome`]. Nothing is retried and no state
//! outlives the run.

use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use crate::alert::AlertPayload;
use crate::config::PipelineConfig;
use crate::decoder::{AlertDecoder, DecodeError};
use crate::identity::{IdentityResolver, ResolveError};
use crate::ticket::{DispatchError, TicketDispatcher, TicketId, TicketRequest};

const OK_BODY: &str = "ok";
const INTERNAL_ERROR: &str = "Internal Server Error";
const LOOKUP_FAILED: &str = "failed identity lookup";
const DISPATCH_FAILED: &str = "failed ticket creation";

/// Named pipeline states, as they appear in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Decoded,
    Resolved,
    Dispatched,
    Responded,
    DecodeFailed,
    ResolveFailed,
    DispatchFailed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Decoded => "decoded",
            Self::Resolved => "resolved",
            Self::Dispatched => "dispatched",
            Self::Responded => "responded",
            Self::DecodeFailed => "decode_failed",
            Self::ResolveFailed => "resolve_failed",
            Self::DispatchFailed => "dispatch_failed",
        }
    }
}

/// Terminal value of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// A ticket was created.
    Success { ticket: TicketId },
    /// The body was rejected, or could not be read.
    DecodeError { status: StatusCode, message: String },
    /// The user could not be resolved.
    LookupError { message: String },
    /// The ticket could not be created.
    DispatchError { message: String },
}

impl PipelineOutcome {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Success { .. } => StatusCode::OK,
            Self::DecodeError { status, .. } => *status,
            Self::LookupError { .. } | Self::DispatchError { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Body returned to the caller.
    pub fn message(&self) -> &str {
        match self {
            Self::Success { .. } => OK_BODY,
            Self::DecodeError { message, .. }
            | Self::LookupError { message }
            | Self::DispatchError { message } => message,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

impl IntoResponse for PipelineOutcome {
    fn into_response(self) -> Response {
        (
            self.status(),
            [(header::CONTENT_TYPE, "text/plain")],
            self.message().to_string(),
        )
            .into_response()
    }
}

/// An alert that passed decoding.
#[derive(Debug)]
pub struct Decoded {
    pub alert: AlertPayload,
}

/// An alert with its identities resolved, ready to become a ticket.
#[derive(Debug)]
pub struct Resolved {
    pub request: TicketRequest,
}

/// An alert whose ticket exists.
#[derive(Debug)]
pub struct Dispatched {
    pub sid: String,
    pub ticket: TicketId,
}

/// Sequences decode, identity resolution and ticket dispatch for one alert.
pub struct AlertPipeline {
    config: PipelineConfig,
    decoder: AlertDecoder,
    resolver: Arc<dyn IdentityResolver>,
    dispatcher: Arc<dyn TicketDispatcher>,
}

impl AlertPipeline {
    #[must_use]
    pub fn new(
        config: PipelineConfig,
        resolver: Arc<dyn IdentityResolver>,
        dispatcher: Arc<dyn TicketDispatcher>,
    ) -> Self {
        Self {
            decoder: AlertDecoder::new(config.decoder.clone()),
            config,
            resolver,
            dispatcher,
        }
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the pipeline for one request.
    pub async fn run(&self, headers: &HeaderMap, body: Body) -> PipelineOutcome {
        let span = info_span!("alert", run_id = %Uuid::new_v4(), sid = tracing::field::Empty);

        async move {
            info!(stage = Stage::Received.as_str(), "Alert request received");

            let outcome = match self.advance(headers, body).await {
                Ok(dispatched) => Self::respond(dispatched),
                Err(outcome) => outcome,
            };

            info!(
                stage = Stage::Responded.as_str(),
                status = outcome.status().as_u16(),
                "Alert processed"
            );
            outcome
        }
        .instrument(span)
        .await
    }

    async fn advance(&self, headers: &HeaderMap, body: Body) -> Result<Dispatched, PipelineOutcome> {
        let decoded = self.decode(headers, body).await?;
        Span::current().record("sid", decoded.alert.sid.as_str());

        let resolved = self.resolve(decoded).await?;
        self.dispatch(resolved).await
    }

    /// `Received -> Decoded`.
    pub async fn decode(&self, headers: &HeaderMap, body: Body) -> Result<Decoded, PipelineOutcome> {
        match self.decoder.decode(headers, body).await {
            Ok(alert) => {
                info!(
                    stage = Stage::Decoded.as_str(),
                    sid = %alert.sid,
                    search = %alert.display_name(),
                    user = %alert.result.user,
                    raw = %alert.result.raw,
                    "Received alert from Splunk"
                );
                Ok(Decoded { alert })
            }
            Err(DecodeError::Malformed(rejection)) => {
                warn!(
                    stage = Stage::DecodeFailed.as_str(),
                    status = rejection.status.as_u16(),
                    error = %rejection,
                    detail = rejection.detail.as_deref(),
                    "Rejected malformed alert"
                );
                Err(PipelineOutcome::DecodeError {
                    status: rejection.status,
                    message: rejection.message,
                })
            }
            Err(e) => {
                error!(
                    stage = Stage::DecodeFailed.as_str(),
                    error = %e,
                    "Failed to read alert body"
                );
                Err(PipelineOutcome::DecodeError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: INTERNAL_ERROR.to_string(),
                })
            }
        }
    }

    /// `Decoded -> Resolved`.
    pub async fn resolve(&self, decoded: Decoded) -> Result<Resolved, PipelineOutcome> {
        let alert = decoded.alert;
        let username = alert.result.user.as_str();
        let timeout = self.config.resolve_timeout;

        let lookup = tokio::time::timeout(timeout, self.resolver.resolve(username))
            .await
            .unwrap_or_else(|_| {
                Err(ResolveError::Unavailable(format!(
                    "lookup timed out after {timeout:?}"
                )))
            });

        match lookup {
            Ok(identity) => {
                if identity.manager.is_none() {
                    warn!(
                        sid = %alert.sid,
                        username,
                        "No manager on record, ticket will only be assigned to the user"
                    );
                }
                info!(
                    stage = Stage::Resolved.as_str(),
                    sid = %alert.sid,
                    username,
                    manager = identity.manager.as_ref().map(|m| m.username.as_str()),
                    "Resolved alert identity"
                );
                Ok(Resolved {
                    request: TicketRequest::new(alert, identity),
                })
            }
            Err(e) => {
                error!(
                    stage = Stage::ResolveFailed.as_str(),
                    sid = %alert.sid,
                    username,
                    kind = e.kind(),
                    error = %e,
                    "Identity lookup failed"
                );
                Err(PipelineOutcome::LookupError {
                    message: LOOKUP_FAILED.to_string(),
                })
            }
        }
    }

    /// `Resolved -> Dispatched`.
    ///
    /// Ticket creation and the manager watcher are bounded separately. Once
    /// the ticket exists the stage succeeds, whatever happens to the watcher.
    pub async fn dispatch(&self, resolved: Resolved) -> Result<Dispatched, PipelineOutcome> {
        let request = resolved.request;
        let timeout = self.config.dispatch_timeout;

        let created = tokio::time::timeout(timeout, self.dispatcher.create_ticket(&request))
            .await
            .unwrap_or_else(|_| Err(DispatchError::Timeout(timeout)));

        let ticket = match created {
            Ok(ticket) => ticket,
            Err(e) => {
                error!(
                    stage = Stage::DispatchFailed.as_str(),
                    sid = %request.sid,
                    username = %request.user.username,
                    error = %e,
                    "Ticket creation failed"
                );
                return Err(PipelineOutcome::DispatchError {
                    message: DISPATCH_FAILED.to_string(),
                });
            }
        };

        if let Some(manager) = &request.manager {
            let watched = tokio::time::timeout(timeout, self.dispatcher.add_watcher(&ticket, manager))
                .await
                .unwrap_or_else(|_| Err(DispatchError::Timeout(timeout)));

            if let Err(e) = watched {
                warn!(
                    sid = %request.sid,
                    ticket = %ticket,
                    manager = %manager.username,
                    error = %e,
                    "Failed to add manager as watcher"
                );
            }
        }

        info!(
            stage = Stage::Dispatched.as_str(),
            sid = %request.sid,
            ticket = %ticket,
            "Ticket created"
        );
        Ok(Dispatched {
            sid: request.sid,
            ticket,
        })
    }

    /// `Dispatched -> Responded`.
    fn respond(dispatched: Dispatched) -> PipelineOutcome {
        PipelineOutcome::Success {
            ticket: dispatched.ticket,
        }
    }
}
