//! HTTP surface: the route table, health handlers and the alert endpoint.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{on, MethodFilter},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, Level};

use crate::pipeline::{AlertPipeline, PipelineOutcome};

/// HTTP methods used by the route table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMethod {
    Get,
    Post,
}

impl RouteMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }

    fn filter(self) -> MethodFilter {
        match self {
            Self::Get => MethodFilter::GET,
            Self::Post => MethodFilter::POST,
        }
    }
}

/// What a route is wired to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Readiness,
    Health,
    Alert,
}

#[derive(Debug, Clone, Copy)]
pub struct Route {
    pub method: RouteMethod,
    pub path: &'static str,
    pub endpoint: Endpoint,
}

/// Every route the service exposes.
pub const ROUTES: &[Route] = &[
    Route {
        method: RouteMethod::Get,
        path: "/readyz",
        endpoint: Endpoint::Readiness,
    },
    Route {
        method: RouteMethod::Get,
        path: "/healthz",
        endpoint: Endpoint::Health,
    },
    Route {
        method: RouteMethod::Post,
        path: "/api/v1/alert",
        endpoint: Endpoint::Alert,
    },
];

/// Build the HTTP router around a pipeline.
///
/// With `verbose` set, each registered route is logged.
pub fn build_router(pipeline: Arc<AlertPipeline>, verbose: bool, request_timeout: Duration) -> Router {
    let mut router = Router::new();

    for route in ROUTES {
        if verbose {
            info!(path = route.path, method = route.method.as_str(), "enabling endpoint");
        }

        let filter = route.method.filter();
        let method_router = match route.endpoint {
            Endpoint::Readiness => on(filter, readiness_check),
            Endpoint::Health => on(filter, health_check),
            Endpoint::Alert => on(filter, alert_handler),
        };
        router = router.route(route.path, method_router);
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_request(DefaultOnRequest::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .with_state(pipeline)
}

fn plain_ok() -> impl IntoResponse {
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain")], "OK")
}

async fn readiness_check() -> impl IntoResponse {
    plain_ok()
}

async fn health_check() -> impl IntoResponse {
    plain_ok()
}

async fn alert_handler(
    State(pipeline): State<Arc<AlertPipeline>>,
    headers: HeaderMap,
    body: Body,
) -> PipelineOutcome {
    pipeline.run(&headers, body).await
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
