//! Compliance audit router binary.
//!
//! Serves the Splunk alert endpoint, resolving users in LDAP and filing
//! tickets in Jira.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use audit_router::{
    build_router, shutdown_signal, AlertPipeline, CachingResolver, Config, DecodeMode,
    IdentityResolver, JiraDispatcher, LdapResolver, TicketDispatcher,
};

/// Routes Splunk alerts to Jira tickets for the responsible user and their manager
#[derive(Parser)]
#[command(name = "audit-router")]
#[command(version)]
struct Cli {
    /// Log every route as it is registered
    #[arg(short, long)]
    verbose: bool,

    /// Reject alerts carrying unknown top-level fields
    #[arg(long)]
    strict: bool,

    /// Address to listen on (overrides LISTEN_ADDR)
    #[arg(long)]
    listen_addr: Option<SocketAddr>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    info!(
        "Starting audit router v{}",
        env!("CARGO_PKG_VERSION")
    );

    let mut config = Config::from_env().context("Invalid configuration")?;
    if cli.verbose {
        config.verbose = true;
    }
    if cli.strict {
        config.pipeline.decoder.mode = DecodeMode::Strict;
    }
    if let Some(addr) = cli.listen_addr {
        config.listen_addr = addr;
    }

    let ldap: Arc<dyn IdentityResolver> = Arc::new(LdapResolver::new(config.ldap.clone()));
    let resolver: Arc<dyn IdentityResolver> = match config.identity_cache_ttl {
        Some(ttl) => {
            info!(ttl_secs = ttl.as_secs(), "Identity cache enabled");
            Arc::new(CachingResolver::new(ldap, ttl))
        }
        None => ldap,
    };

    let dispatcher: Arc<dyn TicketDispatcher> = Arc::new(
        JiraDispatcher::new(config.jira.clone()).context("Failed to create Jira client")?,
    );

    info!(
        resolver = resolver.name(),
        dispatcher = dispatcher.name(),
        ldap_url = %config.ldap.url,
        jira_url = %config.jira.base_url,
        project = %config.jira.project_key,
        strict = config.pipeline.decoder.mode == DecodeMode::Strict,
        max_body_bytes = config.pipeline.decoder.max_body_bytes,
        "Collaborators configured"
    );

    let pipeline = AlertPipeline::new(config.pipeline.clone(), resolver, dispatcher);
    let app = build_router(Arc::new(pipeline), config.verbose, config.request_timeout);

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "Audit router listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Audit router stopped");
    Ok(())
}
