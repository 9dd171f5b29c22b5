//! eventgate — webhook-driven trigger service.
//!
//! Startup: resolve the bundle index URL, download and extract the
//! trigger bundle, build the message service and trigger program from
//! it, then serve the webhook listener until interrupted. Any failure
//! before the listener is up is fatal.

mod listener;
mod sink;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use eventgate_bundle::load_bundle;
use eventgate_engine::{
    installation_namespace, Dispatcher, EngineContext, TriggerProgram, EVENT_DEFINITIONS_FILE,
};
use eventgate_messages::Service;

use listener::{router, ListenerState, DEFAULT_EVENT_SOURCE};
use sink::LoggingSink;

/// Environment variable overriding the bundle index URL.
const INDEX_URL_ENV: &str = "KABANERO_INDEX_URL";

const TLS_PORT: u16 = 9443;
const PLAIN_PORT: u16 = 9080;

#[derive(Debug, Parser)]
#[command(name = "eventgate", about = "Event-driven trigger service")]
struct Args {
    /// Orchestrator client configuration file, passed to the resource
    /// sink binding when running outside the cluster.
    #[arg(long = "kubeconfig")]
    kubeconfig: Option<String>,

    /// Orchestrator API endpoint override, passed with --kubeconfig.
    #[arg(long = "master")]
    master: Option<String>,

    /// Serve plain HTTP on port 9080 instead of 9443.
    #[arg(long = "disableTLS")]
    disable_tls: bool,

    /// Skip SHA-256 verification of the downloaded trigger bundle.
    #[arg(long = "skipChecksumVerify")]
    skip_checksum_verify: bool,

    /// Trigger bundle index URL; overrides KABANERO_INDEX_URL.
    #[arg(long = "triggerURL")]
    trigger_url: Option<String>,

    /// Event source incoming webhooks are dispatched to.
    #[arg(long = "eventSource", default_value = DEFAULT_EVENT_SOURCE)]
    event_source: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    if let (Some(kubeconfig), master) = (&args.kubeconfig, &args.master) {
        tracing::info!(
            kubeconfig = %kubeconfig,
            master = %master.as_deref().unwrap_or(""),
            "orchestrator client configuration (consumed by the resource sink binding)"
        );
    }

    let index_url = args
        .trigger_url
        .or_else(|| std::env::var(INDEX_URL_ENV).ok())
        .context("no bundle index URL: pass --triggerURL or set KABANERO_INDEX_URL")?;

    let namespace = installation_namespace();
    tracing::info!(namespace = %namespace, index = %index_url, "starting eventgate");

    // Everything from here to the listener is startup-fatal.
    let bundle = load_bundle(&index_url, !args.skip_checksum_verify)
        .await
        .context("failed to load trigger bundle")?;

    let service = Service::from_config_file(&bundle.root().join(EVENT_DEFINITIONS_FILE))
        .await
        .context("failed to build message service")?;

    let program = TriggerProgram::load(bundle.root()).context("failed to load trigger program")?;
    tracing::info!(
        sources = program.event_triggers.len(),
        functions = program.functions.len(),
        dryrun = program.dryrun(),
        "trigger program loaded"
    );

    let ctx = EngineContext::builder(program)
        .message_service(Arc::new(service))
        .resource_sink(Arc::new(LoggingSink))
        .namespace(namespace)
        .bundle_root(bundle.root())
        .build();
    let dispatcher = Dispatcher::new(ctx);

    let port = if args.disable_tls { PLAIN_PORT } else { TLS_PORT };
    if !args.disable_tls {
        // Certificate handling is the deployment's concern (sidecar or
        // ingress); the process itself always speaks plain HTTP.
        tracing::warn!("TLS termination is delegated to the platform in front of port {TLS_PORT}");
    }
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let app = router(ListenerState {
        dispatcher,
        event_source: args.event_source,
    });

    let tcp = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(addr = %addr, "webhook listener ready");

    axum::serve(tcp, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("listener failed")?;

    // Dropping the bundle removes the scratch directory.
    drop(bundle);
    tracing::info!("shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to install shutdown handler: {e}");
    }
}
