//! Transport wiring
//!
//! Serves the agent over stdio. The protocol connection is `!Send`, so the
//! whole bridge runs inside a `LocalSet`; a pump task drains the outbound
//! channel toward the client, spawning each permission round-trip separately
//! so a pending prompt never stalls other sessions' updates.

use std::rc::Rc;
use std::sync::Arc;

use agent_client_protocol as acp;
use agent_client_protocol::Client as _;
use tokio::sync::mpsc;
use tokio_util::compat::{TokioAsyncReadCompatExt, TokioAsyncWriteCompatExt};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::cli::Cli;
use crate::controller::ProcessController;
use crate::history::MemoryHistoryStore;
use crate::permission::PermissionDecision;
use crate::session::OutboundEvent;
use crate::types::AgentConfig;

use super::auth::NoAuth;
use super::core::PilotAcpAgent;

/// Build an EnvFilter based on CLI args and the RUST_LOG environment variable
///
/// Priority: RUST_LOG environment variable > CLI arguments (-v, -vv, -q)
fn build_env_filter(cli: &Cli) -> tracing_subscriber::EnvFilter {
    if let Ok(rust_log) = std::env::var("RUST_LOG") {
        if !rust_log.is_empty() {
            return tracing_subscriber::EnvFilter::new(rust_log);
        }
    }
    tracing_subscriber::EnvFilter::from_default_env().add_directive(cli.log_level().into())
}

/// Initialize logging based on CLI arguments
///
/// Stdout carries the protocol, so logs go to stderr, or to a file in
/// diagnostic mode.
fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let filter = build_env_filter(cli);

    if cli.is_diagnostic() {
        let log_path = cli.log_path();
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(&log_path)?;
        eprintln!("Diagnostic mode: logging to {}", log_path.display());

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false);
        tracing_subscriber::registry().with(filter).with(fmt_layer).init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false);
        tracing_subscriber::registry().with(filter).with(fmt_layer).init();
    }
    Ok(())
}

/// Build the bridge from CLI arguments and serve it over stdio
pub async fn run_with_cli(cli: &Cli) -> anyhow::Result<()> {
    init_logging(cli)?;

    let mut config = AgentConfig::from_env();
    if let Some(cmd) = &cli.controller_cmd {
        config.controller_cmd = Some(cmd.clone());
    }
    if !cli.controller_args.is_empty() {
        config.controller_args = cli.controller_args.clone();
    }

    let Some(cmd) = config.controller_cmd.clone() else {
        anyhow::bail!(
            "no controller command configured; pass --controller-cmd or set PILOT_CONTROLLER_CMD"
        );
    };
    let controller = Arc::new(ProcessController::new(cmd, config.controller_args.clone()));

    let (transport_tx, outbound_rx) = mpsc::unbounded_channel();
    let agent = PilotAcpAgent::new(
        config,
        controller,
        Arc::new(MemoryHistoryStore::new()),
        Arc::new(NoAuth),
        transport_tx,
    );
    serve(agent, outbound_rx).await
}

/// Serve the agent over stdin/stdout until the client disconnects
pub async fn serve(
    agent: PilotAcpAgent,
    outbound_rx: mpsc::UnboundedReceiver<OutboundEvent>,
) -> anyhow::Result<()> {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async move {
            let outgoing = tokio::io::stdout().compat_write();
            let incoming = tokio::io::stdin().compat();

            let (conn, handle_io) =
                acp::AgentSideConnection::new(agent.clone(), outgoing, incoming, |fut| {
                    tokio::task::spawn_local(fut);
                });
            let conn = Rc::new(conn);

            let pump = tokio::task::spawn_local(pump_outbound(
                Rc::clone(&conn),
                agent.clone(),
                outbound_rx,
            ));

            tracing::info!("Bridge ready, serving on stdio");
            let result = handle_io
                .await
                .map_err(|e| anyhow::anyhow!("protocol connection failed: {e}"));

            pump.abort();
            agent.shutdown().await;
            result
        })
        .await
}

/// Drain the outbound channel toward the client
async fn pump_outbound(
    conn: Rc<acp::AgentSideConnection>,
    agent: PilotAcpAgent,
    mut outbound_rx: mpsc::UnboundedReceiver<OutboundEvent>,
) {
    while let Some(item) = outbound_rx.recv().await {
        match item {
            OutboundEvent::Update(notification) => {
                if let Err(e) = conn.session_notification(notification).await {
                    tracing::warn!("Failed to deliver session update: {e}");
                }
            }
            OutboundEvent::Permission {
                request,
                session_id,
                tool_call_id,
            } => {
                // Each round-trip runs on its own task; the waiting client
                // must not block later updates.
                let conn = Rc::clone(&conn);
                let agent = agent.clone();
                tokio::task::spawn_local(async move {
                    let decision = match conn.request_permission(request).await {
                        Ok(response) => PermissionDecision::from_outcome(&response.outcome),
                        Err(e) => {
                            tracing::warn!(
                                session_id,
                                tool_call_id,
                                "Permission request failed: {e}"
                            );
                            PermissionDecision::Cancelled
                        }
                    };
                    if let Err(e) = agent.resolve_permission(&session_id, &tool_call_id, decision) {
                        // Settled elsewhere, usually by cancellation.
                        tracing::debug!(session_id, tool_call_id, "Permission already settled: {e}");
                    }
                });
            }
        }
    }
}
