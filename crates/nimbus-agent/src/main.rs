//! The `nimbus-agent` binary: wires [`nimbus_health::Agent`]'s probe
//! loop, status-collection loop, and RPC/HTTP surface behind a small
//! operational CLI, the same `clap::Parser` + `#[tokio::main]` +
//! `run(args)` shape the teacher workspace's `clusterd` binary uses.

mod checkers;
mod config;
mod membership;
mod peer_client;
mod server;
mod tls;

use std::collections::BTreeMap;
use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use nimbus_health::config::{AgentConfig, TlsConfig, TAG_ROLE};
use nimbus_health::http::{json_router, metrics_router, MuxService};
use nimbus_health::{Agent, AgentRpc};
use nimbus_ore::metrics::MetricsRegistry;
use nimbus_ore::task::TaskGroup;
use nimbus_proto::agent_server::AgentServer;

use crate::checkers::{DiskSpaceChecker, LivenessChecker};
use crate::config::{Args, TlsMaterial};
use crate::membership::StaticMembership;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(err) = run(args).await {
        eprintln!("nimbus-agent: fatal: {err:#}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), anyhow::Error> {
    nimbus_ore::logging::init("nimbus-agent");

    let peers = args
        .peers
        .iter()
        .map(|raw| StaticMembership::parse_peer(raw).map_err(anyhow::Error::msg))
        .collect::<Result<Vec<_>, _>>()?;
    let membership = Arc::new(StaticMembership::new(peers));

    let mut tags = BTreeMap::new();
    tags.insert(TAG_ROLE.to_string(), args.role.clone());

    let checkers: Vec<Arc<dyn nimbus_health::Checker>> = vec![
        Arc::new(LivenessChecker),
        Arc::new(DiskSpaceChecker::new(
            args.state_dir.clone(),
            args.min_free_disk_bytes,
        )),
    ];

    let agent_config = AgentConfig {
        node_name: args.node_name.clone(),
        tags,
        tls: TlsConfig {
            ca_cert: args.ca_cert.clone(),
            cert: args.cert.clone(),
            key: args.key.clone(),
        },
        rpc_listen_addr: args.rpc_listen_addr,
        metrics_listen_addr: args.metrics_listen_addr,
        debug_socket_path: args.debug_socket_path.clone(),
        state_dir: args.state_dir.clone(),
        probe_interval: args.probe_interval(),
        status_collection_interval: args.status_collection_interval(),
        local_peer_timeout: args.local_peer_timeout(),
        remote_peer_timeout: args.remote_peer_timeout(),
        timeline_push_interval: args.timeline_push_interval(),
        max_concurrent_checkers: args.max_concurrent_checkers,
        per_check_timeout: args.per_check_timeout(),
        checkers,
        membership,
    };

    let agent = Arc::new(Agent::new(agent_config).context("starting health agent")?);
    let tls_material = Arc::new(TlsMaterial::load(&args).context("loading TLS material")?);
    let tls_server_config =
        tls::build_server_config(&args.ca_cert, &args.cert, &args.key).context("building TLS server config")?;

    let metrics_registry = MetricsRegistry::new();

    let mut tasks = TaskGroup::new();
    let cancel = agent.root_cancel();

    // Local probe loop.
    {
        let agent = agent.clone();
        let cancel = cancel.clone();
        let interval = agent.config().probe_interval;
        tasks.spawn("probe-loop", async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = agent.run_local_probe().await {
                            tracing::warn!(%err, "local probe round failed");
                        }
                    }
                }
            }
        });
    }

    // Status-collection loop, dialing real peers over mutual TLS.
    {
        let agent = agent.clone();
        let cancel = cancel.clone();
        let tls_material = tls_material.clone();
        let remote_peer_timeout = agent.config().remote_peer_timeout;
        let interval = agent.config().status_collection_interval;
        tasks.spawn("status-collection-loop", async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let tls_material = tls_material.clone();
                        agent
                            .run_status_collection(|peer| {
                                let tls_material = tls_material.clone();
                                async move {
                                    crate::peer_client::fetch_peer_status(
                                        peer,
                                        &tls_material,
                                        remote_peer_timeout,
                                    )
                                    .await
                                }
                            })
                            .await;
                    }
                }
            }
        });
    }

    // Mutual-TLS gRPC/JSON listener.
    {
        let rpc_service = AgentServer::new(AgentRpc::new(agent.clone()));
        let mux = MuxService::new(rpc_service, agent.clone());
        let addr = args.rpc_listen_addr;
        let cancel = cancel.clone();
        let grace = args.shutdown_grace();
        tasks.spawn("rpc-listener", async move {
            if let Err(err) = server::serve_mux(addr, tls_server_config, mux, cancel, grace).await {
                tracing::error!(%err, "rpc listener exited with an error");
            }
        });
    }

    // Plaintext metrics listener, deliberately outside mutual TLS.
    {
        let addr = args.metrics_listen_addr;
        let cancel = cancel.clone();
        tasks.spawn("metrics-listener", async move {
            let router = metrics_router(metrics_registry);
            let server = axum::Server::bind(&addr).serve(router.into_make_service());
            tracing::info!(%addr, "serving metrics listener");
            let graceful = server.with_graceful_shutdown(async move { cancel.cancelled().await });
            if let Err(err) = graceful.await {
                tracing::error!(%err, "metrics listener exited with an error");
            }
        });
    }

    // Plaintext debug unix socket, only when explicitly configured.
    if let Some(debug_socket_path) = args.debug_socket_path.clone() {
        let json = json_router(agent.clone());
        let cancel = cancel.clone();
        tasks.spawn("debug-socket-listener", async move {
            if let Err(err) = server::serve_debug_unix(&debug_socket_path, json, cancel).await {
                tracing::error!(%err, "debug socket listener exited with an error");
            }
        });
    }

    tracing::info!(node_name = %args.node_name, role = %args.role, "nimbus-agent started");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    tracing::info!("shutdown signal received");
    agent.close();

    while !tasks.is_empty() {
        if let Some(Err(err)) = tasks.join_next().await {
            tracing::warn!(%err, "a background task panicked during shutdown");
        }
    }

    Ok(())
}
