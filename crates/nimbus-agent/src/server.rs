//! The mutual-TLS accept loop serving [`nimbus_health::http::MuxService`]
//! on one listener (§4.E point 4, §6). `tonic::transport::Server` isn't
//! used here since the gRPC and JSON surfaces share a port; instead this
//! drives `hyper::server::conn::Http` directly over a
//! `tokio_rustls`-accepted stream, the same low-level pattern
//! `tokio_rustls::TlsAcceptor::from` is built for.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use hyper::server::conn::Http;
use tokio::net::{TcpListener, UnixListener};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tower::Service;

use nimbus_ore::task::TaskGroup;

/// Accepts TLS connections on `addr` and serves each with `service`
/// until `cancel` fires, then waits up to `grace` for in-flight
/// connections to finish before returning.
pub async fn serve_mux<S, B>(
    addr: SocketAddr,
    tls_config: Arc<rustls::ServerConfig>,
    service: S,
    cancel: CancellationToken,
    grace: Duration,
) -> Result<(), anyhow::Error>
where
    S: Service<hyper::Request<hyper::Body>, Response = hyper::Response<B>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    B: http_body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let listener = TcpListener::bind(addr).await?;
    let acceptor = TlsAcceptor::from(tls_config);
    let mut connections = TaskGroup::new();

    tracing::info!(%addr, "serving mutual-TLS gRPC/JSON listener");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer_addr) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        tracing::warn!(%err, "accept failed");
                        continue;
                    }
                };
                let acceptor = acceptor.clone();
                let mut service = service.clone();
                connections.spawn("rpc-connection", async move {
                    let tls_stream = match acceptor.accept(stream).await {
                        Ok(tls_stream) => tls_stream,
                        Err(err) => {
                            tracing::warn!(%err, %peer_addr, "tls handshake failed");
                            return;
                        }
                    };
                    let result = Http::new()
                        .serve_connection(tls_stream, hyper::service::service_fn(move |req| service.call(req)))
                        .await;
                    if let Err(err) = result {
                        tracing::warn!(%err, %peer_addr, "connection closed with an error");
                    }
                });
            }
        }
    }

    tracing::info!("rpc listener shutting down, draining connections");
    let drain = async {
        while !connections.is_empty() {
            connections.join_next().await;
        }
    };
    if tokio::time::timeout(grace, drain).await.is_err() {
        tracing::warn!("shutdown grace period elapsed, aborting remaining connections");
        connections.abort_all();
    }
    Ok(())
}

/// Serves `service` in plaintext over a unix socket at `path`, for local
/// debugging without going through the mutual-TLS listener. Removes any
/// stale socket file left behind by a previous, ungracefully-terminated
/// run before binding.
pub async fn serve_debug_unix<S, B>(
    path: &Path,
    service: S,
    cancel: CancellationToken,
) -> Result<(), anyhow::Error>
where
    S: Service<hyper::Request<hyper::Body>, Response = hyper::Response<B>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    B: http_body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    let listener = UnixListener::bind(path)?;
    let mut connections = TaskGroup::new();

    tracing::info!(path = %path.display(), "serving debug unix socket listener");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => {
                let stream = match accepted {
                    Ok((stream, _)) => stream,
                    Err(err) => {
                        tracing::warn!(%err, "debug socket accept failed");
                        continue;
                    }
                };
                let mut service = service.clone();
                connections.spawn("debug-connection", async move {
                    let result = Http::new()
                        .serve_connection(stream, hyper::service::service_fn(move |req| service.call(req)))
                        .await;
                    if let Err(err) = result {
                        tracing::warn!(%err, "debug socket connection closed with an error");
                    }
                });
            }
        }
    }

    tracing::info!("debug socket listener shutting down, draining connections");
    while !connections.is_empty() {
        connections.join_next().await;
    }
    let _ = std::fs::remove_file(path);
    Ok(())
}
