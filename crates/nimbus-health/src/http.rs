//! The HTTPS/JSON view of the agent's status (§4.E point 4, §6), and the
//! byte-level mux that lets it share one listener with the tonic gRPC
//! service. Grounded in the teacher workspace's `mz_http_util`
//! (`handle_liveness_check`/`handle_prometheus` style handlers) for the
//! handler shapes, and in `materialized`'s practice of routing by
//! `Content-Type: application/grpc` ahead of any handler logic rather
//! than inside axum's router.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use hyper::{Body, Request};
use tower::Service;

use nimbus_ore::metrics::MetricsRegistry;

use crate::agent::Agent;
use crate::types::NodeStatusKind;

#[derive(Clone)]
struct HttpState {
    agent: Arc<Agent>,
}

/// `GET /`: the aggregated `SystemStatus`, HTTP 503 when degraded (§7
/// "User-visible failure behavior").
async fn handle_root(State(state): State<HttpState>) -> impl IntoResponse {
    match state.agent.system_status() {
        Some(status) => {
            let code = if status.status == NodeStatusKind::Degraded {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::OK
            };
            (code, Json(status)).into_response()
        }
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "summary": "no status-collection round has completed yet" })),
        )
            .into_response(),
    }
}

/// `GET /local`: this node's own `NodeStatus`.
async fn handle_local(State(state): State<HttpState>) -> impl IntoResponse {
    match state.agent.local_status() {
        Some(status) => Json(status).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "summary": "no probe round has completed yet" })),
        )
            .into_response(),
    }
}

/// `GET /history`: the local timeline since the epoch. Masters serving
/// `/history` expose the local, not cluster, timeline — the cluster
/// timeline is only reachable via the gRPC `Timeline` RPC, which is
/// role-gated.
async fn handle_history(State(state): State<HttpState>) -> impl IntoResponse {
    let since = chrono::DateTime::from_timestamp(0, 0).unwrap();
    match state.agent.local_timeline().since(since) {
        Ok(events) => Json(events).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

/// The plain JSON surface with no gRPC mux in front of it, for serving
/// over a channel that's already trusted (e.g. a local debug unix
/// socket) without the mutual-TLS ceremony the primary listener needs.
pub fn json_router(agent: Arc<Agent>) -> Router {
    Router::new()
        .route("/", get(handle_root))
        .route("/local", get(handle_local))
        .route("/history", get(handle_history))
        .with_state(HttpState { agent })
}

/// A `tower::Service` that sniffs `Content-Type: application/grpc` on
/// every incoming request and routes it to the tonic gRPC service;
/// everything else goes to the JSON router. Both services are polled
/// out of the same `hyper` listener (§4.E point 4: "multiplexed with an
/// HTTPS JSON endpoint on the same port").
pub type BoxResponseBody = axum::body::BoxBody;

#[derive(Clone)]
pub struct MuxService<G> {
    grpc: G,
    json: Router,
}

impl<G> MuxService<G> {
    pub fn new(grpc: G, agent: Arc<Agent>) -> MuxService<G> {
        MuxService {
            grpc,
            json: json_router(agent),
        }
    }
}

fn is_grpc_request(request: &Request<Body>) -> bool {
    request
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .map(|value| value.as_bytes().starts_with(b"application/grpc"))
        .unwrap_or(false)
}

impl<G, GBody> Service<Request<Body>> for MuxService<G>
where
    G: Service<Request<Body>, Response = axum::http::Response<GBody>, Error = Infallible>
        + Clone
        + Send
        + 'static,
    G::Future: Send + 'static,
    GBody: http_body::Body<Data = bytes::Bytes> + Send + 'static,
    GBody::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Response = axum::http::Response<BoxResponseBody>;
    type Error = Infallible;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.json.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        if is_grpc_request(&request) {
            let mut grpc = self.grpc.clone();
            Box::pin(async move {
                let response = grpc.call(request).await?;
                Ok(response.map(axum::body::boxed))
            })
        } else {
            let mut json = self.json.clone();
            Box::pin(async move {
                let response = json.call(request).await.expect("axum router is infallible");
                Ok(response)
            })
        }
    }
}

/// Serves Prometheus text-format metrics on a dedicated listener,
/// separate from the RPC/JSON port (§4.E point 4).
pub fn metrics_router(registry: MetricsRegistry) -> Router {
    Router::new().route(
        "/metrics",
        get(move || {
            let registry = registry.clone();
            async move {
                match registry.encode_text() {
                    Ok(body) => (StatusCode::OK, body).into_response(),
                    Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
                }
            }
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tower::ServiceExt;

    fn test_request(content_type: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/");
        if let Some(ct) = content_type {
            builder = builder.header(axum::http::header::CONTENT_TYPE, ct);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn grpc_content_type_is_detected() {
        assert!(is_grpc_request(&test_request(Some("application/grpc"))));
        assert!(is_grpc_request(&test_request(Some(
            "application/grpc+proto"
        ))));
        assert!(!is_grpc_request(&test_request(Some("application/json"))));
        assert!(!is_grpc_request(&test_request(None)));
    }

    struct NoPeers;

    #[async_trait::async_trait]
    impl crate::config::MembershipClient for NoPeers {
        async fn members(&self) -> Vec<crate::config::PeerAddress> {
            Vec::new()
        }
    }

    fn minimal_config(dir: &std::path::Path) -> crate::config::AgentConfig {
        let mut tags = BTreeMap::new();
        tags.insert("role".to_string(), "node".to_string());
        crate::config::AgentConfig {
            node_name: "n1".to_string(),
            tags,
            tls: crate::config::TlsConfig {
                ca_cert: dir.join("ca.pem"),
                cert: dir.join("cert.pem"),
                key: dir.join("key.pem"),
            },
            rpc_listen_addr: "127.0.0.1:0".parse().unwrap(),
            metrics_listen_addr: "127.0.0.1:0".parse().unwrap(),
            debug_socket_path: None,
            state_dir: dir.to_path_buf(),
            probe_interval: std::time::Duration::from_secs(30),
            status_collection_interval: std::time::Duration::from_secs(30),
            local_peer_timeout: std::time::Duration::from_secs(1),
            remote_peer_timeout: std::time::Duration::from_secs(5),
            timeline_push_interval: std::time::Duration::from_secs(30),
            max_concurrent_checkers: 8,
            per_check_timeout: std::time::Duration::from_secs(5),
            checkers: Vec::new(),
            membership: Arc::new(NoPeers),
        }
    }

    #[tokio::test]
    async fn root_returns_503_before_any_status_is_collected() {
        let dir = tempfile::tempdir().unwrap();
        let agent = Arc::new(Agent::new(minimal_config(dir.path())).unwrap());
        let router = json_router(agent);
        let response = router.oneshot(test_request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
