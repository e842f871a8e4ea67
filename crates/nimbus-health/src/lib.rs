//! Per-node health probes, peer status collection, local and cluster
//! timelines, and the RPC/HTTP surface that serves them (§4.E).
//!
//! Grounded in the teacher workspace's orchestrator health-check loop
//! for the probe/aggregation shape, `mz_service::grpc` for the gRPC
//! server pattern, and `mz_http_util` for the JSON handler shapes; the
//! byte-level content-type mux that lets both share a listener has no
//! direct teacher counterpart and is built from first principles over
//! `tower::Service`.

pub mod agent;
pub mod aggregate;
pub mod checker;
pub mod config;
pub mod error;
pub mod http;
pub mod rpc;
pub mod timeline;
pub mod types;

pub use agent::{Agent, LastSeenMap};
pub use checker::{run_probes, Checker, ProbeRunConfig};
pub use config::{AgentConfig, MembershipClient, PeerAddress, TlsConfig};
pub use error::HealthError;
pub use rpc::AgentRpc;
pub use timeline::{ClusterTimeline, LocalTimeline};
pub use types::{NodeStatus, NodeStatusKind, Probe, ProbeStatus, Severity, SystemStatus, TimelineEvent};
