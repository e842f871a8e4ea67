//! Health agent configuration (§4.E opening paragraph): everything the
//! agent needs at `Start` and nothing it should reach for a
//! package-level global afterward (§9 "Global mutable state").

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::checker::Checker;

/// `role ∈ {master, node}`, carried in `AgentConfig::tags` under the key
/// `"role"`.
pub const TAG_ROLE: &str = "role";
pub const ROLE_MASTER: &str = "master";
pub const ROLE_NODE: &str = "node";

/// Enumerates the other members of the cluster so the status-collection
/// loop knows who to dial. A thin seam so tests can supply a fixed
/// roster instead of a real discovery mechanism.
#[async_trait::async_trait]
pub trait MembershipClient: Send + Sync {
    async fn members(&self) -> Vec<PeerAddress>;
}

#[derive(Debug, Clone)]
pub struct PeerAddress {
    pub name: String,
    pub rpc_addr: SocketAddr,
    pub role: String,
}

/// TLS material paths for the mutual-TLS RPC listener (§6).
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub ca_cert: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Clone)]
pub struct AgentConfig {
    pub node_name: String,
    pub tags: BTreeMap<String, String>,
    pub tls: TlsConfig,
    pub rpc_listen_addr: SocketAddr,
    pub metrics_listen_addr: SocketAddr,
    pub debug_socket_path: Option<PathBuf>,
    pub state_dir: PathBuf,
    pub probe_interval: Duration,
    pub status_collection_interval: Duration,
    pub local_peer_timeout: Duration,
    pub remote_peer_timeout: Duration,
    pub timeline_push_interval: Duration,
    pub max_concurrent_checkers: usize,
    pub per_check_timeout: Duration,
    pub checkers: Vec<Arc<dyn Checker>>,
    pub membership: Arc<dyn MembershipClient>,
}

impl AgentConfig {
    pub fn is_master(&self) -> bool {
        self.tags.get(TAG_ROLE).map(String::as_str) == Some(ROLE_MASTER)
    }

    pub fn local_timeline_path(&self) -> PathBuf {
        self.state_dir.join("local.db")
    }

    pub fn cluster_timeline_path(&self) -> PathBuf {
        self.state_dir.join("cluster.db")
    }
}
