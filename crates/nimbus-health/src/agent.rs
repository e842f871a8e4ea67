//! The `Agent` value: owns the probe loop's state, the status-collection
//! loop's state, the timeline-push loop's state, and the `lastSeen` map
//! (§5 "Shared-resource policy"). The loops themselves are spawned by
//! the binary crate that owns the `TaskGroup` and the real peer-dialing
//! closure; `close` cancels the whole set with a single root token
//! (§4.E point 4's cancellation semantics).

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};

use tokio_util::sync::CancellationToken;

use crate::aggregate::{aggregate_system_status, diff_node_status};
use crate::checker::{run_probes, ProbeRunConfig};
use crate::config::AgentConfig;
use crate::error::HealthError;
use crate::timeline::{ClusterTimeline, LocalTimeline};
use crate::types::{NodeStatus, NodeStatusKind, SystemStatus};

/// In-memory snapshots the RPC/HTTP surface reads from: the most recent
/// local probe result and the most recent cluster-wide aggregation.
#[derive(Default)]
struct Snapshots {
    local: RwLock<Option<NodeStatus>>,
    system: RwLock<Option<SystemStatus>>,
}

/// A bounded, TTL-evicted record of the last time each peer was heard
/// from. Capacity is enforced by dropping the oldest entry when a new
/// peer would exceed it, matching §5's "bounded capacity with
/// LRU-style TTL eviction".
pub struct LastSeenMap {
    entries: Mutex<BTreeMap<String, chrono::DateTime<chrono::Utc>>>,
    capacity: usize,
}

impl LastSeenMap {
    pub fn new(capacity: usize) -> LastSeenMap {
        LastSeenMap {
            entries: Mutex::new(BTreeMap::new()),
            capacity,
        }
    }

    pub fn record(&self, peer: &str, at: chrono::DateTime<chrono::Utc>) {
        let mut entries = self.entries.lock().unwrap();
        if !entries.contains_key(peer) && entries.len() >= self.capacity {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, v)| **v)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }
        entries.insert(peer.to_string(), at);
    }

    pub fn get(&self, peer: &str) -> Option<chrono::DateTime<chrono::Utc>> {
        self.entries.lock().unwrap().get(peer).copied()
    }

    pub fn evict_older_than(&self, ttl: chrono::Duration, now: chrono::DateTime<chrono::Utc>) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, seen_at| now.signed_duration_since(*seen_at) < ttl);
    }
}

pub struct Agent {
    config: AgentConfig,
    local_timeline: LocalTimeline,
    cluster_timeline: Option<ClusterTimeline>,
    last_seen: LastSeenMap,
    snapshots: Arc<Snapshots>,
    root_cancel: CancellationToken,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Result<Agent, HealthError> {
        std::fs::create_dir_all(&config.state_dir).map_err(|err| {
            HealthError::BadParameter(format!("cannot create state dir: {err}"))
        })?;
        let local_timeline = LocalTimeline::open(&config.local_timeline_path())?;
        let cluster_timeline = if config.is_master() {
            Some(ClusterTimeline::open(&config.cluster_timeline_path())?)
        } else {
            None
        };
        Ok(Agent {
            last_seen: LastSeenMap::new(1024),
            local_timeline,
            cluster_timeline,
            snapshots: Arc::new(Snapshots::default()),
            root_cancel: CancellationToken::new(),
            config,
        })
    }

    pub fn local_status(&self) -> Option<NodeStatus> {
        self.snapshots.local.read().unwrap().clone()
    }

    pub fn system_status(&self) -> Option<SystemStatus> {
        self.snapshots.system.read().unwrap().clone()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn cluster_timeline(&self) -> Option<&ClusterTimeline> {
        self.cluster_timeline.as_ref()
    }

    pub fn local_timeline(&self) -> &LocalTimeline {
        &self.local_timeline
    }

    pub fn last_seen(&self, peer: &str) -> Option<chrono::DateTime<chrono::Utc>> {
        self.last_seen.get(peer)
    }

    /// Runs one iteration of the local probe loop: execute every
    /// checker, fold into a `NodeStatus`, diff against the previous
    /// snapshot, and append the resulting events to the local timeline.
    pub async fn run_local_probe(&self) -> Result<NodeStatus, HealthError> {
        let run_config = ProbeRunConfig {
            max_concurrent: self.config.max_concurrent_checkers,
            per_check_timeout: self.config.per_check_timeout,
        };
        let probes = run_probes(&self.config.checkers, &run_config).await;
        let current = NodeStatus::from_probes(self.config.node_name.clone(), probes);

        let previous = self.snapshots.local.read().unwrap().clone();
        let now = chrono::Utc::now();
        let events = diff_node_status(now, previous.as_ref(), &current);
        if !events.is_empty() {
            self.local_timeline.append(&events)?;
        }

        *self.snapshots.local.write().unwrap() = Some(current.clone());
        Ok(current)
    }

    /// Runs one iteration of the status-collection loop: gathers this
    /// node's local status plus every peer's, tolerating per-peer
    /// timeouts as `Unknown`, and aggregates a `SystemStatus`.
    pub async fn run_status_collection<F, Fut>(&self, fetch_peer: F) -> SystemStatus
    where
        F: Fn(crate::config::PeerAddress) -> Fut,
        Fut: std::future::Future<Output = Option<NodeStatus>>,
    {
        let peers = self.config.membership.members().await;
        let mut master_names: Vec<String> = peers
            .iter()
            .filter(|p| p.role == crate::config::ROLE_MASTER)
            .map(|p| p.name.clone())
            .collect();
        if self.config.is_master() {
            master_names.push(self.config.node_name.clone());
        }

        let mut nodes = Vec::with_capacity(peers.len() + 1);
        if let Some(local) = self.local_status() {
            nodes.push(local);
        } else {
            nodes.push(NodeStatus::unknown(self.config.node_name.clone()));
        }

        for peer in peers {
            let name = peer.name.clone();
            let status = fetch_peer(peer).await;
            if status.is_some() {
                self.last_seen.record(&name, chrono::Utc::now());
            }
            nodes.push(status.unwrap_or_else(|| NodeStatus::unknown(name)));
        }

        let status = aggregate_system_status(chrono::Utc::now(), nodes, &master_names);
        *self.snapshots.system.write().unwrap() = Some(status.clone());
        status
    }

    pub fn root_cancel(&self) -> CancellationToken {
        self.root_cancel.clone()
    }

    /// Cancels the root token, causing every loop spawned against it to
    /// exit on its next suspension point (§4.E "Cancellation").
    pub fn close(&self) {
        self.root_cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::Checker;
    use crate::types::Probe;
    use async_trait::async_trait;

    struct AlwaysHealthy;

    #[async_trait]
    impl Checker for AlwaysHealthy {
        fn name(&self) -> &str {
            "always"
        }
        async fn check(&self) -> Probe {
            Probe::running("always")
        }
    }

    struct NoPeers;

    #[async_trait::async_trait]
    impl crate::config::MembershipClient for NoPeers {
        async fn members(&self) -> Vec<crate::config::PeerAddress> {
            Vec::new()
        }
    }

    fn test_config(dir: &std::path::Path, role: &str) -> AgentConfig {
        let mut tags = BTreeMap::new();
        tags.insert("role".to_string(), role.to_string());
        AgentConfig {
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
            checkers: vec![Arc::new(AlwaysHealthy)],
            membership: Arc::new(NoPeers),
        }
    }

    #[tokio::test]
    async fn a_master_with_no_peers_reports_itself_healthy() {
        let dir = tempfile::tempdir().unwrap();
        let agent = Agent::new(test_config(dir.path(), "master")).unwrap();
        agent.run_local_probe().await.unwrap();
        let status = agent.run_status_collection(|_| async { None }).await;
        assert_eq!(status.status, NodeStatusKind::Running);
    }

    #[tokio::test]
    async fn a_node_without_master_role_reports_degraded() {
        let dir = tempfile::tempdir().unwrap();
        let agent = Agent::new(test_config(dir.path(), "node")).unwrap();
        agent.run_local_probe().await.unwrap();
        let status = agent.run_status_collection(|_| async { None }).await;
        assert_eq!(status.status, NodeStatusKind::Degraded);
        assert_eq!(status.summary, "master node unavailable");
    }

    #[tokio::test]
    async fn last_seen_map_evicts_the_oldest_entry_past_capacity() {
        let map = LastSeenMap::new(2);
        let t0 = chrono::DateTime::from_timestamp(0, 0).unwrap();
        let t1 = chrono::DateTime::from_timestamp(10, 0).unwrap();
        let t2 = chrono::DateTime::from_timestamp(20, 0).unwrap();
        map.record("a", t0);
        map.record("b", t1);
        map.record("c", t2);
        assert!(map.get("a").is_none());
        assert!(map.get("b").is_some());
        assert!(map.get("c").is_some());
    }
}
