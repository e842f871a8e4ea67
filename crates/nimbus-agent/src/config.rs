//! Command-line configuration for the `nimbus-agent` binary. Field
//! shape and `#[clap(long, env = ..., value_name = ..., default_value =
//! ...)]` style follow the teacher workspace's `clusterd` binary.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// The per-node health agent: runs local probes, collects cluster-wide
/// status, and serves both over mutual-TLS gRPC and JSON on one port.
#[derive(clap::Parser)]
#[clap(name = "nimbus-agent")]
pub struct Args {
    /// This node's name, as it appears in `NodeStatus` and the cluster
    /// membership roster.
    #[clap(long, env = "NIMBUS_AGENT_NODE_NAME", value_name = "NAME")]
    pub node_name: String,

    /// This node's role: `master` or `node`. Exactly the masters in a
    /// cluster's roster must respond for the system status to avoid
    /// `"master node unavailable"`.
    #[clap(
        long,
        env = "NIMBUS_AGENT_ROLE",
        value_name = "master|node",
        default_value = "node"
    )]
    pub role: String,

    /// The peers to dial during status collection, each given as
    /// `name@host:port@role`. Repeat the flag once per peer.
    #[clap(long = "peer", env = "NIMBUS_AGENT_PEERS", value_name = "NAME@HOST:PORT@ROLE")]
    pub peers: Vec<String>,

    /// The address to serve the mutual-TLS gRPC/JSON multiplexed
    /// listener on.
    #[clap(
        long,
        env = "NIMBUS_AGENT_RPC_LISTEN_ADDR",
        value_name = "HOST:PORT",
        default_value = "0.0.0.0:7777"
    )]
    pub rpc_listen_addr: SocketAddr,

    /// The address to serve Prometheus metrics on, kept off the
    /// mutual-TLS listener.
    #[clap(
        long,
        env = "NIMBUS_AGENT_METRICS_LISTEN_ADDR",
        value_name = "HOST:PORT",
        default_value = "0.0.0.0:7778"
    )]
    pub metrics_listen_addr: SocketAddr,

    /// Directory for the local and (if this node is a master) cluster
    /// timeline databases.
    #[clap(long, env = "NIMBUS_AGENT_STATE_DIR", value_name = "PATH")]
    pub state_dir: PathBuf,

    /// CA certificate used both to verify incoming client certificates
    /// and to verify outbound peer dials.
    #[clap(long, env = "NIMBUS_AGENT_CA_CERT", value_name = "PATH")]
    pub ca_cert: PathBuf,

    /// This node's own certificate, presented as both the TLS server
    /// certificate and the client certificate used dialing peers.
    #[clap(long, env = "NIMBUS_AGENT_CERT", value_name = "PATH")]
    pub cert: PathBuf,

    /// This node's private key, matching `--cert`.
    #[clap(long, env = "NIMBUS_AGENT_KEY", value_name = "PATH")]
    pub key: PathBuf,

    #[clap(long, env = "NIMBUS_AGENT_PROBE_INTERVAL_SECS", default_value = "15")]
    pub probe_interval_secs: u64,

    #[clap(
        long,
        env = "NIMBUS_AGENT_STATUS_COLLECTION_INTERVAL_SECS",
        default_value = "15"
    )]
    pub status_collection_interval_secs: u64,

    #[clap(long, env = "NIMBUS_AGENT_LOCAL_PEER_TIMEOUT_SECS", default_value = "2")]
    pub local_peer_timeout_secs: u64,

    #[clap(long, env = "NIMBUS_AGENT_REMOTE_PEER_TIMEOUT_SECS", default_value = "5")]
    pub remote_peer_timeout_secs: u64,

    #[clap(
        long,
        env = "NIMBUS_AGENT_TIMELINE_PUSH_INTERVAL_SECS",
        default_value = "30"
    )]
    pub timeline_push_interval_secs: u64,

    #[clap(long, env = "NIMBUS_AGENT_MAX_CONCURRENT_CHECKERS", default_value = "8")]
    pub max_concurrent_checkers: usize,

    #[clap(long, env = "NIMBUS_AGENT_PER_CHECK_TIMEOUT_SECS", default_value = "10")]
    pub per_check_timeout_secs: u64,

    /// Minimum free bytes on the state directory's filesystem before the
    /// built-in disk-space checker fails.
    #[clap(
        long,
        env = "NIMBUS_AGENT_MIN_FREE_DISK_BYTES",
        default_value = "1073741824"
    )]
    pub min_free_disk_bytes: u64,

    /// A unix socket to additionally serve the JSON surface on, for
    /// local debugging without going through mutual TLS.
    #[clap(long, env = "NIMBUS_AGENT_DEBUG_SOCKET_PATH", value_name = "PATH")]
    pub debug_socket_path: Option<PathBuf>,

    #[clap(long, env = "NIMBUS_AGENT_SHUTDOWN_GRACE_SECS", default_value = "10")]
    pub shutdown_grace_secs: u64,
}

impl Args {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn status_collection_interval(&self) -> Duration {
        Duration::from_secs(self.status_collection_interval_secs)
    }

    pub fn local_peer_timeout(&self) -> Duration {
        Duration::from_secs(self.local_peer_timeout_secs)
    }

    pub fn remote_peer_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_peer_timeout_secs)
    }

    pub fn timeline_push_interval(&self) -> Duration {
        Duration::from_secs(self.timeline_push_interval_secs)
    }

    pub fn per_check_timeout(&self) -> Duration {
        Duration::from_secs(self.per_check_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Raw PEM bytes kept around for both the server-side `rustls` config
/// and every outbound `tonic` peer dial.
pub struct TlsMaterial {
    pub ca_cert_pem: Vec<u8>,
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

impl TlsMaterial {
    pub fn load(args: &Args) -> Result<TlsMaterial, anyhow::Error> {
        Ok(TlsMaterial {
            ca_cert_pem: std::fs::read(&args.ca_cert)?,
            cert_pem: std::fs::read(&args.cert)?,
            key_pem: std::fs::read(&args.key)?,
        })
    }
}
