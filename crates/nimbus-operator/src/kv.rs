//! Picks the KV backend the operation's store sits on (§4.A): an
//! embedded SQLite file for a single-node install, or a Postgres
//! cluster connection string for a multi-node one. Mirrors
//! `nimbus-agent`'s TLS-material-at-startup pattern: resolved once in
//! `main`, then handed down as an `Arc<dyn KvStore>`.

use std::path::PathBuf;
use std::sync::Arc;

use nimbus_kv::cluster::{Cluster, ClusterConfig};
use nimbus_kv::embedded::Embedded;
use nimbus_kv::KvStore;
use nimbus_ore::retry::RetryConfig;

/// Either flavor of store backend a caller can point the operator at.
#[derive(Debug, Clone)]
pub enum KvBackend {
    Embedded { path: PathBuf },
    Cluster {
        connection_string: String,
        tls: bool,
        /// Read-replica connection strings, in addition to the primary.
        replicas: Vec<String>,
        /// Nodes (out of primary + replicas) that must agree on a value
        /// before a read succeeds.
        read_quorum: usize,
    },
}

impl KvBackend {
    pub async fn connect(&self) -> Result<Arc<dyn KvStore>, anyhow::Error> {
        match self {
            KvBackend::Embedded { path } => {
                let store = Embedded::open(path)?;
                Ok(Arc::new(store))
            }
            KvBackend::Cluster {
                connection_string,
                tls,
                replicas,
                read_quorum,
            } => {
                let config = ClusterConfig {
                    connection_string: connection_string.clone(),
                    tls: *tls,
                    replicas: replicas.clone(),
                    read_quorum: *read_quorum,
                    retry: RetryConfig::default(),
                };
                let store = Cluster::connect(&config).await?;
                Ok(Arc::new(store))
            }
        }
    }
}
