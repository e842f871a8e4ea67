//! The replicated cluster driver, backed by `tokio-postgres` with a
//! `postgres-openssl` TLS connector, mirroring the teacher's
//! `mz-postgres-util`/`mz-stash` Postgres backend. Connection errors are
//! retried with bounded exponential backoff via `nimbus_ore::retry`;
//! `CompareFailed` is never retried, since that requires the caller to
//! re-read the conflicting value.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use postgres_openssl::MakeTlsConnector;
use tokio_postgres::{Client, Config, NoTls};

use nimbus_ore::retry::{retry, RetryConfig};

use crate::error::KvError;
use crate::key::immediate_children;
use crate::lock::DEFAULT_LOCK_POLL_INTERVAL;
use crate::store_trait::{KvStore, LockGuard, Ttl};

/// Connection options for the cluster driver.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub connection_string: String,
    pub tls: bool,
    pub retry: RetryConfig,
    /// Connection strings for read replicas, queried alongside the
    /// primary to form a read quorum. Empty means reads are served from
    /// the primary alone (the single-node-equivalent of this driver).
    pub replicas: Vec<String>,
    /// How many nodes -- primary plus replicas -- must agree on a
    /// value before `get` returns it (spec's "read quorum, configurable
    /// via option"). Clamped to `[1, 1 + replicas.len()]`; writes always
    /// go to the primary regardless of this setting.
    pub read_quorum: usize,
}

impl ClusterConfig {
    fn effective_quorum(&self) -> usize {
        self.read_quorum.clamp(1, 1 + self.replicas.len())
    }
}

/// The replicated, Postgres-backed KV driver. Writes always go to the
/// primary; `get` fans out to the primary plus every configured read
/// replica and only returns a value once at least `read_quorum` of them
/// agree on it, tolerating replication lag or a lagging/unreachable
/// replica as long as quorum is still reachable some other way.
pub struct Cluster {
    primary: Arc<Client>,
    replicas: Vec<Arc<Client>>,
    read_quorum: usize,
    retry: RetryConfig,
    lock_poll_interval: Duration,
}

impl Cluster {
    pub async fn connect(config: &ClusterConfig) -> Result<Cluster, KvError> {
        let primary = Self::connect_one(&config.connection_string, config.tls).await?;
        primary
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS kv (
                    key TEXT PRIMARY KEY,
                    value BYTEA NOT NULL,
                    expires_at BIGINT
                )",
            )
            .await?;

        let mut replicas = Vec::with_capacity(config.replicas.len());
        for replica_connection_string in &config.replicas {
            replicas.push(Arc::new(
                Self::connect_one(replica_connection_string, config.tls).await?,
            ));
        }

        Ok(Cluster {
            primary: Arc::new(primary),
            replicas,
            read_quorum: config.effective_quorum(),
            retry: config.retry.clone(),
            lock_poll_interval: DEFAULT_LOCK_POLL_INTERVAL,
        })
    }

    async fn connect_one(connection_string: &str, tls: bool) -> Result<Client, KvError> {
        let pg_config: Config = connection_string
            .parse()
            .map_err(|err: tokio_postgres::Error| KvError::BadParameter(err.to_string()))?;

        let client = if tls {
            let mut builder = SslConnector::builder(SslMethod::tls())
                .map_err(|err| KvError::ConnectionProblem(err.into()))?;
            builder.set_verify(SslVerifyMode::PEER);
            let connector = MakeTlsConnector::new(builder.build());
            let (client, connection) = pg_config.connect(connector).await?;
            tokio::spawn(async move {
                if let Err(err) = connection.await {
                    tracing::error!(%err, "postgres connection closed with error");
                }
            });
            client
        } else {
            let (client, connection) = pg_config.connect(NoTls).await?;
            tokio::spawn(async move {
                if let Err(err) = connection.await {
                    tracing::error!(%err, "postgres connection closed with error");
                }
            });
            client
        };

        Ok(client)
    }

    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T, KvError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, KvError>>,
    {
        retry(&self.retry, op).await
    }

    fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn expires_at(ttl: Ttl) -> Option<i64> {
        match ttl {
            Ttl::Forever => None,
            Ttl::After(duration) => Some(Self::now_millis() + duration.as_millis() as i64),
        }
    }

    async fn read_one(client: &Client, key: &str) -> Result<Vec<u8>, KvError> {
        let row = client
            .query_opt("SELECT value, expires_at FROM kv WHERE key = $1", &[&key])
            .await?;
        match row {
            Some(row) => {
                let expires_at: Option<i64> = row.get(1);
                let live = expires_at.map(|at| Self::now_millis() < at).unwrap_or(true);
                if live {
                    Ok(row.get(0))
                } else {
                    Err(KvError::NotFound(key.to_string()))
                }
            }
            None => Err(KvError::NotFound(key.to_string())),
        }
    }

    /// Reads `key` from the primary and every replica concurrently and
    /// requires `read_quorum` of them to agree before returning. A
    /// `read_quorum` of 1 (the default with no replicas configured)
    /// degenerates to a plain primary-only read.
    async fn quorum_get(&self, key: &str) -> Result<Vec<u8>, KvError> {
        if self.replicas.is_empty() {
            return Self::read_one(&self.primary, key).await;
        }

        let mut nodes: Vec<&Arc<Client>> = Vec::with_capacity(1 + self.replicas.len());
        nodes.push(&self.primary);
        nodes.extend(self.replicas.iter());

        let results =
            futures::future::join_all(nodes.iter().map(|client| Self::read_one(client, key))).await;

        let mut value_votes: std::collections::HashMap<Vec<u8>, usize> = std::collections::HashMap::new();
        let mut not_found_votes = 0usize;
        for result in &results {
            match result {
                Ok(value) => *value_votes.entry(value.clone()).or_insert(0) += 1,
                Err(KvError::NotFound(_)) => not_found_votes += 1,
                Err(_) => {}
            }
        }

        if let Some((value, _)) = value_votes.iter().find(|(_, votes)| **votes >= self.read_quorum) {
            return Ok(value.clone());
        }
        if not_found_votes >= self.read_quorum {
            return Err(KvError::NotFound(key.to_string()));
        }
        Err(KvError::ConnectionProblem(anyhow::anyhow!(
            "read quorum of {} not reached for key {key}",
            self.read_quorum
        )))
    }
}

#[async_trait]
impl KvStore for Cluster {
    async fn create(&self, key: &str, value: Vec<u8>, ttl: Ttl) -> Result<(), KvError> {
        let expires_at = Self::expires_at(ttl);
        self.with_retry(|| async {
            let existing = self
                .primary
                .query_opt("SELECT expires_at FROM kv WHERE key = $1", &[&key])
                .await?;
            if let Some(row) = &existing {
                let existing_expires_at: Option<i64> = row.get(0);
                let live = existing_expires_at
                    .map(|at| Self::now_millis() < at)
                    .unwrap_or(true);
                if live {
                    return Err(KvError::AlreadyExists(key.to_string()));
                }
            }
            self.primary
                .execute(
                    "INSERT INTO kv (key, value, expires_at) VALUES ($1, $2, $3)
                     ON CONFLICT (key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
                    &[&key, &value, &expires_at],
                )
                .await?;
            Ok(())
        })
        .await
    }

    async fn upsert(&self, key: &str, value: Vec<u8>, ttl: Ttl) -> Result<(), KvError> {
        let expires_at = Self::expires_at(ttl);
        self.with_retry(|| async {
            self.primary
                .execute(
                    "INSERT INTO kv (key, value, expires_at) VALUES ($1, $2, $3)
                     ON CONFLICT (key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
                    &[&key, &value, &expires_at],
                )
                .await?;
            Ok(())
        })
        .await
    }

    async fn update(&self, key: &str, value: Vec<u8>, ttl: Ttl) -> Result<(), KvError> {
        let expires_at = Self::expires_at(ttl);
        self.with_retry(|| async {
            let updated = self
                .primary
                .execute(
                    "UPDATE kv SET value = $2, expires_at = $3 WHERE key = $1",
                    &[&key, &value, &expires_at],
                )
                .await?;
            if updated == 0 {
                return Err(KvError::NotFound(key.to_string()));
            }
            Ok(())
        })
        .await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        new: Vec<u8>,
        expected: &[u8],
        ttl: Ttl,
    ) -> Result<(), KvError> {
        let expires_at = Self::expires_at(ttl);
        self.with_retry(|| async {
            let updated = self
                .primary
                .execute(
                    "UPDATE kv SET value = $2, expires_at = $4 WHERE key = $1 AND value = $3",
                    &[&key, &new, &expected, &expires_at],
                )
                .await?;
            if updated == 1 {
                return Ok(());
            }
            // Either the key is absent or its value differs; tell them apart.
            match self
                .primary
                .query_opt("SELECT 1 FROM kv WHERE key = $1", &[&key])
                .await?
            {
                Some(_) => Err(KvError::CompareFailed(key.to_string())),
                None => Err(KvError::NotFound(key.to_string())),
            }
        })
        .await
    }

    /// Reads `key` from a quorum of the primary and its read replicas
    /// (spec §4.A "replicated driver providing read quorum").
    async fn get(&self, key: &str) -> Result<Vec<u8>, KvError> {
        self.with_retry(|| self.quorum_get(key)).await
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.with_retry(|| async {
            let deleted = self
                .primary
                .execute("DELETE FROM kv WHERE key = $1", &[&key])
                .await?;
            if deleted == 0 {
                return Err(KvError::NotFound(key.to_string()));
            }
            Ok(())
        })
        .await
    }

    async fn delete_dir(&self, prefix: &str) -> Result<(), KvError> {
        let like_pattern = format!("{prefix}/%");
        self.with_retry(|| async {
            self.primary
                .execute(
                    "DELETE FROM kv WHERE key = $1 OR key LIKE $2",
                    &[&prefix, &like_pattern],
                )
                .await?;
            Ok(())
        })
        .await
    }

    async fn acquire_lock(&self, key: &str, ttl: Ttl) -> Result<LockGuard, KvError> {
        loop {
            match KvStore::try_acquire_lock(self, key, ttl).await {
                Ok(guard) => return Ok(guard),
                Err(KvError::AlreadyExists(_)) => {
                    tokio::time::sleep(self.lock_poll_interval).await;
                }
                Err(other) => return Err(other),
            }
        }
    }

    async fn try_acquire_lock(&self, key: &str, ttl: Ttl) -> Result<LockGuard, KvError> {
        let expires_at = Self::expires_at(ttl);
        self.with_retry(|| async {
            let inserted = self
                .primary
                .execute(
                    "INSERT INTO kv (key, value, expires_at) VALUES ($1, '', $2)
                     ON CONFLICT (key) DO NOTHING",
                    &[&key, &expires_at],
                )
                .await?;
            if inserted == 0 {
                return Err(KvError::AlreadyExists(key.to_string()));
            }
            Ok(())
        })
        .await?;
        let client = self.primary.clone();
        let key_owned = key.to_string();
        Ok(LockGuard::new(key_owned.clone(), move || async move {
            match client
                .execute("DELETE FROM kv WHERE key = $1", &[&key_owned])
                .await
            {
                Ok(_) => Ok(()),
                Err(err) => Err(KvError::from(err)),
            }
        }))
    }

    async fn list_children(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        self.with_retry(|| async {
            let rows = self.primary.query("SELECT key FROM kv", &[]).await?;
            let keys: Vec<String> = rows.iter().map(|row| row.get(0)).collect();
            Ok(immediate_children(prefix, keys.iter().map(|s| s.as_str())))
        })
        .await
    }
}

