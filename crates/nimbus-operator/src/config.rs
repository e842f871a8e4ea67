//! Command-line configuration for the `nimbus-operator` binary, in the
//! same `clap::Parser` subcommand shape the teacher workspace's
//! `environmentd` binary uses for its own multi-verb CLI.

use std::path::PathBuf;

use crate::kv::KvBackend;

#[derive(clap::Parser)]
#[clap(name = "nimbus-operator")]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,

    /// Path to an embedded SQLite store. Mutually exclusive with
    /// `--kv-connection-string`; the operator needs exactly one backend.
    #[clap(long, env = "NIMBUS_OPERATOR_KV_PATH", value_name = "PATH")]
    pub kv_path: Option<PathBuf>,

    /// A Postgres connection string for the cluster KV backend.
    #[clap(long, env = "NIMBUS_OPERATOR_KV_CONNECTION_STRING", value_name = "DSN")]
    pub kv_connection_string: Option<String>,

    #[clap(long, env = "NIMBUS_OPERATOR_KV_TLS")]
    pub kv_tls: bool,

    /// Read-replica connection strings for the cluster KV backend.
    /// Repeat the flag once per replica.
    #[clap(
        long = "kv-replica",
        env = "NIMBUS_OPERATOR_KV_REPLICAS",
        value_name = "DSN",
        value_delimiter = ','
    )]
    pub kv_replicas: Vec<String>,

    /// How many of (primary + replicas) must agree on a value before a
    /// read succeeds. Ignored by the embedded backend.
    #[clap(long, env = "NIMBUS_OPERATOR_KV_READ_QUORUM", default_value = "1")]
    pub kv_read_quorum: usize,

    /// The namespace hook Jobs are created in.
    #[clap(
        long,
        env = "NIMBUS_OPERATOR_NAMESPACE",
        default_value = "nimbus-system"
    )]
    pub namespace: String,
}

impl Args {
    pub fn kv_backend(&self) -> Result<KvBackend, anyhow::Error> {
        match (&self.kv_path, &self.kv_connection_string) {
            (Some(path), None) => Ok(KvBackend::Embedded { path: path.clone() }),
            (None, Some(dsn)) => Ok(KvBackend::Cluster {
                connection_string: dsn.clone(),
                tls: self.kv_tls,
                replicas: self.kv_replicas.clone(),
                read_quorum: self.kv_read_quorum,
            }),
            (None, None) => Err(anyhow::anyhow!(
                "one of --kv-path or --kv-connection-string is required"
            )),
            (Some(_), Some(_)) => Err(anyhow::anyhow!(
                "--kv-path and --kv-connection-string are mutually exclusive"
            )),
        }
    }
}

#[derive(clap::Subcommand)]
pub enum Command {
    /// Creates and runs a fresh install operation against a site, start
    /// to finish.
    Install {
        #[clap(long, value_name = "DOMAIN")]
        domain: String,
        #[clap(long, value_name = "ACCOUNT_ID")]
        account_id: String,
        #[clap(long, value_name = "REPOSITORY")]
        repository: String,
        #[clap(long, value_name = "APP_NAME")]
        app_name: String,
        #[clap(long, value_name = "VERSION")]
        app_version: String,
        #[clap(long, value_name = "PATH")]
        job_templates: PathBuf,
        #[clap(long, default_value = "onprem")]
        provisioner: String,
    },
    /// Resumes an existing operation, running every phase it hasn't
    /// already completed.
    Resume {
        #[clap(long, value_name = "OPERATION_ID")]
        operation_id: String,
        #[clap(long, value_name = "DOMAIN")]
        domain: String,
        #[clap(long, value_name = "REPOSITORY")]
        repository: String,
        #[clap(long, value_name = "APP_NAME")]
        app_name: String,
        #[clap(long, value_name = "VERSION")]
        app_version: String,
        #[clap(long, value_name = "PATH")]
        job_templates: PathBuf,
    },
    /// Runs (or re-runs, with `--force`) exactly one named phase.
    ExecutePhase {
        #[clap(long, value_name = "OPERATION_ID")]
        operation_id: String,
        #[clap(long, value_name = "DOMAIN")]
        domain: String,
        #[clap(long, value_name = "REPOSITORY")]
        repository: String,
        #[clap(long, value_name = "APP_NAME")]
        app_name: String,
        #[clap(long, value_name = "VERSION")]
        app_version: String,
        #[clap(long, value_name = "PATH")]
        job_templates: PathBuf,
        #[clap(long, value_name = "NAME")]
        phase: String,
        #[clap(long)]
        force: bool,
    },
}

/// The on-disk shape of `--job-templates`: one Job manifest per
/// hook-backed phase, as YAML, matching what an application manifest
/// would embed per hook type.
#[derive(Debug, serde::Deserialize)]
pub struct JobTemplatesFile {
    pub bootstrap: k8s_openapi::api::batch::v1::Job,
    pub pull: k8s_openapi::api::batch::v1::Job,
    pub masters: k8s_openapi::api::batch::v1::Job,
    pub nodes: k8s_openapi::api::batch::v1::Job,
    pub app: k8s_openapi::api::batch::v1::Job,
}

impl JobTemplatesFile {
    pub fn load(path: &std::path::Path) -> Result<JobTemplatesFile, anyhow::Error> {
        let bytes = std::fs::read(path)?;
        let templates: JobTemplatesFile = serde_yaml::from_slice(&bytes)?;
        Ok(templates)
    }
}
