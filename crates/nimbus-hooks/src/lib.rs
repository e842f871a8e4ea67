//! Configures, launches, watches, and adjudicates Kubernetes Job-based
//! lifecycle hooks (§4.D). Grounded in the teacher workspace's
//! `mz-orchestrator-kubernetes`: the same `kube::Api` + `watcher`
//! pattern that crate uses to watch pods and patch workload specs is
//! reused here to watch hook Jobs and pods, and to apply the Job
//! mutations `configure_job` computes.

pub mod configure;
pub mod error;
pub mod job;
pub mod types;
pub mod watch;

pub use configure::configure_job;
pub use error::HookError;
pub use job::{delete_job, ensure_namespace, launch_hook};
pub use types::{ApplicationLocator, HookRequest, HookType, JobRef};
pub use watch::{stream_logs, watch_job, watch_pods, JobOutcome};
