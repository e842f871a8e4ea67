//! The hook runner's input/output types: [`HookRequest`] in,
//! [`JobRef`] out.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{SELinuxOptions, Toleration, Volume, VolumeMount};
use k8s_openapi::api::batch::v1::Job;
use serde::{Deserialize, Serialize};

/// The lifecycle event a hook is invoked for. `ClusterProvision`,
/// `ClusterDeprovision`, `NodesProvision`, and `NodesDeprovision` pull
/// resources from the internet and are never subject to image rewrite
/// (see `nimbus_codec::rewrite`), but they still run through this
/// runner like any other hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HookType {
    Install,
    Upgrade,
    Rollback,
    Status,
    Uninstall,
    Backup,
    Restore,
    ClusterProvision,
    ClusterDeprovision,
    NodesProvision,
    NodesDeprovision,
}

impl HookType {
    /// Install is the only hook type that runs before the application's
    /// resources have ever been exported, so it is also the only one
    /// whose init container skips the "log into the local controller
    /// and fetch resources" step -- there is nothing to fetch yet.
    pub fn is_install(self) -> bool {
        matches!(self, HookType::Install)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HookType::Install => "install",
            HookType::Upgrade => "upgrade",
            HookType::Rollback => "rollback",
            HookType::Status => "status",
            HookType::Uninstall => "uninstall",
            HookType::Backup => "backup",
            HookType::Restore => "restore",
            HookType::ClusterProvision => "cluster-provision",
            HookType::ClusterDeprovision => "cluster-deprovision",
            HookType::NodesProvision => "nodes-provision",
            HookType::NodesDeprovision => "nodes-deprovision",
        }
    }
}

/// `(repository, name, version)`, the same triple `nimbus_store::package`
/// uses to address a Package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationLocator {
    pub repository: String,
    pub name: String,
    pub version: String,
}

/// Everything the caller supplies to run one hook invocation. Mirrors
/// the fields `configure_job` merges into the cloned base Job spec.
#[derive(Debug, Clone)]
pub struct HookRequest {
    pub hook_type: HookType,
    pub application: ApplicationLocator,
    /// The hook's base Job spec, as embedded in the application
    /// manifest, before `configure_job` merges in caller-supplied
    /// overrides.
    pub job: Job,
    pub env: BTreeMap<String, String>,
    pub volumes: Vec<Volume>,
    pub volume_mounts: Vec<VolumeMount>,
    pub node_selector: BTreeMap<String, String>,
    pub service_user: Option<i64>,
    /// SELinux labels merged into the pod's and every container's
    /// security context alongside `service_user`.
    pub selinux_options: Option<SELinuxOptions>,
    pub job_deadline_seconds: Option<i64>,
    pub host_network: bool,
    /// Applied to every container's `imagePullPolicy` when set.
    pub pull_policy: Option<String>,
    /// Applied to the pod's `priorityClassName` when set.
    pub priority_class: Option<String>,
    /// Opaque Helm-style values blob written into the shared resources
    /// directory by the init container.
    pub helm_values: serde_json::Value,
    /// Skips prepending the init container entirely; used by hook
    /// types that need no resource export (e.g. a caller-supplied raw
    /// Job with its own data already baked in).
    pub skip_init_container: bool,
}

impl HookRequest {
    pub fn new(hook_type: HookType, application: ApplicationLocator, job: Job) -> HookRequest {
        HookRequest {
            hook_type,
            application,
            job,
            env: BTreeMap::new(),
            volumes: Vec::new(),
            volume_mounts: Vec::new(),
            node_selector: BTreeMap::new(),
            service_user: None,
            selinux_options: None,
            job_deadline_seconds: None,
            host_network: false,
            pull_policy: None,
            priority_class: None,
            helm_values: serde_json::Value::Null,
            skip_init_container: false,
        }
    }
}

/// The namespace and name of a created Job; the runner's handle for
/// subsequent watch/delete calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRef {
    pub namespace: String,
    pub name: String,
}

/// Master-tolerating tolerations every hook Job gets, so hooks still
/// run on a single-master cluster that would otherwise refuse to
/// schedule non-system pods on its only node.
pub fn master_tolerations() -> Vec<Toleration> {
    vec![
        Toleration {
            key: Some("node-role.kubernetes.io/master".to_string()),
            operator: Some("Exists".to_string()),
            effect: Some("NoSchedule".to_string()),
            ..Toleration::default()
        },
        Toleration {
            key: Some("node-role.kubernetes.io/master".to_string()),
            operator: Some("Exists".to_string()),
            effect: Some("NoExecute".to_string()),
            ..Toleration::default()
        },
    ]
}
