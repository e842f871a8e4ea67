//! The decoded object model: a recognized [`Workload`] kind, or an
//! opaque [`Unknown`] that retains its original bytes for bit-identical
//! re-emission.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Pod, ReplicationController};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

/// The encoding a document was read in, and is re-emitted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Yaml,
    Json,
}

/// The bare `apiVersion`/`kind` pair every Kubernetes object carries.
/// `k8s-openapi` flattens these fields directly onto each typed struct
/// rather than exposing a reusable standalone type, so the codec
/// defines its own for the pre-dispatch peek and for `Unknown` objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeMeta {
    #[serde(rename = "apiVersion", default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
}

/// A recognized workload kind, one of the set `rewriteImages` and
/// image extraction traverse: Pod, ReplicationController, Deployment,
/// DaemonSet, ReplicaSet, StatefulSet, Job, CronJob.
#[derive(Debug, Clone)]
pub enum Workload {
    Pod(Box<Pod>),
    ReplicationController(Box<ReplicationController>),
    Deployment(Box<Deployment>),
    DaemonSet(Box<DaemonSet>),
    ReplicaSet(Box<ReplicaSet>),
    StatefulSet(Box<StatefulSet>),
    Job(Box<Job>),
    CronJob(Box<CronJob>),
}

impl Workload {
    pub fn kind(&self) -> &'static str {
        match self {
            Workload::Pod(_) => "Pod",
            Workload::ReplicationController(_) => "ReplicationController",
            Workload::Deployment(_) => "Deployment",
            Workload::DaemonSet(_) => "DaemonSet",
            Workload::ReplicaSet(_) => "ReplicaSet",
            Workload::StatefulSet(_) => "StatefulSet",
            Workload::Job(_) => "Job",
            Workload::CronJob(_) => "CronJob",
        }
    }

    /// The kinds `rewriteImages`/image extraction recognize, used both
    /// to dispatch decode and to exclude these from the pod-less
    /// allow-list check.
    pub fn recognized_kinds() -> &'static [&'static str] {
        &[
            "Pod",
            "ReplicationController",
            "Deployment",
            "DaemonSet",
            "ReplicaSet",
            "StatefulSet",
            "Job",
            "CronJob",
        ]
    }
}

/// An object the codec does not recognize as a workload: the original
/// bytes (for bit-identical round-trip) plus its parsed `TypeMeta` and
/// (when present) `ObjectMeta`, so callers can still classify it
/// without losing fidelity. `value` is the fully parsed document,
/// carried alongside `raw` so `Manifest`/`ImageSet` rewriting (the only
/// mutations `Unknown` objects undergo) can mutate structured data
/// rather than re-parsing; a document that is never rewritten re-emits
/// `raw` untouched.
#[derive(Debug, Clone)]
pub struct Unknown {
    pub type_meta: TypeMeta,
    pub object_meta: Option<ObjectMeta>,
    pub raw: String,
    pub value: serde_json::Value,
}

/// One decoded object: either a recognized workload or an opaque
/// [`Unknown`].
#[derive(Debug, Clone)]
pub enum Object {
    Workload(Workload),
    Unknown(Unknown),
}

impl Object {
    pub fn kind(&self) -> &str {
        match self {
            Object::Workload(workload) => workload.kind(),
            Object::Unknown(unknown) => unknown.type_meta.kind.as_str(),
        }
    }
}

/// One decoded document: its [`Object`] plus the [`Encoding`] it was
/// read in, so [`crate::encode`] can re-emit it the same way.
#[derive(Debug, Clone)]
pub struct Document {
    pub encoding: Encoding,
    pub object: Object,
}
