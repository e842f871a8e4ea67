//! Image extraction: the dual of `rewriteImages`, producing a
//! de-duplicated list of image references plus a list of objects that
//! are neither a recognized workload nor on the pod-less allow-list.

use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};

use crate::types::{Document, Object, Unknown, Workload};

/// Kinds that legitimately never carry an image: config and policy
/// objects, not workloads. An `Unknown` object outside both this list
/// and the recognized workload kinds is reported, not rejected.
const POD_LESS_ALLOW_LIST: &[&str] = &[
    "ConfigMap",
    "Secret",
    "Service",
    "Namespace",
    "ServiceAccount",
    "Role",
    "RoleBinding",
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
    "PodSecurityPolicy",
    "PersistentVolumeClaim",
    "PersistentVolume",
    "StorageClass",
    "Ingress",
    "NetworkPolicy",
    "Endpoints",
    "LimitRange",
    "ResourceQuota",
    "Manifest",
    "ImageSet",
];

#[derive(Debug, Clone, Default)]
pub struct ExtractResult {
    /// De-duplicated image references, in first-seen order.
    pub images: Vec<String>,
    /// Objects that are neither a recognized workload nor on the
    /// pod-less allow-list. Reported, never a hard failure.
    pub unrecognized: Vec<UnrecognizedObject>,
}

#[derive(Debug, Clone)]
pub struct UnrecognizedObject {
    pub kind: String,
    pub name: Option<String>,
}

pub fn extract_images(documents: &[Document]) -> ExtractResult {
    let mut seen = BTreeSet::new();
    let mut images = Vec::new();
    let mut unrecognized = Vec::new();

    let mut push_image = |image: &str, images: &mut Vec<String>, seen: &mut BTreeSet<String>| {
        if seen.insert(image.to_string()) {
            images.push(image.to_string());
        }
    };

    for document in documents {
        match &document.object {
            Object::Workload(workload) => {
                for image in workload_images(workload) {
                    push_image(&image, &mut images, &mut seen);
                }
            }
            Object::Unknown(unknown) => {
                if !POD_LESS_ALLOW_LIST.contains(&unknown.type_meta.kind.as_str()) {
                    unrecognized.push(unrecognized_from(unknown));
                }
            }
        }
    }

    ExtractResult {
        images,
        unrecognized,
    }
}

fn unrecognized_from(unknown: &Unknown) -> UnrecognizedObject {
    UnrecognizedObject {
        kind: unknown.type_meta.kind.clone(),
        name: unknown.object_meta.as_ref().and_then(|m| m.name.clone()),
    }
}

fn workload_images(workload: &Workload) -> Vec<String> {
    let spec = match workload {
        Workload::Pod(pod) => pod.spec.as_ref(),
        Workload::ReplicationController(rc) => {
            rc.spec.as_ref().and_then(|s| s.template.as_ref()).and_then(|t| t.spec.as_ref())
        }
        Workload::Deployment(d) => d.spec.as_ref().and_then(|s| s.template.spec.as_ref()),
        Workload::DaemonSet(d) => d.spec.as_ref().and_then(|s| s.template.spec.as_ref()),
        Workload::ReplicaSet(d) => d.spec.as_ref().and_then(|s| s.template.spec.as_ref()),
        Workload::StatefulSet(d) => d.spec.as_ref().and_then(|s| s.template.spec.as_ref()),
        Workload::Job(j) => j.spec.as_ref().and_then(|s| s.template.spec.as_ref()),
        Workload::CronJob(c) => c
            .spec
            .as_ref()
            .and_then(|s| s.job_template.spec.as_ref())
            .and_then(|s| s.template.spec.as_ref()),
    };
    pod_spec_images(spec)
}

fn pod_spec_images(spec: Option<&PodSpec>) -> Vec<String> {
    let Some(spec) = spec else { return Vec::new() };
    spec.containers
        .iter()
        .chain(spec.init_containers.iter().flatten())
        .filter_map(container_image)
        .collect()
}

fn container_image(container: &Container) -> Option<String> {
    container.image.clone()
}

/// Unused directly, but documents the pod template indirection so a
/// future workload kind (if `k8s-openapi` grows one) has a clear
/// pattern to follow.
#[allow(dead_code)]
fn pod_template_images(template: &PodTemplateSpec) -> Vec<String> {
    pod_spec_images(template.spec.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode_stream;

    #[test]
    fn extracts_deduplicated_images_in_first_seen_order() {
        let input = "apiVersion: v1\nkind: Pod\nmetadata:\n  name: a\nspec:\n  containers:\n  - name: one\n    image: registry/foo:1.0\n  - name: two\n    image: registry/bar:1.0\n---\napiVersion: v1\nkind: Pod\nmetadata:\n  name: b\nspec:\n  containers:\n  - name: three\n    image: registry/foo:1.0\n";
        let docs = decode_stream(input).unwrap();
        let result = extract_images(&docs);
        assert_eq!(result.images, vec!["registry/foo:1.0", "registry/bar:1.0"]);
    }

    #[test]
    fn reports_unrecognized_objects_without_failing() {
        let input = "apiVersion: example.com/v1\nkind: Widget\nmetadata:\n  name: a\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: b\n";
        let docs = decode_stream(input).unwrap();
        let result = extract_images(&docs);
        assert_eq!(result.unrecognized.len(), 1);
        assert_eq!(result.unrecognized[0].kind, "Widget");
        assert_eq!(result.unrecognized[0].name.as_deref(), Some("a"));
    }
}
