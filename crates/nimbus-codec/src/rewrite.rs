//! `rewriteImages` and the security-context sentinel rewrite, traversing
//! every recognized workload's containers and init containers.

use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};

use crate::decode::decode_stream;
use crate::encode::encode_stream;
use crate::error::CodecError;
use crate::types::{Document, Object, Unknown, Workload};

/// The placeholder `RunAsUser` the service security context is
/// rewritten from. `-1` is never a valid UID, so a manifest author uses
/// it to mark "fill this in with the service's actual UID at install
/// time".
pub const SERVICE_UID_SENTINEL: i64 = -1;

/// Hook types that pull resources from the internet and must never have
/// their images rewritten during an offline/air-gapped install.
const SKIPPED_HOOK_TYPES: &[&str] = &[
    "ClusterProvision",
    "ClusterDeprovision",
    "NodesProvision",
    "NodesDeprovision",
];

/// Rewrites every container and init-container image across every
/// recognized workload in `documents`, using `f` to compute the new
/// image reference. `Manifest` documents with embedded hook Job specs
/// have each non-skipped hook's Job rewritten the same way; `ImageSet`
/// documents are rewritten by spec element. Every other `Unknown`
/// document is left untouched.
pub fn rewrite_images<F>(documents: &mut [Document], f: F) -> Result<(), CodecError>
where
    F: Fn(&str) -> String,
{
    for document in documents {
        match &mut document.object {
            Object::Workload(workload) => rewrite_workload_images(workload, &f),
            Object::Unknown(unknown) => rewrite_unknown_images(unknown, &f)?,
        }
    }
    Ok(())
}

fn rewrite_workload_images(workload: &mut Workload, f: &impl Fn(&str) -> String) {
    match workload {
        Workload::Pod(pod) => rewrite_pod_spec(pod.spec.as_mut(), f),
        Workload::ReplicationController(rc) => {
            if let Some(template) = rc.spec.as_mut().and_then(|s| s.template.as_mut()) {
                rewrite_pod_template(template, f);
            }
        }
        Workload::Deployment(deployment) => {
            rewrite_pod_template(&mut deployment.spec.as_mut().expect("spec is required").template, f)
        }
        Workload::DaemonSet(daemon_set) => rewrite_pod_template(
            &mut daemon_set.spec.as_mut().expect("spec is required").template,
            f,
        ),
        Workload::ReplicaSet(replica_set) => rewrite_pod_template(
            &mut replica_set.spec.as_mut().expect("spec is required").template,
            f,
        ),
        Workload::StatefulSet(stateful_set) => rewrite_pod_template(
            &mut stateful_set.spec.as_mut().expect("spec is required").template,
            f,
        ),
        Workload::Job(job) => {
            if let Some(template) = job.spec.as_mut().and_then(|s| s.template.as_mut_ref()) {
                rewrite_pod_template(template, f);
            }
        }
        Workload::CronJob(cron_job) => {
            if let Some(spec) = cron_job.spec.as_mut() {
                if let Some(job_template) = spec.job_template.spec.as_mut() {
                    if let Some(template) = job_template.template.as_mut_ref() {
                        rewrite_pod_template(template, f);
                    }
                }
            }
        }
    }
}

/// `k8s-openapi`'s `Job`/`CronJob` wrap their `PodTemplateSpec` as a
/// plain (non-`Option`) field, unlike the other workloads; this trait
/// gives both shapes one call site.
trait AsMutRef<T> {
    fn as_mut_ref(&mut self) -> Option<&mut T>;
}

impl AsMutRef<PodTemplateSpec> for PodTemplateSpec {
    fn as_mut_ref(&mut self) -> Option<&mut PodTemplateSpec> {
        Some(self)
    }
}

fn rewrite_pod_template(template: &mut PodTemplateSpec, f: &impl Fn(&str) -> String) {
    rewrite_pod_spec(template.spec.as_mut(), f)
}

fn rewrite_pod_spec(spec: Option<&mut PodSpec>, f: &impl Fn(&str) -> String) {
    let Some(spec) = spec else { return };
    for container in spec.containers.iter_mut() {
        rewrite_container_image(container, f);
    }
    if let Some(init_containers) = spec.init_containers.as_mut() {
        for container in init_containers.iter_mut() {
            rewrite_container_image(container, f);
        }
    }
}

fn rewrite_container_image(container: &mut Container, f: &impl Fn(&str) -> String) {
    if let Some(image) = container.image.as_ref() {
        container.image = Some(f(image));
    }
}

/// Applies the sentinel-based security-context rewrite: a Pod spec (or
/// pod template) whose `runAsUser` equals [`SERVICE_UID_SENTINEL`] is
/// updated to `service_uid`; any container-level security context with
/// the same placeholder is updated likewise. Returns whether anything
/// was actually changed, so callers can avoid re-emitting (and thereby
/// touching the mtime/bytes of) a document that was left alone.
pub fn rewrite_service_uid(documents: &mut [Document], service_uid: i64) -> bool {
    let mut changed = false;
    for document in documents {
        if let Object::Workload(workload) = &mut document.object {
            changed |= rewrite_workload_uid(workload, service_uid);
        }
    }
    changed
}

fn rewrite_workload_uid(workload: &mut Workload, service_uid: i64) -> bool {
    let spec = match workload {
        Workload::Pod(pod) => pod.spec.as_mut(),
        Workload::ReplicationController(rc) => {
            rc.spec.as_mut().and_then(|s| s.template.as_mut()).and_then(|t| t.spec.as_mut())
        }
        Workload::Deployment(d) => d.spec.as_mut().and_then(|s| s.template.spec.as_mut()),
        Workload::DaemonSet(d) => d.spec.as_mut().and_then(|s| s.template.spec.as_mut()),
        Workload::ReplicaSet(d) => d.spec.as_mut().and_then(|s| s.template.spec.as_mut()),
        Workload::StatefulSet(d) => d.spec.as_mut().and_then(|s| s.template.spec.as_mut()),
        Workload::Job(j) => j.spec.as_mut().and_then(|s| s.template.spec.as_mut()),
        Workload::CronJob(c) => c
            .spec
            .as_mut()
            .and_then(|s| s.job_template.spec.as_mut())
            .and_then(|s| s.template.spec.as_mut()),
    };
    let Some(spec) = spec else { return false };
    let mut changed = false;

    if let Some(security_context) = spec.security_context.as_mut() {
        if security_context.run_as_user == Some(SERVICE_UID_SENTINEL) {
            security_context.run_as_user = Some(service_uid);
            changed = true;
        }
    }
    for container in spec.containers.iter_mut().chain(spec.init_containers.iter_mut().flatten()) {
        if let Some(security_context) = container.security_context.as_mut() {
            if security_context.run_as_user == Some(SERVICE_UID_SENTINEL) {
                security_context.run_as_user = Some(service_uid);
                changed = true;
            }
        }
    }
    changed
}

fn rewrite_unknown_images(unknown: &mut Unknown, f: &impl Fn(&str) -> String) -> Result<(), CodecError> {
    match unknown.type_meta.kind.as_str() {
        "ImageSet" => rewrite_image_set(unknown, f),
        "Manifest" => rewrite_manifest_hooks(unknown, f),
        _ => Ok(()),
    }
}

fn rewrite_image_set(unknown: &mut Unknown, f: &impl Fn(&str) -> String) -> Result<(), CodecError> {
    let mut changed = false;
    if let Some(images) = unknown
        .value
        .get_mut("spec")
        .and_then(|spec| spec.get_mut("images"))
        .and_then(|images| images.as_array_mut())
    {
        for entry in images.iter_mut() {
            if let Some(image) = entry.get("image").and_then(|v| v.as_str()) {
                let rewritten = f(image);
                if let Some(map) = entry.as_object_mut() {
                    map.insert("image".to_string(), serde_json::Value::String(rewritten));
                    changed = true;
                }
            }
        }
    }
    if changed {
        re_render_unknown(unknown)?;
    }
    Ok(())
}

/// Rewrites embedded lifecycle hook Job specs under `spec.hooks[*].job`
/// (a YAML-encoded string), skipping hooks whose `type` pulls resources
/// from the internet.
fn rewrite_manifest_hooks(unknown: &mut Unknown, f: &impl Fn(&str) -> String) -> Result<(), CodecError> {
    let mut changed = false;
    if let Some(hooks) = unknown
        .value
        .get_mut("spec")
        .and_then(|spec| spec.get_mut("hooks"))
        .and_then(|hooks| hooks.as_array_mut())
    {
        for hook in hooks.iter_mut() {
            let hook_type = hook.get("type").and_then(|v| v.as_str()).unwrap_or_default();
            if SKIPPED_HOOK_TYPES.contains(&hook_type) {
                continue;
            }
            let Some(job_yaml) = hook.get("job").and_then(|v| v.as_str()).map(str::to_string) else {
                continue;
            };
            let mut job_docs = decode_stream(&job_yaml)?;
            rewrite_images(&mut job_docs, f)?;
            let rewritten_yaml = encode_stream(&job_docs)?;
            if let Some(map) = hook.as_object_mut() {
                map.insert("job".to_string(), serde_json::Value::String(rewritten_yaml));
                changed = true;
            }
        }
    }
    if changed {
        re_render_unknown(unknown)?;
    }
    Ok(())
}

/// Re-serializes `unknown.value` into `unknown.raw`, using YAML for a
/// document whose raw text looked like YAML and JSON otherwise. Only
/// called after a mutation; an untouched `Unknown` keeps its original
/// `raw` bytes exactly.
fn re_render_unknown(unknown: &mut Unknown) -> Result<(), CodecError> {
    let looks_like_json = unknown.raw.trim_start().starts_with('{');
    unknown.raw = if looks_like_json {
        serde_json::to_string_pretty(&unknown.value)?
    } else {
        serde_yaml::to_string(&unknown.value)?
    };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode_stream;

    #[test]
    fn rewrites_container_and_init_container_images_in_a_pod() {
        let input = "apiVersion: v1\nkind: Pod\nmetadata:\n  name: a\nspec:\n  initContainers:\n  - name: init\n    image: registry/foo:1.0\n  containers:\n  - name: main\n    image: registry/bar:1.0\n";
        let mut docs = decode_stream(input).unwrap();
        rewrite_images(&mut docs, |img| img.replace("registry/", "mirror.local/")).unwrap();
        let out = encode_stream(&docs).unwrap();
        assert!(out.contains("mirror.local/foo:1.0"));
        assert!(out.contains("mirror.local/bar:1.0"));
    }

    #[test]
    fn leaves_unknown_objects_other_than_manifest_or_imageset_untouched() {
        let input = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\ndata:\n  image: registry/foo:1.0\n";
        let mut docs = decode_stream(input).unwrap();
        let before = encode_stream(&docs).unwrap();
        rewrite_images(&mut docs, |img| img.replace("registry/", "mirror.local/")).unwrap();
        let after = encode_stream(&docs).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn security_context_rewrite_is_byte_preserving_when_not_sentinel() {
        let input = "apiVersion: v1\nkind: Pod\nmetadata:\n  name: a\nspec:\n  securityContext:\n    runAsUser: 42\n  containers:\n  - name: main\n    image: registry/bar:1.0\n";
        let mut docs = decode_stream(input).unwrap();
        let changed = rewrite_service_uid(&mut docs, 1000);
        assert!(!changed);
        let out = encode_stream(&docs).unwrap();
        assert_eq!(out.trim(), input.trim());
    }

    #[test]
    fn security_context_rewrite_replaces_sentinel_uid() {
        let input = format!(
            "apiVersion: v1\nkind: Pod\nmetadata:\n  name: a\nspec:\n  securityContext:\n    runAsUser: {SERVICE_UID_SENTINEL}\n  containers:\n  - name: main\n    image: registry/bar:1.0\n    securityContext:\n      runAsUser: {SERVICE_UID_SENTINEL}\n"
        );
        let mut docs = decode_stream(&input).unwrap();
        let changed = rewrite_service_uid(&mut docs, 1000);
        assert!(changed);
        if let Object::Workload(Workload::Pod(pod)) = &docs[0].object {
            let spec = pod.spec.as_ref().unwrap();
            assert_eq!(spec.security_context.as_ref().unwrap().run_as_user, Some(1000));
            assert_eq!(
                spec.containers[0].security_context.as_ref().unwrap().run_as_user,
                Some(1000)
            );
        } else {
            panic!("expected a Pod");
        }
    }

    #[test]
    fn nginx_pod_with_literal_negative_one_sentinel_is_rewritten_to_the_service_uid() {
        let input = "apiVersion: v1\nkind: Pod\nmetadata:\n  name: nginx\nspec:\n  securityContext:\n    runAsUser: -1\n  containers:\n  - name: nginx\n    image: registry/nginx:1.0\n    securityContext:\n      runAsUser: -1\n";
        let mut docs = decode_stream(input).unwrap();
        let changed = rewrite_service_uid(&mut docs, 1001);
        assert!(changed);
        if let Object::Workload(Workload::Pod(pod)) = &docs[0].object {
            let spec = pod.spec.as_ref().unwrap();
            assert_eq!(spec.security_context.as_ref().unwrap().run_as_user, Some(1001));
            assert_eq!(
                spec.containers[0].security_context.as_ref().unwrap().run_as_user,
                Some(1001)
            );
        } else {
            panic!("expected a Pod");
        }
    }
}
