//! `configureJob`: clones the hook's base Job spec and merges in
//! everything a caller-supplied [`HookRequest`] asks for, including the
//! standard init container that exports application resources before
//! the hook's own containers run.

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{
    Container, EnvVar, PodSecurityContext, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::types::{master_tolerations, HookRequest};

/// The namespace hook Jobs run in when the caller doesn't specify one.
pub const DEFAULT_NAMESPACE: &str = "nimbus-system";

/// Host paths mounted read-only into the init container (and, for
/// non-install hooks, needed there to shell out to the local cluster
/// controller).
const CONTROLLER_BINARY_HOST_PATH: &str = "/usr/bin/nimbusctl";
const KUBECTL_HOST_PATH: &str = "/usr/bin/kubectl";
const HELM_HOST_PATH: &str = "/usr/bin/helm";
const CA_CERT_HOST_PATH: &str = "/var/lib/nimbus/secrets/ca.crt";

const SHARED_RESOURCES_DIR: &str = "/var/lib/nimbus/resources";
const SHARED_HELM_DIR: &str = "/var/lib/nimbus/helm";

/// The init container's image. Minimal by design: it only ever execs
/// the host-mounted `nimbusctl`/`kubectl`/`helm` binaries, never its
/// own package manager.
const INIT_CONTAINER_IMAGE: &str = "nimbus/hook-init:latest";

/// Applies every `HookRequest` field to a cloned copy of the hook's
/// base Job, per the hook runner's configuration contract. Returns the
/// fully configured Job, ready for `Api::create`.
pub fn configure_job(request: &HookRequest) -> Job {
    let mut job = request.job.clone();

    let suffix = short_unique_suffix();
    let base_name = job
        .metadata
        .name
        .clone()
        .unwrap_or_else(|| format!("{}-hook", request.hook_type.as_str()));
    job.metadata.name = Some(format!("{base_name}-{suffix}"));
    if job.metadata.namespace.is_none() {
        job.metadata.namespace = Some(DEFAULT_NAMESPACE.to_string());
    }

    let spec = job.spec.get_or_insert_with(Default::default);
    if let Some(deadline) = request.job_deadline_seconds {
        spec.active_deadline_seconds = Some(deadline);
    }

    let template = &mut spec.template;
    if template.metadata.is_none() {
        template.metadata = Some(ObjectMeta::default());
    }
    let pod_spec = template.spec.get_or_insert_with(Default::default);

    if !request.node_selector.is_empty() {
        pod_spec
            .node_selector
            .get_or_insert_with(Default::default)
            .extend(request.node_selector.clone());
    }

    for container in pod_spec.containers.iter_mut() {
        merge_env(container, &request.env);
        if let Some(uid) = request.service_user {
            apply_service_uid(container, uid);
        }
        if request.selinux_options.is_some() {
            let security_context = container
                .security_context
                .get_or_insert_with(SecurityContext::default);
            security_context.se_linux_options = request.selinux_options.clone();
        }
        if let Some(pull_policy) = &request.pull_policy {
            container.image_pull_policy = Some(pull_policy.clone());
        }
    }

    pod_spec
        .tolerations
        .get_or_insert_with(Default::default)
        .extend(master_tolerations());

    if request.host_network {
        pod_spec.host_network = Some(true);
        pod_spec.dns_policy = Some("ClusterFirstWithHostNet".to_string());
    }

    if request.service_user.is_some() || request.selinux_options.is_some() {
        let security_context = pod_spec.security_context.get_or_insert_with(PodSecurityContext::default);
        if let Some(uid) = request.service_user {
            security_context.run_as_user = Some(uid);
        }
        if request.selinux_options.is_some() {
            security_context.se_linux_options = request.selinux_options.clone();
        }
    }

    if let Some(priority_class) = &request.priority_class {
        pod_spec.priority_class_name = Some(priority_class.clone());
    }

    pod_spec
        .volumes
        .get_or_insert_with(Default::default)
        .extend(request.volumes.clone());
    for container in pod_spec.containers.iter_mut() {
        container
            .volume_mounts
            .get_or_insert_with(Default::default)
            .extend(request.volume_mounts.clone());
    }

    if !request.skip_init_container {
        let (init_volumes, init_mounts) = host_mount_volumes();
        pod_spec
            .volumes
            .get_or_insert_with(Default::default)
            .extend(init_volumes);
        let mut init_container = build_init_container(request);
        init_container
            .volume_mounts
            .get_or_insert_with(Default::default)
            .extend(init_mounts);
        pod_spec
            .init_containers
            .get_or_insert_with(Default::default)
            .insert(0, init_container);
    }

    job
}

fn merge_env(container: &mut Container, env: &std::collections::BTreeMap<String, String>) {
    let existing = container.env.get_or_insert_with(Vec::new);
    for (key, value) in env {
        if let Some(slot) = existing.iter_mut().find(|e| &e.name == key) {
            slot.value = Some(value.clone());
        } else {
            existing.push(EnvVar {
                name: key.clone(),
                value: Some(value.clone()),
                value_from: None,
            });
        }
    }
}

fn apply_service_uid(container: &mut Container, uid: i64) {
    let security_context = container
        .security_context
        .get_or_insert_with(SecurityContext::default);
    security_context.run_as_user = Some(uid);
}

/// A short, probably-unique suffix for the Job name. Not cryptographic
/// uniqueness -- a name collision just fails the subsequent `create`
/// with `AlreadyExists`, which the caller can retry.
fn short_unique_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn host_mount_volumes() -> (Vec<Volume>, Vec<VolumeMount>) {
    let host_path_volume = |name: &str, path: &str| -> Volume {
        Volume {
            name: name.to_string(),
            host_path: Some(k8s_openapi::api::core::v1::HostPathVolumeSource {
                path: path.to_string(),
                type_: Some("File".to_string()),
            }),
            ..Volume::default()
        }
    };
    let empty_dir_volume = |name: &str| -> Volume {
        Volume {
            name: name.to_string(),
            empty_dir: Some(k8s_openapi::api::core::v1::EmptyDirVolumeSource::default()),
            ..Volume::default()
        }
    };
    let mount = |name: &str, path: &str, read_only: bool| -> VolumeMount {
        VolumeMount {
            name: name.to_string(),
            mount_path: path.to_string(),
            read_only: Some(read_only),
            ..VolumeMount::default()
        }
    };

    let volumes = vec![
        host_path_volume("nimbusctl-bin", CONTROLLER_BINARY_HOST_PATH),
        host_path_volume("kubectl-bin", KUBECTL_HOST_PATH),
        host_path_volume("helm-bin", HELM_HOST_PATH),
        host_path_volume("ca-cert", CA_CERT_HOST_PATH),
        empty_dir_volume("shared-resources"),
        empty_dir_volume("shared-helm"),
    ];
    let mounts = vec![
        mount("nimbusctl-bin", CONTROLLER_BINARY_HOST_PATH, true),
        mount("kubectl-bin", KUBECTL_HOST_PATH, true),
        mount("helm-bin", HELM_HOST_PATH, true),
        mount("ca-cert", CA_CERT_HOST_PATH, true),
        mount("shared-resources", SHARED_RESOURCES_DIR, false),
        mount("shared-helm", SHARED_HELM_DIR, false),
    ];
    (volumes, mounts)
}

/// Builds the init container that exports the application's resources
/// into the shared `emptyDir`, writes the Helm values file, and -- for
/// every hook type except `Install`, which runs before any resources
/// exist to fetch -- first logs into the local cluster controller to
/// pull them via the package export command.
fn build_init_container(request: &HookRequest) -> Container {
    let app = &request.application;
    let helm_values_json =
        serde_json::to_string(&request.helm_values).unwrap_or_else(|_| "{}".to_string());

    let mut script = String::new();
    if !request.hook_type.is_install() {
        script.push_str(&format!(
            "{CONTROLLER_BINARY_HOST_PATH} login --insecure\n\
             {CONTROLLER_BINARY_HOST_PATH} package export {}/{}:{} {SHARED_RESOURCES_DIR}\n",
            app.repository, app.name, app.version
        ));
    }
    script.push_str(&format!(
        "echo '{helm_values_json}' > {SHARED_HELM_DIR}/values.json\n"
    ));

    Container {
        name: "export-resources".to_string(),
        image: Some(INIT_CONTAINER_IMAGE.to_string()),
        command: Some(vec!["/bin/sh".to_string(), "-c".to_string(), script]),
        ..Container::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ApplicationLocator, HookType};
    use std::collections::BTreeMap;

    fn base_request() -> HookRequest {
        HookRequest::new(
            HookType::Upgrade,
            ApplicationLocator {
                repository: "gravitational".to_string(),
                name: "app".to_string(),
                version: "1.2.3".to_string(),
            },
            Job::default(),
        )
    }

    #[test]
    fn assigns_unique_name_and_default_namespace() {
        let mut request = base_request();
        request.job.metadata.name = Some("my-hook".to_string());
        let job = configure_job(&request);
        let name = job.metadata.name.unwrap();
        assert!(name.starts_with("my-hook-"));
        assert_ne!(name, "my-hook");
        assert_eq!(job.metadata.namespace.as_deref(), Some(DEFAULT_NAMESPACE));
    }

    #[test]
    fn prepends_init_container_unless_skipped() {
        let mut request = base_request();
        request.job.spec = Some(Default::default());
        let job = configure_job(&request);
        let pod_spec = job.spec.unwrap().template.spec.unwrap();
        let init = pod_spec.init_containers.unwrap();
        assert_eq!(init.len(), 1);
        assert_eq!(init[0].name, "export-resources");

        let mut skipped = base_request();
        skipped.skip_init_container = true;
        skipped.job.spec = Some(Default::default());
        let job = configure_job(&skipped);
        assert!(job
            .spec
            .unwrap()
            .template
            .spec
            .unwrap()
            .init_containers
            .is_none());
    }

    #[test]
    fn install_hooks_skip_the_controller_login_step() {
        let mut request = base_request();
        request.hook_type = HookType::Install;
        request.job.spec = Some(Default::default());
        let job = configure_job(&request);
        let pod_spec = job.spec.unwrap().template.spec.unwrap();
        let init = &pod_spec.init_containers.unwrap()[0];
        let script = &init.command.as_ref().unwrap()[2];
        assert!(!script.contains("login"));
        assert!(!script.contains("package export"));
    }

    #[test]
    fn merges_node_selector_env_and_tolerations() {
        let mut request = base_request();
        request.job.spec = Some(Default::default());
        request
            .job
            .spec
            .as_mut()
            .unwrap()
            .template
            .spec = Some(k8s_openapi::api::core::v1::PodSpec {
            containers: vec![Container {
                name: "main".to_string(),
                ..Container::default()
            }],
            ..Default::default()
        });
        let mut env = BTreeMap::new();
        env.insert("FOO".to_string(), "bar".to_string());
        request.env = env;
        request.node_selector.insert("role".to_string(), "master".to_string());

        let job = configure_job(&request);
        let pod_spec = job.spec.unwrap().template.spec.unwrap();
        assert_eq!(
            pod_spec.node_selector.unwrap().get("role").map(String::as_str),
            Some("master")
        );
        assert_eq!(pod_spec.tolerations.unwrap().len(), 2);
        let env = pod_spec.containers[0].env.as_ref().unwrap();
        assert!(env.iter().any(|e| e.name == "FOO" && e.value.as_deref() == Some("bar")));
    }

    #[test]
    fn merges_pull_policy_priority_class_and_selinux_options() {
        let mut request = base_request();
        request.job.spec = Some(Default::default());
        request.job.spec.as_mut().unwrap().template.spec = Some(k8s_openapi::api::core::v1::PodSpec {
            containers: vec![Container {
                name: "main".to_string(),
                ..Container::default()
            }],
            ..Default::default()
        });
        request.pull_policy = Some("IfNotPresent".to_string());
        request.priority_class = Some("system-cluster-critical".to_string());
        request.selinux_options = Some(k8s_openapi::api::core::v1::SELinuxOptions {
            level: Some("s0:c123,c456".to_string()),
            ..Default::default()
        });

        let job = configure_job(&request);
        let pod_spec = job.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod_spec.priority_class_name.as_deref(), Some("system-cluster-critical"));
        assert_eq!(
            pod_spec.containers[0].image_pull_policy.as_deref(),
            Some("IfNotPresent")
        );
        assert_eq!(
            pod_spec
                .security_context
                .as_ref()
                .unwrap()
                .se_linux_options
                .as_ref()
                .unwrap()
                .level
                .as_deref(),
            Some("s0:c123,c456")
        );
        assert_eq!(
            pod_spec.containers[0]
                .security_context
                .as_ref()
                .unwrap()
                .se_linux_options
                .as_ref()
                .unwrap()
                .level
                .as_deref(),
            Some("s0:c123,c456")
        );
    }
}
