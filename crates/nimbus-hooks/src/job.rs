//! Namespace-ensure, Job creation, and Job deletion: the synchronous
//! half of the hook runner's contract (§4.D steps 2-3).

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams, PropagationPolicy};
use kube::Client;

use crate::configure::configure_job;
use crate::error::HookError;
use crate::types::{HookRequest, JobRef};

pub const FIELD_MANAGER: &str = "nimbus-hooks";

/// Ensures `namespace` exists, ignoring `AlreadyExists` -- concurrent
/// hook invocations racing to create the same namespace are expected,
/// not an error.
pub async fn ensure_namespace(client: &Client, namespace: &str) -> Result<(), HookError> {
    let api: Api<Namespace> = Api::all(client.clone());
    let ns = Namespace {
        metadata: kube::api::ObjectMeta {
            name: Some(namespace.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    match api
        .patch(
            namespace,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&ns),
        )
        .await
    {
        Ok(_) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Configures and creates the hook's Job, returning a [`JobRef`] handle
/// for subsequent watch/delete calls.
pub async fn launch_hook(client: &Client, request: &HookRequest) -> Result<JobRef, HookError> {
    let job = configure_job(request);
    let namespace = job
        .metadata
        .namespace
        .clone()
        .unwrap_or_else(|| crate::configure::DEFAULT_NAMESPACE.to_string());
    ensure_namespace(client, &namespace).await?;

    let api: Api<Job> = Api::namespaced(client.clone(), &namespace);
    let created = api.create(&PostParams::default(), &job).await?;
    let name = created
        .metadata
        .name
        .ok_or_else(|| HookError::BadParameter("created job has no name".to_string()))?;
    Ok(JobRef { namespace, name })
}

/// Deletes the hook's Job. `cascade = true` uses `Foreground`
/// propagation so the caller can be sure the Job's pods are gone, not
/// just orphaned, before returning.
pub async fn delete_job(client: &Client, job_ref: &JobRef, cascade: bool) -> Result<(), HookError> {
    let api: Api<Job> = Api::namespaced(client.clone(), &job_ref.namespace);
    let propagation = if cascade {
        PropagationPolicy::Foreground
    } else {
        PropagationPolicy::Background
    };
    let params = DeleteParams {
        propagation_policy: Some(propagation),
        ..DeleteParams::default()
    };
    match api.delete(&job_ref.name, &params).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(err)) if err.code == 404 => Ok(()),
        Err(err) => Err(err.into()),
    }
}
