//! The two concurrent watchers `stream_logs` coordinates: a Job watcher
//! that looks for a terminal `Complete`/`Failed` condition, and a Pod
//! watcher that diffs the observed pod set and streams logs from every
//! container as it enters `Running`.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, LogParams};
use kube::runtime::watcher;
use kube::runtime::WatchStreamExt;
use kube::{Client, ResourceExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::HookError;
use crate::types::JobRef;

/// The terminal outcome of a watched Job.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Complete,
    Failed(String),
}

/// Watches `job_ref` until a terminal `Complete`/`Failed` condition
/// appears. A closed watch channel (e.g. a transient apiserver
/// disconnect) is retried with unbounded exponential backoff unless
/// `cancel` fires first.
pub async fn watch_job(
    client: &Client,
    job_ref: &JobRef,
    cancel: &CancellationToken,
) -> Result<JobOutcome, HookError> {
    let api: Api<Job> = Api::namespaced(client.clone(), &job_ref.namespace);
    let field_selector = format!("metadata.name={}", job_ref.name);
    let mut backoff = backoff::ExponentialBackoff::default();

    loop {
        let watcher_config = watcher::Config::default().fields(&field_selector);
        let mut stream = Box::pin(watcher(api.clone(), watcher_config).applied_objects());

        tokio::select! {
            _ = cancel.cancelled() => return Err(HookError::BadParameter("watch cancelled".to_string())),
            result = async {
                loop {
                    match stream.next().await {
                        Some(Ok(job)) => {
                            if let Some(outcome) = terminal_outcome(&job) {
                                return Ok(Some(outcome));
                            }
                        }
                        Some(Err(err)) => {
                            tracing::warn!(%err, "job watch stream error, retrying");
                            return Ok(None);
                        }
                        None => return Ok(None),
                    }
                }
            } => {
                match result {
                    Ok(Some(outcome)) => return Ok(outcome),
                    Ok(None) => {
                        let delay = backoff::backoff::Backoff::next_backoff(&mut backoff)
                            .unwrap_or(std::time::Duration::from_secs(30));
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    Err(err) => return Err(err),
                }
            }
        }
    }
}

fn terminal_outcome(job: &Job) -> Option<JobOutcome> {
    let conditions = job.status.as_ref()?.conditions.as_ref()?;
    for condition in conditions {
        if condition.status != "True" {
            continue;
        }
        match condition.type_.as_str() {
            "Complete" => return Some(JobOutcome::Complete),
            "Failed" => {
                return Some(JobOutcome::Failed(
                    condition.message.clone().unwrap_or_default(),
                ))
            }
            _ => {}
        }
    }
    None
}

/// Watches pods labeled `job-name=<name>`, emitting one diff line per
/// changed pod to `on_diff` and spawning a log-stream task (writing
/// into `writer`) for each container newly entering `Running`.
pub async fn watch_pods<W, F>(
    client: &Client,
    job_ref: &JobRef,
    writer: Arc<Mutex<W>>,
    mut on_diff: F,
    cancel: &CancellationToken,
) where
    W: AsyncWrite + Unpin + Send + 'static,
    F: FnMut(String),
{
    let api: Api<Pod> = Api::namespaced(client.clone(), &job_ref.namespace);
    let watcher_config = watcher::Config::default().labels(&format!("job-name={}", job_ref.name));

    let mut stream = Box::pin(watcher(api.clone(), watcher_config).applied_objects());
    let mut previous: BTreeMap<String, String> = BTreeMap::new();
    let mut streaming: BTreeMap<(String, String), CancellationToken> = BTreeMap::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = stream.next() => {
                let Some(event) = next else { break };
                let pod = match event {
                    Ok(pod) => pod,
                    Err(err) => {
                        tracing::warn!(%err, "pod watch stream error");
                        continue;
                    }
                };
                let name = pod.name_any();
                let phase = pod
                    .status
                    .as_ref()
                    .and_then(|s| s.phase.clone())
                    .unwrap_or_else(|| "Unknown".to_string());

                if previous.get(&name) != Some(&phase) {
                    on_diff(format!("pod {name}: {phase}"));
                    previous.insert(name.clone(), phase.clone());
                }

                if phase == "Running" {
                    for container_status in pod
                        .status
                        .as_ref()
                        .and_then(|s| s.container_statuses.as_ref())
                        .into_iter()
                        .flatten()
                    {
                        let running = container_status
                            .state
                            .as_ref()
                            .and_then(|s| s.running.as_ref())
                            .is_some();
                        let key = (name.clone(), container_status.name.clone());
                        if running && !streaming.contains_key(&key) {
                            let token = cancel.child_token();
                            streaming.insert(key.clone(), token.clone());
                            let api = api.clone();
                            let writer = writer.clone();
                            let (pod_name, container_name) = key;
                            tokio::spawn(async move {
                                stream_container_logs(api, pod_name, container_name, writer, token).await;
                            });
                        }
                    }
                } else {
                    for (_, token) in streaming.iter().filter(|((pod_name, _), _)| pod_name == &name) {
                        token.cancel();
                    }
                }
            }
        }
    }

    for token in streaming.values() {
        token.cancel();
    }
}

async fn stream_container_logs<W>(
    api: Api<Pod>,
    pod_name: String,
    container_name: String,
    writer: Arc<Mutex<W>>,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let params = LogParams {
        follow: true,
        container: Some(container_name.clone()),
        ..LogParams::default()
    };
    let stream = match api.log_stream(&pod_name, &params).await {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!(%err, pod = %pod_name, container = %container_name, "failed to open log stream");
            return;
        }
    };
    let mut stream = Box::pin(stream);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            chunk = stream.next() => {
                let Some(chunk) = chunk else { break };
                match chunk {
                    Ok(bytes) => {
                        let mut writer = writer.lock().await;
                        if writer.write_all(&bytes).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(%err, pod = %pod_name, container = %container_name, "log stream error");
                        break;
                    }
                }
            }
        }
    }
}

/// Runs the Job watcher and the Pod watcher concurrently, returning
/// once the Job reaches a terminal condition. The pod-log pipeline is
/// cancelled immediately afterward so `stream_logs` never outlives its
/// caller's interest in the result. Returns `Ok(())` iff the Job
/// completed successfully; otherwise an error carrying the Job's
/// `Failed` condition message (P8).
pub async fn stream_logs<W>(
    client: &Client,
    job_ref: &JobRef,
    writer: Arc<Mutex<W>>,
    mut on_diff: impl FnMut(String) + Send + 'static,
) -> Result<(), HookError>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let cancel = CancellationToken::new();
    let pod_cancel = cancel.child_token();

    let pod_client = client.clone();
    let pod_job_ref = job_ref.clone();
    let pod_task = tokio::spawn(async move {
        watch_pods(&pod_client, &pod_job_ref, writer, move |line| on_diff(line), &pod_cancel).await;
    });

    let outcome = watch_job(client, job_ref, &cancel).await;
    cancel.cancel();
    let _ = pod_task.await;

    match outcome? {
        JobOutcome::Complete => Ok(()),
        JobOutcome::Failed(message) => Err(HookError::JobFailed(message)),
    }
}
