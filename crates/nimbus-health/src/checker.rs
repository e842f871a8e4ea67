//! The local probe loop: a set of [`Checker`]s run concurrently, bounded
//! by a semaphore and a per-check timeout, with panics caught at the
//! boundary rather than taking the whole agent down. Grounded in the
//! teacher workspace's `mz-orchestrator-kubernetes` health-check loop,
//! which runs a fixed set of checks on an interval and folds the results
//! into a single status; here each check is additionally isolated with
//! `tokio::time::timeout` and `catch_unwind` per §4.E (a hung or
//! panicking checker may not take others down with it).

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::Semaphore;

use crate::types::{NodeStatus, Probe, Severity};

/// A single named health check. Implementations should be cheap and
/// side-effect free; `run_probes` is responsible for concurrency limits,
/// timeouts, and panic isolation, not the checker itself.
#[async_trait]
pub trait Checker: Send + Sync {
    fn name(&self) -> &str;
    async fn check(&self) -> Probe;
}

/// Tuning knobs for [`run_probes`].
#[derive(Debug, Clone)]
pub struct ProbeRunConfig {
    pub max_concurrent: usize,
    pub per_check_timeout: Duration,
}

impl Default for ProbeRunConfig {
    fn default() -> Self {
        ProbeRunConfig {
            max_concurrent: 8,
            per_check_timeout: Duration::from_secs(10),
        }
    }
}

/// Runs every checker in `checkers` concurrently (bounded by
/// `config.max_concurrent`), producing one [`Probe`] each. A checker that
/// exceeds `config.per_check_timeout` or panics is folded into a
/// synthetic `Failed`/`Critical` probe rather than being dropped or
/// propagating the panic.
pub async fn run_probes(
    checkers: &[Arc<dyn Checker>],
    config: &ProbeRunConfig,
) -> Vec<Probe> {
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
    let tasks: Vec<_> = checkers
        .iter()
        .cloned()
        .map(|checker| {
            let semaphore = semaphore.clone();
            let timeout = config.per_check_timeout;
            tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                run_one(checker.as_ref(), timeout).await
            })
        })
        .collect();

    let mut probes = Vec::with_capacity(tasks.len());
    for task in tasks {
        match task.await {
            Ok(probe) => probes.push(probe),
            Err(join_err) => probes.push(Probe::failed(
                "unknown",
                Severity::Critical,
                format!("checker task did not complete: {join_err}"),
            )),
        }
    }
    probes
}

async fn run_one(checker: &dyn Checker, timeout: Duration) -> Probe {
    let name = checker.name().to_string();
    let outcome = AssertUnwindSafe(checker.check()).catch_unwind();
    match tokio::time::timeout(timeout, outcome).await {
        Ok(Ok(probe)) => probe,
        Ok(Err(panic)) => {
            let message = panic_message(&panic);
            Probe::failed(name, Severity::Critical, format!("checker panicked: {message}"))
        }
        Err(_) => Probe::failed(
            name,
            Severity::Critical,
            format!("checker exceeded {timeout:?} timeout"),
        ),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Folds a node's probes into its aggregate [`NodeStatus`] (P7's
/// node-level half): `Degraded` if any probe failed above `Info`
/// severity, else `Running`.
pub fn aggregate_node(name: impl Into<String>, probes: Vec<Probe>) -> NodeStatus {
    NodeStatus::from_probes(name, probes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Always(Probe);

    #[async_trait]
    impl Checker for Always {
        fn name(&self) -> &str {
            "always"
        }
        async fn check(&self) -> Probe {
            self.0.clone()
        }
    }

    struct Panics;

    #[async_trait]
    impl Checker for Panics {
        fn name(&self) -> &str {
            "panics"
        }
        async fn check(&self) -> Probe {
            panic!("boom");
        }
    }

    struct Slow(Duration);

    #[async_trait]
    impl Checker for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        async fn check(&self) -> Probe {
            tokio::time::sleep(self.0).await;
            Probe::running("slow")
        }
    }

    #[tokio::test]
    async fn a_healthy_checker_reports_running() {
        let checkers: Vec<Arc<dyn Checker>> =
            vec![Arc::new(Always(Probe::running("disk")))];
        let probes = run_probes(&checkers, &ProbeRunConfig::default()).await;
        assert_eq!(probes.len(), 1);
        assert!(matches!(probes[0].status, crate::types::ProbeStatus::Running));
    }

    #[tokio::test]
    async fn a_panicking_checker_is_isolated_as_a_failed_probe() {
        let checkers: Vec<Arc<dyn Checker>> = vec![Arc::new(Panics)];
        let probes = run_probes(&checkers, &ProbeRunConfig::default()).await;
        assert_eq!(probes.len(), 1);
        assert!(matches!(probes[0].status, crate::types::ProbeStatus::Failed));
        assert_eq!(probes[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn a_checker_exceeding_its_timeout_fails_without_blocking() {
        let checkers: Vec<Arc<dyn Checker>> = vec![Arc::new(Slow(Duration::from_secs(60)))];
        let config = ProbeRunConfig {
            max_concurrent: 4,
            per_check_timeout: Duration::from_millis(10),
        };
        let probes = run_probes(&checkers, &config).await;
        assert!(matches!(probes[0].status, crate::types::ProbeStatus::Failed));
    }

    #[tokio::test]
    async fn a_failing_probe_degrades_the_node_but_a_running_one_does_not() {
        let degraded = aggregate_node("n1", vec![Probe::failed("x", Severity::Critical, "bad")]);
        assert_eq!(degraded.status, crate::types::NodeStatusKind::Degraded);
        let healthy = aggregate_node("n1", vec![Probe::running("x")]);
        assert_eq!(healthy.status, crate::types::NodeStatusKind::Running);
    }
}
