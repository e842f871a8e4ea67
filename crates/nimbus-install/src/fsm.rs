//! The operation FSM driver: `ExecutePhase(phaseID, force)` and its
//! `Resume` alias, persisting phase completion on the `Operation` so a
//! process restart can pick up where it left off (§4.F).
//!
//! Completed-phase bookkeeping lives in `Operation.data` as
//! `{"completed_phases": [...]}` — the store's `data` field is opaque
//! JSON by design (§4.B), so the FSM owns its own schema for it rather
//! than asking the store to understand phases.

use std::collections::BTreeSet;

use nimbus_ore::retry::{retry, RetryConfig};
use nimbus_store::operation::{Operation, OperationState, Operations, ProgressEntry};

use crate::error::InstallError;
use crate::phase::{PhaseId, PhasePlan, PhaseTarget};

const COMPLETED_PHASES_KEY: &str = "completed_phases";

fn completed_phases(operation: &Operation) -> BTreeSet<PhaseId> {
    operation
        .data
        .get(COMPLETED_PHASES_KEY)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .map(PhaseId::new)
                .collect()
        })
        .unwrap_or_default()
}

fn mark_completed(operation: &mut Operation, phase: &PhaseId) {
    let mut completed = completed_phases(operation);
    completed.insert(phase.clone());
    let names: Vec<String> = completed.into_iter().map(|p| p.0).collect();
    let data = operation
        .data
        .as_object_mut()
        .expect("operation.data is always a JSON object once initialized by the installer");
    data.insert(COMPLETED_PHASES_KEY.to_string(), serde_json::json!(names));
}

/// Drives a `PhasePlan` against a single operation's persisted state.
pub struct InstallDriver {
    operations: Operations,
    retry_config: RetryConfig,
}

impl InstallDriver {
    pub fn new(operations: Operations) -> InstallDriver {
        InstallDriver {
            operations,
            retry_config: RetryConfig::default(),
        }
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    /// Runs `target` against `operation_id`'s plan. `Root` runs every
    /// not-yet-completed phase in order (or every phase if `force`); a
    /// single named phase runs only that one, regardless of its position
    /// in the plan. Stops at the first failing phase, which also drives
    /// the operation to `Failed` unless the failure was retried away.
    pub async fn execute_phase(
        &self,
        operation_id: &str,
        plan: &PhasePlan,
        target: PhaseTarget,
        force: bool,
    ) -> Result<(), InstallError> {
        let mut operation = self.operations.get(operation_id).await?;
        operation.state = OperationState::InProgress;
        self.operations.put(&operation).await?;

        let targets: Vec<PhaseId> = match target {
            PhaseTarget::Root => plan.ordered_ids(),
            PhaseTarget::Phase(id) => vec![id],
        };

        for phase_id in targets {
            let already_done = completed_phases(&operation).contains(&phase_id);
            if already_done && !force {
                continue;
            }

            let phase = plan.phase(&phase_id).ok_or_else(|| {
                InstallError::BadParameter(format!("unknown phase: {phase_id}"))
            })?;

            let result = retry(&self.retry_config, || phase.run()).await;
            match result {
                Ok(()) => {
                    mark_completed(&mut operation, &phase_id);
                    operation.updated = chrono::Utc::now();
                    self.operations.put(&operation).await?;
                    self.operations
                        .append_progress(&ProgressEntry {
                            operation_id: operation_id.to_string(),
                            timestamp: chrono::Utc::now(),
                            step: phase_id.0.clone(),
                            completion: 100,
                            message: format!("phase {phase_id} completed"),
                        })
                        .await?;
                }
                Err(err) => {
                    operation.state = OperationState::Failed;
                    operation.updated = chrono::Utc::now();
                    self.operations.put(&operation).await?;
                    self.operations
                        .append_progress(&ProgressEntry {
                            operation_id: operation_id.to_string(),
                            timestamp: chrono::Utc::now(),
                            step: phase_id.0.clone(),
                            completion: 0,
                            message: err.to_string(),
                        })
                        .await?;
                    return Err(err);
                }
            }
        }

        operation.state = OperationState::Completed;
        operation.updated = chrono::Utc::now();
        self.operations.put(&operation).await?;
        Ok(())
    }

    /// Runs every not-yet-completed phase of `plan`, in order, starting
    /// wherever the operation last left off.
    pub async fn resume(&self, operation_id: &str, plan: &PhasePlan) -> Result<(), InstallError> {
        self.execute_phase(operation_id, plan, PhaseTarget::Root, false)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use nimbus_kv::embedded::Embedded;
    use nimbus_kv::KvStore;
    use nimbus_store::operation::OperationType;

    use crate::phase::Phase;

    struct CountingPhase {
        id: PhaseId,
        calls: Arc<AtomicUsize>,
        fail_first: bool,
    }

    #[async_trait]
    impl Phase for CountingPhase {
        fn id(&self) -> PhaseId {
            self.id.clone()
        }
        async fn run(&self) -> Result<(), InstallError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && n == 0 {
                return Err(InstallError::BadParameter("forced failure".to_string()));
            }
            Ok(())
        }
    }

    fn new_operation(id: &str) -> Operation {
        Operation {
            id: id.to_string(),
            site_id: "site-1".to_string(),
            account_id: "acct-1".to_string(),
            operation_type: OperationType::Install,
            created: chrono::Utc::now(),
            updated: chrono::Utc::now(),
            state: OperationState::Created,
            provisioner: "onprem".to_string(),
            data: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn root_target_runs_every_phase_and_completes_the_operation() {
        let kv: Arc<dyn KvStore> = Arc::new(Embedded::open_in_memory().unwrap());
        let operations = Operations::new(kv);
        operations.create(&new_operation("op-1")).await.unwrap();
        let driver = InstallDriver::new(operations);

        let calls_a = Arc::new(AtomicUsize::new(0));
        let calls_b = Arc::new(AtomicUsize::new(0));
        let plan = PhasePlan::new(vec![
            Arc::new(CountingPhase {
                id: PhaseId::new("preflight"),
                calls: calls_a.clone(),
                fail_first: false,
            }),
            Arc::new(CountingPhase {
                id: PhaseId::new("bootstrap"),
                calls: calls_b.clone(),
                fail_first: false,
            }),
        ]);

        driver
            .execute_phase("op-1", &plan, PhaseTarget::Root, false)
            .await
            .unwrap();

        assert_eq!(calls_a.load(Ordering::SeqCst), 1);
        assert_eq!(calls_b.load(Ordering::SeqCst), 1);

        let operation = driver.operations.get("op-1").await.unwrap();
        assert_eq!(operation.state, OperationState::Completed);
    }

    #[tokio::test]
    async fn resuming_skips_already_completed_phases() {
        let kv: Arc<dyn KvStore> = Arc::new(Embedded::open_in_memory().unwrap());
        let operations = Operations::new(kv);
        operations.create(&new_operation("op-2")).await.unwrap();
        let driver = InstallDriver::new(operations);

        let calls_a = Arc::new(AtomicUsize::new(0));
        let plan = PhasePlan::new(vec![Arc::new(CountingPhase {
            id: PhaseId::new("preflight"),
            calls: calls_a.clone(),
            fail_first: false,
        })]);

        driver.resume("op-2", &plan).await.unwrap();
        driver.resume("op-2", &plan).await.unwrap();

        assert_eq!(calls_a.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn a_permanently_failing_phase_leaves_the_operation_failed() {
        let kv: Arc<dyn KvStore> = Arc::new(Embedded::open_in_memory().unwrap());
        let operations = Operations::new(kv);
        operations.create(&new_operation("op-3")).await.unwrap();
        let driver = InstallDriver::new(operations);

        let calls = Arc::new(AtomicUsize::new(0));
        let plan = PhasePlan::new(vec![Arc::new(CountingPhase {
            id: PhaseId::new("preflight"),
            calls: calls.clone(),
            fail_first: true,
        })]);

        let err = driver
            .execute_phase("op-3", &plan, PhaseTarget::Root, false)
            .await
            .unwrap_err();
        assert!(matches!(err, InstallError::BadParameter(_)));

        let operation = driver.operations.get("op-3").await.unwrap();
        assert_eq!(operation.state, OperationState::Failed);
    }

    #[tokio::test]
    async fn force_reruns_an_already_completed_single_phase() {
        let kv: Arc<dyn KvStore> = Arc::new(Embedded::open_in_memory().unwrap());
        let operations = Operations::new(kv);
        operations.create(&new_operation("op-4")).await.unwrap();
        let driver = InstallDriver::new(operations);

        let calls = Arc::new(AtomicUsize::new(0));
        let plan = PhasePlan::new(vec![Arc::new(CountingPhase {
            id: PhaseId::new("preflight"),
            calls: calls.clone(),
            fail_first: false,
        })]);

        driver.resume("op-4", &plan).await.unwrap();
        driver
            .execute_phase(
                "op-4",
                &plan,
                PhaseTarget::Phase(PhaseId::new("preflight")),
                true,
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
