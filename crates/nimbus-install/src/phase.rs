//! The named, ordered phases of an install operation (§4.F): preflight,
//! bootstrap, pull, masters, nodes, app, enable-elections, or whatever
//! sequence a caller assembles. Each phase is idempotent and its
//! completion is tracked on the `Operation` so a restarted process can
//! resume without redoing finished work.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::InstallError;

/// A named step in an install plan. `(repository, name, version)`-style
/// global uniqueness isn't needed here — ids are unique within a single
/// plan, matching the fixed phase names §4.F lists as an example.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PhaseId(pub String);

impl PhaseId {
    pub fn new(id: impl Into<String>) -> PhaseId {
        PhaseId(id.into())
    }
}

impl std::fmt::Display for PhaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// `ExecutePhase`'s target: either a single named phase, or the special
/// `RootPhase` identifier meaning "the entire plan" (§4.F).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseTarget {
    Root,
    Phase(PhaseId),
}

/// One idempotent unit of install work. Implementations should be safe
/// to call again after a partial failure — the FSM only calls `run`
/// once per phase per successful completion, but a `force` re-execution
/// may call it again on an already-completed phase.
#[async_trait]
pub trait Phase: Send + Sync {
    fn id(&self) -> PhaseId;
    async fn run(&self) -> Result<(), InstallError>;
}

/// A linear sequence of phases, identified by id, executed in
/// declaration order.
pub struct PhasePlan {
    phases: Vec<Arc<dyn Phase>>,
}

impl PhasePlan {
    pub fn new(phases: Vec<Arc<dyn Phase>>) -> PhasePlan {
        PhasePlan { phases }
    }

    pub fn ordered_ids(&self) -> Vec<PhaseId> {
        self.phases.iter().map(|p| p.id()).collect()
    }

    pub fn phase(&self, id: &PhaseId) -> Option<&Arc<dyn Phase>> {
        self.phases.iter().find(|p| &p.id() == id)
    }

    pub fn phases(&self) -> &[Arc<dyn Phase>] {
        &self.phases
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(PhaseId);

    #[async_trait]
    impl Phase for Noop {
        fn id(&self) -> PhaseId {
            self.0.clone()
        }
        async fn run(&self) -> Result<(), InstallError> {
            Ok(())
        }
    }

    #[test]
    fn ordered_ids_preserve_declaration_order() {
        let plan = PhasePlan::new(vec![
            Arc::new(Noop(PhaseId::new("preflight"))),
            Arc::new(Noop(PhaseId::new("bootstrap"))),
        ]);
        assert_eq!(
            plan.ordered_ids(),
            vec![PhaseId::new("preflight"), PhaseId::new("bootstrap")]
        );
    }

    #[test]
    fn phase_lookup_by_id() {
        let plan = PhasePlan::new(vec![Arc::new(Noop(PhaseId::new("preflight")))]);
        assert!(plan.phase(&PhaseId::new("preflight")).is_some());
        assert!(plan.phase(&PhaseId::new("missing")).is_none());
    }
}
