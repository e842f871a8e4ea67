//! Assembles the fixed 7-phase install plan (§4.F): preflight,
//! bootstrap, pull, masters, nodes, app, enable-elections. The five
//! middle phases are identical in shape -- one hook Job apiece -- and
//! differ only in `HookType` and the Job template supplied by the
//! application manifest.

use std::sync::Arc;

use kube::Client;
use tokio_util::sync::CancellationToken;

use nimbus_hooks::{ApplicationLocator, HookType};
use nimbus_install::{Phase, PhasePlan};
use nimbus_kv::KvStore;
use nimbus_store::site::Sites;

use crate::phases::{EnableElectionsPhase, HookPhase, PreflightPhase};

/// The Job templates for each of the five hook-backed phases, as
/// embedded in the application manifest. The manifest is expected to
/// carry one template per phase; a manifest that omits one simply
/// cannot run that phase (`PhasePlan::phase` returns `None` for it).
pub struct PhaseTemplates {
    pub bootstrap: k8s_openapi::api::batch::v1::Job,
    pub pull: k8s_openapi::api::batch::v1::Job,
    pub masters: k8s_openapi::api::batch::v1::Job,
    pub nodes: k8s_openapi::api::batch::v1::Job,
    pub app: k8s_openapi::api::batch::v1::Job,
}

/// Builds the standard install plan for one site/application pair.
///
/// Takes the raw KV handle rather than a `Sites` collection since
/// `Sites` isn't `Clone` and this plan needs two independent instances
/// (one for the preflight check, one for the final activation) --
/// `Arc<dyn KvStore>` is the cheap-to-clone handle both are built from.
pub fn install_plan(
    kv: Arc<dyn KvStore>,
    domain: String,
    client: Client,
    application: ApplicationLocator,
    templates: PhaseTemplates,
    cancel: CancellationToken,
) -> PhasePlan {
    let hook_phase = |id: &'static str, hook_type: HookType, job: k8s_openapi::api::batch::v1::Job| {
        Arc::new(HookPhase::new(
            id,
            client.clone(),
            hook_type,
            application.clone(),
            job,
            cancel.clone(),
        )) as Arc<dyn Phase>
    };

    PhasePlan::new(vec![
        Arc::new(PreflightPhase::new(Sites::new(kv.clone()), domain.clone())),
        hook_phase("bootstrap", HookType::ClusterProvision, templates.bootstrap),
        hook_phase("pull", HookType::NodesProvision, templates.pull),
        hook_phase("masters", HookType::Install, templates.masters),
        hook_phase("nodes", HookType::Install, templates.nodes),
        hook_phase("app", HookType::Install, templates.app),
        Arc::new(EnableElectionsPhase::new(Sites::new(kv), domain)),
    ])
}
