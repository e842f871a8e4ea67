//! The concrete `Phase` implementations an install plan is built from
//! (§4.F: "preflight, bootstrap, pull, masters, nodes, app,
//! enable-elections"). `preflight` and `enable-elections` touch only
//! `nimbus-store`; the five work phases in between each drive one
//! Kubernetes Job through the hook runner, the way `mz-orchestrator`'s
//! process orchestrator treats "provision a cluster" as a sequence of
//! discrete, individually-retryable steps.

use async_trait::async_trait;
use kube::Client;
use tokio_util::sync::CancellationToken;

use nimbus_hooks::{
    delete_job, launch_hook, watch_job, ApplicationLocator, HookRequest, HookType, JobOutcome,
};
use nimbus_install::{InstallError, Phase, PhaseId};
use nimbus_store::site::{SiteState, Sites};

/// Confirms the target Site exists and isn't already mid-lifecycle
/// under a different operation before any Job runs.
pub struct PreflightPhase {
    sites: Sites,
    domain: String,
}

impl PreflightPhase {
    pub fn new(sites: Sites, domain: impl Into<String>) -> PreflightPhase {
        PreflightPhase {
            sites,
            domain: domain.into(),
        }
    }
}

#[async_trait]
impl Phase for PreflightPhase {
    fn id(&self) -> PhaseId {
        PhaseId::new("preflight")
    }

    async fn run(&self) -> Result<(), InstallError> {
        let site = self.sites.get(&self.domain).await?;
        match site.state {
            SiteState::Uninstalling | SiteState::Uninstalled => Err(InstallError::BadParameter(
                format!("site {} is being or has been uninstalled", self.domain),
            )),
            _ => Ok(()),
        }
    }
}

/// Runs one hook Job to completion: launch, watch for a terminal
/// condition, then delete the Job either way so a resumed or re-forced
/// phase doesn't collide with a leftover Job name.
pub struct HookPhase {
    id: PhaseId,
    client: Client,
    hook_type: HookType,
    application: ApplicationLocator,
    job_template: k8s_openapi::api::batch::v1::Job,
    cancel: CancellationToken,
}

impl HookPhase {
    pub fn new(
        id: impl Into<String>,
        client: Client,
        hook_type: HookType,
        application: ApplicationLocator,
        job_template: k8s_openapi::api::batch::v1::Job,
        cancel: CancellationToken,
    ) -> HookPhase {
        HookPhase {
            id: PhaseId::new(id),
            client,
            hook_type,
            application,
            job_template,
            cancel,
        }
    }
}

#[async_trait]
impl Phase for HookPhase {
    fn id(&self) -> PhaseId {
        self.id.clone()
    }

    async fn run(&self) -> Result<(), InstallError> {
        let request = HookRequest::new(self.hook_type, self.application.clone(), self.job_template.clone());

        let job_ref = launch_hook(&self.client, &request)
            .await
            .map_err(|err| InstallError::ConnectionProblem(err.into()))?;

        let outcome = watch_job(&self.client, &job_ref, &self.cancel).await;
        let cleanup = delete_job(&self.client, &job_ref, true).await;
        if let Err(err) = cleanup {
            tracing::warn!(%err, phase = %self.id, "failed to delete hook job after completion");
        }

        match outcome {
            Ok(JobOutcome::Complete) => Ok(()),
            Ok(JobOutcome::Failed(reason)) => Err(InstallError::PhaseFailed {
                phase: self.id.to_string(),
                source: anyhow::anyhow!(reason),
            }),
            Err(err) => Err(InstallError::ConnectionProblem(err.into())),
        }
    }
}

/// Flips the Site from `Installing` to `Active`, the terminal step of
/// an install plan (§4.F's `enable-elections`). Uses
/// `compare_and_swap_state`, the only legal mutator of a Site's state.
pub struct EnableElectionsPhase {
    sites: Sites,
    domain: String,
}

impl EnableElectionsPhase {
    pub fn new(sites: Sites, domain: impl Into<String>) -> EnableElectionsPhase {
        EnableElectionsPhase {
            sites,
            domain: domain.into(),
        }
    }
}

#[async_trait]
impl Phase for EnableElectionsPhase {
    fn id(&self) -> PhaseId {
        PhaseId::new("enable-elections")
    }

    async fn run(&self) -> Result<(), InstallError> {
        match self
            .sites
            .compare_and_swap_state(&self.domain, SiteState::Installing, SiteState::Active)
            .await
        {
            Ok(_) => Ok(()),
            Err(nimbus_store::StoreError::SiteStateConflict { domain }) => {
                // A retry of an already-completed run sees `Active` already
                // set; that's success, not a conflict to propagate.
                let site = self.sites.get(&domain).await?;
                if site.state == SiteState::Active {
                    Ok(())
                } else {
                    Err(InstallError::BadParameter(format!(
                        "site {domain} is in unexpected state {:?}",
                        site.state
                    )))
                }
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_kv::embedded::Embedded;
    use nimbus_kv::KvStore;
    use nimbus_store::package::PackageId;
    use nimbus_store::site::Site;
    use std::sync::Arc as StdArc;

    fn sample_site(domain: &str, state: SiteState) -> Site {
        Site {
            id: "site-1".into(),
            domain_name: domain.into(),
            account_id: "acct-1".into(),
            state,
            provisioner: "onprem".into(),
            provisioner_state: serde_json::json!({}),
            package: PackageId::phony(),
            local: true,
        }
    }

    #[tokio::test]
    async fn preflight_rejects_an_uninstalling_site() {
        let kv: StdArc<dyn KvStore> = StdArc::new(Embedded::open_in_memory().unwrap());
        let sites = Sites::new(kv);
        sites
            .create(&sample_site("example.com", SiteState::Uninstalling))
            .await
            .unwrap();
        let phase = PreflightPhase::new(sites, "example.com");
        assert!(phase.run().await.is_err());
    }

    #[tokio::test]
    async fn preflight_accepts_a_freshly_created_site() {
        let kv: StdArc<dyn KvStore> = StdArc::new(Embedded::open_in_memory().unwrap());
        let sites = Sites::new(kv);
        sites
            .create(&sample_site("example.com", SiteState::Created))
            .await
            .unwrap();
        let phase = PreflightPhase::new(sites, "example.com");
        assert!(phase.run().await.is_ok());
    }

    #[tokio::test]
    async fn enable_elections_activates_an_installing_site() {
        let kv: StdArc<dyn KvStore> = StdArc::new(Embedded::open_in_memory().unwrap());
        let sites = Sites::new(kv.clone());
        sites
            .create(&sample_site("example.com", SiteState::Installing))
            .await
            .unwrap();
        let phase = EnableElectionsPhase::new(Sites::new(kv.clone()), "example.com");
        phase.run().await.unwrap();

        let site = Sites::new(kv).get("example.com").await.unwrap();
        assert_eq!(site.state, SiteState::Active);
    }

    #[tokio::test]
    async fn enable_elections_is_idempotent_on_an_already_active_site() {
        let kv: StdArc<dyn KvStore> = StdArc::new(Embedded::open_in_memory().unwrap());
        let sites = Sites::new(kv.clone());
        sites
            .create(&sample_site("example.com", SiteState::Installing))
            .await
            .unwrap();
        let phase = EnableElectionsPhase::new(Sites::new(kv.clone()), "example.com");
        phase.run().await.unwrap();
        phase.run().await.unwrap();

        let site = Sites::new(kv).get("example.com").await.unwrap();
        assert_eq!(site.state, SiteState::Active);
    }
}
