//! The `nimbus-operator` binary: drives [`nimbus_install::InstallDriver`]
//! against a KV-backed `Operation`, using `nimbus-hooks` Jobs for the
//! phases that do the actual work. Same `clap::Parser` +
//! `#[tokio::main]` + `run(args)` shape as `nimbus-agent` and the
//! teacher workspace's bin crates.

mod config;
mod kv;
mod phases;
mod plan;

use std::process;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use nimbus_hooks::ApplicationLocator;
use nimbus_install::{InstallDriver, PhaseId, PhaseTarget};
use nimbus_store::operation::{Operation, OperationState, OperationType, Operations};
use nimbus_store::site::{SiteState, Sites};

use crate::config::{Args, Command, JobTemplatesFile};
use crate::plan::PhaseTemplates;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(err) = run(args).await {
        eprintln!("nimbus-operator: fatal: {err:#}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), anyhow::Error> {
    nimbus_ore::logging::init("nimbus-operator");

    let kv = args.kv_backend()?.connect().await.context("connecting to kv backend")?;
    let client = kube::Client::try_default()
        .await
        .context("building kubernetes client")?;
    let cancel = CancellationToken::new();
    let driver = InstallDriver::new(Operations::new(kv.clone()));

    match args.command {
        Command::Install {
            domain,
            account_id,
            repository,
            app_name,
            app_version,
            job_templates,
            provisioner,
        } => {
            let sites = Sites::new(kv.clone());
            let site = sites.get(&domain).await.context("looking up site")?;
            if site.state != SiteState::Installing {
                sites
                    .compare_and_swap_state(&domain, SiteState::Created, SiteState::Installing)
                    .await
                    .context("transitioning site to installing")?;
            }

            let operation = Operation {
                id: uuid::Uuid::new_v4().to_string(),
                site_id: site.id.clone(),
                account_id,
                operation_type: OperationType::Install,
                created: chrono::Utc::now(),
                updated: chrono::Utc::now(),
                state: OperationState::Created,
                provisioner,
                data: serde_json::json!({}),
            };
            Operations::new(kv.clone())
                .create(&operation)
                .await
                .context("creating operation")?;

            let application = ApplicationLocator {
                repository,
                name: app_name,
                version: app_version,
            };
            let templates = JobTemplatesFile::load(&job_templates).context("loading job templates")?;
            let plan = plan::install_plan(
                kv.clone(),
                domain,
                client,
                application,
                into_phase_templates(templates),
                cancel,
            );

            tracing::info!(operation_id = %operation.id, "starting install operation");
            driver
                .execute_phase(&operation.id, &plan, PhaseTarget::Root, false)
                .await
                .context("running install plan")?;
            println!("{}", operation.id);
        }

        Command::Resume {
            operation_id,
            domain,
            repository,
            app_name,
            app_version,
            job_templates,
        } => {
            let application = ApplicationLocator {
                repository,
                name: app_name,
                version: app_version,
            };
            let templates = JobTemplatesFile::load(&job_templates).context("loading job templates")?;
            let plan = plan::install_plan(
                kv,
                domain,
                client,
                application,
                into_phase_templates(templates),
                cancel,
            );

            driver.resume(&operation_id, &plan).await.context("resuming operation")?;
        }

        Command::ExecutePhase {
            operation_id,
            domain,
            repository,
            app_name,
            app_version,
            job_templates,
            phase,
            force,
        } => {
            let application = ApplicationLocator {
                repository,
                name: app_name,
                version: app_version,
            };
            let templates = JobTemplatesFile::load(&job_templates).context("loading job templates")?;
            let plan = plan::install_plan(
                kv,
                domain,
                client,
                application,
                into_phase_templates(templates),
                cancel,
            );

            driver
                .execute_phase(&operation_id, &plan, PhaseTarget::Phase(PhaseId::new(phase)), force)
                .await
                .context("running phase")?;
        }
    }

    Ok(())
}

fn into_phase_templates(file: JobTemplatesFile) -> PhaseTemplates {
    PhaseTemplates {
        bootstrap: file.bootstrap,
        pull: file.pull,
        masters: file.masters,
        nodes: file.nodes,
        app: file.app,
    }
}
