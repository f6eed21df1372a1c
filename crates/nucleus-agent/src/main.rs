mod channels;
mod settings;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use nucleus_domain::{Clock, ComponentIdentifier, SystemClock};
use nucleus_platform::PosixAdapter;
use nucleus_store::{ArtifactStore, CachedRecipeSource, RecipeFetcher, StoreError, StoreLayout};
use nucleus_supervisor::{
    AlwaysOkValidationChannel, AlwaysReadyVoteChannel, AuditLog, CloudChannel, DeploymentController,
    DeploymentControllerDeps, DeploymentOutcome, LoggingCloudChannel, Orchestrator, SafeUpdateScheduler,
    StatusReporter,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::channels::{HttpCloudChannel, HttpRecipeFetcher};
use crate::settings::AgentSettings;

/// Stands in for `HttpRecipeFetcher` when no recipe source URL is
/// configured; every fetch fails with `RecipeNotFound` rather than the
/// process refusing to start. A device that only ever runs recipes already
/// present in the on-disk cache never calls this.
struct UnconfiguredRecipeFetcher;

#[async_trait]
impl RecipeFetcher for UnconfiguredRecipeFetcher {
    async fn fetch_recipe_bytes(&self, identifier: &ComponentIdentifier) -> Result<Vec<u8>, StoreError> {
        Err(StoreError::RecipeNotFound(format!(
            "{identifier} (no NUCLEUS_RECIPE_BASE_URL configured)"
        )))
    }
}

fn build_recipe_fetcher(settings: &AgentSettings) -> Arc<dyn RecipeFetcher> {
    match &settings.recipe_base_url {
        Some(url) => Arc::new(HttpRecipeFetcher::new(url.clone())),
        None => {
            warn!("no recipe base URL configured; only cached recipes can be resolved");
            Arc::new(UnconfiguredRecipeFetcher)
        }
    }
}

fn build_cloud_channel(settings: &AgentSettings) -> Arc<dyn CloudChannel> {
    match &settings.cloud_base_url {
        Some(url) => Arc::new(HttpCloudChannel::new(url.clone())),
        None => {
            warn!("no cloud base URL configured; status and errors are logged only");
            Arc::new(LoggingCloudChannel)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let settings = AgentSettings::parse();
    info!(device_id = %settings.device_id, root_dir = ?settings.root_dir, "starting nucleus-agent");

    let layout = StoreLayout::new(settings.root_dir.clone());
    layout
        .cleanup_partial_downloads()
        .await
        .context("cleaning up partial downloads left from a prior run")?;

    let continuation = nucleus_supervisor::read_continuation_record(&layout).await;
    if let Some(record) = &continuation {
        info!(
            deployment_id = %record.deployment_id,
            phase = ?record.phase,
            "found a continuation record from an interrupted bootstrap deployment, resuming at APPLYING"
        );
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let platform = Arc::new(PosixAdapter::new());
    let recipe_fetcher = build_recipe_fetcher(&settings);
    let artifact_store = Arc::new(ArtifactStore::new(layout.clone(), recipe_fetcher));
    let recipe_source = Arc::new(CachedRecipeSource::new(layout.clone(), settings.platform_tags.clone()));
    let cloud_channel = build_cloud_channel(&settings);
    let config_store = nucleus_config::ConfigStore::new();
    let orchestrator = Arc::new(Orchestrator::new());
    let audit_log = Arc::new(AuditLog::new());
    let status_reporter = Arc::new(StatusReporter::new(settings.device_id.clone(), cloud_channel.clone()));
    let safe_update = SafeUpdateScheduler::spawn(
        Arc::new(AlwaysReadyVoteChannel),
        clock.clone(),
        settings.safe_update_vote_window(),
        settings.safe_update_defer_cap(),
    );

    let deployment_controller = DeploymentController::spawn(DeploymentControllerDeps {
        orchestrator: orchestrator.clone(),
        recipe_source,
        artifact_store,
        config_store,
        safe_update,
        validation_channel: Arc::new(AlwaysOkValidationChannel),
        status_reporter: status_reporter.clone(),
        audit_log,
        platform,
        layout: layout.clone(),
        clock: clock.clone(),
        stabilization_window: settings.stabilization_window(),
        restart_budget_max_failures: settings.restart_max_failures,
        restart_budget_window: settings.restart_window(),
        restart_stabilization: settings.restart_stabilization(),
        component_startup_timeout: settings.component_timeout(),
        component_shutdown_timeout: settings.component_timeout(),
    });
    // No programmatic submitter is built into this binary (no REST
    // management API, per Non-goals); `deployment_controller` stays alive
    // for whatever ingestion path an embedder wires in.

    if let Some(record) = continuation {
        match deployment_controller.resume(record).await {
            Ok(DeploymentOutcome::BootstrapPending) => {
                // The resumed deployment ran into another bootstrap
                // component; a fresh continuation record is already on
                // disk and PlatformAdapter has already been asked to
                // restart, so exit with the documented restart code rather
                // than fall through to the normal serve loop.
                info!("resumed deployment requires a further restart");
                std::process::exit(101);
            }
            Ok(outcome) => {
                info!(?outcome, "resumed deployment from continuation record finished");
            }
            Err(e) => {
                warn!(error = %e, "failed to resume deployment from continuation record");
            }
        }
    }

    let reconcile_orchestrator = orchestrator.clone();
    let reconcile_tick = settings.reconcile_tick();
    let reconcile_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(reconcile_tick);
        loop {
            ticker.tick().await;
            reconcile_orchestrator.propagate_dependency_transitions().await;
        }
    });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping components in reverse-dependency order");
    reconcile_handle.abort();

    let stop_plan = orchestrator
        .plan(&HashMap::new())
        .await
        .context("computing the full-stop shutdown plan")?;
    let results = orchestrator.apply(&stop_plan, settings.component_timeout()).await;
    for (name, result) in &results {
        if let Err(e) = result {
            warn!(component = %name, error = %e, "component failed to stop cleanly during shutdown");
        }
    }

    info!("all components stopped, exiting");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate()).expect("installing SIGTERM handler");
    let mut int = signal(SignalKind::interrupt()).expect("installing SIGINT handler");
    tokio::select! {
        _ = term.recv() => {}
        _ = int.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
