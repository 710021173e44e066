//! Deployment update checks
//!
//! Reads the deployment manifest published by the build and, when it names
//! a generation other than the active one, installs and activates it.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::{ActivationReport, CacheManager};
use crate::error::CoreError;
use crate::manifest::DeploymentManifest;

/// Where deployments are published, plus the pages every generation caches
#[derive(Debug, Clone)]
pub struct DeploymentSource {
    pub manifest_path: PathBuf,
    /// Representative pages merged into every manifest
    pub pages: Vec<String>,
}

/// Result of an update check
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum UpdateOutcome {
    /// The published generation is already active
    UpToDate { generation: String },
    /// A new generation was installed and activated
    Updated {
        /// Whether the cache was adopted from storage instead of fetched
        restored: bool,
        report: ActivationReport,
    },
}

/// Install and activate the published generation if it is not active yet
pub async fn check_for_update(
    manager: &CacheManager,
    source: &DeploymentSource,
) -> Result<UpdateOutcome, CoreError> {
    let deployment = DeploymentManifest::load(&source.manifest_path).await?;

    if manager.active_generation().as_deref() == Some(deployment.version.as_str()) {
        return Ok(UpdateOutcome::UpToDate {
            generation: deployment.version,
        });
    }

    info!("Deployment {} published, updating", deployment.version);

    let manifest = deployment.asset_manifest(&source.pages)?;

    let restored = manager
        .restore(manifest.clone(), &deployment.version)
        .await?;
    if !restored {
        manager.handle_install(manifest, &deployment.version).await?;
    }

    let report = manager.handle_activate(&deployment.version).await?;

    Ok(UpdateOutcome::Updated { restored, report })
}

/// Spawn a background task that checks for new deployments periodically
pub fn spawn_update_task(
    manager: Arc<CacheManager>,
    source: DeploymentSource,
    interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    use tokio::time::{Duration, interval};

    info!(
        "Starting background update task (interval: {} seconds, manifest: {:?})",
        interval_secs, source.manifest_path
    );

    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));

        // Skip the first tick (which fires immediately)
        ticker.tick().await;

        loop {
            ticker.tick().await;

            match check_for_update(&manager, &source).await {
                Ok(UpdateOutcome::UpToDate { .. }) => {}
                Ok(UpdateOutcome::Updated { report, .. }) => {
                    info!(
                        "Scheduled update activated generation {} (previous: {:?})",
                        report.generation, report.previous
                    );
                }
                Err(e) => {
                    warn!("Error during scheduled update check: {}", e);
                }
            }
        }
    })
}
