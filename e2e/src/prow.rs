//! Setup for runs inside Prow, where the test project is borrowed from
//! Boskos instead of being configured by hand.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::acquire::{acquire_and_hold, AcquireOptions, Heartbeat};
use crate::boskos::LeaseClient;
use crate::cloud::{default_compute_service_account, ProjectDirectory};
use crate::error::{Error, Result};
use crate::lease::Lease;

#[derive(Debug)]
pub struct ProwSetup {
    pub project: String,
    pub service_account: String,
    pub lease: Lease,
    pub heartbeat: Heartbeat,
}

/// Borrows a project of `resource_type`, keeps it alive, and resolves the
/// project's default compute service account.
///
/// # Errors
///
/// Everything from [`crate::acquire::acquire_lease`]. A failed project
/// lookup is reported as [`Error::Cloud`] and stops the heartbeat first.
pub async fn setup_prow_config(
    client: Arc<dyn LeaseClient>,
    projects: &dyn ProjectDirectory,
    resource_type: &str,
    options: &AcquireOptions,
    shutdown: &CancellationToken,
) -> Result<ProwSetup> {
    debug!("Running in PROW");
    debug!("Fetching a Boskos loaned project");

    let (lease, heartbeat) = acquire_and_hold(client, resource_type, options, shutdown).await?;
    let project = lease.name.clone();

    debug!("Fetching the default compute service account");
    let number = match projects.project_number(&project).await {
        Ok(number) => number,
        Err(e) => {
            heartbeat.stop().await;
            return Err(match e {
                Error::Cloud(_) => e,
                other => Error::Cloud(format!(
                    "failed to get project {project} from Cloud Resource Manager: {other}"
                )),
            });
        }
    };

    let service_account = default_compute_service_account(number);
    info!("Using project {} and service account {}", project, service_account);

    Ok(ProwSetup {
        project,
        service_account,
        lease,
        heartbeat,
    })
}
