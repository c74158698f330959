use std::path::{Path, PathBuf};

use chrono::Utc;
use rand::Rng;
use tracing::info;

use crate::config::HarnessConfig;
use crate::error::{Error, Result};
use crate::remote::RemoteInstance;

pub const DRIVER_PKG: &str = "src/sigs.k8s.io/gcp-compute-persistent-disk-csi-driver";
pub const DRIVER_BINARY: &str = "gce-pd-csi-driver";
pub const WORKSPACE_PREFIX: &str = "gce-pd-e2e-";
pub const STAGING_VERSION: &str = "latest";

const PORT_BASE: u16 = 1024;
const PORT_RANGE: u16 = 10_000;

/// Everything needed to stage and launch the driver on a test instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub pkg_path: PathBuf,
    pub bin_path: PathBuf,
    pub workspace_dir: String,
    pub run_driver_cmd: String,
    pub port: u16,
    /// Staging image version test cases should request.
    pub staging_version: String,
}

impl ClientConfig {
    pub fn new(go_path: &Path, workspace_dir: impl Into<String>, port: u16) -> Self {
        let workspace_dir = workspace_dir.into();
        let pkg_path = go_path.join(DRIVER_PKG);
        let bin_path = pkg_path.join("bin").join(DRIVER_BINARY);
        let endpoint = endpoint_for(port);
        let run_driver_cmd = format!(
            "sh -c '/usr/bin/nohup {ws}/{bin} --endpoint={endpoint}> {ws}/prog.out 2> {ws}/prog.err < /dev/null &'",
            ws = workspace_dir,
            bin = DRIVER_BINARY,
        );

        Self {
            pkg_path,
            bin_path,
            workspace_dir,
            run_driver_cmd,
            port,
            staging_version: STAGING_VERSION.to_string(),
        }
    }

    /// Config with a fresh workspace and a random port.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when `GOPATH` is not set.
    pub fn from_harness(cfg: &HarnessConfig) -> Result<Self> {
        let go_path = cfg
            .go_path
            .as_deref()
            .ok_or_else(|| Error::Config("could not find environment variable GOPATH".to_string()))?;
        Ok(Self::new(go_path, new_workspace_dir(WORKSPACE_PREFIX), random_port()))
    }

    pub fn endpoint(&self) -> String {
        endpoint_for(self.port)
    }

    pub fn remote_binary(&self) -> String {
        format!("{}/{}", self.workspace_dir, DRIVER_BINARY)
    }
}

fn endpoint_for(port: u16) -> String {
    format!("tcp://localhost:{port}")
}

pub fn random_port() -> u16 {
    PORT_BASE + rand::thread_rng().gen_range(0..PORT_RANGE)
}

/// A per-run directory under `/tmp` on the instance.
pub fn new_workspace_dir(prefix: &str) -> String {
    format!("/tmp/{}{}", prefix, Utc::now().format("%Y%m%dT%H%M%S"))
}

#[derive(Debug, Clone)]
pub struct TestContext {
    pub instance: String,
    pub endpoint: String,
    pub config: ClientConfig,
}

/// Stages the driver binary in the workspace and starts it in the background.
///
/// # Errors
///
/// Any remote step failing, with that step's output attached.
pub async fn setup_driver(instance: &dyn RemoteInstance, config: ClientConfig) -> Result<TestContext> {
    let ws = config.workspace_dir.as_str();
    instance
        .ssh_no_sudo(&["mkdir", "-p", ws])
        .await
        .map_err(|e| Error::remote(format!("failed to create workspace {ws}"), e))?;

    let remote_bin = config.remote_binary();
    instance.copy_to(&config.bin_path, &remote_bin).await.map_err(|e| {
        Error::remote(
            format!("failed to copy {} to {}", config.bin_path.display(), remote_bin),
            e,
        )
    })?;
    instance
        .ssh_no_sudo(&["chmod", "755", remote_bin.as_str()])
        .await
        .map_err(|e| Error::remote(format!("failed to make {remote_bin} executable"), e))?;

    instance
        .ssh(&[config.run_driver_cmd.as_str()])
        .await
        .map_err(|e| Error::remote("failed to start driver", e))?;

    info!("driver started on {} at {}", instance.name(), config.endpoint());
    Ok(TestContext {
        instance: instance.name().to_string(),
        endpoint: config.endpoint(),
        config,
    })
}
