use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::acquire::AcquireOptions;

pub const DEFAULT_BOSKOS_URL: &str = "http://boskos";
pub const DEFAULT_OWNER: &str = "pd-e2e";

/// Settings the harness picks up from the CI environment.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Boskos lease owner, the Prow job name.
    pub owner: String,
    pub boskos_url: String,
    pub go_path: Option<PathBuf>,
    pub access_token: Option<String>,
    pub acquire: AcquireOptions,
}

impl HarnessConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable lookup so tests don't
    /// have to touch the process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            owner: non_empty("JOB_NAME").unwrap_or_else(|| DEFAULT_OWNER.to_string()),
            boskos_url: non_empty("BOSKOS_URL").unwrap_or_else(|| DEFAULT_BOSKOS_URL.to_string()),
            go_path: non_empty("GOPATH").map(PathBuf::from),
            access_token: non_empty("GOOGLE_OAUTH_ACCESS_TOKEN"),
            acquire: AcquireOptions::default(),
        }
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.acquire.poll_interval = interval;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.acquire.heartbeat_interval = interval;
        self
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_without_environment() {
        let cfg = HarnessConfig::default();
        assert_eq!(cfg.owner, DEFAULT_OWNER);
        assert_eq!(cfg.boskos_url, DEFAULT_BOSKOS_URL);
        assert!(cfg.go_path.is_none());
        assert_eq!(cfg.acquire.timeout, Duration::from_secs(30 * 60));
        assert_eq!(cfg.acquire.poll_interval, Duration::from_secs(60));
        assert_eq!(cfg.acquire.heartbeat_interval, Duration::from_secs(5 * 60));
    }

    #[test]
    fn test_reads_prow_variables() {
        let vars: HashMap<&str, &str> = [
            ("JOB_NAME", "pull-gcp-compute-persistent-disk-csi-driver-e2e"),
            ("BOSKOS_URL", "http://boskos.test-pods.svc"),
            ("GOPATH", "/go"),
            ("GOOGLE_OAUTH_ACCESS_TOKEN", ""),
        ]
        .into_iter()
        .collect();

        let cfg = HarnessConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()))
            .with_poll_interval(Duration::from_secs(5));

        assert_eq!(cfg.owner, "pull-gcp-compute-persistent-disk-csi-driver-e2e");
        assert_eq!(cfg.boskos_url, "http://boskos.test-pods.svc");
        assert_eq!(cfg.go_path, Some(PathBuf::from("/go")));
        // empty values count as unset
        assert!(cfg.access_token.is_none());
        assert_eq!(cfg.acquire.poll_interval, Duration::from_secs(5));
    }
}
