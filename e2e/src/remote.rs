use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::error::{Error, Result};

const DEFAULT_SSH_OPTIONS: &[&str] = &[
    "-o",
    "StrictHostKeyChecking=no",
    "-o",
    "UserKnownHostsFile=/dev/null",
    "-o",
    "LogLevel=ERROR",
];

/// A test VM reachable by remote command execution.
///
/// Arguments are joined by the remote shell, so redirections and pipes
/// passed as separate arguments (`">"`, `"|"`) are interpreted there.
#[async_trait]
pub trait RemoteInstance: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    /// Runs `args` as root and returns the combined output.
    async fn ssh(&self, args: &[&str]) -> Result<String>;

    /// Runs `args` as the login user and returns the combined output.
    async fn ssh_no_sudo(&self, args: &[&str]) -> Result<String>;

    /// Copies a local file onto the instance.
    async fn copy_to(&self, local: &Path, remote: &str) -> Result<()>;
}

/// Reaches an instance with the system `ssh` and `scp` binaries.
#[derive(Debug, Clone)]
pub struct SshInstance {
    name: String,
    host: String,
    user: Option<String>,
    identity_file: Option<PathBuf>,
    extra_options: Vec<String>,
}

impl SshInstance {
    pub fn new(name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            user: None,
            identity_file: None,
            extra_options: Vec::new(),
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.extra_options.push("-o".to_string());
        self.extra_options.push(option.into());
        self
    }

    fn target(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }

    fn connection_args(&self) -> Vec<String> {
        let mut args: Vec<String> = DEFAULT_SSH_OPTIONS.iter().map(|s| s.to_string()).collect();
        args.extend(self.extra_options.iter().cloned());
        if let Some(key) = &self.identity_file {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        args
    }

    fn ssh_command_line(&self, sudo: bool, args: &[&str]) -> Vec<String> {
        let mut line = self.connection_args();
        line.push(self.target());
        line.push("--".to_string());
        if sudo {
            line.push("sudo".to_string());
        }
        line.extend(args.iter().map(|s| s.to_string()));
        line
    }

    fn scp_command_line(&self, local: &Path, remote: &str) -> Vec<String> {
        let mut line = self.connection_args();
        line.push(local.display().to_string());
        line.push(format!("{}:{}", self.target(), remote));
        line
    }
}

async fn run(program: &str, args: &[String]) -> Result<String> {
    debug!("running {} {}", program, args.join(" "));
    let out = Command::new(program).args(args).output().await?;

    let mut combined = String::from_utf8_lossy(&out.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&out.stderr));

    if !out.status.success() {
        return Err(Error::Command {
            command: format!("{} {}", program, args.join(" ")),
            status: out.status.to_string(),
            output: combined,
        });
    }
    Ok(combined)
}

#[async_trait]
impl RemoteInstance for SshInstance {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self))]
    async fn ssh(&self, args: &[&str]) -> Result<String> {
        run("ssh", &self.ssh_command_line(true, args)).await
    }

    #[instrument(skip(self))]
    async fn ssh_no_sudo(&self, args: &[&str]) -> Result<String> {
        run("ssh", &self.ssh_command_line(false, args)).await
    }

    #[instrument(skip(self))]
    async fn copy_to(&self, local: &Path, remote: &str) -> Result<()> {
        run("scp", &self.scp_command_line(local, remote)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> SshInstance {
        SshInstance::new("e2e-node", "10.0.0.7")
            .with_user("prow")
            .with_identity_file("/root/.ssh/google_compute_engine")
    }

    #[test]
    fn test_privileged_command_line() {
        let line = instance().ssh_command_line(true, &["chmod", "-R", "777", "/mnt/test"]);
        let tail: Vec<&str> = line.iter().rev().take(7).rev().map(String::as_str).collect();
        assert_eq!(tail, ["prow@10.0.0.7", "--", "sudo", "chmod", "-R", "777", "/mnt/test"]);
        assert!(line.contains(&"-i".to_string()));
        assert!(line.contains(&"StrictHostKeyChecking=no".to_string()));
    }

    #[test]
    fn test_unprivileged_command_line_has_no_sudo() {
        let line = SshInstance::new("n", "host").ssh_command_line(false, &["cat", "/tmp/f"]);
        assert!(!line.iter().any(|a| a == "sudo"));
        assert_eq!(line[line.len() - 3..], ["--", "cat", "/tmp/f"]);
        assert!(line.contains(&"host".to_string()));
    }

    #[test]
    fn test_scp_command_line() {
        let line = instance()
            .with_option("ConnectTimeout=10")
            .scp_command_line(Path::new("/go/bin/driver"), "/tmp/ws/driver");
        assert_eq!(line[line.len() - 2..], ["/go/bin/driver", "prow@10.0.0.7:/tmp/ws/driver"]);
        assert!(line.contains(&"ConnectTimeout=10".to_string()));
    }

    #[tokio::test]
    async fn test_failed_command_keeps_output() {
        let err = run("sh", &["-c".to_string(), "echo oops >&2; exit 3".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.output(), Some("oops\n"));
        assert!(matches!(err, Error::Command { .. }));
    }
}
