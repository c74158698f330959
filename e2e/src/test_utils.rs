//! In-memory stand-ins for the leasing service, a remote instance, and the
//! project directory.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::boskos::LeaseClient;
use crate::cloud::ProjectDirectory;
use crate::error::{Error, Result};
use crate::lease::{Lease, LeaseState, UserData};
use crate::remote::RemoteInstance;

/// What the fake leasing service answers to one acquire call.
#[derive(Debug, Clone)]
pub enum AcquireOutcome {
    Lease(Lease),
    Empty,
    Fail(String),
}

#[derive(Debug, Clone)]
pub struct RecordedUpdate {
    pub name: String,
    pub state: LeaseState,
    pub at: Instant,
}

/// Leasing service that replays a script of acquire outcomes and answers
/// `Empty` once the script runs out.
#[derive(Debug, Default)]
pub struct FakeLeaseClient {
    script: Mutex<VecDeque<AcquireOutcome>>,
    acquire_delay: Duration,
    acquire_calls: AtomicUsize,
    failing_updates: AtomicUsize,
    updates: Mutex<Vec<RecordedUpdate>>,
    releases: Mutex<Vec<(String, LeaseState)>>,
}

impl FakeLeaseClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(outcomes: impl IntoIterator<Item = AcquireOutcome>) -> Self {
        let client = Self::new();
        client.script.lock().extend(outcomes);
        client
    }

    /// Makes every acquire call take `delay` before it answers.
    pub fn with_acquire_delay(mut self, delay: Duration) -> Self {
        self.acquire_delay = delay;
        self
    }

    /// Makes the next `n` heartbeat updates fail.
    pub fn fail_next_updates(&self, n: usize) {
        self.failing_updates.store(n, Ordering::SeqCst);
    }

    pub fn acquire_calls(&self) -> usize {
        self.acquire_calls.load(Ordering::SeqCst)
    }

    /// Every update attempt, failed ones included.
    pub fn updates(&self) -> Vec<RecordedUpdate> {
        self.updates.lock().clone()
    }

    pub fn releases(&self) -> Vec<(String, LeaseState)> {
        self.releases.lock().clone()
    }
}

#[async_trait]
impl LeaseClient for FakeLeaseClient {
    async fn acquire(
        &self,
        resource_type: &str,
        _state: &LeaseState,
        dest: &LeaseState,
    ) -> Result<Option<Lease>> {
        self.acquire_calls.fetch_add(1, Ordering::SeqCst);
        if !self.acquire_delay.is_zero() {
            tokio::time::sleep(self.acquire_delay).await;
        }
        let next = self.script.lock().pop_front().unwrap_or(AcquireOutcome::Empty);
        match next {
            AcquireOutcome::Lease(mut lease) => {
                lease.resource_type = resource_type.to_string();
                lease.state = dest.clone();
                Ok(Some(lease))
            }
            AcquireOutcome::Empty => Ok(None),
            AcquireOutcome::Fail(body) => Err(Error::Boskos { status: 500, body }),
        }
    }

    async fn update_one(
        &self,
        name: &str,
        state: &LeaseState,
        _user_data: Option<&UserData>,
    ) -> Result<()> {
        self.updates.lock().push(RecordedUpdate {
            name: name.to_string(),
            state: state.clone(),
            at: Instant::now(),
        });

        let failing = self
            .failing_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Boskos {
                status: 503,
                body: "boskos unavailable".to_string(),
            });
        }
        Ok(())
    }

    async fn release_one(&self, name: &str, dest: &LeaseState) -> Result<()> {
        self.releases.lock().push((name.to_string(), dest.clone()));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    pub sudo: bool,
    pub args: Vec<String>,
}

impl RecordedCommand {
    pub fn line(&self) -> String {
        self.args.join(" ")
    }
}

#[derive(Debug, Clone)]
struct FakeResponse {
    output: String,
    fail: bool,
}

/// Remote instance that answers commands by program name and records what
/// it was asked to run. Unknown programs succeed with empty output.
#[derive(Debug)]
pub struct FakeInstance {
    name: String,
    responses: Mutex<HashMap<String, FakeResponse>>,
    history: Mutex<Vec<RecordedCommand>>,
    copies: Mutex<Vec<(PathBuf, String)>>,
}

impl FakeInstance {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            responses: Mutex::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
            copies: Mutex::new(Vec::new()),
        }
    }

    pub fn respond(&self, program: &str, output: impl Into<String>) {
        self.responses.lock().insert(
            program.to_string(),
            FakeResponse {
                output: output.into(),
                fail: false,
            },
        );
    }

    pub fn fail(&self, program: &str, output: impl Into<String>) {
        self.responses.lock().insert(
            program.to_string(),
            FakeResponse {
                output: output.into(),
                fail: true,
            },
        );
    }

    pub fn history(&self) -> Vec<RecordedCommand> {
        self.history.lock().clone()
    }

    pub fn copies(&self) -> Vec<(PathBuf, String)> {
        self.copies.lock().clone()
    }

    fn run(&self, sudo: bool, args: &[&str]) -> Result<String> {
        let recorded = RecordedCommand {
            sudo,
            args: args.iter().map(|s| s.to_string()).collect(),
        };
        let line = recorded.line();
        self.history.lock().push(recorded);

        let program = args.first().copied().unwrap_or_default();
        let response = self.responses.lock().get(program).cloned();
        match response {
            Some(FakeResponse { output, fail: true }) => Err(Error::Command {
                command: line,
                status: "exit status: 1".to_string(),
                output,
            }),
            Some(FakeResponse { output, .. }) => Ok(output),
            None => Ok(String::new()),
        }
    }
}

#[async_trait]
impl RemoteInstance for FakeInstance {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ssh(&self, args: &[&str]) -> Result<String> {
        self.run(true, args)
    }

    async fn ssh_no_sudo(&self, args: &[&str]) -> Result<String> {
        self.run(false, args)
    }

    async fn copy_to(&self, local: &Path, remote: &str) -> Result<()> {
        self.copies.lock().push((local.to_path_buf(), remote.to_string()));
        Ok(())
    }
}

/// Project directory backed by a fixed id → number map.
#[derive(Debug, Default)]
pub struct FakeProjectDirectory {
    projects: HashMap<String, i64>,
}

impl FakeProjectDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project(mut self, id: impl Into<String>, number: i64) -> Self {
        self.projects.insert(id.into(), number);
        self
    }
}

#[async_trait]
impl ProjectDirectory for FakeProjectDirectory {
    async fn project_number(&self, project_id: &str) -> Result<i64> {
        self.projects
            .get(project_id)
            .copied()
            .ok_or_else(|| Error::Other(anyhow::anyhow!("project {} not found", project_id)))
    }
}

pub fn lease_named(name: &str) -> Lease {
    Lease::new(name, "gce-project", LeaseState::Free)
}
