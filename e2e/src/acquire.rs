use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::boskos::LeaseClient;
use crate::error::{Error, Result};
use crate::lease::{Lease, LeaseState};

/// How long to keep asking for a resource before giving up.
pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// Delay between acquire attempts.
pub const POLL_INTERVAL: Duration = Duration::from_secs(60);
/// Delay between heartbeats on a held lease. Must stay well below the
/// leasing service's reclaim window.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquireOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self {
            timeout: ACQUIRE_TIMEOUT,
            poll_interval: POLL_INTERVAL,
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }
}

impl AcquireOptions {
    /// Checks that every duration is non-zero.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] naming the first zero field.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("timeout", self.timeout),
            ("poll interval", self.poll_interval),
            ("heartbeat interval", self.heartbeat_interval),
        ];
        for (field, value) in fields {
            if value == Duration::ZERO {
                return Err(Error::Config(format!("acquire {field} must be non-zero")));
            }
        }
        Ok(())
    }
}

/// Polls the leasing service until a free `resource_type` can be moved to
/// busy, the timeout elapses, or `cancel` fires.
///
/// The first attempt is made one poll interval after the call. A lease is
/// returned as soon as the service hands one out. Service errors and empty
/// pools are logged and retried on the next tick.
///
/// # Errors
///
/// * [`Error::InvalidResourceType`] for an empty type, without polling.
/// * [`Error::Config`] if any of `options` is zero, without polling.
/// * [`Error::AcquireTimeout`] once `options.timeout` has passed, even with
///   a request still in flight. This error is fatal; callers are expected
///   to abort the test run.
/// * [`Error::Cancelled`] if `cancel` fires first.
pub async fn acquire_lease(
    client: &dyn LeaseClient,
    resource_type: &str,
    options: &AcquireOptions,
    cancel: &CancellationToken,
) -> Result<Lease> {
    if resource_type.trim().is_empty() {
        return Err(Error::InvalidResourceType(resource_type.to_string()));
    }
    options.validate()?;

    let start = Instant::now();
    let deadline = tokio::time::sleep(options.timeout);
    tokio::pin!(deadline);

    let mut ticker = interval_at(start + options.poll_interval, options.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(cancelled(resource_type)),
            () = &mut deadline => return Err(timed_out(resource_type, start)),
            _ = ticker.tick() => {}
        }

        // The deadline and cancellation also cut short a request in flight.
        let attempt = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(cancelled(resource_type)),
            () = &mut deadline => return Err(timed_out(resource_type, start)),
            attempt = client.acquire(resource_type, &LeaseState::Free, &LeaseState::Busy) => attempt,
        };

        match attempt {
            Err(e) => warn!("boskos failed to acquire {}: {}", resource_type, e),
            Ok(None) => warn!("boskos does not have a free {} at the moment", resource_type),
            Ok(Some(lease)) => {
                info!("acquired {} {} after {:?}", resource_type, lease.name, start.elapsed());
                return Ok(lease);
            }
        }
    }
}

fn cancelled(resource_type: &str) -> Error {
    debug!("acquire of {} cancelled", resource_type);
    Error::Cancelled
}

fn timed_out(resource_type: &str, start: Instant) -> Error {
    error!("timed out trying to acquire boskos {}", resource_type);
    Error::AcquireTimeout {
        resource_type: resource_type.to_string(),
        waited: start.elapsed(),
    }
}

/// Acquires a lease and starts heartbeating it. The heartbeat stops when
/// `cancel` (or a parent of it) is cancelled.
///
/// # Errors
///
/// Same as [`acquire_lease`].
pub async fn acquire_and_hold(
    client: Arc<dyn LeaseClient>,
    resource_type: &str,
    options: &AcquireOptions,
    cancel: &CancellationToken,
) -> Result<(Lease, Heartbeat)> {
    let lease = acquire_lease(client.as_ref(), resource_type, options, cancel).await?;
    let heartbeat = Heartbeat::spawn(
        client,
        lease.name.clone(),
        options.heartbeat_interval,
        cancel.child_token(),
    );
    Ok((lease, heartbeat))
}

/// Background task that keeps a lease marked busy so the leasing service
/// does not reclaim it.
///
/// Dropping the handle leaves the task running; call [`Heartbeat::stop`] to
/// end it.
#[derive(Debug)]
pub struct Heartbeat {
    name: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Heartbeat {
    /// Starts heartbeating `name` every `period`. A zero period falls back
    /// to [`HEARTBEAT_INTERVAL`].
    pub fn spawn(
        client: Arc<dyn LeaseClient>,
        name: impl Into<String>,
        period: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let name = name.into();
        let period = if period > Duration::ZERO {
            period
        } else {
            warn!("[Boskos] zero heartbeat interval for {}, using {:?}", name, HEARTBEAT_INTERVAL);
            HEARTBEAT_INTERVAL
        };
        let task_name = name.clone();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => {
                        debug!("[Boskos] heartbeat for {} stopped", task_name);
                        break;
                    }
                    _ = interval.tick() => {
                        // A missed beat is harmless as long as a later one lands
                        // before the service reclaims the resource.
                        match client.update_one(&task_name, &LeaseState::Busy, None).await {
                            Ok(()) => debug!("[Boskos] heartbeat for {}", task_name),
                            Err(e) => warn!("[Boskos] Update {} failed with {}", task_name, e),
                        }
                    }
                }
            }
        });

        Self {
            name,
            cancel,
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signals the task to stop without waiting for it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Stops the task and waits for it to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!("[Boskos] heartbeat task for {} ended abnormally: {}", self.name, e);
        }
    }
}
