//! State-transition poller and retry scheduler.
//!
//! Long-running provider operations are driven in two ways:
//! - pure decision functions map an observed status (and task state) to a
//!   [`Decision`] or a next sub-step, without touching the provider;
//! - bounded waits ([`wait_for_status`], [`wait_until_gone`]) poll in-process
//!   for at most a few minutes.
//!
//! Anything that may take longer is returned to the trampoline as a
//! `RetryAfter` decision instead of sleeping.

use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{OperationError, Result};
use crate::provider::{Getter, ProviderObject, ResourceKind};

/// Default delay before the trampoline re-invokes an operation.
pub const RETRY_INTERVAL_SECS: u64 = 30;

/// Synchronous wait after a state-changing command, before re-checking.
pub const SETTLE_DELAY: Duration = Duration::from_secs(10);

/// Upper bound on waiting for a deleted resource to disappear.
pub const DELETE_TIMEOUT: Duration = Duration::from_secs(120);

/// Poll interval while waiting for a deleted resource to disappear.
pub const DELETE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Retry delay while a port's security groups converge.
pub const PORT_SECURITY_GROUP_RETRY_SECS: u64 = 3;

/// Server statuses and task states.
pub mod server {
    /// Running.
    pub const ACTIVE: &str = "ACTIVE";
    /// Being built.
    pub const BUILD: &str = "BUILD";
    /// Powered off.
    pub const SHUTOFF: &str = "SHUTOFF";
    /// Suspended.
    pub const SUSPENDED: &str = "SUSPENDED";
    /// Failed.
    pub const ERROR: &str = "ERROR";
    /// Soft reboot in progress.
    pub const REBOOT: &str = "REBOOT";
    /// Hard reboot in progress.
    pub const HARD_REBOOT: &str = "HARD_REBOOT";
    /// Status not known to the compute service.
    pub const UNKNOWN: &str = "UNKNOWN";

    /// Task state while powering on.
    pub const POWERING_ON: &str = "powering-on";
    /// Task state while powering off.
    pub const POWERING_OFF: &str = "powering-off";
    /// Task state while a snapshot or backup uploads.
    pub const IMAGE_UPLOADING: &str = "image_uploading";
    /// Task state while a rebuild spawns the new image.
    pub const REBUILD_SPAWNING: &str = "rebuild_spawning";
}

/// Volume statuses.
pub mod volume {
    /// Detached and usable.
    pub const AVAILABLE: &str = "available";
    /// Attached to a server.
    pub const IN_USE: &str = "in-use";
    /// Failed.
    pub const ERROR: &str = "error";
    /// Failed while deleting.
    pub const ERROR_DELETING: &str = "error_deleting";
    /// Statuses a volume never recovers from.
    pub const ERROR_STATUSES: [&str; 2] = [ERROR, ERROR_DELETING];
}

/// Image status once uploaded.
pub const IMAGE_ACTIVE: &str = "active";

/// What the trampoline should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The target state was reached.
    Success,
    /// The resource reached a state the operation cannot continue from.
    Fail(String),
    /// Re-invoke the operation after the given number of seconds.
    RetryAfter(u64),
}

/// Compares statuses ignoring case and `-`/`_` spelling.
#[must_use]
pub fn same_state(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a.chars().zip(b.chars()).all(|(x, y)| {
            let norm = |c: char| if c == '_' { '-' } else { c.to_ascii_lowercase() };
            norm(x) == norm(y)
        })
}

fn state_in(state: &str, set: &[&str]) -> bool {
    set.iter().any(|s| same_state(state, s))
}

/// Progress of one long-running operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollState {
    /// Statuses that mean success.
    pub targets: BTreeSet<String>,
    /// Last observed status.
    pub current: String,
    /// Observations made so far.
    pub attempts: u32,
    /// Delay requested while still settling.
    pub retry_after_secs: u64,
}

impl PollState {
    /// Starts polling for any of `targets`.
    #[must_use]
    pub fn new(targets: &[&str], retry_after_secs: u64) -> Self {
        Self {
            targets: targets.iter().map(|s| (*s).to_string()).collect(),
            current: String::new(),
            attempts: 0,
            retry_after_secs,
        }
    }

    /// Records an observation and decides.
    pub fn observe(&mut self, current: &str, failures: &[&str]) -> Decision {
        self.attempts += 1;
        self.current = current.to_string();

        if self.targets.iter().any(|t| same_state(current, t)) {
            Decision::Success
        } else if state_in(current, failures) {
            Decision::Fail(format!(
                "reached {current} while waiting for {}",
                self.targets.iter().cloned().collect::<Vec<_>>().join("/")
            ))
        } else {
            Decision::RetryAfter(self.retry_after_secs)
        }
    }
}

/// Maps one observed status to a decision, retrying after
/// [`RETRY_INTERVAL_SECS`] while settling.
#[must_use]
pub fn observe(current: &str, targets: &[&str], failures: &[&str]) -> Decision {
    PollState::new(targets, RETRY_INTERVAL_SECS).observe(current, failures)
}

/// Next step of a server start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartStep {
    /// The server is running.
    Running,
    /// The server is off; issue a start and retry after the interval.
    IssueStartThenRetry,
    /// The server is still building or powering on.
    Wait,
    /// The server is in a state start cannot recover from.
    Fail(String),
}

/// Decides the next step of a server start.
#[must_use]
pub fn start_step(status: &str, task_state: Option<&str>, fault: Option<&str>) -> StartStep {
    let task = task_state.unwrap_or_default();
    if same_state(status, server::ACTIVE) {
        StartStep::Running
    } else if same_state(status, server::SHUTOFF) && !same_state(task, server::POWERING_ON) {
        StartStep::IssueStartThenRetry
    } else if same_state(status, server::BUILD) || same_state(task, server::POWERING_ON) {
        StartStep::Wait
    } else {
        StartStep::Fail(fault.map_or_else(
            || format!("{task}. A reason was not provided by the provider."),
            str::to_string,
        ))
    }
}

/// Next step of a server stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopStep {
    /// The server is off; nothing to do.
    Stopped,
    /// A stop is already in progress; retry later.
    Wait,
    /// Issue a stop, settle, then check with [`after_stop`].
    IssueStop,
}

/// Decides the next step of a server stop.
#[must_use]
pub fn stop_step(status: &str, task_state: Option<&str>) -> StopStep {
    if task_state.is_some_and(|t| same_state(t, server::POWERING_OFF)) {
        StopStep::Wait
    } else if same_state(status, server::SHUTOFF) {
        StopStep::Stopped
    } else {
        StopStep::IssueStop
    }
}

/// Checks the status observed after a stop command has settled.
#[must_use]
pub fn after_stop(status: &str) -> Decision {
    if same_state(status, server::SHUTOFF) {
        Decision::Success
    } else {
        Decision::RetryAfter(RETRY_INTERVAL_SECS)
    }
}

/// Checks the status observed after a start command has settled.
#[must_use]
pub fn after_start(status: &str) -> Decision {
    if same_state(status, server::ACTIVE) {
        Decision::Success
    } else {
        Decision::RetryAfter(RETRY_INTERVAL_SECS)
    }
}

/// Decides a reboot from the status observed after the reboot was issued.
#[must_use]
pub fn reboot_decision(status: &str) -> Decision {
    if state_in(status, &[server::REBOOT, server::HARD_REBOOT, server::UNKNOWN]) {
        Decision::RetryAfter(RETRY_INTERVAL_SECS)
    } else if same_state(status, server::ACTIVE) {
        Decision::Success
    } else if same_state(status, server::ERROR) {
        Decision::Fail(format!("Reboot operation finished in {status} state."))
    } else {
        Decision::Fail(format!(
            "Reboot operation finished in unexpected state: {status}"
        ))
    }
}

/// Retries while the task state is in `busy`, otherwise proceeds.
#[must_use]
pub fn busy_task(task_state: Option<&str>, busy: &[&str]) -> Decision {
    match task_state {
        Some(task) if state_in(task, busy) => Decision::RetryAfter(RETRY_INTERVAL_SECS),
        _ => Decision::Success,
    }
}

/// Returns true if a create was rejected because a boot volume is not ready.
#[must_use]
pub fn is_bdm_not_ready(error: &crate::error::LifecycleError) -> bool {
    use crate::error::{LifecycleError, ProviderError};
    matches!(
        error,
        LifecycleError::Provider(ProviderError::ApiRequestFailed { status: 400, message })
            if message.contains("Block Device Mapping is Invalid")
    )
}

/// Bounds an in-process poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Number of observations.
    pub attempts: u32,
    /// Sleep between observations.
    pub interval: Duration,
}

impl WaitPolicy {
    /// Waiting for an attached volume to report `in-use`.
    pub const VOLUME_ATTACH: Self = Self::new(10, Duration::from_secs(2));

    /// Waiting for a new volume to report `available`.
    pub const VOLUME_CREATE: Self = Self::new(20, Duration::from_secs(15));

    /// Longest a single invocation may block in a poll loop.
    pub const MAX_BLOCKING: Duration = Duration::from_secs(300);

    /// Creates a policy.
    #[must_use]
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Total time the policy may sleep.
    #[must_use]
    pub fn budget(&self) -> Duration {
        self.interval.saturating_mul(self.attempts)
    }

    /// Clamps the policy so its budget fits in [`Self::MAX_BLOCKING`].
    ///
    /// The caller hands anything longer back to the trampoline.
    #[must_use]
    pub fn capped(self) -> Self {
        if self.budget() <= Self::MAX_BLOCKING {
            return self;
        }
        let interval = self.interval.min(Self::MAX_BLOCKING);
        let per_attempt = interval.as_secs().max(1);
        let attempts = u32::try_from(Self::MAX_BLOCKING.as_secs() / per_attempt)
            .unwrap_or(u32::MAX)
            .clamp(1, self.attempts.max(1));
        debug!(
            "Wait of {} x {}s exceeds {}s; polling {attempts} x {}s in-process",
            self.attempts,
            self.interval.as_secs(),
            Self::MAX_BLOCKING.as_secs(),
            interval.as_secs()
        );
        Self::new(attempts, interval)
    }
}

/// Polls until the object reaches one of `targets`.
///
/// Returns the last observed object and whether a target was reached.
///
/// # Errors
///
/// Returns [`OperationError::UnexpectedStatus`] if a status in `failures` is
/// observed, or any provider error from the lookup.
pub async fn wait_for_status(
    getter: &dyn Getter,
    kind: ResourceKind,
    id: &str,
    targets: &[&str],
    failures: &[&str],
    policy: WaitPolicy,
) -> Result<(ProviderObject, bool)> {
    let mut state = PollState::new(targets, policy.interval.as_secs());
    let mut object = getter.get(kind, id).await?;

    for attempt in 1..=policy.attempts.max(1) {
        match state.observe(object.status(), failures) {
            Decision::Success => return Ok((object, true)),
            Decision::Fail(reason) => {
                return Err(OperationError::UnexpectedStatus {
                    kind,
                    status: object.status().to_string(),
                    reason: object.fault_message().map_or(reason, str::to_string),
                }
                .into());
            }
            Decision::RetryAfter(_) if attempt < policy.attempts => {
                debug!(
                    "Waiting for {kind} {id}: {} (attempt {attempt}/{})",
                    object.status(),
                    policy.attempts
                );
                tokio::time::sleep(policy.interval).await;
                object = getter.get(kind, id).await?;
            }
            Decision::RetryAfter(_) => break,
        }
    }

    warn!(
        "{kind} {id} current state: '{}', expected state: '{}'",
        object.status(),
        targets.join("/")
    );
    Ok((object, false))
}

/// Polls until the object no longer exists.
///
/// # Errors
///
/// Returns a recoverable [`OperationError::Timeout`] if the object still
/// exists after `timeout`.
pub async fn wait_until_gone(
    getter: &dyn Getter,
    kind: ResourceKind,
    id: &str,
    timeout: Duration,
    interval: Duration,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        match getter.get(kind, id).await {
            Ok(object) => {
                debug!(
                    "Waiting for {kind} \"{id}\" to be deleted. current status: {}",
                    object.status()
                );
                tokio::time::sleep(interval).await;
            }
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        }
    }

    Err(OperationError::Timeout {
        kind,
        id: id.to_string(),
        expected: String::from("deleted"),
        waited_secs: timeout.as_secs(),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{LifecycleError, ProviderError};
    use crate::provider::facade::MockGetter;

    #[test]
    fn test_observe_partitions_statuses() {
        assert_eq!(
            observe("available", &[volume::AVAILABLE], &volume::ERROR_STATUSES),
            Decision::Success
        );
        assert!(matches!(
            observe("error", &[volume::AVAILABLE], &volume::ERROR_STATUSES),
            Decision::Fail(_)
        ));
        assert_eq!(
            observe("creating", &[volume::AVAILABLE], &volume::ERROR_STATUSES),
            Decision::RetryAfter(30)
        );
    }

    #[test]
    fn test_poll_state_counts_attempts() {
        let mut state = PollState::new(&[server::ACTIVE], 15);
        assert_eq!(state.observe("BUILD", &[server::ERROR]), Decision::RetryAfter(15));
        assert_eq!(state.observe("ACTIVE", &[server::ERROR]), Decision::Success);
        assert_eq!(state.attempts, 2);
        assert_eq!(state.current, "ACTIVE");
    }

    #[test]
    fn test_start_table() {
        assert_eq!(start_step("ACTIVE", None, None), StartStep::Running);
        assert_eq!(start_step("SHUTOFF", None, None), StartStep::IssueStartThenRetry);
        assert_eq!(
            start_step("SHUTOFF", Some("powering-on"), None),
            StartStep::Wait
        );
        assert_eq!(start_step("BUILD", Some("spawning"), None), StartStep::Wait);
        assert_eq!(
            start_step("ERROR", None, Some("No valid host was found")),
            StartStep::Fail(String::from("No valid host was found"))
        );
        assert!(matches!(
            start_step("ERROR", Some("deleting"), None),
            StartStep::Fail(reason) if reason.starts_with("deleting.")
        ));
    }

    #[test]
    fn test_stop_table() {
        assert_eq!(stop_step("SHUTOFF", None), StopStep::Stopped);
        assert_eq!(stop_step("ACTIVE", Some("POWERING_OFF")), StopStep::Wait);
        assert_eq!(stop_step("ACTIVE", Some("powering-off")), StopStep::Wait);
        assert_eq!(stop_step("ACTIVE", None), StopStep::IssueStop);
        assert_eq!(after_stop("SHUTOFF"), Decision::Success);
        assert_eq!(after_stop("ACTIVE"), Decision::RetryAfter(30));
    }

    #[test]
    fn test_reboot_table() {
        for status in ["REBOOT", "HARD_REBOOT", "UNKNOWN"] {
            assert_eq!(reboot_decision(status), Decision::RetryAfter(30));
        }
        assert_eq!(reboot_decision("ACTIVE"), Decision::Success);
        assert_eq!(
            reboot_decision("ERROR"),
            Decision::Fail(String::from("Reboot operation finished in ERROR state."))
        );
        assert!(matches!(reboot_decision("SHUTOFF"), Decision::Fail(_)));
    }

    #[test]
    fn test_busy_task() {
        let busy = [server::IMAGE_UPLOADING, server::REBUILD_SPAWNING];
        assert_eq!(busy_task(Some("image_uploading"), &busy), Decision::RetryAfter(30));
        assert_eq!(busy_task(Some("rebuild_spawning"), &busy), Decision::RetryAfter(30));
        assert_eq!(busy_task(None, &busy), Decision::Success);
        assert_eq!(busy_task(Some("powering-on"), &busy), Decision::Success);
    }

    #[test]
    fn test_bdm_not_ready() {
        let err = LifecycleError::from(ProviderError::api_error(
            400,
            "Block Device Mapping is Invalid: failed to get volume",
        ));
        assert!(is_bdm_not_ready(&err));
        let err = LifecycleError::from(ProviderError::api_error(400, "Invalid flavor"));
        assert!(!is_bdm_not_ready(&err));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_status_reaches_target() {
        let mut getter = MockGetter::new();
        let mut calls = 0;
        getter.expect_get().times(3).returning(move |_, id| {
            calls += 1;
            let status = if calls < 3 { "attaching" } else { "in-use" };
            Ok(ProviderObject::new(id).with_status(status))
        });

        let (volume, reached) = wait_for_status(
            &getter,
            ResourceKind::Volume,
            "vol-1",
            &[volume::IN_USE],
            &volume::ERROR_STATUSES,
            WaitPolicy::VOLUME_ATTACH,
        )
        .await
        .expect("wait");

        assert!(reached);
        assert_eq!(volume.status(), "in-use");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_status_gives_up() {
        let mut getter = MockGetter::new();
        getter
            .expect_get()
            .times(4)
            .returning(|_, id| Ok(ProviderObject::new(id).with_status("creating")));

        let (_, reached) = wait_for_status(
            &getter,
            ResourceKind::Volume,
            "vol-1",
            &[volume::AVAILABLE],
            &volume::ERROR_STATUSES,
            WaitPolicy::new(4, Duration::from_secs(15)),
        )
        .await
        .expect("wait");

        assert!(!reached);
    }

    #[test]
    fn test_capped_policy_fits_blocking_limit() {
        let huge = WaitPolicy::new(2, Duration::from_secs(u64::MAX));
        assert_eq!(huge.budget(), Duration::MAX);

        let capped = huge.capped();
        assert_eq!(capped, WaitPolicy::new(1, WaitPolicy::MAX_BLOCKING));

        let many = WaitPolicy::new(1000, Duration::from_secs(15)).capped();
        assert_eq!(many, WaitPolicy::new(20, Duration::from_secs(15)));
        assert!(many.budget() <= WaitPolicy::MAX_BLOCKING);

        assert_eq!(WaitPolicy::VOLUME_CREATE.capped(), WaitPolicy::VOLUME_CREATE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_status_error_is_permanent() {
        let mut getter = MockGetter::new();
        getter
            .expect_get()
            .returning(|_, id| Ok(ProviderObject::new(id).with_status("error")));

        let err = wait_for_status(
            &getter,
            ResourceKind::Volume,
            "vol-1",
            &[volume::AVAILABLE],
            &volume::ERROR_STATUSES,
            WaitPolicy::VOLUME_CREATE,
        )
        .await
        .expect_err("error status");

        assert!(!err.is_recoverable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_gone() {
        let mut getter = MockGetter::new();
        let mut calls = 0;
        getter.expect_get().returning(move |kind, id| {
            calls += 1;
            if calls < 3 {
                Ok(ProviderObject::new(id).with_status("DELETING"))
            } else {
                Err(ProviderError::not_found(kind, id).into())
            }
        });

        wait_until_gone(
            &getter,
            ResourceKind::Server,
            "srv-1",
            DELETE_TIMEOUT,
            DELETE_POLL_INTERVAL,
        )
        .await
        .expect("gone");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_gone_times_out_recoverably() {
        let mut getter = MockGetter::new();
        getter
            .expect_get()
            .returning(|_, id| Ok(ProviderObject::new(id).with_status("ACTIVE")));

        let err = wait_until_gone(
            &getter,
            ResourceKind::Server,
            "srv-1",
            DELETE_TIMEOUT,
            DELETE_POLL_INTERVAL,
        )
        .await
        .expect_err("timeout");

        assert!(err.is_recoverable());
    }
}
