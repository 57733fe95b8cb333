//! Resilient execution of device-agent invocations.
//!
//! The controlled agent and the device it drives are a single shared
//! resource, so at most one invocation runs at any instant, guarded by an
//! exclusive slot held across the entire call including cleanup. Each
//! invocation races the agent against a caller-supplied timeout; on timeout
//! or failure the runner requests cooperative cancellation, waits a short
//! grace window, then waits a bounded drain window for the agent to finish,
//! and returns whatever text was captured either way. The runner never
//! retries and never blocks indefinitely on cancellation.

use crate::capture::OutputSink;
use crate::config::{ProfileConfig, WatchConfig};
use crate::error::WatchError;
use cartwatch_abstraction::{DeviceAgent, RunningTask};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time;
use tracing::{debug, warn};
use uuid::Uuid;

/// Profile selecting how much latitude the agent gets for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunProfile {
    /// Few steps, no deliberation. For quick housekeeping tasks.
    Fast,
    /// Many steps, deliberation enabled. For tasks whose trace matters.
    Full,
}

/// One request to run the device agent. Immutable; discarded after the
/// call returns.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    /// Goal text handed to the agent.
    pub goal: String,
    /// Hard deadline for the invocation.
    pub timeout: Duration,
    /// Step-budget/deliberation profile.
    pub profile: RunProfile,
    /// Whether to capture the shared output sink for the duration.
    pub capture_output: bool,
}

impl TaskSpec {
    /// Creates a task spec with output capture disabled.
    #[must_use]
    pub fn new(goal: impl Into<String>, timeout: Duration, profile: RunProfile) -> Self {
        Self { goal: goal.into(), timeout, profile, capture_output: false }
    }

    /// Enables output capture for this task.
    #[must_use]
    pub fn with_capture(mut self) -> Self {
        self.capture_output = true;
        self
    }
}

/// How one invocation ended. Exactly one of these holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The agent completed within its deadline.
    Completed,
    /// The invocation exceeded its deadline and was cancelled.
    TimedOut {
        /// The deadline that was exceeded, in seconds.
        seconds: u64,
    },
    /// The agent raised before completing.
    Failed {
        /// Description of the underlying failure.
        reason: String,
    },
}

impl Disposition {
    /// Returns `true` for a normal completion.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Converts a non-completed disposition into the matching error kind.
    #[must_use]
    pub fn to_error(&self) -> Option<WatchError> {
        match self {
            Self::Completed => None,
            Self::TimedOut { seconds } => Some(WatchError::Timeout { seconds: *seconds }),
            Self::Failed { reason } => Some(WatchError::AgentFailure(reason.clone())),
        }
    }
}

/// Result of one invocation.
///
/// `captured` reflects everything the agent emitted up to the point of
/// cancellation; partial output is preserved, never discarded, because the
/// extractor must be able to recover a completion marker emitted just
/// before a slow shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Text captured from the shared sink (empty if capture was off).
    pub captured: String,
    /// How the invocation ended.
    pub disposition: Disposition,
}

/// Serialized, timeout-enforcing wrapper around the device agent.
pub struct TaskRunner {
    /// The controlled agent.
    agent: Arc<dyn DeviceAgent>,
    /// Shared output sink the agent writes its trace through.
    sink: OutputSink,
    /// Exclusive execution slot; held across the whole invocation
    /// including cancellation waits and capture drain.
    slot: Mutex<()>,
    fast_profile: ProfileConfig,
    full_profile: ProfileConfig,
    grace: Duration,
    drain_wait: Duration,
}

impl fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRunner")
            .field("grace", &self.grace)
            .field("drain_wait", &self.drain_wait)
            .finish_non_exhaustive()
    }
}

impl TaskRunner {
    /// Creates a new runner over the given agent and shared sink.
    ///
    /// # Arguments
    /// * `agent` - The controlled device agent
    /// * `sink` - The sink the agent writes its trace through
    /// * `config` - Source of profile budgets and cancellation bounds
    #[must_use]
    pub fn new(agent: Arc<dyn DeviceAgent>, sink: OutputSink, config: &WatchConfig) -> Self {
        Self {
            agent,
            sink,
            slot: Mutex::new(()),
            fast_profile: config.fast_profile,
            full_profile: config.full_profile,
            grace: config.grace(),
            drain_wait: config.drain_wait(),
        }
    }

    fn profile_params(&self, profile: RunProfile) -> ProfileConfig {
        match profile {
            RunProfile::Fast => self.fast_profile,
            RunProfile::Full => self.full_profile,
        }
    }

    /// Runs one task to completion, timeout, or failure.
    ///
    /// Blocks while another invocation holds the execution slot. On every
    /// exit path the capture buffer is drained and the shared sink
    /// restored before this returns.
    pub async fn run(&self, spec: &TaskSpec) -> RunOutcome {
        let run_id = Uuid::new_v4();
        let _slot = self.slot.lock().await;

        debug!(
            run_id = %run_id,
            profile = ?spec.profile,
            timeout_s = spec.timeout.as_secs_f64(),
            capture = spec.capture_output,
            "Invoking device agent"
        );

        let guard = spec.capture_output.then(|| self.sink.capture());
        let params = self.profile_params(spec.profile);

        let mut handle =
            match self.agent.invoke(&spec.goal, params.max_steps, params.deliberation).await {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(run_id = %run_id, error = %e, "Agent launch failed");
                    let captured = guard.map_or_else(String::new, crate::CaptureGuard::finish);
                    return RunOutcome {
                        captured,
                        disposition: Disposition::Failed { reason: e.to_string() },
                    };
                }
            };

        let disposition = match time::timeout(spec.timeout, handle.join()).await {
            Ok(Ok(())) => {
                debug!(run_id = %run_id, "Agent completed");
                Disposition::Completed
            }
            Ok(Err(e)) => {
                warn!(run_id = %run_id, error = %e, "Agent raised, cancelling");
                self.wind_down(handle.as_mut()).await;
                Disposition::Failed { reason: e.to_string() }
            }
            Err(_elapsed) => {
                warn!(
                    run_id = %run_id,
                    timeout_s = spec.timeout.as_secs_f64(),
                    "Agent timed out, cancelling"
                );
                self.wind_down(handle.as_mut()).await;
                Disposition::TimedOut { seconds: spec.timeout.as_secs() }
            }
        };

        // Drain after wind-down so output emitted during a slow shutdown
        // still lands in the capture.
        let captured = guard.map_or_else(String::new, crate::CaptureGuard::finish);
        debug!(run_id = %run_id, captured_len = captured.len(), disposition = ?disposition, "Run finished");
        RunOutcome { captured, disposition }
    }

    /// Cancel → grace → bounded-wait sequence.
    ///
    /// Cancellation is cooperative and best-effort: if the agent has not
    /// finished once the drain window elapses, the runner gives up rather
    /// than block.
    async fn wind_down(&self, task: &mut (dyn RunningTask + '_)) {
        task.request_cancel();
        time::sleep(self.grace).await;
        if time::timeout(self.drain_wait, task.join()).await.is_err() {
            warn!(
                drain_wait_ms = self.drain_wait.as_millis() as u64,
                "Agent did not finish within drain window, giving up"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::ScriptedAgent;
    use std::time::Instant;

    fn quick_config() -> WatchConfig {
        WatchConfig { grace_ms: 20, drain_wait_ms: 60, ..WatchConfig::default() }
    }

    fn runner_over(agent: ScriptedAgent, sink: &OutputSink) -> TaskRunner {
        TaskRunner::new(Arc::new(agent), sink.clone(), &quick_config())
    }

    #[tokio::test]
    async fn test_completed_run_returns_captured_text() {
        let sink = OutputSink::new();
        let agent = ScriptedAgent::new(sink.clone(), |_| "trace line\ndone".to_string());
        let runner = runner_over(agent, &sink);

        let spec = TaskSpec::new("find onions", Duration::from_secs(5), RunProfile::Full)
            .with_capture();
        let outcome = runner.run(&spec).await;

        assert_eq!(outcome.disposition, Disposition::Completed);
        assert!(outcome.captured.contains("trace line"));
        assert!(!sink.is_capturing());
    }

    #[tokio::test]
    async fn test_capture_disabled_returns_empty_text() {
        let sink = OutputSink::new();
        let agent = ScriptedAgent::new(sink.clone(), |_| "noise".to_string());
        let runner = runner_over(agent, &sink);

        let outcome = runner
            .run(&TaskSpec::new("press home", Duration::from_secs(5), RunProfile::Fast))
            .await;

        assert_eq!(outcome.disposition, Disposition::Completed);
        assert!(outcome.captured.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_preserves_partial_output() {
        let sink = OutputSink::new();
        let agent = ScriptedAgent::new(sink.clone(), |_| "partial progress".to_string())
            .with_delay(Duration::from_secs(10));
        let runner = runner_over(agent, &sink);

        let spec = TaskSpec::new("slow task", Duration::from_millis(50), RunProfile::Full)
            .with_capture();
        let outcome = runner.run(&spec).await;

        assert!(matches!(outcome.disposition, Disposition::TimedOut { .. }));
        assert!(outcome.captured.contains("partial progress"));
        assert!(!sink.is_capturing());
    }

    #[tokio::test]
    async fn test_timeout_bound_holds_for_stubborn_agent() {
        let sink = OutputSink::new();
        // Ignores cancellation entirely; only the drain window bounds it.
        let agent = ScriptedAgent::new(sink.clone(), |_| String::new())
            .with_delay(Duration::from_secs(30))
            .ignoring_cancel();
        let runner = runner_over(agent, &sink);

        let start = Instant::now();
        let outcome = runner
            .run(&TaskSpec::new("frozen app", Duration::from_millis(50), RunProfile::Full))
            .await;
        let elapsed = start.elapsed();

        assert!(matches!(outcome.disposition, Disposition::TimedOut { .. }));
        // timeout (50ms) + grace (20ms) + drain (60ms) plus scheduling slack
        assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn test_agent_failure_reported_with_partial_output() {
        let sink = OutputSink::new();
        let agent = ScriptedAgent::new(sink.clone(), |_| "got this far".to_string())
            .failing_with("UI element vanished");
        let runner = runner_over(agent, &sink);

        let spec =
            TaskSpec::new("doomed", Duration::from_secs(5), RunProfile::Full).with_capture();
        let outcome = runner.run(&spec).await;

        match &outcome.disposition {
            Disposition::Failed { reason } => assert!(reason.contains("UI element vanished")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(outcome.captured.contains("got this far"));
        assert!(!sink.is_capturing());
    }

    #[tokio::test]
    async fn test_sink_restored_when_launch_fails() {
        let sink = OutputSink::new();
        let agent = ScriptedAgent::new(sink.clone(), |_| String::new()).refusing_launch();
        let runner = runner_over(agent, &sink);

        let spec = TaskSpec::new("unlaunchable", Duration::from_secs(5), RunProfile::Full)
            .with_capture();
        let outcome = runner.run(&spec).await;

        assert!(matches!(outcome.disposition, Disposition::Failed { .. }));
        assert!(!sink.is_capturing());
    }

    #[tokio::test]
    async fn test_invocations_are_serialized() {
        let sink = OutputSink::new();
        let agent = ScriptedAgent::new(sink.clone(), |_| String::new())
            .with_delay(Duration::from_millis(50));
        let runner = Arc::new(runner_over(agent, &sink));

        let start = Instant::now();
        let a = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move {
                runner
                    .run(&TaskSpec::new("first", Duration::from_secs(5), RunProfile::Fast))
                    .await
            })
        };
        let b = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move {
                runner
                    .run(&TaskSpec::new("second", Duration::from_secs(5), RunProfile::Fast))
                    .await
            })
        };
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        assert_eq!(a.disposition, Disposition::Completed);
        assert_eq!(b.disposition, Disposition::Completed);
        // Two 50ms agents can only run back to back.
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_disposition_to_error_kinds() {
        assert!(Disposition::Completed.to_error().is_none());
        assert!(matches!(
            Disposition::TimedOut { seconds: 120 }.to_error(),
            Some(WatchError::Timeout { seconds: 120 })
        ));
        assert!(matches!(
            Disposition::Failed { reason: "boom".to_string() }.to_error(),
            Some(WatchError::AgentFailure(_))
        ));
    }
}
