//! In-process device agent for tests and demo runs.
//!
//! `ScriptedAgent` emulates the controlled agent: it writes a goal-derived
//! trace to the shared sink, simulates work with a delay, and either honors
//! or ignores cancellation. The runner and extraction pipeline cannot tell
//! it apart from a real device driver, which is the point.

use crate::capture::OutputSink;
use async_trait::async_trait;
use cartwatch_abstraction::{AgentError, DeviceAgent, RunningTask};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

type ReplyFn = dyn Fn(&str) -> String + Send + Sync;

/// Device agent that replays a scripted trace for each goal.
pub struct ScriptedAgent {
    /// Shared sink the trace is written through.
    sink: OutputSink,
    /// Maps a goal to the trace text the agent emits for it.
    reply: Arc<ReplyFn>,
    /// Simulated work time before the run completes.
    delay: Duration,
    /// When `false`, `request_cancel` has no effect and the run only ends
    /// when the delay elapses.
    honors_cancel: bool,
    /// When set, every run raises with this reason after emitting its trace.
    failure: Option<String>,
    /// When `true`, `invoke` itself fails.
    refuse_launch: bool,
}

impl ScriptedAgent {
    /// Creates an agent that instantly completes after emitting the reply.
    pub fn new(sink: OutputSink, reply: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Self {
            sink,
            reply: Arc::new(reply),
            delay: Duration::ZERO,
            honors_cancel: true,
            failure: None,
            refuse_launch: false,
        }
    }

    /// Sets the simulated work time per run.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Makes the agent ignore cancellation requests entirely.
    #[must_use]
    pub fn ignoring_cancel(mut self) -> Self {
        self.honors_cancel = false;
        self
    }

    /// Makes every run raise with the given reason after its trace.
    #[must_use]
    pub fn failing_with(mut self, reason: impl Into<String>) -> Self {
        self.failure = Some(reason.into());
        self
    }

    /// Makes `invoke` fail before any run starts.
    #[must_use]
    pub fn refusing_launch(mut self) -> Self {
        self.refuse_launch = true;
        self
    }
}

#[async_trait]
impl DeviceAgent for ScriptedAgent {
    async fn invoke(
        &self,
        goal: &str,
        step_budget: u32,
        deliberation: bool,
    ) -> Result<Box<dyn RunningTask>, AgentError> {
        if self.refuse_launch {
            return Err(AgentError::LaunchFailed("device unreachable".to_string()));
        }
        debug!(step_budget, deliberation, goal_len = goal.len(), "Scripted agent invoked");
        Ok(Box::new(ScriptedRun {
            sink: self.sink.clone(),
            trace: (self.reply)(goal),
            delay: self.delay,
            honors_cancel: self.honors_cancel,
            failure: self.failure.clone(),
            token: CancellationToken::new(),
            emitted: false,
            finished: None,
        }))
    }
}

struct ScriptedRun {
    sink: OutputSink,
    trace: String,
    delay: Duration,
    honors_cancel: bool,
    failure: Option<String>,
    token: CancellationToken,
    /// Trace lines are written at most once even across repeated joins.
    emitted: bool,
    /// Settled result, so joining after completion is a no-op.
    finished: Option<Result<(), AgentError>>,
}

#[async_trait]
impl RunningTask for ScriptedRun {
    async fn join(&mut self) -> Result<(), AgentError> {
        if let Some(result) = &self.finished {
            return result.clone();
        }

        if !self.emitted {
            self.emitted = true;
            for line in self.trace.lines() {
                self.sink.write_line(line);
            }
        }

        let result = if self.honors_cancel {
            tokio::select! {
                () = self.token.cancelled() => Err(AgentError::Cancelled),
                () = time::sleep(self.delay) => self.scripted_outcome(),
            }
        } else {
            time::sleep(self.delay).await;
            self.scripted_outcome()
        };

        self.finished = Some(result.clone());
        result
    }

    fn request_cancel(&self) {
        self.token.cancel();
    }
}

impl ScriptedRun {
    fn scripted_outcome(&self) -> Result<(), AgentError> {
        match &self.failure {
            Some(reason) => Err(AgentError::ExecutionFailed(reason.clone())),
            None => Ok(()),
        }
    }
}
