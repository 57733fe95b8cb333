//! Boundary abstractions for Cartwatch.
//!
//! This crate defines the traits and error types for the three external
//! collaborators the core depends on: the controlled device-automation
//! agent, the LLM text service, and the chat delivery channel. The core
//! assumes nothing about these beyond what is expressed here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Represents an error raised by the controlled device agent.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentError {
    /// The agent could not be launched at all (device unreachable, bad goal).
    #[error("Agent launch failed: {0}")]
    LaunchFailed(String),

    /// The agent started but raised before completing its goal.
    #[error("Agent execution failed: {0}")]
    ExecutionFailed(String),

    /// The agent acknowledged a cancellation request and stopped early.
    #[error("Agent run was cancelled")]
    Cancelled,
}

/// Represents an error from the LLM text service.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelError {
    /// An error occurred during the API request (network, auth, quota).
    #[error("Request Error: {0}")]
    RequestError(String),

    /// The model returned an error or an unusable response.
    #[error("Model Response Error: {0}")]
    ModelResponseError(String),
}

/// Represents an error from the chat delivery channel.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelError {
    /// Reading the latest message failed.
    #[error("Channel read failed: {0}")]
    ReadFailed(String),

    /// Sending a message failed.
    #[error("Channel send failed: {0}")]
    SendFailed(String),
}

/// An in-flight invocation of the device agent.
///
/// The handle is the only way to observe or influence a running invocation.
/// Cancellation is cooperative: `request_cancel` asks the agent to stop but
/// gives no guarantee about when (or whether) it reacts. Callers that need a
/// bound on shutdown latency must pair the request with a timed `join`.
#[async_trait]
pub trait RunningTask: Send {
    /// Waits for the invocation to finish.
    ///
    /// May be called again after a cancellation request to wait for the
    /// agent to wind down; implementations must tolerate repeated joins
    /// once the underlying operation has completed.
    ///
    /// # Errors
    /// Returns an `AgentError` if the invocation failed or was cancelled.
    async fn join(&mut self) -> Result<(), AgentError>;

    /// Requests cooperative cancellation of the invocation.
    ///
    /// Fire-and-forget: never blocks, may be ignored by the agent.
    fn request_cancel(&self);
}

/// The controlled device-automation agent.
///
/// The agent performs UI automation on a remote device per invocation. Any
/// informative result is embedded in text it writes to the shared output
/// sink during the run, not in a typed return value.
#[async_trait]
pub trait DeviceAgent: Send + Sync {
    /// Launches the agent with the given goal.
    ///
    /// # Arguments
    /// * `goal` - Natural-language goal text for the agent
    /// * `step_budget` - Maximum number of UI steps the agent may take
    /// * `deliberation` - Whether the agent should reason between steps
    ///
    /// # Errors
    /// Returns an `AgentError` if the invocation could not be started.
    async fn invoke(
        &self,
        goal: &str,
        step_budget: u32,
        deliberation: bool,
    ) -> Result<Box<dyn RunningTask>, AgentError>;
}

/// A plain prompt-in, text-out LLM service.
///
/// May fail or return malformed text; the extraction pipeline downstream is
/// the defense against that unreliability.
#[async_trait]
pub trait TextModel: Send + Sync {
    /// Generates a completion for the given prompt.
    ///
    /// # Errors
    /// Returns a `ModelError` if the request fails.
    async fn complete(&self, prompt: &str) -> Result<String, ModelError>;

    /// Returns the ID of the underlying model.
    fn model_id(&self) -> &str;
}

/// The messaging channel requests arrive on and reports are delivered to.
///
/// Both operations are blocking request/response calls with no retry.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Reads the latest message in the given chat, if any.
    ///
    /// # Errors
    /// Returns a `ChannelError` if the channel itself is unreachable;
    /// an unreadable or absent message is `Ok(None)`.
    async fn read_latest(&self, chat: &str) -> Result<Option<String>, ChannelError>;

    /// Sends a message to the given chat.
    ///
    /// # Returns
    /// Returns `Ok(true)` when the message was delivered, `Ok(false)` when
    /// the channel refused it without a hard failure.
    ///
    /// # Errors
    /// Returns a `ChannelError` if the channel itself is unreachable.
    async fn send(&self, chat: &str, text: &str) -> Result<bool, ChannelError>;
}
