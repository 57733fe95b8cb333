// Error types for the Cartwatch core

use cartwatch_abstraction::{ChannelError, ModelError};
use thiserror::Error;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, WatchError>;

/// Core errors
///
/// Nothing here is fatal to the process: timeout and agent failures are
/// terminal for one invocation only, and extraction/validation failures
/// degrade the affected record rather than aborting the run.
#[derive(Debug, Error)]
pub enum WatchError {
    /// Invocation exceeded its deadline
    #[error("Agent invocation timed out after {seconds}s")]
    Timeout {
        /// The deadline that was exceeded, in seconds
        seconds: u64,
    },

    /// The controlled agent raised before completing
    #[error("Agent failure: {0}")]
    AgentFailure(String),

    /// No usable record was recoverable from captured text
    #[error("Extraction failed: {0}")]
    ExtractionFailure(String),

    /// A recovered field failed numeric or unit normalization
    #[error("Validation failed: {0}")]
    ValidationFailure(String),

    /// LLM text service error
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// Delivery channel error
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}
