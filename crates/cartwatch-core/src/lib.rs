//! Core engine for Cartwatch.
//!
//! Two subsystems do the real work here: the resilient task runner, which
//! serializes invocations of the controlled device agent under a timeout
//! with cooperative cancellation and guaranteed output-sink restoration,
//! and the extraction pipeline, which recovers structured price records
//! from the agent's noisy textual trace and ranks them across sources.
//! Everything else is thin glue around those two.

pub mod agents;
pub mod capture;
pub mod compare;
pub mod config;
pub mod error;
pub mod extract;
pub mod intent;
pub mod messenger;
pub mod models;
pub mod orchestrator;
pub mod runner;

pub use agents::ScriptedAgent;
pub use capture::{CaptureGuard, OutputSink};
pub use compare::{ComparisonBasis, Savings};
pub use config::{PlatformSpec, ProfileConfig, WatchConfig};
pub use error::{Result, WatchError};
pub use extract::{RecordStatus, SourceRecord};
pub use intent::{IntentAnalyzer, ProductIntent};
pub use messenger::ChatMessenger;
pub use models::GeminiTextModel;
pub use orchestrator::{Orchestrator, RunSummary};
pub use runner::{Disposition, RunOutcome, RunProfile, TaskRunner, TaskSpec};
