//! Cartwatch CLI - grocery price comparison over a controlled device agent.
//!
//! Thin bootstrap: parses arguments, initializes tracing, loads the TOML
//! configuration, wires the pipeline together, and runs one full cycle.
//! Ships with a scripted device driver so the whole pipeline can be
//! exercised without an attached device; a live deployment swaps in a
//! real `DeviceAgent` implementation at the marked spot in `main`.

use async_trait::async_trait;
use cartwatch_abstraction::{ModelError, TextModel};
use cartwatch_core::{
    ChatMessenger, GeminiTextModel, IntentAnalyzer, Orchestrator, OutputSink, ScriptedAgent,
    TaskRunner, WatchConfig,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

/// Cartwatch - compares grocery prices across quick-commerce apps by
/// driving a device agent, and reports the results over chat.
#[derive(Parser, Debug)]
#[command(
    name = "cartwatch",
    author,
    version,
    about = "Grocery price comparison driven through a device agent"
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Path to a TOML configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Chat to read requests from and report to (overrides config)
    #[arg(long)]
    chat: Option<String>,

    /// Message the scripted demo chat contains
    #[arg(long, default_value = "check onion prices")]
    message: String,

    /// Gemini model used for intent analysis (needs GEMINI_API_KEY)
    #[arg(long, default_value = "gemini-2.0-flash")]
    model: String,
}

/// Stand-in model for runs without an API key; always fails, which the
/// analyzer degrades to the whole-message fallback intent.
struct OfflineModel;

#[async_trait]
impl TextModel for OfflineModel {
    async fn complete(&self, _prompt: &str) -> Result<String, ModelError> {
        Err(ModelError::RequestError("no API key configured".to_string()))
    }

    fn model_id(&self) -> &str {
        "offline"
    }
}

/// Scripted device traces keyed off the goal text, so a demo run walks
/// the same read-check-report path a live device would.
fn demo_trace(goal: &str, message: &str) -> String {
    if goal.contains("LAST message") {
        return format!("<ACCOMPLISHED success=\"true\">{message}</ACCOMPLISHED>");
    }
    if goal.contains("Blinkit") {
        return "step 1: opened Blinkit\nstep 2: searched\n\
                <ACCOMPLISHED success=\"true\">{\"name\": \"Onion (Pyaz) 300g\", \
                \"price\": \"₹49\", \"mrp\": \"₹60\", \"weight\": \"300g\", \
                \"stock\": \"in stock\", \"delivery\": \"10 mins\"}</ACCOMPLISHED>"
            .to_string();
    }
    if goal.contains("Zepto") {
        return "<ACCOMPLISHED success=\"true\">{\"name\": \"Onion 500g\", \
                \"price\": \"₹144\", \"weight\": \"500g\", \"stock\": \"in stock\", \
                \"delivery\": \"8 mins\"}</ACCOMPLISHED>"
            .to_string();
    }
    String::new()
}

fn load_config(args: &Args) -> anyhow::Result<WatchConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            WatchConfig::from_toml_str(&text)?
        }
        None => WatchConfig::default(),
    };
    if let Some(chat) = &args.chat {
        config.chat_name.clone_from(chat);
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber =
        FmtSubscriber::builder().with_max_level(level).without_time().with_target(false).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(&args)?;
    info!(chat = %config.chat_name, platforms = config.platforms.len(), "Starting Cartwatch");

    let model: Arc<dyn TextModel> = match GeminiTextModel::new(args.model.clone()) {
        Ok(gemini) => Arc::new(gemini),
        Err(e) => {
            warn!(error = %e, "Falling back to offline intent analysis");
            Arc::new(OfflineModel)
        }
    };

    // Swap in a real DeviceAgent implementation here to drive a live device.
    let sink = OutputSink::new();
    let message = args.message.clone();
    let agent = ScriptedAgent::new(sink.clone(), move |goal| demo_trace(goal, &message));

    let runner = Arc::new(TaskRunner::new(Arc::new(agent), sink, &config));
    let messenger = Arc::new(ChatMessenger::new(Arc::clone(&runner), &config));
    let analyzer = IntentAnalyzer::new(model);
    let orchestrator = Orchestrator::new(messenger, analyzer, runner, config);

    let summary = orchestrator.run_once().await?;
    match summary.report {
        Some(report) => println!("{report}"),
        None => println!("No request to handle."),
    }
    Ok(())
}
