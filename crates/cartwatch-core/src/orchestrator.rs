//! End-to-end request handling.
//!
//! One `run_once` call is one full cycle: read the latest chat message,
//! work out what product it asks about, drive the agent through every
//! configured platform, and deliver the comparison report back to the
//! chat. Platform failures degrade to error records in the report; only
//! channel errors abort the cycle.

use crate::compare;
use crate::config::{PlatformSpec, WatchConfig};
use crate::error::Result;
use crate::extract::{self, RecordStatus, SourceRecord};
use crate::intent::{IntentAnalyzer, ProductIntent};
use crate::runner::{RunProfile, TaskRunner, TaskSpec};
use cartwatch_abstraction::MessageChannel;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{info, warn};

/// What one cycle did, for logging and tests.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// The chat message that triggered the cycle, if any.
    pub request: Option<String>,
    /// The intent recovered from the request.
    pub intent: Option<ProductIntent>,
    /// One record per configured platform, in platform order.
    pub records: Vec<SourceRecord>,
    /// The report text delivered to the chat, if one was composed.
    pub report: Option<String>,
    /// Whether the final message was actually sent.
    pub delivered: bool,
}

impl RunSummary {
    fn idle() -> Self {
        Self { request: None, intent: None, records: Vec::new(), report: None, delivered: false }
    }
}

/// Ties the channel, the intent analyzer, and the task runner together.
pub struct Orchestrator {
    channel: Arc<dyn MessageChannel>,
    analyzer: IntentAnalyzer,
    runner: Arc<TaskRunner>,
    config: WatchConfig,
}

impl Orchestrator {
    /// Creates an orchestrator from its wired-up components.
    #[must_use]
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        analyzer: IntentAnalyzer,
        runner: Arc<TaskRunner>,
        config: WatchConfig,
    ) -> Self {
        Self { channel, analyzer, runner, config }
    }

    /// Runs one full read-check-report cycle.
    ///
    /// # Errors
    /// Returns an error only when the message channel itself fails;
    /// agent and extraction failures are folded into the report.
    pub async fn run_once(&self) -> Result<RunSummary> {
        let Some(message) = self.channel.read_latest(&self.config.chat_name).await? else {
            info!(chat = %self.config.chat_name, "No message to handle");
            return Ok(RunSummary::idle());
        };
        info!(chat = %self.config.chat_name, message = %message, "Handling request");

        let intent = self.analyzer.extract_intent(&message).await;
        if !intent.is_product {
            let help = "Hi! Send me a product name (like \"onion 1kg\" or \"toned milk\") \
                        and I'll compare prices across Blinkit and Zepto for you.";
            let delivered = self.channel.send(&self.config.chat_name, help).await?;
            return Ok(RunSummary {
                request: Some(message),
                intent: Some(intent),
                records: Vec::new(),
                report: Some(help.to_string()),
                delivered,
            });
        }

        let ack = format!(
            "Checking prices for *{}* on {}... this takes a couple of minutes.",
            intent.product_name,
            platform_names(&self.config.platforms)
        );
        if !self.channel.send(&self.config.chat_name, &ack).await? {
            warn!("Acknowledgment not delivered, continuing anyway");
        }

        let records = self.check_platforms(&intent).await;
        let report = self.compose_report(&intent, &records);
        let delivered = self.channel.send(&self.config.chat_name, &report).await?;
        info!(delivered, found = records.iter().filter(|r| r.is_found()).count(), "Cycle finished");

        Ok(RunSummary {
            request: Some(message),
            intent: Some(intent),
            records,
            report: Some(report),
            delivered,
        })
    }

    /// Checks every configured platform in order, one agent run each.
    async fn check_platforms(&self, intent: &ProductIntent) -> Vec<SourceRecord> {
        self.reset_home().await;

        let mut records = Vec::with_capacity(self.config.platforms.len());
        for (index, platform) in self.config.platforms.iter().enumerate() {
            if index > 0 {
                time::sleep(self.config.cooldown()).await;
            }
            records.push(self.check_one(platform, intent).await);
        }

        self.reset_home().await;
        records
    }

    async fn check_one(&self, platform: &PlatformSpec, intent: &ProductIntent) -> SourceRecord {
        info!(platform = %platform.name, product = %intent.product_name, "Checking platform");

        let spec = TaskSpec::new(
            price_check_goal(platform, intent),
            Duration::from_secs(self.config.timeouts.price_check_secs),
            RunProfile::Full,
        )
        .with_capture();
        let outcome = self.runner.run(&spec).await;

        let mut record = extract::extract(&outcome.captured, &platform.name);
        // A marker recovered from partial output beats the disposition;
        // otherwise surface why the run ended instead of "parse failed".
        if record.status == RecordStatus::Error
            && let Some(e) = outcome.disposition.to_error()
        {
            record.note = Some(e.to_string());
        }
        info!(platform = %platform.name, status = ?record.status, price = ?record.price, "Platform checked");
        record
    }

    /// Returns the device to the home screen between app sessions.
    /// Best-effort; a failure here only costs the next app a few steps.
    async fn reset_home(&self) {
        let spec = TaskSpec::new(
            "Press the Home button to go to the home screen.",
            Duration::from_secs(self.config.timeouts.home_reset_secs),
            RunProfile::Fast,
        );
        let outcome = self.runner.run(&spec).await;
        if !outcome.disposition.is_completed() {
            warn!(disposition = ?outcome.disposition, "Home reset failed");
        }
    }

    fn compose_report(&self, intent: &ProductIntent, records: &[SourceRecord]) -> String {
        if records.iter().any(SourceRecord::is_found) {
            let mut report = compare::render(records);
            report.push('\n');
            report.push_str(&self.analyzer.recommendation());
            return report;
        }

        // Nothing usable came back; explain with the most informative note.
        let detail = records
            .iter()
            .filter_map(|r| r.note.as_deref())
            .max_by_key(|note| note.len())
            .unwrap_or("no platforms responded");
        format!(
            "Sorry, I couldn't get prices for *{}* right now ({detail}). Please try again in a few minutes.",
            intent.product_name
        )
    }
}

fn platform_names(platforms: &[PlatformSpec]) -> String {
    platforms.iter().map(|p| p.name.as_str()).collect::<Vec<_>>().join(" and ")
}

/// Builds the price-check goal handed to the device agent.
fn price_check_goal(platform: &PlatformSpec, intent: &ProductIntent) -> String {
    let quantity_hint = intent
        .quantity
        .as_deref()
        .map(|q| format!(" Prefer the pack closest to {q}."))
        .unwrap_or_default();
    format!(
        "Open the {name} app (package: {package}) and find the price of \"{product}\".\n\n\
         STEPS:\n\
         1. Open the {name} app. If a popup or location prompt appears, dismiss it.\n\
         2. Tap the search bar and type \"{product}\".\n\
         3. Open the first matching product from the results.{quantity_hint}\n\
         4. Read the product name, selling price, MRP, and pack size from the page.\n\n\
         When you have the details, finish with EXACTLY this format:\n\
         <ACCOMPLISHED success=\"true\">{{\"name\": \"product name\", \"price\": \"selling price\", \
         \"mrp\": \"original price\", \"weight\": \"pack size\", \"stock\": \"in stock\"}}</ACCOMPLISHED>\n\n\
         If the product cannot be found or the app will not open, finish with:\n\
         <ACCOMPLISHED success=\"false\">{{\"note\": \"what went wrong\"}}</ACCOMPLISHED>",
        name = platform.name,
        package = platform.package,
        product = intent.product_name,
    )
}
