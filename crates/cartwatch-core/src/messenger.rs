//! Chat messaging driven through the device agent.
//!
//! There is no messaging API here: the same device agent that checks
//! prices also opens the chat app, reads the latest message off the
//! screen, and types replies. Reading uses a captured full-profile run so
//! the extractor can pull the message text out of the agent's trace.

use crate::config::{TimeoutConfig, WatchConfig};
use crate::extract;
use crate::runner::{RunProfile, TaskRunner, TaskSpec};
use async_trait::async_trait;
use cartwatch_abstraction::{ChannelError, MessageChannel};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Longest message the chat app input field tolerates before the agent
/// starts mistyping; anything longer is truncated with a marker.
const MAX_MESSAGE_CHARS: usize = 3000;

/// `MessageChannel` implementation backed by the device agent.
pub struct ChatMessenger {
    runner: Arc<TaskRunner>,
    timeouts: TimeoutConfig,
}

impl ChatMessenger {
    /// Creates a messenger over the given runner.
    #[must_use]
    pub fn new(runner: Arc<TaskRunner>, config: &WatchConfig) -> Self {
        Self { runner, timeouts: config.timeouts }
    }

    /// Opens the chat app and navigates to the named chat.
    pub async fn open_chat(&self, chat: &str) -> bool {
        debug!(chat, "Opening chat");
        let goal = format!(
            "Open WhatsApp and navigate to chat \"{chat}\".\n\n\
             CRITICAL INSTRUCTIONS:\n\
             1. Open WhatsApp.\n\
             2. CHECK: If you are already inside a chat with someone else, CLICK THE BACK \
             BUTTON immediately to go to the main list.\n\
             3. Once on the main list, click the Search icon.\n\
             4. Type \"{chat}\" and click their name.\n\
             5. If \"{chat}\" is already visible on the main list, just click it directly."
        );
        let spec = TaskSpec::new(
            goal,
            Duration::from_secs(self.timeouts.chat_open_secs),
            RunProfile::Full,
        );
        let outcome = self.runner.run(&spec).await;
        if !outcome.disposition.is_completed() {
            warn!(chat, disposition = ?outcome.disposition, "Failed to open chat");
            return false;
        }
        true
    }

}

#[async_trait]
impl MessageChannel for ChatMessenger {
    async fn read_latest(&self, chat: &str) -> Result<Option<String>, ChannelError> {
        if !self.open_chat(chat).await {
            return Ok(None);
        }

        let goal = "Look at the current WhatsApp chat.\n\
             Find the LAST message at the bottom of the screen.\n\
             Read the message text carefully.\n\n\
             Return ONLY the message text using this EXACT format:\n\
             <ACCOMPLISHED success=\"true\">THE_MESSAGE_TEXT_HERE</ACCOMPLISHED>\n\n\
             Example:\n\
             <ACCOMPLISHED success=\"true\">check onion prices</ACCOMPLISHED>"
            .to_string();
        let spec = TaskSpec::new(
            goal,
            Duration::from_secs(self.timeouts.chat_read_secs),
            RunProfile::Full,
        )
        .with_capture();

        let outcome = self.runner.run(&spec).await;
        if !outcome.disposition.is_completed() {
            warn!(chat, disposition = ?outcome.disposition, "Message read failed");
            return Ok(None);
        }

        let message = extract::extract_message(&outcome.captured);
        match &message {
            Some(text) => info!(chat, message = %text, "Message read"),
            None => warn!(chat, captured_len = outcome.captured.len(), "No message recovered"),
        }
        Ok(message)
    }

    async fn send(&self, chat: &str, text: &str) -> Result<bool, ChannelError> {
        let mut safe = text.replace('"', "\\\"").replace('\'', "\\'");
        if safe.len() > MAX_MESSAGE_CHARS {
            let mut cut = MAX_MESSAGE_CHARS;
            while !safe.is_char_boundary(cut) {
                cut -= 1;
            }
            safe.truncate(cut);
            safe.push_str("\n\n... (truncated)");
            warn!(chat, "Message truncated before sending");
        }

        let goal = format!(
            "Send a message in WhatsApp.\n\n\
             STEPS:\n\
             1. Make sure you are in the chat with {chat}. If not, open WhatsApp and click \
             \"{chat}\".\n\
             2. Click the message input field at the bottom.\n\
             3. Type this EXACT message:\n\
             \"\"\"\n{safe}\n\"\"\"\n\
             4. Click the Send button (paper plane icon).\n\
             5. Wait 1 second for message to send.\n\n\
             IMPORTANT: After sending, immediately finish with:\n\
             <ACCOMPLISHED success=\"true\">Message sent</ACCOMPLISHED>"
        );
        let spec = TaskSpec::new(
            goal,
            Duration::from_secs(self.timeouts.chat_send_secs),
            RunProfile::Full,
        );

        let outcome = self.runner.run(&spec).await;
        if outcome.disposition.is_completed() {
            debug!(chat, "Message sent");
            Ok(true)
        } else {
            warn!(chat, disposition = ?outcome.disposition, "Message send failed");
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::ScriptedAgent;
    use crate::capture::OutputSink;
    use crate::config::WatchConfig;

    fn messenger_with_reply(
        reply: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> ChatMessenger {
        let config = WatchConfig { grace_ms: 10, drain_wait_ms: 20, ..WatchConfig::default() };
        let sink = OutputSink::new();
        let agent = ScriptedAgent::new(sink.clone(), reply);
        let runner = Arc::new(TaskRunner::new(Arc::new(agent), sink, &config));
        ChatMessenger::new(runner, &config)
    }

    #[tokio::test]
    async fn test_read_latest_recovers_message() {
        let messenger = messenger_with_reply(|goal| {
            if goal.contains("LAST message") {
                "tapping around\n<ACCOMPLISHED success=\"true\">check onion prices</ACCOMPLISHED>"
                    .to_string()
            } else {
                String::new()
            }
        });
        let message = messenger.read_latest("Prashant").await.unwrap();
        assert_eq!(message.as_deref(), Some("check onion prices"));
    }

    #[tokio::test]
    async fn test_read_latest_without_marker_is_none() {
        let messenger = messenger_with_reply(|_| "no marker in this trace".to_string());
        let message = messenger.read_latest("Prashant").await.unwrap();
        assert_eq!(message, None);
    }

    #[tokio::test]
    async fn test_send_reports_success() {
        let messenger = messenger_with_reply(|_| String::new());
        assert!(messenger.send("Prashant", "hello").await.unwrap());
    }

    #[tokio::test]
    async fn test_send_truncates_long_messages() {
        // The goal handed to the agent carries the truncation marker.
        let seen = std::sync::Arc::new(std::sync::Mutex::new(String::new()));
        let seen2 = std::sync::Arc::clone(&seen);
        let messenger = messenger_with_reply(move |goal| {
            *seen2.lock().unwrap() = goal.to_string();
            String::new()
        });
        let long = "x".repeat(4000);
        assert!(messenger.send("Prashant", &long).await.unwrap());
        assert!(seen.lock().unwrap().contains("... (truncated)"));
    }
}
