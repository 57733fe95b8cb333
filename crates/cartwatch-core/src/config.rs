//! Configuration for a Cartwatch deployment.
//!
//! One `WatchConfig` value is constructed at startup and passed into each
//! component's constructor. There is no ambient configuration lookup.

use crate::error::{Result, WatchError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Step budget and deliberation setting for one runner profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Maximum number of UI steps the agent may take.
    pub max_steps: u32,
    /// Whether the agent reasons between steps.
    pub deliberation: bool,
}

/// One shopping platform the bot checks prices on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformSpec {
    /// Display name used in goals and reports (e.g., "Blinkit").
    pub name: String,
    /// Android package name of the platform's app.
    pub package: String,
}

/// Per-task-kind timeouts, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Full price-check pass on one platform.
    pub price_check_secs: u64,
    /// Opening the target chat.
    pub chat_open_secs: u64,
    /// Reading the latest chat message.
    pub chat_read_secs: u64,
    /// Sending a chat message.
    pub chat_send_secs: u64,
    /// Returning the device to the home screen.
    pub home_reset_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            price_check_secs: 120,
            chat_open_secs: 40,
            chat_read_secs: 40,
            chat_send_secs: 45,
            home_reset_secs: 15,
        }
    }
}

/// Main configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Chat to read requests from and deliver reports to.
    pub chat_name: String,
    /// Platforms checked on every comparison run, in order.
    pub platforms: Vec<PlatformSpec>,
    /// Fast profile: few steps, no deliberation. Used for housekeeping
    /// tasks like resetting the device to the home screen.
    pub fast_profile: ProfileConfig,
    /// Full profile: many steps, deliberation enabled. Used for every task
    /// whose trace the extractor has to read.
    pub full_profile: ProfileConfig,
    /// Per-task-kind timeouts.
    pub timeouts: TimeoutConfig,
    /// Pause between platforms, in seconds.
    pub cooldown_secs: u64,
    /// How long the runner sleeps after requesting cancellation before it
    /// starts waiting for the agent to wind down, in milliseconds.
    pub grace_ms: u64,
    /// Upper bound on waiting for a cancelled agent to actually finish,
    /// in milliseconds. Past this the runner gives up and returns.
    pub drain_wait_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            chat_name: "Prashant".to_string(),
            platforms: vec![
                PlatformSpec {
                    name: "Blinkit".to_string(),
                    package: "com.grofers.customerapp".to_string(),
                },
                PlatformSpec {
                    name: "Zepto".to_string(),
                    package: "com.zepto.app".to_string(),
                },
            ],
            fast_profile: ProfileConfig { max_steps: 6, deliberation: false },
            full_profile: ProfileConfig { max_steps: 15, deliberation: true },
            timeouts: TimeoutConfig::default(),
            cooldown_secs: 3,
            grace_ms: 200,
            drain_wait_ms: 1000,
        }
    }
}

impl WatchConfig {
    /// Parses a configuration from TOML text.
    ///
    /// Missing fields fall back to defaults; the result is validated.
    ///
    /// # Errors
    /// Returns `WatchError::Config` on parse or validation failure.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| WatchError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns `WatchError::Config` if the platform list is empty, any
    /// timeout is zero, or a profile has a zero step budget.
    pub fn validate(&self) -> Result<()> {
        if self.platforms.is_empty() {
            return Err(WatchError::Config("platform list is empty".to_string()));
        }
        if self.chat_name.trim().is_empty() {
            return Err(WatchError::Config("chat_name is empty".to_string()));
        }
        let timeouts = [
            self.timeouts.price_check_secs,
            self.timeouts.chat_open_secs,
            self.timeouts.chat_read_secs,
            self.timeouts.chat_send_secs,
            self.timeouts.home_reset_secs,
        ];
        if timeouts.contains(&0) {
            return Err(WatchError::Config("timeouts must be non-zero".to_string()));
        }
        if self.fast_profile.max_steps == 0 || self.full_profile.max_steps == 0 {
            return Err(WatchError::Config("profile step budget must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Cancellation grace window.
    #[must_use]
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    /// Bounded wait for a cancelled agent to finish.
    #[must_use]
    pub fn drain_wait(&self) -> Duration {
        Duration::from_millis(self.drain_wait_ms)
    }

    /// Pause between platform checks.
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}
