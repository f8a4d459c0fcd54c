//! Live sync with a running game instance
//!
//! The game-side plugin listens for JSON commands over plain HTTP on
//! localhost. Each command is one POST; the reply is `{"type":"Ok"}` or
//! `{"type":"Error","message":...}`. Failures are reported as a
//! [`SyncOutcome`] and never raised: a game that is not running must not
//! fail a build.

use std::fmt;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

fn default_true() -> bool {
    true
}

fn default_url() -> String {
    "http://127.0.0.1:50433".to_string()
}

fn default_timeout_ms() -> u64 {
    2000
}

/// `[sync]` settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Notify the game after each successful build
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_url")]
    pub url: String,
    /// Bound on each request, connect included
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Extra attempts after a timeout or refused connection
    #[serde(default)]
    pub retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: default_url(),
            timeout_ms: default_timeout_ms(),
            retries: 0,
        }
    }
}

/// A command understood by the game-side listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum Command {
    /// Reload the listed assets, built as `generation`
    ReloadAssets { generation: u64, assets: Vec<String> },
    /// Reload every translation file
    ReloadLocalizedData,
    /// Jump the open story to a block
    StoryGotoBlock { block_id: u32, incremental: bool },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::ReloadAssets { .. } => "ReloadAssets",
            Self::ReloadLocalizedData => "ReloadLocalizedData",
            Self::StoryGotoBlock { .. } => "StoryGotoBlock",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum Reply {
    Ok,
    Error {
        #[serde(default)]
        message: String,
    },
}

/// What happened to a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// The game applied the command
    Ack,
    /// The game answered with an error
    Rejected { message: String },
    Timeout,
    /// Nothing is listening
    ConnectionRefused,
    /// Nothing to send
    Skipped,
}

impl SyncOutcome {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::ConnectionRefused)
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ack => f.write_str("acknowledged"),
            Self::Rejected { message } => write!(f, "rejected: {message}"),
            Self::Timeout => f.write_str("timed out"),
            Self::ConnectionRefused => f.write_str("connection refused (is the game running?)"),
            Self::Skipped => f.write_str("skipped (nothing changed)"),
        }
    }
}

/// Client for the game-side listener
#[derive(Debug, Clone)]
pub struct SyncClient {
    client: Client,
    config: SyncConfig,
}

impl SyncClient {
    /// Build a client with the configured timeout
    ///
    /// # Errors
    /// Returns [`Error::SyncClient`] if the HTTP client cannot be created.
    pub fn new(config: SyncConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .connect_timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::SyncClient(e.to_string()))?;
        Ok(Self { client, config })
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Ask the game to reload changed assets
    ///
    /// An empty change set sends nothing and returns [`SyncOutcome::Skipped`].
    pub fn notify(&self, assets: &[String], generation: u64) -> SyncOutcome {
        if assets.is_empty() {
            tracing::debug!("No changed assets; not notifying");
            return SyncOutcome::Skipped;
        }
        self.send(&Command::ReloadAssets {
            generation,
            assets: assets.to_vec(),
        })
    }

    /// Ask the game to reload all translation data
    pub fn reload_localized_data(&self) -> SyncOutcome {
        self.send(&Command::ReloadLocalizedData)
    }

    /// Jump the running story to a block
    pub fn goto_block(&self, block_id: u32, incremental: bool) -> SyncOutcome {
        self.send(&Command::StoryGotoBlock {
            block_id,
            incremental,
        })
    }

    /// Send one command, retrying only timeouts and refused connections
    pub fn send(&self, command: &Command) -> SyncOutcome {
        let mut outcome = SyncOutcome::ConnectionRefused;
        for attempt in 0..=self.config.retries {
            if attempt > 0 {
                tracing::debug!("Retrying {} (attempt {})", command.name(), attempt + 1);
            }
            outcome = self.send_once(command);
            if !outcome.is_retryable() {
                break;
            }
        }

        match &outcome {
            SyncOutcome::Ack => tracing::info!("Sync command {} acknowledged", command.name()),
            other => tracing::warn!("Sync command {} {}", command.name(), other),
        }
        outcome
    }

    fn send_once(&self, command: &Command) -> SyncOutcome {
        let response = match self.client.post(&self.config.url).json(command).send() {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return SyncOutcome::Timeout,
            Err(e) if e.is_connect() => return SyncOutcome::ConnectionRefused,
            Err(e) => {
                return SyncOutcome::Rejected {
                    message: e.to_string(),
                };
            }
        };

        let status = response.status();
        let text = match response.text() {
            Ok(text) => text,
            Err(e) if e.is_timeout() => return SyncOutcome::Timeout,
            Err(e) => {
                return SyncOutcome::Rejected {
                    message: e.to_string(),
                };
            }
        };
        if !status.is_success() {
            return SyncOutcome::Rejected {
                message: format!("HTTP {status}: {}", text.trim()),
            };
        }

        match serde_json::from_str::<Reply>(&text) {
            Ok(Reply::Ok) => SyncOutcome::Ack,
            Ok(Reply::Error { message }) => SyncOutcome::Rejected { message },
            Err(e) => SyncOutcome::Rejected {
                message: format!("unreadable reply: {e}"),
            },
        }
    }
}
