use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timeouts and limits for one pipe session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipeConfig {
    /// How long the server waits for the client's first line.
    pub startup_timeout: Duration,
    /// Grace period between the terminate signal and a forced kill.
    pub stop_timeout: Duration,
    /// Default bound for request/reply handshakes.
    pub handshake_timeout: Duration,
    /// Longest accepted line in bytes, excluding the newline.
    pub max_line_len: usize,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(20),
            max_line_len: 64 * 1024,
        }
    }
}

impl PipeConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
