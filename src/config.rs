//! Session configuration.
//!
//! Configuration is an explicit value handed to [`Session::new`] rather than
//! ambient global state; [`SessionConfig::from_env`] is a convenience for the
//! binary, reading:
//!
//! - `OPENAI_API_KEY` (required)
//! - `OPENAI_REALTIME_URL` (optional, defaults to the public endpoint)
//! - `OPENAI_API_TIMEOUT` (optional, connect timeout in seconds, default 10)
//!
//! [`Session::new`]: crate::session::Session::new

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SessionError, SessionResult};

/// Realtime API WebSocket endpoint.
pub const REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Audio sample rate used on both directions of the connection.
pub const REALTIME_SAMPLE_RATE: u32 = 24_000;

/// Default realtime model.
pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";

/// Default capture block length, in samples. Balances latency against
/// per-message overhead.
pub const DEFAULT_BLOCK_SIZE: usize = 2048;

/// Default bounded timeout for the connection attempt, in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default system instructions sent with the handshake.
pub const DEFAULT_INSTRUCTIONS: &str = "Support the user.";

// =============================================================================
// Voices
// =============================================================================

/// Available voices for synthesized replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Voice {
    /// Alloy voice
    Alloy,
    /// Ash voice
    Ash,
    /// Ballad voice
    Ballad,
    /// Coral voice
    Coral,
    /// Echo voice (default)
    #[default]
    Echo,
    /// Sage voice
    Sage,
    /// Shimmer voice
    Shimmer,
    /// Verse voice
    Verse,
}

impl Voice {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alloy => "alloy",
            Self::Ash => "ash",
            Self::Ballad => "ballad",
            Self::Coral => "coral",
            Self::Echo => "echo",
            Self::Sage => "sage",
            Self::Shimmer => "shimmer",
            Self::Verse => "verse",
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "alloy" => Self::Alloy,
            "ash" => Self::Ash,
            "ballad" => Self::Ballad,
            "coral" => Self::Coral,
            "echo" => Self::Echo,
            "sage" => Self::Sage,
            "shimmer" => Self::Shimmer,
            "verse" => Self::Verse,
            _ => Self::default(),
        }
    }

    /// Get all available voices.
    pub fn all() -> &'static [Voice] {
        &[
            Self::Alloy,
            Self::Ash,
            Self::Ballad,
            Self::Coral,
            Self::Echo,
            Self::Sage,
            Self::Shimmer,
            Self::Verse,
        ]
    }
}

impl std::fmt::Display for Voice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Session configuration
// =============================================================================

/// Configuration for a streaming session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// API key for authentication
    pub api_key: String,

    /// WebSocket endpoint, without the model query parameter
    pub endpoint: String,

    /// Model to use
    pub model: String,

    /// Voice for synthesized replies
    pub voice: Voice,

    /// System instructions sent with the handshake
    pub instructions: String,

    /// Capture block length, in samples
    pub block_size: usize,

    /// Bounded timeout for the connection attempt
    pub connect_timeout: Duration,

    /// Input device name (`None` selects the system default)
    pub input_device: Option<String>,

    /// Output device name (`None` selects the system default)
    pub output_device: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: REALTIME_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice: Voice::default(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            block_size: DEFAULT_BLOCK_SIZE,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            input_device: None,
            output_device: None,
        }
    }
}

impl SessionConfig {
    /// Build a configuration from the process environment.
    pub fn from_env() -> SessionResult<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            SessionError::InvalidConfiguration("OPENAI_API_KEY is not set".to_string())
        })?;
        if api_key.is_empty() {
            return Err(SessionError::InvalidConfiguration(
                "OPENAI_API_KEY is empty".to_string(),
            ));
        }

        let endpoint =
            std::env::var("OPENAI_REALTIME_URL").unwrap_or_else(|_| REALTIME_URL.to_string());

        let connect_timeout = std::env::var("OPENAI_API_TIMEOUT")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS));

        Ok(Self {
            api_key,
            endpoint,
            connect_timeout,
            ..Default::default()
        })
    }

    /// Build the WebSocket URL with the model parameter.
    pub fn ws_url(&self) -> String {
        format!("{}?model={}", self.endpoint, self.model)
    }
}

// =============================================================================
// Tests
// =============================================================================
