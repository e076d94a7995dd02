//! Wire event types for the duplex connection.
//!
//! All events are JSON objects with a `type` discriminant, sent as text
//! frames over the WebSocket.
//!
//! Client events (sent to the service):
//! - response.create - One-shot handshake fixing modalities, instructions
//!   and voice for the session
//! - input_audio_buffer.append - One wire-encoded capture block
//!
//! Server events (received from the service):
//! - response.audio.delta - Wire-encoded synthesized audio fragment
//! - response.audio_transcript.delta - Transcript text fragment
//! - response.audio_transcript.done - Terminates the current utterance
//!
//! Every other `type` value parses to [`ServerEvent::Other`] and is ignored;
//! inbound protocol noise must never abort the session.

use serde::{Deserialize, Serialize};

use crate::audio::AudioBlock;
use crate::codec;
use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};

// =============================================================================
// Client Events (sent to the service)
// =============================================================================

/// Response configuration carried by the handshake.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseConfig {
    /// Response modalities
    pub modalities: Vec<String>,
    /// System instructions for the assistant
    pub instructions: String,
    /// Voice for audio output
    pub voice: String,
}

/// Client events sent over the connection.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Session handshake, sent exactly once after connecting
    #[serde(rename = "response.create")]
    ResponseCreate {
        /// Fixed session configuration
        response: ResponseConfig,
    },

    /// Append one capture block to the input audio buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Wire-encoded audio data
        audio: String,
    },
}

impl ClientEvent {
    /// Build the handshake event from the session configuration.
    ///
    /// Modalities are fixed to audio + text; instructions and voice come
    /// from the configuration and do not change for the session's lifetime.
    pub fn handshake(config: &SessionConfig) -> Self {
        ClientEvent::ResponseCreate {
            response: ResponseConfig {
                modalities: vec!["audio".to_string(), "text".to_string()],
                instructions: config.instructions.clone(),
                voice: config.voice.as_str().to_string(),
            },
        }
    }

    /// Create an audio append event from a capture block.
    pub fn audio_append(block: &AudioBlock) -> Self {
        ClientEvent::InputAudioBufferAppend {
            audio: codec::encode(block),
        }
    }

    /// Serialize to the wire representation.
    pub fn to_wire(&self) -> SessionResult<String> {
        serde_json::to_string(self).map_err(|e| SessionError::Serialization(e.to_string()))
    }
}

// =============================================================================
// Server Events (received from the service)
// =============================================================================

/// Server events received over the connection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Synthesized audio fragment
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        /// Wire-encoded audio data
        delta: String,
    },

    /// Transcript text fragment
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta {
        /// Text to append to the current utterance
        delta: String,
    },

    /// Transcript complete for the current utterance
    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone,

    /// Any unrecognized event type. Ignored, never fatal.
    #[serde(other)]
    Other,
}

impl ServerEvent {
    /// Parse an inbound wire message.
    ///
    /// Unrecognized types and structurally incomplete messages both parse to
    /// [`ServerEvent::Other`] rather than failing.
    pub fn parse(text: &str) -> Self {
        serde_json::from_str(text).unwrap_or(ServerEvent::Other)
    }
}

// =============================================================================
// Tests
// =============================================================================
