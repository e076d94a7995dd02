//! Voicelink - real-time duplex voice conversation client.
//!
//! Voicelink holds a persistent WebSocket connection to the OpenAI Realtime
//! API, continuously streaming microphone audio up while playing synthesized
//! replies and assembling their transcripts as they arrive.
//!
//! # Architecture
//!
//! - [`codec`] - reversible transform between audio blocks and wire text
//! - [`protocol`] - the tagged JSON events exchanged over the connection
//! - [`audio`] - the block model and the capture/playback device seams
//! - [`transport`] - the duplex connection seam and WebSocket implementation
//! - [`transcript`] - assembly of streamed fragments into utterances
//! - [`session`] - lifecycle, the two concurrent pipelines, and teardown
//!
//! # Example
//!
//! ```rust,ignore
//! use voicelink::{MicInput, RealtimeTransport, Session, SessionConfig, SpeakerOutput};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = SessionConfig::from_env().unwrap();
//!     let input = MicInput::new(&config);
//!     let output = SpeakerOutput::new(&config);
//!     let mut session = Session::new(
//!         config,
//!         Box::new(RealtimeTransport),
//!         Box::new(input),
//!         Box::new(output),
//!     );
//!
//!     let stop = session.cancellation_token();
//!     tokio::spawn(async move {
//!         tokio::signal::ctrl_c().await.ok();
//!         stop.cancel();
//!     });
//!
//!     let report = session.run().await;
//!     for utterance in &report.utterances {
//!         println!("assistant: {utterance}");
//!     }
//! }
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transcript;
pub mod transport;

// Re-export commonly used items for convenience
pub use audio::{AudioBlock, AudioInput, AudioOutput, MicInput, SpeakerOutput};
pub use config::{REALTIME_SAMPLE_RATE, REALTIME_URL, SessionConfig, Voice};
pub use error::{SessionError, SessionResult};
pub use protocol::{ClientEvent, ServerEvent};
pub use session::{Session, SessionReport, SessionState};
pub use transcript::TranscriptAssembler;
pub use transport::{RealtimeTransport, Transport, WireSink, WireStream};
