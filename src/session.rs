//! Streaming session lifecycle.
//!
//! A [`Session`] owns one duplex connection and one input and output device.
//! [`Session::run`] drives the lifecycle `Connecting → Handshaking →
//! Streaming → Closing → Closed`: it establishes the connection under a
//! bounded timeout, sends the one-shot handshake, then runs the capture and
//! receive pipelines as two concurrent tasks sharing the split connection
//! halves. Streaming continues until the session is cancelled, the
//! connection fails, or the capture send path fails; whichever happens
//! first cancels the shared token so the other pipeline exits at its next
//! suspension point, and teardown then releases both devices and the
//! connection unconditionally.
//!
//! Shared state between the pipelines is limited to the cancellation token;
//! the transcript buffer is owned exclusively by the receive pipeline.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::audio::{AudioInput, AudioOutput};
use crate::codec;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::transcript::TranscriptAssembler;
use crate::transport::{Transport, WireSink, WireStream};

// =============================================================================
// Session State
// =============================================================================

/// Lifecycle states for a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Establishing the transport
    #[default]
    Connecting,
    /// Sending the fixed handshake event
    Handshaking,
    /// Both pipelines running
    Streaming,
    /// Releasing devices and the connection
    Closing,
    /// Terminal state; all resources released
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::Handshaking => write!(f, "Handshaking"),
            SessionState::Streaming => write!(f, "Streaming"),
            SessionState::Closing => write!(f, "Closing"),
            SessionState::Closed => write!(f, "Closed"),
        }
    }
}

fn transition(from: SessionState, to: SessionState) -> SessionState {
    debug!("session {from} -> {to}");
    to
}

// =============================================================================
// Session Report
// =============================================================================

/// Outcome of a completed session run, available after teardown.
#[derive(Debug)]
pub struct SessionReport {
    /// Every completed utterance emitted during the run, in order
    pub utterances: Vec<String>,
    /// The terminal error, if the session ended on one
    pub error: Option<SessionError>,
}

impl SessionReport {
    /// Whether the session closed without a terminal error.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

// =============================================================================
// Session
// =============================================================================

/// A streaming voice session.
pub struct Session {
    config: SessionConfig,
    transport: Box<dyn Transport>,
    input: Box<dyn AudioInput>,
    output: Box<dyn AudioOutput>,
    cancel: CancellationToken,
    utterance_tx: Option<mpsc::UnboundedSender<String>>,
}

impl Session {
    /// Create a session over the given transport and devices.
    pub fn new(
        config: SessionConfig,
        transport: Box<dyn Transport>,
        input: Box<dyn AudioInput>,
        output: Box<dyn AudioOutput>,
    ) -> Self {
        Self {
            config,
            transport,
            input,
            output,
            cancel: CancellationToken::new(),
            utterance_tx: None,
        }
    }

    /// Token that stops the session when cancelled. Both pipelines observe
    /// it within one suspension-point iteration.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Live tap of completed utterances, delivered as they finish.
    ///
    /// Utterances are also collected in the [`SessionReport`] regardless.
    pub fn utterances(&mut self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.utterance_tx = Some(tx);
        rx
    }

    /// Run the session to terminal closure.
    ///
    /// Returns only after the `Closed` state is reached: on explicit
    /// cancellation, connection failure, or handshake rejection. Whatever
    /// the exit path, the input device, output device and connection are
    /// released before this returns.
    pub async fn run(self) -> SessionReport {
        let Session {
            config,
            mut transport,
            input,
            output,
            cancel,
            utterance_tx,
        } = self;

        let mut input = Some(input);
        let mut output = Some(output);
        let mut sink: Option<Box<dyn WireSink>> = None;
        let mut stream: Option<Box<dyn WireStream>> = None;
        let mut terminal: Option<SessionError> = None;
        let mut utterances = Vec::new();

        let mut state = SessionState::Connecting;
        info!(model = %config.model, voice = %config.voice, "starting streaming session");

        // Connecting: bounded attempt, fatal on failure, no internal retry.
        match tokio::time::timeout(config.connect_timeout, transport.connect(&config)).await {
            Ok(Ok((tx_half, rx_half))) => {
                sink = Some(tx_half);
                stream = Some(rx_half);
            }
            Ok(Err(e)) => terminal = Some(e),
            Err(_) => {
                terminal = Some(SessionError::ConnectionFailed(format!(
                    "no connection within {}s",
                    config.connect_timeout.as_secs()
                )));
            }
        }

        // Handshaking: one fixed configuration event for the whole session.
        if terminal.is_none() {
            state = transition(state, SessionState::Handshaking);
            if let Some(tx_half) = sink.as_mut() {
                match ClientEvent::handshake(&config).to_wire() {
                    Ok(wire) => {
                        if let Err(e) = tx_half.send(wire).await {
                            terminal = Some(SessionError::HandshakeRejected(e.to_string()));
                        }
                    }
                    Err(e) => terminal = Some(e),
                }
            }
        }

        // Open both devices before streaming begins.
        if terminal.is_none()
            && let Some(dev) = input.as_mut()
            && let Err(e) = dev.start().await
        {
            terminal = Some(e);
        }
        if terminal.is_none()
            && let Some(dev) = output.as_mut()
            && let Err(e) = dev.start().await
        {
            terminal = Some(e);
        }

        // Streaming: capture→send and receive→demux run concurrently,
        // coordinated only by the cancellation token.
        if terminal.is_none() {
            state = transition(state, SessionState::Streaming);
            if let (Some(in_dev), Some(out_dev), Some(tx_half), Some(rx_half)) =
                (input.take(), output.take(), sink.take(), stream.take())
            {
                let capture = tokio::spawn(capture_pipeline(in_dev, tx_half, cancel.clone()));
                let receive = tokio::spawn(receive_pipeline(
                    rx_half,
                    out_dev,
                    cancel.clone(),
                    utterance_tx.clone(),
                ));

                match capture.await {
                    Ok((dev, tx_half, err)) => {
                        input = Some(dev);
                        sink = Some(tx_half);
                        if let Some(e) = err {
                            terminal = Some(e);
                        }
                    }
                    Err(e) => {
                        error!("capture pipeline task failed: {e}");
                        terminal = Some(SessionError::Internal(e.to_string()));
                    }
                }
                match receive.await {
                    Ok((dev, collected, err)) => {
                        output = Some(dev);
                        utterances = collected;
                        if let Some(e) = err {
                            terminal = Some(e);
                        }
                    }
                    Err(e) => {
                        error!("receive pipeline task failed: {e}");
                        terminal = Some(SessionError::Internal(e.to_string()));
                    }
                }
            }
        }

        // Closing: every release attempted unconditionally, on every exit
        // path, including those where a resource was never opened.
        state = transition(state, SessionState::Closing);
        cancel.cancel();
        if let Some(dev) = input.as_mut() {
            dev.stop();
            dev.close();
        }
        if let Some(dev) = output.as_mut() {
            dev.close();
        }
        if let Some(tx_half) = sink.as_mut()
            && let Err(e) = tx_half.close().await
        {
            debug!("connection close: {e}");
        }

        let _ = transition(state, SessionState::Closed);
        if let Some(ref e) = terminal {
            warn!("session closed with error: {e}");
        } else {
            info!(utterances = utterances.len(), "session closed");
        }

        SessionReport {
            utterances,
            error: terminal,
        }
    }
}

// =============================================================================
// Pipelines
// =============================================================================

/// Capture pipeline: read fixed-size blocks and send them in arrival order.
///
/// A device read failure is logged and the next block is retried; a send
/// failure is fatal and cancels the session. Returns the device and sink for
/// teardown, plus the fatal error if one occurred.
async fn capture_pipeline(
    mut input: Box<dyn AudioInput>,
    mut sink: Box<dyn WireSink>,
    cancel: CancellationToken,
) -> (Box<dyn AudioInput>, Box<dyn WireSink>, Option<SessionError>) {
    let mut fatal = None;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            read = input.read_block() => match read {
                Ok(block) => {
                    let event = ClientEvent::audio_append(&block);
                    let send = match event.to_wire() {
                        Ok(wire) => sink.send(wire).await,
                        Err(e) => Err(e),
                    };
                    if let Err(e) = send {
                        error!("audio send failed: {e}");
                        fatal = Some(e);
                        cancel.cancel();
                        break;
                    }
                }
                Err(e) => warn!("device read failed, retrying next block: {e}"),
            }
        }
    }
    (input, sink, fatal)
}

/// Receive pipeline: parse inbound messages in arrival order and dispatch
/// audio to playback and transcript fragments to the assembler.
///
/// Malformed frames and playback write failures drop the offending block
/// and continue; a connection error or unprompted close is fatal and
/// cancels the session. Returns the device, the completed utterances, and
/// the fatal error if one occurred.
async fn receive_pipeline(
    mut stream: Box<dyn WireStream>,
    mut output: Box<dyn AudioOutput>,
    cancel: CancellationToken,
    tap: Option<mpsc::UnboundedSender<String>>,
) -> (Box<dyn AudioOutput>, Vec<String>, Option<SessionError>) {
    let mut assembler = TranscriptAssembler::new();
    let mut utterances = Vec::new();
    let mut fatal = None;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            message = stream.next_message() => match message {
                Some(Ok(text)) => match ServerEvent::parse(&text) {
                    ServerEvent::AudioDelta { delta } => match codec::decode(&delta) {
                        Ok(block) => {
                            if let Err(e) = output.write_block(block).await {
                                warn!("playback dropped a block: {e}");
                            }
                        }
                        Err(e) => warn!("dropping malformed audio delta: {e}"),
                    },
                    ServerEvent::AudioTranscriptDelta { delta } => assembler.push(&delta),
                    ServerEvent::AudioTranscriptDone => {
                        let utterance = assembler.finish();
                        debug!(chars = utterance.len(), "utterance completed");
                        if let Some(tx) = tap.as_ref() {
                            let _ = tx.send(utterance.clone());
                        }
                        utterances.push(utterance);
                    }
                    ServerEvent::Other => trace!("ignoring unrecognized server event"),
                },
                Some(Err(e)) => {
                    error!("connection error: {e}");
                    fatal = Some(e);
                    cancel.cancel();
                    break;
                }
                None => {
                    // The session runs until cancelled; an unprompted close
                    // from the peer is a terminal connection failure.
                    if !cancel.is_cancelled() {
                        info!("connection closed by peer");
                        fatal = Some(SessionError::ConnectionFailed(
                            "connection closed by peer".to_string(),
                        ));
                    }
                    cancel.cancel();
                    break;
                }
            }
        }
    }
    (output, utterances, fatal)
}

// =============================================================================
// Tests
// =============================================================================
