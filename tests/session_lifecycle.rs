//! Integration tests for the streaming session lifecycle.
//!
//! These tests drive a full [`Session`] through scripted transport and
//! device implementations of the trait seams, verifying:
//! - Capture order preservation (no drop, no duplication, no reorder)
//! - Demultiplexing of inbound events
//! - Transcript assembly end to end
//! - Malformed-frame resilience
//! - Guaranteed teardown at each of the four closing causes

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use voicelink::{
    AudioBlock, AudioInput, AudioOutput, Session, SessionConfig, SessionError, SessionResult,
    Transport, WireSink, WireStream, codec,
};

// =============================================================================
// Fakes
// =============================================================================

/// Lifecycle flags shared between a fake resource and the test body.
#[derive(Clone, Default)]
struct ResourceFlags {
    started: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl ResourceFlags {
    fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
    fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
    fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

enum ReadItem {
    Block(AudioBlock),
    Error(String),
}

/// Input device yielding a fixed script, then parking until cancellation.
struct ScriptedInput {
    script: VecDeque<ReadItem>,
    flags: ResourceFlags,
}

#[async_trait]
impl AudioInput for ScriptedInput {
    async fn start(&mut self) -> SessionResult<()> {
        self.flags.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn read_block(&mut self) -> SessionResult<AudioBlock> {
        match self.script.pop_front() {
            Some(ReadItem::Block(block)) => Ok(block),
            Some(ReadItem::Error(msg)) => Err(SessionError::DeviceRead(msg)),
            None => std::future::pending().await,
        }
    }

    fn stop(&mut self) {
        self.flags.stopped.store(true, Ordering::SeqCst);
    }

    fn close(&mut self) {
        self.flags.closed.store(true, Ordering::SeqCst);
    }
}

/// Output device recording every block written to it.
struct RecordingOutput {
    written: Arc<Mutex<Vec<AudioBlock>>>,
    flags: ResourceFlags,
}

#[async_trait]
impl AudioOutput for RecordingOutput {
    async fn start(&mut self) -> SessionResult<()> {
        self.flags.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn write_block(&mut self, block: AudioBlock) -> SessionResult<()> {
        self.written.lock().push(block);
        Ok(())
    }

    fn close(&mut self) {
        self.flags.closed.store(true, Ordering::SeqCst);
    }
}

/// Outbound half collecting every message, optionally refusing all sends.
struct CollectingSink {
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
    refuse_sends: bool,
}

#[async_trait]
impl WireSink for CollectingSink {
    async fn send(&mut self, message: String) -> SessionResult<()> {
        if self.refuse_sends {
            return Err(SessionError::ConnectionFailed("send refused".to_string()));
        }
        self.sent.lock().push(message);
        Ok(())
    }

    async fn close(&mut self) -> SessionResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

enum StreamItem {
    Message(String),
    Error(String),
    Close,
}

/// Inbound half yielding a fixed script, then parking until cancellation.
struct ScriptedStream {
    script: VecDeque<StreamItem>,
}

#[async_trait]
impl WireStream for ScriptedStream {
    async fn next_message(&mut self) -> Option<SessionResult<String>> {
        match self.script.pop_front() {
            Some(StreamItem::Message(m)) => Some(Ok(m)),
            Some(StreamItem::Error(msg)) => Some(Err(SessionError::ConnectionFailed(msg))),
            Some(StreamItem::Close) => None,
            None => std::future::pending().await,
        }
    }
}

enum ConnectBehavior {
    Succeed,
    Fail(String),
    Hang,
}

struct FakeTransport {
    behavior: ConnectBehavior,
    pair: Option<(Box<dyn WireSink>, Box<dyn WireStream>)>,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(
        &mut self,
        _config: &SessionConfig,
    ) -> SessionResult<(Box<dyn WireSink>, Box<dyn WireStream>)> {
        match &self.behavior {
            ConnectBehavior::Fail(msg) => Err(SessionError::ConnectionFailed(msg.clone())),
            ConnectBehavior::Hang => std::future::pending().await,
            ConnectBehavior::Succeed => {
                self.connected.store(true, Ordering::SeqCst);
                self.pair
                    .take()
                    .ok_or_else(|| SessionError::Internal("transport reused".to_string()))
            }
        }
    }
}

// =============================================================================
// Harness
// =============================================================================

/// Inspection handles for everything a session run touches.
struct Harness {
    token: CancellationToken,
    sent: Arc<Mutex<Vec<String>>>,
    written: Arc<Mutex<Vec<AudioBlock>>>,
    input_flags: ResourceFlags,
    output_flags: ResourceFlags,
    sink_closed: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
}

impl Harness {
    fn assert_all_released(&self) {
        assert!(self.input_flags.stopped(), "input device not stopped");
        assert!(self.input_flags.closed(), "input device not closed");
        assert!(self.output_flags.closed(), "output device not closed");
        // The connection is released: either the sink was closed, or it was
        // never opened in the first place.
        assert!(
            self.sink_closed.load(Ordering::SeqCst) || !self.connected.load(Ordering::SeqCst),
            "connection not released"
        );
    }
}

fn build_session(
    input_script: Vec<ReadItem>,
    stream_script: Vec<StreamItem>,
    behavior: ConnectBehavior,
    refuse_sends: bool,
) -> (Session, Harness) {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let written = Arc::new(Mutex::new(Vec::new()));
    let input_flags = ResourceFlags::default();
    let output_flags = ResourceFlags::default();
    let sink_closed = Arc::new(AtomicBool::new(false));
    let connected = Arc::new(AtomicBool::new(false));

    let sink = CollectingSink {
        sent: sent.clone(),
        closed: sink_closed.clone(),
        refuse_sends,
    };
    let stream = ScriptedStream {
        script: stream_script.into(),
    };
    let transport = FakeTransport {
        behavior,
        pair: Some((Box::new(sink), Box::new(stream))),
        connected: connected.clone(),
    };
    let input = ScriptedInput {
        script: input_script.into(),
        flags: input_flags.clone(),
    };
    let output = RecordingOutput {
        written: written.clone(),
        flags: output_flags.clone(),
    };

    let config = SessionConfig {
        api_key: "test-key".to_string(),
        connect_timeout: Duration::from_millis(200),
        ..Default::default()
    };
    let session = Session::new(
        config,
        Box::new(transport),
        Box::new(input),
        Box::new(output),
    );
    let token = session.cancellation_token();

    let harness = Harness {
        token,
        sent,
        written,
        input_flags,
        output_flags,
        sink_closed,
        connected,
    };
    (session, harness)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached within timeout");
}

fn block(tag: i16, len: usize) -> AudioBlock {
    AudioBlock::new(vec![tag; len])
}

fn audio_delta(block: &AudioBlock) -> StreamItem {
    StreamItem::Message(format!(
        r#"{{"type": "response.audio.delta", "delta": "{}"}}"#,
        codec::encode(block)
    ))
}

fn transcript_delta(text: &str) -> StreamItem {
    StreamItem::Message(format!(
        r#"{{"type": "response.audio_transcript.delta", "delta": "{text}"}}"#
    ))
}

fn transcript_done() -> StreamItem {
    StreamItem::Message(r#"{"type": "response.audio_transcript.done"}"#.to_string())
}

// =============================================================================
// Streaming behavior
// =============================================================================

/// N captured blocks are sent as exactly N append events, in capture order.
#[tokio::test]
async fn test_capture_order_preserved() {
    let blocks: Vec<AudioBlock> = (0..5).map(|i| block(i, 8)).collect();
    let (session, harness) = build_session(
        blocks.iter().cloned().map(ReadItem::Block).collect(),
        Vec::new(),
        ConnectBehavior::Succeed,
        false,
    );

    let run = tokio::spawn(session.run());
    wait_until(|| harness.sent.lock().len() >= 6).await;
    harness.token.cancel();
    let report = run.await.unwrap();

    assert!(report.is_ok(), "unexpected error: {:?}", report.error);
    let sent = harness.sent.lock();
    assert_eq!(sent.len(), 6, "handshake plus five appends");

    let handshake: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
    assert_eq!(handshake["type"], "response.create");

    for (i, message) in sent[1..].iter().enumerate() {
        let json: serde_json::Value = serde_json::from_str(message).unwrap();
        assert_eq!(json["type"], "input_audio_buffer.append");
        let decoded = codec::decode(json["audio"].as_str().unwrap()).unwrap();
        assert_eq!(decoded, blocks[i], "block {i} out of order");
    }
}

/// A device read failure is retried: following blocks still go out in order.
#[tokio::test]
async fn test_capture_retries_after_read_error() {
    let (session, harness) = build_session(
        vec![
            ReadItem::Block(block(1, 4)),
            ReadItem::Error("overflow".to_string()),
            ReadItem::Block(block(2, 4)),
        ],
        Vec::new(),
        ConnectBehavior::Succeed,
        false,
    );

    let run = tokio::spawn(session.run());
    wait_until(|| harness.sent.lock().len() >= 3).await;
    harness.token.cancel();
    let report = run.await.unwrap();

    assert!(report.is_ok());
    let sent = harness.sent.lock();
    assert_eq!(sent.len(), 3);
    for (message, tag) in sent[1..].iter().zip([1i16, 2]) {
        let json: serde_json::Value = serde_json::from_str(message).unwrap();
        let decoded = codec::decode(json["audio"].as_str().unwrap()).unwrap();
        assert_eq!(decoded, block(tag, 4));
    }
}

/// Three transcript fragments and a done produce exactly one utterance, and
/// transcript traffic never reaches the playback device.
#[tokio::test]
async fn test_end_to_end_transcript_assembly() {
    let (mut session, harness) = build_session(
        Vec::new(),
        vec![
            transcript_delta("Hel"),
            transcript_delta("lo "),
            transcript_delta("there"),
            transcript_done(),
        ],
        ConnectBehavior::Succeed,
        false,
    );
    let mut utterances = session.utterances();

    let run = tokio::spawn(session.run());
    let first = tokio::time::timeout(Duration::from_secs(2), utterances.recv())
        .await
        .expect("no utterance within timeout")
        .expect("tap closed early");
    assert_eq!(first, "Hello there");

    harness.token.cancel();
    let report = run.await.unwrap();
    assert!(report.is_ok());
    assert_eq!(report.utterances, vec!["Hello there".to_string()]);
    assert!(
        harness.written.lock().is_empty(),
        "transcript reached playback"
    );
}

/// A done with an empty buffer is a defensive no-op utterance; completed
/// text is never emitted twice.
#[tokio::test]
async fn test_transcript_done_on_empty_buffer() {
    let (mut session, harness) = build_session(
        Vec::new(),
        vec![
            transcript_done(),
            transcript_delta("a"),
            transcript_done(),
            transcript_done(),
        ],
        ConnectBehavior::Succeed,
        false,
    );
    let mut utterances = session.utterances();

    let run = tokio::spawn(session.run());
    let mut seen = Vec::new();
    for _ in 0..3 {
        let utterance = tokio::time::timeout(Duration::from_secs(2), utterances.recv())
            .await
            .expect("no utterance within timeout")
            .expect("tap closed early");
        seen.push(utterance);
    }
    harness.token.cancel();
    let report = run.await.unwrap();

    assert_eq!(seen, vec!["".to_string(), "a".to_string(), "".to_string()]);
    assert_eq!(report.utterances, seen);
}

/// One corrupted audio delta among nine valid ones: nine playback writes,
/// and the pipeline keeps running afterwards.
#[tokio::test]
async fn test_malformed_frame_resilience() {
    let good: Vec<AudioBlock> = (0..9).map(|i| block(i + 10, 6)).collect();
    let mut script: Vec<StreamItem> = good[..5].iter().map(audio_delta).collect();
    script.push(StreamItem::Message(
        r#"{"type": "response.audio.delta", "delta": "@@not-base64@@"}"#.to_string(),
    ));
    script.extend(good[5..].iter().map(audio_delta));

    let (session, harness) = build_session(Vec::new(), script, ConnectBehavior::Succeed, false);

    let run = tokio::spawn(session.run());
    wait_until(|| harness.written.lock().len() >= 9).await;
    harness.token.cancel();
    let report = run.await.unwrap();

    assert!(report.is_ok(), "malformed frame must not be terminal");
    let written = harness.written.lock();
    assert_eq!(written.len(), 9);
    assert_eq!(*written, good);
}

// =============================================================================
// Teardown guarantee, one test per closing cause
// =============================================================================

#[tokio::test]
async fn test_teardown_when_connection_never_opens() {
    let (session, harness) = build_session(
        Vec::new(),
        Vec::new(),
        ConnectBehavior::Fail("refused".to_string()),
        false,
    );
    let report = session.run().await;

    assert!(matches!(
        report.error,
        Some(SessionError::ConnectionFailed(_))
    ));
    assert!(
        !harness.input_flags.started(),
        "device opened without connection"
    );
    harness.assert_all_released();
}

#[tokio::test]
async fn test_teardown_when_connect_times_out() {
    let (session, harness) = build_session(Vec::new(), Vec::new(), ConnectBehavior::Hang, false);
    let report = session.run().await;

    match report.error {
        Some(SessionError::ConnectionFailed(msg)) => {
            assert!(msg.contains("no connection"), "unexpected message: {msg}")
        }
        other => panic!("expected ConnectionFailed, got {other:?}"),
    }
    harness.assert_all_released();
}

#[tokio::test]
async fn test_teardown_when_handshake_rejected() {
    let (session, harness) = build_session(Vec::new(), Vec::new(), ConnectBehavior::Succeed, true);
    let report = session.run().await;

    assert!(matches!(
        report.error,
        Some(SessionError::HandshakeRejected(_))
    ));
    assert!(
        !harness.input_flags.started(),
        "streaming reached after rejection"
    );
    harness.assert_all_released();
}

#[tokio::test]
async fn test_teardown_on_midstream_connection_drop() {
    let (session, harness) = build_session(
        Vec::new(),
        vec![
            transcript_delta("partial"),
            StreamItem::Error("reset by peer".to_string()),
        ],
        ConnectBehavior::Succeed,
        false,
    );
    let report = session.run().await;

    assert!(matches!(
        report.error,
        Some(SessionError::ConnectionFailed(_))
    ));
    harness.assert_all_released();
}

#[tokio::test]
async fn test_teardown_on_external_cancellation() {
    let (session, harness) = build_session(Vec::new(), Vec::new(), ConnectBehavior::Succeed, false);

    let run = tokio::spawn(session.run());
    wait_until(|| !harness.sent.lock().is_empty()).await; // handshake went out
    harness.token.cancel();
    let report = run.await.unwrap();

    assert!(report.is_ok(), "cancellation is not an error");
    harness.assert_all_released();
}

/// An unprompted close from the peer terminates the session with an error.
#[tokio::test]
async fn test_peer_close_is_terminal() {
    let (session, harness) = build_session(
        Vec::new(),
        vec![StreamItem::Close],
        ConnectBehavior::Succeed,
        false,
    );
    let report = session.run().await;

    match report.error {
        Some(SessionError::ConnectionFailed(msg)) => {
            assert!(msg.contains("closed by peer"), "unexpected message: {msg}")
        }
        other => panic!("expected ConnectionFailed, got {other:?}"),
    }
    harness.assert_all_released();
}
