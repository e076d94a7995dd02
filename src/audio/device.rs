//! cpal-backed capture and playback devices.
//!
//! Both directions run at the fixed 24 kHz mono wire format; there is no
//! resampling. Capture accepts a mono or stereo device (taking the first
//! channel), playback accepts a mono or stereo device (duplicating each
//! sample across channels); either way the device must support 24 kHz.
//!
//! `cpal::Stream` is not `Send`, so each stream lives on a dedicated thread
//! and exchanges samples with the async side through channels: the capture
//! callback pushes into an unbounded channel that [`MicInput::read_block`]
//! re-chunks into fixed-size blocks, and the playback callback drains a
//! shared ring buffer that [`SpeakerOutput::write_block`] fills, suspending
//! at a high-water mark until the device catches up.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate};
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc, oneshot};

use super::{AudioBlock, AudioInput, AudioOutput};
use crate::config::{REALTIME_SAMPLE_RATE, SessionConfig};
use crate::error::{SessionError, SessionResult};

/// Seconds of queued playback audio before `write_block` applies
/// backpressure. The service sends synthesized audio faster than realtime,
/// so the mark is generous.
const PLAYBACK_BUFFER_SECONDS: usize = 10;

#[inline]
fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

#[inline]
fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / i16::MAX as f32
}

/// Names of the available input devices.
pub fn input_device_names() -> Vec<String> {
    let host = cpal::default_host();
    host.input_devices()
        .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
        .unwrap_or_default()
}

/// Names of the available output devices.
pub fn output_device_names() -> Vec<String> {
    let host = cpal::default_host();
    host.output_devices()
        .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
        .unwrap_or_default()
}

fn find_device(
    name: Option<&str>,
    devices: impl Iterator<Item = cpal::Device>,
    default: Option<cpal::Device>,
    kind: &str,
) -> Result<cpal::Device, String> {
    match name {
        Some(name) => devices
            .into_iter()
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| format!("{kind} device not found: {name}")),
        None => default.ok_or_else(|| format!("no default {kind} device")),
    }
}

// =============================================================================
// Re-chunking
// =============================================================================

/// Re-chunks arbitrarily sized callback buffers into fixed-size blocks.
#[derive(Debug)]
struct Rechunker {
    pending: Vec<i16>,
    block_size: usize,
}

impl Rechunker {
    fn new(block_size: usize) -> Self {
        Self {
            pending: Vec::with_capacity(block_size * 2),
            block_size,
        }
    }

    fn extend(&mut self, samples: &[i16]) {
        self.pending.extend_from_slice(samples);
    }

    fn next_block(&mut self) -> Option<AudioBlock> {
        if self.pending.len() < self.block_size {
            return None;
        }
        let rest = self.pending.split_off(self.block_size);
        Some(AudioBlock::new(std::mem::replace(&mut self.pending, rest)))
    }
}

// =============================================================================
// Capture
// =============================================================================

/// Microphone input yielding fixed-size blocks at 24 kHz mono.
pub struct MicInput {
    device_name: Option<String>,
    rx: Option<mpsc::UnboundedReceiver<Vec<i16>>>,
    chunks: Rechunker,
    shutdown: Option<std::sync::mpsc::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl MicInput {
    /// Create an unopened capture device from the session configuration.
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            device_name: config.input_device.clone(),
            rx: None,
            chunks: Rechunker::new(config.block_size),
            shutdown: None,
            thread: None,
        }
    }
}

fn open_capture_stream(
    name: Option<&str>,
    tx: mpsc::UnboundedSender<Vec<i16>>,
) -> Result<cpal::Stream, String> {
    let host = cpal::default_host();
    let device = find_device(
        name,
        host.input_devices().map_err(|e| e.to_string())?,
        host.default_input_device(),
        "input",
    )?;

    let rate = SampleRate(REALTIME_SAMPLE_RATE);
    let range = device
        .supported_input_configs()
        .map_err(|e| e.to_string())?
        .filter(|r| {
            r.channels() <= 2
                && r.min_sample_rate() <= rate
                && rate <= r.max_sample_rate()
                && matches!(r.sample_format(), SampleFormat::I16 | SampleFormat::F32)
        })
        // Prefer a native mono configuration.
        .min_by_key(|r| r.channels())
        .ok_or("input device does not support 16-bit capture at 24 kHz")?;

    let sample_format = range.sample_format();
    let config = range.with_sample_rate(rate).config();
    let channels = config.channels as usize;
    let err_fn = |err| tracing::warn!("input stream error: {err}");

    let stream = match sample_format {
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let mono: Vec<i16> = data.iter().step_by(channels).copied().collect();
                let _ = tx.send(mono);
            },
            err_fn,
            None,
        ),
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mono: Vec<i16> = data
                    .iter()
                    .step_by(channels)
                    .map(|s| f32_to_i16(*s))
                    .collect();
                let _ = tx.send(mono);
            },
            err_fn,
            None,
        ),
        other => return Err(format!("unsupported input sample format {other:?}")),
    }
    .map_err(|e| e.to_string())?;

    stream.play().map_err(|e| e.to_string())?;
    Ok(stream)
}

#[async_trait]
impl AudioInput for MicInput {
    async fn start(&mut self) -> SessionResult<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();
        let name = self.device_name.clone();

        let handle = std::thread::spawn(move || match open_capture_stream(name.as_deref(), tx) {
            Ok(stream) => {
                let _ = ready_tx.send(Ok(()));
                // Park until the shutdown sender drops, then release the stream.
                let _ = shutdown_rx.recv();
                drop(stream);
            }
            Err(msg) => {
                let _ = ready_tx.send(Err(msg));
            }
        });

        match ready_rx.await {
            Ok(Ok(())) => {
                self.rx = Some(rx);
                self.shutdown = Some(shutdown_tx);
                self.thread = Some(handle);
                tracing::debug!("capture device opened");
                Ok(())
            }
            Ok(Err(msg)) => Err(SessionError::DeviceUnavailable(msg)),
            Err(_) => Err(SessionError::DeviceUnavailable(
                "capture thread exited before opening".to_string(),
            )),
        }
    }

    async fn read_block(&mut self) -> SessionResult<AudioBlock> {
        let Some(rx) = self.rx.as_mut() else {
            // Not started, or capture already ended and was reported once.
            // Park here; the session's cancellation unblocks the caller.
            return std::future::pending().await;
        };
        loop {
            if let Some(block) = self.chunks.next_block() {
                return Ok(block);
            }
            match rx.recv().await {
                Some(chunk) => self.chunks.extend(&chunk),
                None => {
                    self.rx = None;
                    return Err(SessionError::DeviceRead("capture stream ended".to_string()));
                }
            }
        }
    }

    fn stop(&mut self) {
        // Dropping the sender wakes the stream thread, which drops the stream.
        self.shutdown.take();
    }

    fn close(&mut self) {
        self.stop();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        self.rx = None;
    }
}

// =============================================================================
// Playback
// =============================================================================

/// Speaker output accepting fixed-size blocks at 24 kHz mono.
pub struct SpeakerOutput {
    device_name: Option<String>,
    buffer: Arc<Mutex<VecDeque<i16>>>,
    drained: Arc<Notify>,
    high_water: usize,
    shutdown: Option<std::sync::mpsc::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
    started: bool,
}

impl SpeakerOutput {
    /// Create an unopened playback device from the session configuration.
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            device_name: config.output_device.clone(),
            buffer: Arc::new(Mutex::new(VecDeque::new())),
            drained: Arc::new(Notify::new()),
            high_water: REALTIME_SAMPLE_RATE as usize * PLAYBACK_BUFFER_SECONDS,
            shutdown: None,
            thread: None,
            started: false,
        }
    }
}

fn open_playback_stream(
    name: Option<&str>,
    buffer: Arc<Mutex<VecDeque<i16>>>,
    drained: Arc<Notify>,
) -> Result<cpal::Stream, String> {
    let host = cpal::default_host();
    let device = find_device(
        name,
        host.output_devices().map_err(|e| e.to_string())?,
        host.default_output_device(),
        "output",
    )?;

    let rate = SampleRate(REALTIME_SAMPLE_RATE);
    let range = device
        .supported_output_configs()
        .map_err(|e| e.to_string())?
        .filter(|r| {
            r.channels() <= 2
                && r.min_sample_rate() <= rate
                && rate <= r.max_sample_rate()
                && matches!(r.sample_format(), SampleFormat::I16 | SampleFormat::F32)
        })
        .min_by_key(|r| r.channels())
        .ok_or("output device does not support 16-bit playback at 24 kHz")?;

    let sample_format = range.sample_format();
    let config = range.with_sample_rate(rate).config();
    let channels = config.channels as usize;
    let err_fn = |err| tracing::warn!("output stream error: {err}");

    let stream = match sample_format {
        SampleFormat::I16 => device.build_output_stream(
            &config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                {
                    let mut buf = buffer.lock();
                    for frame in data.chunks_mut(channels) {
                        // Underruns play silence.
                        let sample = buf.pop_front().unwrap_or(0);
                        for slot in frame {
                            *slot = sample;
                        }
                    }
                }
                drained.notify_waiters();
            },
            err_fn,
            None,
        ),
        SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                {
                    let mut buf = buffer.lock();
                    for frame in data.chunks_mut(channels) {
                        let sample = buf.pop_front().map(i16_to_f32).unwrap_or(0.0);
                        for slot in frame {
                            *slot = sample;
                        }
                    }
                }
                drained.notify_waiters();
            },
            err_fn,
            None,
        ),
        other => return Err(format!("unsupported output sample format {other:?}")),
    }
    .map_err(|e| e.to_string())?;

    stream.play().map_err(|e| e.to_string())?;
    Ok(stream)
}

#[async_trait]
impl AudioOutput for SpeakerOutput {
    async fn start(&mut self) -> SessionResult<()> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();
        let name = self.device_name.clone();
        let buffer = self.buffer.clone();
        let drained = self.drained.clone();

        let handle =
            std::thread::spawn(move || match open_playback_stream(name.as_deref(), buffer, drained) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    let _ = shutdown_rx.recv();
                    drop(stream);
                }
                Err(msg) => {
                    let _ = ready_tx.send(Err(msg));
                }
            });

        match ready_rx.await {
            Ok(Ok(())) => {
                self.shutdown = Some(shutdown_tx);
                self.thread = Some(handle);
                self.started = true;
                tracing::debug!("playback device opened");
                Ok(())
            }
            Ok(Err(msg)) => Err(SessionError::DeviceUnavailable(msg)),
            Err(_) => Err(SessionError::DeviceUnavailable(
                "playback thread exited before opening".to_string(),
            )),
        }
    }

    async fn write_block(&mut self, block: AudioBlock) -> SessionResult<()> {
        if !self.started {
            return Err(SessionError::DeviceWrite(
                "output device not started".to_string(),
            ));
        }
        let samples = block.into_samples();
        loop {
            {
                let mut buf = self.buffer.lock();
                if buf.len() < self.high_water {
                    buf.extend(samples.iter().copied());
                    return Ok(());
                }
            }
            // Wait for the output callback to drain below the mark.
            self.drained.notified().await;
        }
    }

    fn close(&mut self) {
        self.shutdown.take();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        self.started = false;
        self.buffer.lock().clear();
    }
}

// =============================================================================
// Tests
// =============================================================================
