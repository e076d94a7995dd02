//! Audio block model and device seams.
//!
//! An [`AudioBlock`] is a fixed-length buffer of signed 16-bit mono samples
//! at 24 kHz. Blocks are immutable once created and move stage to stage
//! through the pipelines: capture → codec → send on the way out,
//! receive → codec → playback on the way in.
//!
//! [`AudioInput`] and [`AudioOutput`] are the device seams the session
//! consumes. The cpal-backed implementations live in [`device`]; tests drive
//! the session through scripted implementations instead.

pub mod device;

pub use device::{MicInput, SpeakerOutput, input_device_names, output_device_names};

use async_trait::async_trait;

use crate::error::SessionResult;

// =============================================================================
// Audio Block
// =============================================================================

/// A block of signed 16-bit mono audio samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBlock {
    samples: Vec<i16>,
}

impl AudioBlock {
    /// Create a block from raw samples.
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    /// Reconstruct a block from its little-endian byte image.
    ///
    /// The byte count must be even; the codec validates this before calling.
    pub fn from_le_bytes(bytes: &[u8]) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self { samples }
    }

    /// The little-endian byte image of the samples.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.samples.len() * 2);
        for sample in &self.samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }

    /// The samples in this block.
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Consume the block, yielding its samples.
    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }

    /// Number of samples in this block.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the block holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

// =============================================================================
// Device Seams
// =============================================================================

/// An input device yielding fixed-size blocks of 16-bit mono samples.
#[async_trait]
pub trait AudioInput: Send {
    /// Open the underlying device and begin capture.
    async fn start(&mut self) -> SessionResult<()>;

    /// Read the next block, suspending on the device's own pacing.
    ///
    /// A transient failure returns [`SessionError::DeviceRead`]; the caller
    /// retries on the next iteration.
    ///
    /// [`SessionError::DeviceRead`]: crate::error::SessionError::DeviceRead
    async fn read_block(&mut self) -> SessionResult<AudioBlock>;

    /// Stop capture. Safe to call at any time, including before `start`.
    fn stop(&mut self);

    /// Release the device handle. Idempotent.
    fn close(&mut self);
}

/// An output device accepting blocks of 16-bit mono samples for playback.
#[async_trait]
pub trait AudioOutput: Send {
    /// Open the underlying device and begin playback.
    async fn start(&mut self) -> SessionResult<()>;

    /// Queue a block for playback, suspending when the device buffer is full.
    ///
    /// A failure returns [`SessionError::DeviceWrite`]; the block is dropped
    /// and playback of subsequent blocks continues.
    ///
    /// [`SessionError::DeviceWrite`]: crate::error::SessionError::DeviceWrite
    async fn write_block(&mut self, block: AudioBlock) -> SessionResult<()>;

    /// Release the device handle. Idempotent.
    fn close(&mut self);
}
