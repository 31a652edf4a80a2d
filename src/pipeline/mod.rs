//! Decode pipeline contract
//!
//! The pipeline owns the demux/decode/colorspace-convert graph for one media
//! file and runs it asynchronously: decoded frames are published into a
//! single-slot [`FrameSlot`] from the worker context, while end-of-stream and
//! error conditions travel on a separate event bus drained by the owning
//! thread once per update tick. No state transition happens on the worker.

#[cfg(feature = "ffmpeg")]
mod ffmpeg;
mod scripted;

#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegPipeline;
pub use scripted::{ScriptedPipeline, ScriptedProbe};

use crate::error::VideoError;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Coarse relative seek step
pub const SKIP_STEP: Duration = Duration::from_secs(60);
/// Fine-grained relative seek step
pub const SKIP_STEP_FINE: Duration = Duration::from_secs(5);

/// Pipeline state, owned exclusively by the decode pipeline
///
/// Transitions are driven by explicit commands (play/pause/stop) and by bus
/// events (end-of-stream, error) drained on the owning thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    /// No decode graph exists yet
    #[default]
    Uninitialized,
    /// Graph constructed, no media bound
    Ready,
    /// Frames are being delivered
    Playing,
    /// Delivery suspended; the last texture remains valid
    Paused,
    /// Teardown acknowledged
    Stopped,
    /// The stream ran out; awaiting restart or stop
    EndOfStream,
    /// Bus-reported decode failure; only stop + fresh play recovers
    Error,
}

impl PipelineState {
    /// Whether the frame delivery callback may fire in this state
    pub fn delivers_frames(&self) -> bool {
        *self == PipelineState::Playing
    }

    /// Whether bus events may no longer change this state; replay via a
    /// fresh `play` is still allowed
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Stopped)
    }
}

/// Asynchronous conditions reported on the event bus, never via the frame path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// The stream played to its end
    EndOfStream,
    /// Decode failure mid-stream; the pipeline has entered [`PipelineState::Error`]
    Error(String),
}

/// Memory layout of a decoded frame's pixel planes
///
/// Classified exactly once at stream start and cached for the lifetime of a
/// single pipeline instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferLayout {
    /// All planes tightly packed in one buffer; a single copy suffices
    Contiguous,
    /// Planes carry padded strides and must be copied independently
    NonContiguous {
        /// Row stride of the luma plane in bytes
        y_stride: usize,
        /// Row stride of each chroma plane in bytes
        uv_stride: usize,
    },
}

/// One decoded video frame: I420 plane data plus dimensions and layout
///
/// Ownership transfers from the pipeline's buffer pool into the [`FrameSlot`];
/// the consumer takes the whole allocation, so teardown of the pipeline can
/// never invalidate a frame mid-copy.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// Y plane followed by U then V, packed or strided per `layout`
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub layout: BufferLayout,
}

impl DecodedFrame {
    /// Expected byte length of a tightly packed I420 image. Chroma planes
    /// round odd dimensions up, matching the subsampled plane geometry.
    pub fn packed_len(width: u32, height: u32) -> usize {
        let w = width as usize;
        let h = height as usize;
        w * h + 2 * w.div_ceil(2) * h.div_ceil(2)
    }

    /// Row strides of the planes as laid out in `data`
    pub fn strides(&self) -> (usize, usize) {
        match self.layout {
            BufferLayout::Contiguous => {
                (self.width as usize, (self.width as usize).div_ceil(2))
            }
            BufferLayout::NonContiguous { y_stride, uv_stride } => (y_stride, uv_stride),
        }
    }

    /// Byte length `data` must carry for the declared layout and dimensions
    pub fn expected_len(&self) -> usize {
        let (y_stride, uv_stride) = self.strides();
        let height = self.height as usize;
        y_stride * height + 2 * uv_stride * height.div_ceil(2)
    }
}

/// Single-slot, latest-wins frame handoff between the decode context and the
/// render thread
///
/// If a new frame arrives before the previous one was consumed, the previous
/// frame is discarded — bounded memory, no backlog. The slot is
/// reference-counted independently of the pipeline so a frame in flight is
/// never freed by pipeline teardown.
#[derive(Debug, Default)]
pub struct FrameSlot {
    frame: Mutex<Option<DecodedFrame>>,
    dropped: AtomicU64,
}

impl FrameSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Publish a frame, replacing any unconsumed predecessor
    pub fn publish(&self, frame: DecodedFrame) {
        let mut slot = self.frame.lock();
        if slot.replace(frame).is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Take the latest frame, leaving the slot empty
    pub fn take(&self) -> Option<DecodedFrame> {
        self.frame.lock().take()
    }

    /// Discard any staged frame
    pub fn clear(&self) {
        self.frame.lock().take();
    }

    /// Frames overwritten before consumption, for diagnostics
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// The decode pipeline contract
///
/// One production implementation ([`FfmpegPipeline`]) and one deterministic
/// test double ([`ScriptedPipeline`]) expose the same surface, so transport
/// logic can be exercised without a real decode backend.
pub trait VideoPipeline: Send {
    /// Construct the decode graph bound to the target monitor. Idempotent.
    fn initialize(&mut self) -> Result<(), VideoError>;

    /// Bind a media source and start the asynchronous graph.
    ///
    /// Returns whether playback actually started; `false` when the file is
    /// unreadable or unsupported by the installed backend. From this point
    /// the frame callback runs on the pipeline's own execution context.
    fn play(&mut self, path: &Path) -> bool;

    /// Request teardown. Blocks until the asynchronous graph acknowledges;
    /// no frame is published after this returns.
    fn stop(&mut self);

    /// Toggle between `Playing` and `Paused`.
    fn pause(&mut self);

    /// Seek to position zero and resume playing.
    fn restart(&mut self);

    /// Coarse relative seek; no-op when the stream is unseekable.
    fn skip_forward(&mut self);
    fn skip_backward(&mut self);

    /// Fine-grained relative seek; no-op when the stream is unseekable.
    fn skip_forward_fine(&mut self);
    fn skip_backward_fine(&mut self);

    /// Apply gain in `[0.0, 1.0]`; deferred until the audio sink exists.
    fn set_volume(&mut self, volume: f32);

    /// Current playback position; `ZERO` means unknown.
    fn current(&self) -> Duration;

    /// Stream duration; `ZERO` means unknown, not zero length.
    fn duration(&self) -> Duration;

    /// Current pipeline state (not volatile transients).
    fn state(&self) -> PipelineState;

    fn is_playing(&self) -> bool {
        self.state() == PipelineState::Playing
    }

    fn is_paused(&self) -> bool {
        self.state() == PipelineState::Paused
    }

    /// Drain one bus event, if any. Called once per update tick by the owner
    /// so all state transitions stay serialized on the owning thread.
    fn poll_event(&mut self) -> Option<PipelineEvent>;

    /// The latest-wins frame handoff shared with the frame buffer bridge.
    fn frame_slot(&self) -> Arc<FrameSlot>;

    /// Intrinsic media dimensions; `(0, 0)` until the first decoded frame.
    fn size(&self) -> (u32, u32);
}
