//! Deterministic test-double pipeline
//!
//! Implements the [`VideoPipeline`] contract without any decode backend:
//! tests inject synthetic frames through the shared [`FrameSlot`] and bus
//! events through an injector handle, then drive the owning thread exactly
//! like the production render loop would. A [`ScriptedProbe`] stays valid
//! after the pipeline is boxed behind the trait, so composed transport logic
//! can be observed from outside.

use super::{FrameSlot, PipelineEvent, PipelineState, VideoPipeline, SKIP_STEP, SKIP_STEP_FINE};
use crate::error::VideoError;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared observation counters for a [`ScriptedPipeline`]
#[derive(Debug, Default)]
struct ProbeState {
    restarts: AtomicU32,
    stops: AtomicU32,
    applied_volumes: Mutex<Vec<f32>>,
    played_paths: Mutex<Vec<PathBuf>>,
}

/// Handle for observing a scripted pipeline after it has been boxed
#[derive(Debug, Clone, Default)]
pub struct ScriptedProbe(Arc<ProbeState>);

impl ScriptedProbe {
    /// Restart (seek-to-zero) requests observed
    pub fn restarts(&self) -> u32 {
        self.0.restarts.load(Ordering::SeqCst)
    }

    /// Stop requests observed
    pub fn stops(&self) -> u32 {
        self.0.stops.load(Ordering::SeqCst)
    }

    /// Volumes that reached the (simulated) audio sink, in order
    pub fn applied_volumes(&self) -> Vec<f32> {
        self.0.applied_volumes.lock().clone()
    }

    /// Paths handed to `play`, in order
    pub fn played_paths(&self) -> Vec<PathBuf> {
        self.0.played_paths.lock().clone()
    }
}

/// Scriptable stand-in for the production decode pipeline
pub struct ScriptedPipeline {
    state: PipelineState,
    slot: Arc<FrameSlot>,
    event_tx: Sender<PipelineEvent>,
    event_rx: Receiver<PipelineEvent>,
    probe: ScriptedProbe,
    media_size: (u32, u32),
    media_duration: Duration,
    duration_discovered: bool,
    position: Duration,
    seekable: bool,
    has_audio: bool,
    fail_init: bool,
    refuse_media: bool,
    pending_volume: Option<f32>,
}

impl Default for ScriptedPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedPipeline {
    pub fn new() -> Self {
        let (event_tx, event_rx) = unbounded();
        Self {
            state: PipelineState::Uninitialized,
            slot: FrameSlot::new(),
            event_tx,
            event_rx,
            probe: ScriptedProbe::default(),
            media_size: (0, 0),
            media_duration: Duration::ZERO,
            duration_discovered: false,
            position: Duration::ZERO,
            seekable: true,
            has_audio: true,
            fail_init: false,
            refuse_media: false,
            pending_volume: None,
        }
    }

    /// Pretend the media has these intrinsic dimensions
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.media_size = (width, height);
        self
    }

    /// Pretend the media has this duration once playback starts
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.media_duration = duration;
        self
    }

    /// Simulate a stream that does not support seeking
    pub fn unseekable(mut self) -> Self {
        self.seekable = false;
        self
    }

    /// Simulate media with no audio track (volume stays deferred)
    pub fn without_audio(mut self) -> Self {
        self.has_audio = false;
        self
    }

    /// Script `initialize` to fail with `VideoError::Init`
    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// Script `play` to return false (unsupported media)
    pub fn refusing_media(mut self) -> Self {
        self.refuse_media = true;
        self
    }

    /// Handle for injecting bus events from a test (or a test thread)
    pub fn event_injector(&self) -> Sender<PipelineEvent> {
        self.event_tx.clone()
    }

    /// Observation handle that outlives boxing behind the trait
    pub fn probe(&self) -> ScriptedProbe {
        self.probe.clone()
    }
}

impl VideoPipeline for ScriptedPipeline {
    fn initialize(&mut self) -> Result<(), VideoError> {
        if self.fail_init {
            return Err(VideoError::Init("scripted init failure".into()));
        }
        if self.state == PipelineState::Uninitialized {
            self.state = PipelineState::Ready;
        }
        Ok(())
    }

    fn play(&mut self, path: &Path) -> bool {
        if self.state == PipelineState::Uninitialized {
            return false;
        }
        if self.refuse_media {
            return false;
        }
        // Events queued by a previous stream must not surface against the
        // new one.
        while self.event_rx.try_recv().is_ok() {}
        self.probe.0.played_paths.lock().push(path.to_path_buf());
        self.position = Duration::ZERO;
        self.duration_discovered = true;
        self.state = PipelineState::Playing;
        // Sink creation point: any deferred volume lands now.
        if self.has_audio {
            if let Some(v) = self.pending_volume.take() {
                self.probe.0.applied_volumes.lock().push(v);
            }
        }
        true
    }

    fn stop(&mut self) {
        self.slot.clear();
        self.probe.0.stops.fetch_add(1, Ordering::SeqCst);
        self.state = PipelineState::Stopped;
    }

    fn pause(&mut self) {
        self.state = match self.state {
            PipelineState::Playing => PipelineState::Paused,
            PipelineState::Paused => PipelineState::Playing,
            other => other,
        };
    }

    fn restart(&mut self) {
        if matches!(
            self.state,
            PipelineState::Playing | PipelineState::Paused | PipelineState::EndOfStream
        ) {
            self.position = Duration::ZERO;
            self.probe.0.restarts.fetch_add(1, Ordering::SeqCst);
            self.state = PipelineState::Playing;
        }
    }

    fn skip_forward(&mut self) {
        if self.seekable {
            self.position = (self.position + SKIP_STEP).min(self.media_duration);
        }
    }

    fn skip_backward(&mut self) {
        if self.seekable {
            self.position = self.position.saturating_sub(SKIP_STEP);
        }
    }

    fn skip_forward_fine(&mut self) {
        if self.seekable {
            self.position = (self.position + SKIP_STEP_FINE).min(self.media_duration);
        }
    }

    fn skip_backward_fine(&mut self) {
        if self.seekable {
            self.position = self.position.saturating_sub(SKIP_STEP_FINE);
        }
    }

    fn set_volume(&mut self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        let sink_exists = self.has_audio
            && !matches!(
                self.state,
                PipelineState::Uninitialized | PipelineState::Ready
            );
        if sink_exists {
            self.probe.0.applied_volumes.lock().push(volume);
        } else {
            self.pending_volume = Some(volume);
        }
    }

    fn current(&self) -> Duration {
        self.position
    }

    fn duration(&self) -> Duration {
        if self.duration_discovered {
            self.media_duration
        } else {
            Duration::ZERO
        }
    }

    fn state(&self) -> PipelineState {
        self.state
    }

    fn poll_event(&mut self) -> Option<PipelineEvent> {
        let event = self.event_rx.try_recv().ok()?;
        // Transition on the owning thread, never on the injector's.
        match &event {
            PipelineEvent::EndOfStream => {
                if self.state == PipelineState::Playing {
                    self.state = PipelineState::EndOfStream;
                }
            }
            PipelineEvent::Error(_) => {
                if !self.state.is_terminal() {
                    self.state = PipelineState::Error;
                }
            }
        }
        Some(event)
    }

    fn frame_slot(&self) -> Arc<FrameSlot> {
        Arc::clone(&self.slot)
    }

    fn size(&self) -> (u32, u32) {
        self.media_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_play_requires_initialize() {
        let mut pipeline = ScriptedPipeline::new();
        assert!(!pipeline.play(Path::new("a.mp4")));
        pipeline.initialize().unwrap();
        assert!(pipeline.play(Path::new("a.mp4")));
        assert!(pipeline.is_playing());
    }

    #[test]
    fn test_pause_toggles() {
        let mut pipeline = ScriptedPipeline::new();
        pipeline.initialize().unwrap();
        pipeline.play(Path::new("a.mp4"));
        pipeline.pause();
        assert!(pipeline.is_paused());
        pipeline.pause();
        assert!(pipeline.is_playing());
    }

    #[test]
    fn test_volume_deferred_until_sink_exists() {
        let mut pipeline = ScriptedPipeline::new();
        let probe = pipeline.probe();
        pipeline.initialize().unwrap();
        pipeline.set_volume(0.5);
        assert!(probe.applied_volumes().is_empty());
        pipeline.play(Path::new("a.mp4"));
        assert_eq!(probe.applied_volumes(), vec![0.5]);
    }

    #[test]
    fn test_volume_clamped() {
        let mut pipeline = ScriptedPipeline::new();
        let probe = pipeline.probe();
        pipeline.initialize().unwrap();
        pipeline.play(Path::new("a.mp4"));
        pipeline.set_volume(2.5);
        assert_eq!(probe.applied_volumes(), vec![1.0]);
    }

    #[test]
    fn test_error_event_transitions_on_poll_only() {
        let mut pipeline = ScriptedPipeline::new();
        pipeline.initialize().unwrap();
        pipeline.play(Path::new("a.mp4"));
        pipeline
            .event_injector()
            .send(PipelineEvent::Error("bad packet".into()))
            .unwrap();
        // Still playing until the owner drains the bus.
        assert!(pipeline.is_playing());
        assert!(matches!(pipeline.poll_event(), Some(PipelineEvent::Error(_))));
        assert_eq!(pipeline.state(), PipelineState::Error);
    }

    #[test]
    fn test_unseekable_skip_is_noop() {
        let mut pipeline = ScriptedPipeline::new()
            .with_duration(Duration::from_secs(300))
            .unseekable();
        pipeline.initialize().unwrap();
        pipeline.play(Path::new("a.mp4"));
        pipeline.skip_forward();
        assert_eq!(pipeline.current(), Duration::ZERO);
    }

    #[test]
    fn test_skip_clamps_to_bounds() {
        let mut pipeline = ScriptedPipeline::new().with_duration(Duration::from_secs(30));
        pipeline.initialize().unwrap();
        pipeline.play(Path::new("a.mp4"));
        pipeline.skip_forward();
        assert_eq!(pipeline.current(), Duration::from_secs(30));
        pipeline.skip_backward();
        assert_eq!(pipeline.current(), Duration::ZERO);
        pipeline.skip_forward_fine();
        assert_eq!(pipeline.current(), Duration::from_secs(5));
    }

    #[test]
    fn test_duration_unknown_before_play() {
        let mut pipeline = ScriptedPipeline::new().with_duration(Duration::from_secs(12));
        assert_eq!(pipeline.duration(), Duration::ZERO);
        pipeline.initialize().unwrap();
        pipeline.play(Path::new("a.mp4"));
        assert_eq!(pipeline.duration(), Duration::from_secs(12));
    }

    #[test]
    fn test_replay_discards_stale_events() {
        let mut pipeline = ScriptedPipeline::new();
        pipeline.initialize().unwrap();
        pipeline.play(Path::new("a.mp4"));
        pipeline
            .event_injector()
            .send(PipelineEvent::EndOfStream)
            .unwrap();
        // A fresh play must not inherit the previous stream's bus backlog.
        pipeline.play(Path::new("b.mp4"));
        assert!(pipeline.poll_event().is_none());
        assert!(pipeline.is_playing());
    }

    #[test]
    fn test_refused_media_leaves_state_unchanged() {
        let mut pipeline = ScriptedPipeline::new().refusing_media();
        pipeline.initialize().unwrap();
        assert!(!pipeline.play(Path::new("broken.mp4")));
        assert_eq!(pipeline.state(), PipelineState::Ready);
    }
}
