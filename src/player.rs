//! Player transport
//!
//! `VideoPlayer` composes a decode pipeline with a frame buffer bridge and
//! owns the policy the pipeline does not: loop counting across end-of-stream,
//! volume ramping toward a target, cached intrinsic dimensions, and the
//! allocate/free graphics memory lifecycle. All pipeline interaction happens
//! on the thread driving `update`, so bus-event transitions stay serialized.

use crate::bridge::{FrameBridge, RenderTexture};
use crate::error::VideoError;
use crate::media::{MediaSource, PlaybackPosition};
use crate::pipeline::{PipelineEvent, VideoPipeline};
use uuid::Uuid;

/// Per-second rate at which the applied volume eases up toward the target.
/// Decreases are applied immediately.
const VOLUME_RAMP_PER_SEC: f32 = 0.3;

/// Applied volumes below this are clamped to full mute so near-silent audio
/// does not keep the sink busy.
const MUTE_FLOOR: f32 = 0.1;

/// Constructs decode pipelines for a media source.
///
/// The player tears its pipeline down completely in `free_graphics_memory`
/// and needs to build a fresh one on the next allocate, so it holds a builder
/// rather than a single pipeline instance.
pub trait PipelineBuilder: Send {
    fn build(&self, source: &MediaSource) -> Result<Box<dyn VideoPipeline>, VideoError>;
}

impl<F> PipelineBuilder for F
where
    F: Fn(&MediaSource) -> Result<Box<dyn VideoPipeline>, VideoError> + Send,
{
    fn build(&self, source: &MediaSource) -> Result<Box<dyn VideoPipeline>, VideoError> {
        self(source)
    }
}

/// Owns one pipeline + bridge pair and the transport policy around them
pub struct VideoPlayer {
    id: Uuid,
    source: MediaSource,
    builder: Box<dyn PipelineBuilder>,
    pipeline: Option<Box<dyn VideoPipeline>>,
    bridge: Option<FrameBridge>,
    /// Completed playback cycles since the last (re)allocation
    play_count: u32,
    /// Set once the loop budget is exhausted; cleared by allocate
    finished: bool,
    /// Intrinsic media dimensions, cached once discovered
    width: u32,
    height: u32,
    target_volume: f32,
    applied_volume: f32,
    last_sent_volume: Option<f32>,
}

impl VideoPlayer {
    pub fn new(source: MediaSource, builder: Box<dyn PipelineBuilder>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            builder,
            pipeline: None,
            bridge: None,
            play_count: 0,
            finished: false,
            width: 0,
            height: 0,
            target_volume: 0.0,
            applied_volume: 0.0,
            last_sent_volume: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn source(&self) -> &MediaSource {
        &self.source
    }

    /// Build, initialize, and start the pipeline. Idempotent: an existing
    /// pipeline is left untouched. A source that fails to initialize or that
    /// the backend refuses leaves the player inert rather than propagating:
    /// one bad file must not take down the whole layout.
    pub fn allocate_graphics_memory(&mut self) {
        if self.pipeline.is_some() {
            return;
        }
        let mut pipeline = match self.builder.build(&self.source) {
            Ok(p) => p,
            Err(err) => {
                log::error!("[{}] pipeline construction failed: {err}", self.id);
                return;
            }
        };
        if let Err(err) = pipeline.initialize() {
            log::error!("[{}] pipeline initialization failed: {err}", self.id);
            return;
        }
        if !pipeline.play(&self.source.path) {
            log::warn!(
                "[{}] backend refused media {}",
                self.id,
                self.source.path.display()
            );
        }
        self.play_count = 0;
        self.finished = false;
        self.last_sent_volume = None;
        self.bridge = Some(FrameBridge::new(pipeline.frame_slot()));
        self.pipeline = Some(pipeline);
        log::debug!("[{}] allocated for {}", self.id, self.source.path.display());
    }

    /// Stop the pipeline and drop every GPU resource. Idempotent; the next
    /// `allocate_graphics_memory` builds a fresh pipeline.
    pub fn free_graphics_memory(&mut self) {
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.stop();
            log::debug!("[{}] freed {}", self.id, self.source.path.display());
        }
        if let Some(mut bridge) = self.bridge.take() {
            bridge.release();
        }
        self.width = 0;
        self.height = 0;
        self.play_count = 0;
        self.finished = false;
        self.applied_volume = 0.0;
        self.last_sent_volume = None;
    }

    /// One transport tick: drain bus events, advance the volume ramp, and
    /// stage the newest decoded frame.
    pub fn update(&mut self, dt: f32) {
        if let Some(pipeline) = self.pipeline.as_mut() {
            while let Some(event) = pipeline.poll_event() {
                match event {
                    PipelineEvent::EndOfStream => {
                        self.play_count += 1;
                        let budget = self.source.loops;
                        if budget == 0 || self.play_count < budget {
                            pipeline.restart();
                        } else {
                            // Terminal: hold the last frame on screen.
                            pipeline.stop();
                            self.finished = true;
                            log::debug!(
                                "[{}] loop budget of {budget} exhausted",
                                self.id
                            );
                        }
                    }
                    PipelineEvent::Error(message) => {
                        log::error!("[{}] pipeline error: {message}", self.id);
                    }
                }
            }
        }

        self.advance_volume(dt);

        if let Some(bridge) = self.bridge.as_mut() {
            bridge.stage_latest();
        }
        self.cache_intrinsic_size();
    }

    /// Ease the applied volume toward the target and push the effective gain
    /// to the pipeline when it changes. Decreases snap, increases ramp.
    fn advance_volume(&mut self, dt: f32) {
        let target = self.target_volume;
        let step = VOLUME_RAMP_PER_SEC * dt.max(0.0);
        if self.applied_volume > target || self.applied_volume + step >= target {
            self.applied_volume = target;
        } else {
            self.applied_volume += step;
        }

        let effective = if self.applied_volume < MUTE_FLOOR {
            0.0
        } else {
            self.applied_volume
        };
        if self.last_sent_volume != Some(effective) {
            if let Some(pipeline) = self.pipeline.as_mut() {
                pipeline.set_volume(effective);
                self.last_sent_volume = Some(effective);
            }
        }
    }

    fn cache_intrinsic_size(&mut self) {
        if self.width != 0 && self.height != 0 {
            return;
        }
        if let Some(pipeline) = self.pipeline.as_ref() {
            let (w, h) = pipeline.size();
            if w != 0 && h != 0 {
                self.width = w;
                self.height = h;
                return;
            }
        }
        if let Some(bridge) = self.bridge.as_ref() {
            let (w, h) = bridge.staged_size();
            if w != 0 && h != 0 {
                self.width = w;
                self.height = h;
            }
        }
    }

    /// Set the gain target; the ramp applies it over subsequent ticks.
    pub fn set_volume(&mut self, volume: f32) {
        self.target_volume = volume.clamp(0.0, 1.0);
    }

    pub fn pause(&mut self) {
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.pause();
        }
    }

    /// Seek to zero and resume. After the loop budget has stopped the
    /// pipeline the restart is a no-op and `finished` stays set; replay
    /// goes through `free_graphics_memory` + `allocate_graphics_memory`.
    pub fn restart(&mut self) {
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.restart();
            if pipeline.is_playing() {
                self.finished = false;
            }
        }
    }

    pub fn skip_forward(&mut self) {
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.skip_forward();
        }
    }

    pub fn skip_backward(&mut self) {
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.skip_backward();
        }
    }

    pub fn skip_forward_fine(&mut self) {
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.skip_forward_fine();
        }
    }

    pub fn skip_backward_fine(&mut self) {
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.skip_backward_fine();
        }
    }

    pub fn is_playing(&self) -> bool {
        self.pipeline.as_ref().is_some_and(|p| p.is_playing())
    }

    pub fn is_paused(&self) -> bool {
        self.pipeline.as_ref().is_some_and(|p| p.is_paused())
    }

    /// Whether the loop budget has been exhausted
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Completed playback cycles since the last allocation
    pub fn play_count(&self) -> u32 {
        self.play_count
    }

    pub fn position(&self) -> PlaybackPosition {
        match self.pipeline.as_ref() {
            Some(p) => PlaybackPosition {
                current: p.current(),
                duration: p.duration(),
            },
            None => PlaybackPosition::default(),
        }
    }

    /// Intrinsic media dimensions, `(0, 0)` until the stream reports them
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Upload the staged frame, if any, to the GPU
    pub fn upload(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) {
        if let Some(bridge) = self.bridge.as_mut() {
            bridge.upload(device, queue);
        }
    }

    /// The current presentable texture, if a frame has been uploaded
    pub fn texture(&self) -> Option<&RenderTexture> {
        self.bridge.as_ref().and_then(|b| b.texture())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{DecodedFrame, FrameSlot, ScriptedPipeline, ScriptedProbe};
    use crossbeam_channel::Sender;
    use parking_lot::Mutex;
    use std::path::PathBuf;
    use std::sync::Arc;

    /// Handles to every pipeline a test builder has produced, in order
    #[derive(Clone, Default)]
    struct BuiltPipelines {
        probes: Arc<Mutex<Vec<ScriptedProbe>>>,
        injectors: Arc<Mutex<Vec<Sender<PipelineEvent>>>>,
        slots: Arc<Mutex<Vec<Arc<FrameSlot>>>>,
    }

    impl BuiltPipelines {
        fn builder(
            &self,
            configure: impl Fn(ScriptedPipeline) -> ScriptedPipeline + Send + 'static,
        ) -> Box<dyn PipelineBuilder> {
            let built = self.clone();
            Box::new(move |_: &MediaSource| {
                let pipeline = configure(ScriptedPipeline::new());
                built.probes.lock().push(pipeline.probe());
                built.injectors.lock().push(pipeline.event_injector());
                built.slots.lock().push(pipeline.frame_slot());
                Ok(Box::new(pipeline) as Box<dyn VideoPipeline>)
            })
        }

        fn probe(&self, index: usize) -> ScriptedProbe {
            self.probes.lock()[index].clone()
        }

        fn inject(&self, index: usize, event: PipelineEvent) {
            self.injectors.lock()[index].send(event).unwrap();
        }

        fn count(&self) -> usize {
            self.probes.lock().len()
        }
    }

    fn test_frame(width: u32, height: u32) -> DecodedFrame {
        DecodedFrame {
            data: vec![128; DecodedFrame::packed_len(width, height)],
            width,
            height,
            layout: crate::pipeline::BufferLayout::Contiguous,
        }
    }

    #[test]
    fn test_finite_loop_budget_stops_after_last_cycle() {
        let built = BuiltPipelines::default();
        let source = MediaSource::new("a.mp4").with_loops(2);
        let mut player = VideoPlayer::new(source, built.builder(|p| p));
        player.allocate_graphics_memory();
        assert!(player.is_playing());

        built.inject(0, PipelineEvent::EndOfStream);
        player.update(0.016);
        assert_eq!(built.probe(0).restarts(), 1);
        assert!(!player.is_finished());

        built.inject(0, PipelineEvent::EndOfStream);
        player.update(0.016);
        assert_eq!(built.probe(0).restarts(), 1);
        assert_eq!(built.probe(0).stops(), 1);
        assert!(player.is_finished());
        assert_eq!(player.play_count(), 2);
    }

    #[test]
    fn test_zero_loops_restarts_forever() {
        let built = BuiltPipelines::default();
        let mut player = VideoPlayer::new(MediaSource::new("a.mp4"), built.builder(|p| p));
        player.allocate_graphics_memory();

        for _ in 0..10 {
            built.inject(0, PipelineEvent::EndOfStream);
            player.update(0.016);
        }
        assert_eq!(built.probe(0).restarts(), 10);
        assert_eq!(built.probe(0).stops(), 0);
        assert!(!player.is_finished());
    }

    #[test]
    fn test_free_then_allocate_builds_fresh_pipeline() {
        let built = BuiltPipelines::default();
        let mut player = VideoPlayer::new(MediaSource::new("a.mp4"), built.builder(|p| p));
        player.allocate_graphics_memory();
        assert_eq!(built.count(), 1);

        player.free_graphics_memory();
        assert!(!player.is_playing());
        assert!(player.texture().is_none());
        assert_eq!(built.probe(0).stops(), 1);

        player.allocate_graphics_memory();
        assert_eq!(built.count(), 2);
        assert!(player.is_playing());
        assert_eq!(built.probe(1).played_paths(), vec![PathBuf::from("a.mp4")]);
    }

    #[test]
    fn test_allocate_is_idempotent() {
        let built = BuiltPipelines::default();
        let mut player = VideoPlayer::new(MediaSource::new("a.mp4"), built.builder(|p| p));
        player.allocate_graphics_memory();
        player.allocate_graphics_memory();
        assert_eq!(built.count(), 1);
    }

    #[test]
    fn test_failed_initialize_leaves_player_inert() {
        let built = BuiltPipelines::default();
        let mut player = VideoPlayer::new(
            MediaSource::new("a.mp4"),
            built.builder(|p| p.failing_init()),
        );
        player.allocate_graphics_memory();
        assert!(!player.is_playing());
        // Updates are harmless without a pipeline.
        player.update(0.016);
        assert_eq!(player.position(), PlaybackPosition::default());
    }

    #[test]
    fn test_refused_media_keeps_player_silent() {
        let built = BuiltPipelines::default();
        let mut player = VideoPlayer::new(
            MediaSource::new("broken.mp4"),
            built.builder(|p| p.refusing_media()),
        );
        player.allocate_graphics_memory();
        assert!(!player.is_playing());
        player.update(0.016);
        assert!(player.texture().is_none());
    }

    #[test]
    fn test_volume_ramps_up_and_snaps_down() {
        let built = BuiltPipelines::default();
        let mut player = VideoPlayer::new(MediaSource::new("a.mp4"), built.builder(|p| p));
        player.allocate_graphics_memory();
        player.set_volume(1.0);

        // One second of ticks cannot reach full volume at 0.3/s.
        for _ in 0..10 {
            player.update(0.1);
        }
        let applied = built.probe(0).applied_volumes();
        let last = *applied.last().unwrap();
        assert!(last < 1.0, "ramp should still be climbing, got {last}");
        assert!(last > 0.0);

        // Decreases apply immediately.
        player.set_volume(0.0);
        player.update(0.1);
        assert_eq!(*built.probe(0).applied_volumes().last().unwrap(), 0.0);
    }

    #[test]
    fn test_volume_below_mute_floor_is_silenced() {
        let built = BuiltPipelines::default();
        let mut player = VideoPlayer::new(MediaSource::new("a.mp4"), built.builder(|p| p));
        player.allocate_graphics_memory();
        player.set_volume(0.05);
        for _ in 0..10 {
            player.update(0.1);
        }
        // Every gain that reached the sink was full mute.
        assert!(built
            .probe(0)
            .applied_volumes()
            .iter()
            .all(|v| *v == 0.0));
    }

    #[test]
    fn test_update_stages_published_frames_and_caches_size() {
        let built = BuiltPipelines::default();
        let mut player = VideoPlayer::new(MediaSource::new("a.mp4"), built.builder(|p| p));
        player.allocate_graphics_memory();
        assert_eq!(player.dimensions(), (0, 0));

        built.slots.lock()[0].publish(test_frame(32, 16));
        player.update(0.016);
        assert_eq!(player.dimensions(), (32, 16));
    }

    #[test]
    fn test_intrinsic_size_prefers_pipeline_report() {
        let built = BuiltPipelines::default();
        let mut player = VideoPlayer::new(
            MediaSource::new("a.mp4"),
            built.builder(|p| p.with_size(640, 480)),
        );
        player.allocate_graphics_memory();
        player.update(0.016);
        assert_eq!(player.dimensions(), (640, 480));
    }

    #[test]
    fn test_restart_after_exhausted_budget_stays_finished() {
        let built = BuiltPipelines::default();
        let source = MediaSource::new("a.mp4").with_loops(1);
        let mut player = VideoPlayer::new(source, built.builder(|p| p));
        player.allocate_graphics_memory();

        built.inject(0, PipelineEvent::EndOfStream);
        player.update(0.016);
        assert!(player.is_finished());

        // The stopped pipeline ignores the restart; reporting "not finished
        // and not playing" would strand the caller.
        player.restart();
        assert!(player.is_finished());
        assert!(!player.is_playing());

        // A mid-play restart still clears nothing it should not.
        player.free_graphics_memory();
        player.allocate_graphics_memory();
        player.restart();
        assert!(!player.is_finished());
        assert!(player.is_playing());
    }

    #[test]
    fn test_rapid_allocate_free_cycles_with_inflight_frames() {
        let _ = env_logger::builder().is_test(true).try_init();
        let built = BuiltPipelines::default();
        let mut player = VideoPlayer::new(MediaSource::new("a.mp4"), built.builder(|p| p));

        for cycle in 0..20 {
            player.allocate_graphics_memory();
            let slot = Arc::clone(&built.slots.lock()[cycle]);
            // Publisher races teardown; the slot outlives the pipeline.
            let publisher = std::thread::spawn(move || {
                for _ in 0..50 {
                    slot.publish(test_frame(16, 8));
                }
            });
            player.update(0.016);
            player.free_graphics_memory();
            publisher.join().unwrap();
            assert!(!player.is_playing());
            assert!(player.texture().is_none());
        }
        assert_eq!(built.count(), 20);
    }

    #[test]
    fn test_pipeline_error_keeps_player_alive() {
        let built = BuiltPipelines::default();
        let mut player = VideoPlayer::new(MediaSource::new("a.mp4"), built.builder(|p| p));
        player.allocate_graphics_memory();
        built.inject(0, PipelineEvent::Error("decode fault".into()));
        player.update(0.016);
        assert!(!player.is_playing());
        assert!(!player.is_finished());
        // Free and reallocate recovers with a fresh pipeline.
        player.free_graphics_memory();
        player.allocate_graphics_memory();
        assert!(player.is_playing());
    }
}
