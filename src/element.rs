//! Drawable video element
//!
//! Adapts a [`VideoPlayer`] to a retained-mode scene: the owning layout
//! pushes a [`ViewState`] (placement, alpha, volume, restart request) and the
//! element folds it into transport commands on each update tick. Drawing is
//! a single textured-quad pass; a frame that has not arrived yet simply draws
//! nothing.

use crate::player::VideoPlayer;
use crate::render::{quad_transform, QuadRenderer, QuadUniforms};
use glam::Vec2;

/// Layout-provided view of one video drawable for the current tick
#[derive(Debug, Clone, Copy)]
pub struct ViewState {
    /// Top-left corner in screen pixels, y-down
    pub origin: Vec2,
    /// On-screen size in pixels; `(0, 0)` falls back to the intrinsic size
    pub scaled_width: f32,
    pub scaled_height: f32,
    /// Opacity in `[0.0, 1.0]`; zero hides the drawable entirely
    pub alpha: f32,
    /// Gain target in `[0.0, 1.0]`
    pub volume: f32,
    /// Restart request; consumed by the element once honored
    pub restart: bool,
    /// Whether a fully transparent drawable suspends decoding
    pub pause_on_hide: bool,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            origin: Vec2::ZERO,
            scaled_width: 0.0,
            scaled_height: 0.0,
            alpha: 1.0,
            volume: 1.0,
            restart: false,
            pause_on_hide: true,
        }
    }
}

/// A video drawable: player transport plus view-state application
pub struct VideoElement {
    player: VideoPlayer,
    view: ViewState,
    /// Set after playback has been observed at least once; suppresses the
    /// restart request that layouts re-assert on the frame a video starts
    has_played_once: bool,
    /// Whether the current pause was issued by the alpha gate, so a manual
    /// pause is never resumed by mere visibility
    hidden_pause: bool,
}

impl VideoElement {
    pub fn new(player: VideoPlayer) -> Self {
        Self {
            player,
            view: ViewState::default(),
            has_played_once: false,
            hidden_pause: false,
        }
    }

    pub fn player(&self) -> &VideoPlayer {
        &self.player
    }

    pub fn player_mut(&mut self) -> &mut VideoPlayer {
        &mut self.player
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    /// Replace the view state for the next update tick
    pub fn set_view(&mut self, view: ViewState) {
        self.view = view;
    }

    pub fn allocate_graphics_memory(&mut self) {
        self.player.allocate_graphics_memory();
    }

    pub fn free_graphics_memory(&mut self) {
        self.player.free_graphics_memory();
        self.has_played_once = false;
        self.hidden_pause = false;
    }

    /// Fold the current view state into transport commands, then advance the
    /// player by one tick.
    pub fn update(&mut self, dt: f32) {
        self.player.set_volume(self.view.volume);

        if self.view.pause_on_hide {
            if self.view.alpha == 0.0 {
                // Set semantics: only a playing pipeline gets paused, so a
                // hidden drawable never un-pauses by accident.
                if self.player.is_playing() {
                    self.player.pause();
                    self.hidden_pause = true;
                }
            } else if self.hidden_pause && self.player.is_paused() {
                self.player.pause();
                self.hidden_pause = false;
            }
        }

        if self.view.restart {
            // The frame a video starts on, layouts still assert the restart
            // they queued for the previous media; honor it only afterwards.
            if self.has_played_once {
                self.player.restart();
            }
            self.view.restart = false;
        }

        if self.player.is_playing() {
            self.has_played_once = true;
        }

        self.player.update(dt);
    }

    /// Upload the newest frame and record one quad draw. Draws nothing while
    /// no frame has arrived or the drawable is fully transparent.
    pub fn draw(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
        renderer: &QuadRenderer,
        screen: Vec2,
    ) {
        if self.view.alpha == 0.0 {
            return;
        }
        self.player.upload(device, queue);
        let Some(texture) = self.player.texture() else {
            return;
        };

        let size = self.draw_size();
        if size.x <= 0.0 || size.y <= 0.0 {
            return;
        }
        let uniforms = QuadUniforms::new(
            quad_transform(self.view.origin, size, screen),
            self.view.alpha,
        );
        renderer.draw(device, encoder, target, &texture.view, uniforms);
    }

    /// On-screen size: explicit scaling wins, otherwise the intrinsic size
    fn draw_size(&self) -> Vec2 {
        if self.view.scaled_width > 0.0 && self.view.scaled_height > 0.0 {
            Vec2::new(self.view.scaled_width, self.view.scaled_height)
        } else {
            let (w, h) = self.player.dimensions();
            Vec2::new(w as f32, h as f32)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaSource;
    use crate::pipeline::{ScriptedPipeline, ScriptedProbe, VideoPipeline};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn probed_element() -> (VideoElement, Arc<Mutex<Vec<ScriptedProbe>>>) {
        let probes: Arc<Mutex<Vec<ScriptedProbe>>> = Arc::default();
        let sink = Arc::clone(&probes);
        let builder = move |_: &MediaSource| {
            let pipeline = ScriptedPipeline::new();
            sink.lock().push(pipeline.probe());
            Ok(Box::new(pipeline) as Box<dyn VideoPipeline>)
        };
        let player = VideoPlayer::new(MediaSource::new("a.mp4"), Box::new(builder));
        let mut element = VideoElement::new(player);
        element.allocate_graphics_memory();
        (element, probes)
    }

    fn scripted_element() -> VideoElement {
        probed_element().0
    }

    #[test]
    fn test_zero_alpha_pauses_and_visibility_resumes() {
        let mut element = scripted_element();
        element.update(0.016);
        assert!(element.player().is_playing());

        let mut view = ViewState::default();
        view.alpha = 0.0;
        element.set_view(view);
        element.update(0.016);
        assert!(element.player().is_paused());

        // Repeated hidden ticks must not toggle back to playing.
        element.update(0.016);
        element.update(0.016);
        assert!(element.player().is_paused());

        view.alpha = 1.0;
        element.set_view(view);
        element.update(0.016);
        assert!(element.player().is_playing());
    }

    #[test]
    fn test_manual_pause_survives_visible_ticks() {
        let mut element = scripted_element();
        element.update(0.016);
        element.player_mut().pause();
        assert!(element.player().is_paused());

        element.update(0.016);
        assert!(element.player().is_paused());
    }

    #[test]
    fn test_pause_on_hide_opt_out() {
        let mut element = scripted_element();
        element.update(0.016);

        let mut view = ViewState::default();
        view.alpha = 0.0;
        view.pause_on_hide = false;
        element.set_view(view);
        element.update(0.016);
        assert!(element.player().is_playing());
    }

    #[test]
    fn test_restart_suppressed_until_first_play_observed() {
        let (mut element, probes) = probed_element();

        let mut view = ViewState::default();
        view.restart = true;
        element.set_view(view);
        // First tick: playback has not been observed yet, request consumed.
        element.update(0.016);
        assert!(!element.view().restart);
        assert_eq!(probes.lock()[0].restarts(), 0);

        view.restart = true;
        element.set_view(view);
        element.update(0.016);
        assert_eq!(probes.lock()[0].restarts(), 1);
        assert!(!element.view().restart);
    }

    #[test]
    fn test_free_resets_first_play_tracking() {
        let mut element = scripted_element();
        element.update(0.016);
        element.free_graphics_memory();
        assert!(!element.player().is_playing());

        element.allocate_graphics_memory();
        let mut view = ViewState::default();
        view.restart = true;
        element.set_view(view);
        element.update(0.016);
        // Suppressed again after the reallocation.
        assert!(!element.view().restart);
        assert!(element.player().is_playing());
    }
}
