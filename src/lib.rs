//! Attract Video
//!
//! Video playback engine for layout-driven front-ends: an asynchronous
//! decode pipeline, a latest-wins frame bridge onto a wgpu texture, a player
//! transport with loop and volume policy, and a drawable element placed by
//! the owning layout.

pub mod bridge;
pub mod element;
pub mod error;
pub mod factory;
pub mod media;
pub mod pipeline;
pub mod player;
pub mod render;
pub mod settings;

// Re-export commonly used types
pub use bridge::{FrameBridge, RenderTexture};
pub use element::{VideoElement, ViewState};
pub use error::VideoError;
pub use factory::{VideoFactory, PLAYABLE_EXTENSIONS};
pub use media::{MediaSource, PlaybackPosition};
pub use pipeline::{
    BufferLayout, DecodedFrame, FrameSlot, PipelineEvent, PipelineState, ScriptedPipeline,
    VideoPipeline,
};
pub use player::{PipelineBuilder, VideoPlayer};
pub use render::QuadRenderer;
pub use settings::VideoSettings;

#[cfg(feature = "ffmpeg")]
pub use pipeline::FfmpegPipeline;
