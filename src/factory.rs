//! Video construction policy
//!
//! The factory is the single place playback policy is applied: the global
//! enable switch, the default loop count, and on-disk media resolution with
//! its alternate-before-primary preference. Callers receive a ready
//! [`VideoElement`] or `None`; they never see why construction was refused
//! beyond the log.

use crate::element::VideoElement;
use crate::error::VideoError;
use crate::media::MediaSource;
use crate::pipeline::VideoPipeline;
use crate::player::{PipelineBuilder, VideoPlayer};
use crate::settings::VideoSettings;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(feature = "ffmpeg")]
use crate::pipeline::FfmpegPipeline;

/// Extensions probed during media resolution, exact-case on purpose: media
/// sets in the wild mix lowercase and uppercase names and filesystems may be
/// case-sensitive.
pub const PLAYABLE_EXTENSIONS: [&str; 8] =
    ["mp4", "MP4", "avi", "AVI", "mp3", "MP3", "wav", "WAV"];

type BackendFn =
    dyn Fn(&MediaSource) -> Result<Box<dyn VideoPipeline>, VideoError> + Send + Sync;

/// Shareable pipeline backend handed to every player the factory creates
#[derive(Clone)]
struct SharedBackend(Arc<BackendFn>);

impl PipelineBuilder for SharedBackend {
    fn build(&self, source: &MediaSource) -> Result<Box<dyn VideoPipeline>, VideoError> {
        (self.0)(source)
    }
}

/// Creates video drawables under the configured playback policy
pub struct VideoFactory {
    settings: VideoSettings,
    backend: SharedBackend,
}

impl VideoFactory {
    /// Factory backed by the native decode pipeline
    #[cfg(feature = "ffmpeg")]
    pub fn new(settings: VideoSettings) -> Self {
        Self::with_backend(
            settings,
            Arc::new(|source: &MediaSource| {
                Ok(Box::new(FfmpegPipeline::new(source.monitor)) as Box<dyn VideoPipeline>)
            }),
        )
    }

    /// Factory with an explicit pipeline backend
    pub fn with_backend(settings: VideoSettings, backend: Arc<BackendFn>) -> Self {
        Self {
            settings,
            backend: SharedBackend(backend),
        }
    }

    pub fn settings(&self) -> &VideoSettings {
        &self.settings
    }

    /// Create a drawable for the source, or `None` when playback is disabled
    /// or no playable file resolves.
    pub fn create(&self, source: MediaSource) -> Option<VideoElement> {
        if !self.settings.enabled {
            log::debug!("video disabled, skipping {}", source.path.display());
            return None;
        }
        let Some(resolved) = Self::resolve(&source) else {
            log::warn!("no playable file for {}", source.path.display());
            return None;
        };
        let loops = if source.loops > 0 {
            source.loops
        } else {
            self.settings.default_loops
        };
        let source = MediaSource {
            path: resolved,
            alt_path: None,
            loops,
            ..source
        };
        let player = VideoPlayer::new(source, Box::new(self.backend.clone()));
        Some(VideoElement::new(player))
    }

    /// Resolve the file to play: the alternate location is probed before the
    /// primary so per-layout overrides win without touching the media set.
    pub fn resolve(source: &MediaSource) -> Option<PathBuf> {
        source
            .alt_path
            .iter()
            .chain(std::iter::once(&source.path))
            .find_map(|candidate| Self::probe(candidate))
    }

    /// Probe one candidate: a path carrying a playable extension must exist
    /// as-is, an extension-less path is tried against every playable
    /// extension in order.
    fn probe(path: &Path) -> Option<PathBuf> {
        if let Some(ext) = path.extension() {
            let playable = PLAYABLE_EXTENSIONS.iter().any(|e| ext == *e);
            return (playable && path.is_file()).then(|| path.to_path_buf());
        }
        PLAYABLE_EXTENSIONS
            .iter()
            .map(|ext| path.with_extension(ext))
            .find(|candidate| candidate.is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ScriptedPipeline;
    use std::fs;
    use uuid::Uuid;

    /// Unique scratch directory, removed on drop
    struct Scratch(PathBuf);

    impl Scratch {
        fn new() -> Self {
            let dir = std::env::temp_dir().join(format!("attract-video-{}", Uuid::new_v4()));
            fs::create_dir_all(&dir).unwrap();
            Self(dir)
        }

        fn touch(&self, name: &str) -> PathBuf {
            let path = self.0.join(name);
            fs::write(&path, b"").unwrap();
            path
        }

        fn path(&self, name: &str) -> PathBuf {
            self.0.join(name)
        }
    }

    impl Drop for Scratch {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    fn scripted_factory(settings: VideoSettings) -> VideoFactory {
        VideoFactory::with_backend(
            settings,
            Arc::new(|_| Ok(Box::new(ScriptedPipeline::new()) as Box<dyn VideoPipeline>)),
        )
    }

    #[test]
    fn test_alternate_resolves_before_primary() {
        let scratch = Scratch::new();
        let primary = scratch.touch("game.mp4");
        let alternate = scratch.touch("override.mp4");
        let source = MediaSource::new(&primary).with_alt_path(&alternate);
        assert_eq!(VideoFactory::resolve(&source), Some(alternate));
    }

    #[test]
    fn test_missing_alternate_falls_back_to_primary() {
        let scratch = Scratch::new();
        let primary = scratch.touch("game.mp4");
        let source = MediaSource::new(&primary).with_alt_path(scratch.path("override.mp4"));
        assert_eq!(VideoFactory::resolve(&source), Some(primary));
    }

    #[test]
    fn test_extension_less_candidate_probes_playable_extensions() {
        let scratch = Scratch::new();
        let on_disk = scratch.touch("game.MP4");
        let source = MediaSource::new(scratch.path("game"));
        assert_eq!(VideoFactory::resolve(&source), Some(on_disk));
    }

    #[test]
    fn test_unplayable_extension_is_rejected_even_when_present() {
        let scratch = Scratch::new();
        let mkv = scratch.touch("game.mkv");
        let source = MediaSource::new(&mkv);
        assert_eq!(VideoFactory::resolve(&source), None);
    }

    #[test]
    fn test_audio_only_extensions_are_playable() {
        let scratch = Scratch::new();
        let wav = scratch.touch("jingle.wav");
        let source = MediaSource::new(&wav);
        assert_eq!(VideoFactory::resolve(&source), Some(wav));
    }

    #[test]
    fn test_disabled_settings_refuse_construction() {
        let scratch = Scratch::new();
        let primary = scratch.touch("game.mp4");
        let factory = scripted_factory(VideoSettings {
            enabled: false,
            default_loops: 0,
        });
        assert!(factory.create(MediaSource::new(primary)).is_none());
    }

    #[test]
    fn test_default_loops_apply_when_source_has_none() {
        let scratch = Scratch::new();
        let primary = scratch.touch("game.mp4");
        let factory = scripted_factory(VideoSettings {
            enabled: true,
            default_loops: 3,
        });
        let element = factory.create(MediaSource::new(&primary)).unwrap();
        assert_eq!(element.player().source().loops, 3);

        let element = factory
            .create(MediaSource::new(&primary).with_loops(1))
            .unwrap();
        assert_eq!(element.player().source().loops, 1);
    }

    #[test]
    fn test_unresolvable_source_yields_no_element() {
        let scratch = Scratch::new();
        let factory = scripted_factory(VideoSettings::default());
        assert!(factory
            .create(MediaSource::new(scratch.path("missing")))
            .is_none());
    }
}
