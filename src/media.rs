//! Media source description and playback position
//!
//! A `MediaSource` is created once at player construction and never mutated.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Immutable description of what to play
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaSource {
    /// Primary media path
    pub path: PathBuf,
    /// Alternate path probed before the primary
    pub alt_path: Option<PathBuf>,
    /// Completed playback cycles before stopping; `0` loops forever
    pub loops: u32,
    /// Target display/monitor index
    pub monitor: usize,
    /// Whether this source occupies the dedicated video slot of the layout
    pub dedicated: bool,
}

impl MediaSource {
    /// Create a source for a single path with default policy
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            alt_path: None,
            loops: 0,
            monitor: 0,
            dedicated: false,
        }
    }

    /// Set the alternate path
    pub fn with_alt_path(mut self, alt: impl Into<PathBuf>) -> Self {
        self.alt_path = Some(alt.into());
        self
    }

    /// Set the loop count (`0` = infinite)
    pub fn with_loops(mut self, loops: u32) -> Self {
        self.loops = loops;
        self
    }

    /// Set the target monitor
    pub fn with_monitor(mut self, monitor: usize) -> Self {
        self.monitor = monitor;
        self
    }

    /// Mark this source as the dedicated video slot
    pub fn dedicated(mut self) -> Self {
        self.dedicated = true;
        self
    }
}

/// Read-only snapshot of the playback clock
///
/// `Duration::ZERO` means "unknown", not "zero length": the pipeline cannot
/// report a duration until it has processed enough of the stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackPosition {
    pub current: Duration,
    pub duration: Duration,
}

impl PlaybackPosition {
    /// Whether the stream duration has been discovered yet
    pub fn duration_known(&self) -> bool {
        self.duration > Duration::ZERO
    }

    /// Progress in `[0.0, 1.0]`, or `0.0` while the duration is unknown
    pub fn progress(&self) -> f64 {
        if self.duration_known() {
            (self.current.as_secs_f64() / self.duration.as_secs_f64()).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}
