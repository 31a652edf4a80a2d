//! Process-wide playback policy
//!
//! An explicit configuration struct passed at construction time. One switch
//! disables all pipeline construction (e.g. on unsupported hardware) without
//! touching call sites. Affects subsequent construction only, never
//! already-playing instances.

use serde::{Deserialize, Serialize};

/// Global playback policy consumed by [`crate::VideoFactory`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoSettings {
    /// When false, all pipeline construction is suppressed system-wide.
    pub enabled: bool,
    /// Loop count applied when a source does not specify its own.
    /// `0` means loop forever.
    pub default_loops: u32,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_loops: 0,
        }
    }
}
