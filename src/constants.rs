// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use crate::backends::camera::types::SurfaceId;
use std::time::Duration;

/// Logical camera index of the visible light sensor
pub const DEFAULT_RGB_CAMERA_ID: u32 = 0;

/// Logical camera index of the infrared sensor
pub const DEFAULT_IR_CAMERA_ID: u32 = 1;

/// Maximum difference between candidate and display aspect ratios for a
/// preview size to count as a ratio match
pub const ASPECT_TOLERANCE: f64 = 0.1;

/// Smallest number of reusable callback buffers a provider allocates
///
/// With fewer than three buffers the driver stalls whenever one buffer is in
/// the listener and another is being filled.
pub const MIN_CALLBACK_BUFFERS: usize = 3;

/// Surface id used for the IR camera's offscreen preview target
pub const IR_OFFSCREEN_SURFACE_ID: SurfaceId = 10;

/// Timing for the synthetic camera driver
pub mod synthetic {
    use super::Duration;

    /// Default frame rate of synthetic cameras
    pub const DEFAULT_FPS: u32 = 30;

    /// Upper bound on synthetic frame rate
    pub const MAX_FPS: u32 = 240;

    /// Delay before a synthetic still capture completes
    pub const STILL_CAPTURE_DELAY: Duration = Duration::from_millis(20);

    /// JPEG quality of synthetic stills
    pub const JPEG_QUALITY: u8 = 85;
}

/// Interval between stats lines printed by `dualcam run`
pub const STATS_INTERVAL: Duration = Duration::from_secs(1);

/// Frame interval for a given rate, clamped to a sane range
pub fn frame_interval(fps: u32) -> Duration {
    let fps = fps.clamp(1, synthetic::MAX_FPS);
    Duration::from_micros(1_000_000 / fps as u64)
}
