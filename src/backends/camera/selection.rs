// SPDX-License-Identifier: GPL-3.0-only

//! Preview size and orientation selection

use super::types::{CameraFacing, CameraInfo, DisplayRotation, Resolution};
use crate::constants::ASPECT_TOLERANCE;

/// Pick the supported preview size that best matches the display
///
/// Sizes whose aspect ratio is within [`ASPECT_TOLERANCE`] of the display's
/// are ranked by how close their height is to the display height. If no
/// size matches the ratio, the closest height over all sizes wins. Ties keep
/// the size listed first.
pub fn best_preview_size(sizes: &[Resolution], display: Resolution) -> Option<Resolution> {
    let target_ratio = display.aspect_ratio();
    let height_diff = |size: &Resolution| size.height.abs_diff(display.height);

    let mut best: Option<Resolution> = None;
    for size in sizes {
        if (size.aspect_ratio() - target_ratio).abs() > ASPECT_TOLERANCE {
            continue;
        }
        if best.is_none_or(|b| height_diff(size) < height_diff(&b)) {
            best = Some(*size);
        }
    }

    best.or_else(|| {
        sizes.iter().copied().reduce(|best, size| {
            if height_diff(&size) < height_diff(&best) {
                size
            } else {
                best
            }
        })
    })
}

/// Clockwise rotation to apply to the preview so it appears upright
///
/// Front cameras are mirrored by the driver, so the rotation is inverted
/// to compensate.
pub fn display_orientation(info: &CameraInfo, rotation: DisplayRotation) -> u32 {
    let sensor = info.sensor_orientation % 360;
    let degrees = rotation.degrees();
    match info.facing {
        CameraFacing::Front => (360 - (sensor + degrees) % 360) % 360,
        CameraFacing::Back => (sensor + 360 - degrees) % 360,
    }
}
