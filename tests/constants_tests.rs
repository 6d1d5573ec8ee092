// SPDX-License-Identifier: MPL-2.0

//! Integration tests for constants module

use dualcam::backends::camera::{PreviewFormat, Resolution};
use dualcam::constants::{
    ASPECT_TOLERANCE, DEFAULT_IR_CAMERA_ID, DEFAULT_RGB_CAMERA_ID, IR_OFFSCREEN_SURFACE_ID,
    MIN_CALLBACK_BUFFERS, frame_interval, synthetic,
};
use std::time::Duration;

#[test]
fn test_default_camera_ids_differ() {
    assert_ne!(DEFAULT_RGB_CAMERA_ID, DEFAULT_IR_CAMERA_ID);
}

#[test]
fn test_buffer_floor() {
    // One buffer in the listener, one being filled, one spare
    assert!(MIN_CALLBACK_BUFFERS >= 3);
}

#[test]
fn test_aspect_tolerance_separates_common_ratios() {
    // 4:3 and 16:9 must not be confused with each other
    let four_three = 4.0 / 3.0;
    let sixteen_nine = 16.0 / 9.0;
    assert!((sixteen_nine - four_three) > ASPECT_TOLERANCE);
    assert!(ASPECT_TOLERANCE > 0.0);
}

#[test]
fn test_nv21_is_twelve_bits() {
    assert_eq!(PreviewFormat::Nv21.bits_per_pixel(), 12);
    assert_eq!(
        PreviewFormat::Nv21.frame_size(Resolution::new(1280, 720)),
        1280 * 720 * 3 / 2
    );
}

#[test]
fn test_ir_surface_is_not_preview_surface() {
    // The CLI renders the RGB preview on surface 1
    assert_ne!(IR_OFFSCREEN_SURFACE_ID, 1);
}

#[test]
fn test_frame_interval_clamped() {
    assert_eq!(frame_interval(30), Duration::from_micros(33_333));
    assert_eq!(frame_interval(0), Duration::from_secs(1));
    assert_eq!(frame_interval(10_000), frame_interval(synthetic::MAX_FPS));
}
