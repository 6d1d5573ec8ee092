// SPDX-License-Identifier: GPL-3.0-only
// Shared types for camera backend abstraction

//! Shared types for camera sources and drivers

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which of the two sensors a frame came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    /// Visible light camera
    Rgb,
    /// Infrared camera
    Ir,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Rgb => write!(f, "RGB"),
            StreamKind::Ir => write!(f, "IR"),
        }
    }
}

/// Width and height in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width divided by height, as used for aspect matching
    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            return 0.0;
        }
        self.width as f64 / self.height as f64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Direction the camera faces relative to the screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CameraFacing {
    /// Facing the user (selfie side)
    #[default]
    Front,
    /// Facing away from the user
    Back,
}

/// Rotation of the display panel relative to its natural orientation
///
/// Only quarter turns are reported by display services, anything else
/// is treated as no rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DisplayRotation {
    #[default]
    Rotation0,
    Rotation90,
    Rotation180,
    Rotation270,
}

impl DisplayRotation {
    /// Create rotation from an integer degree value (normalised to 0-360).
    pub fn from_degrees(degrees: i32) -> Self {
        match degrees.rem_euclid(360) {
            90 => DisplayRotation::Rotation90,
            180 => DisplayRotation::Rotation180,
            270 => DisplayRotation::Rotation270,
            _ => DisplayRotation::Rotation0,
        }
    }

    /// Get the rotation in degrees
    pub fn degrees(&self) -> u32 {
        match self {
            DisplayRotation::Rotation0 => 0,
            DisplayRotation::Rotation90 => 90,
            DisplayRotation::Rotation180 => 180,
            DisplayRotation::Rotation270 => 270,
        }
    }
}

impl std::fmt::Display for DisplayRotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// Static information about a camera, available without opening it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraInfo {
    pub facing: CameraFacing,
    /// Clockwise angle the sensor image must be rotated to appear upright
    /// on the display in its natural orientation (0, 90, 180 or 270)
    pub sensor_orientation: u32,
}

/// Geometry and rotation of the physical display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DisplayInfo {
    pub size: Resolution,
    pub rotation: DisplayRotation,
}

/// Opaque identifier of a surface a preview can be attached to
pub type SurfaceId = u64;

/// Target a camera preview is rendered into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewSurface {
    pub id: SurfaceId,
    /// Display the surface lives on
    pub display: DisplayInfo,
}

impl PreviewSurface {
    pub fn new(id: SurfaceId, display: DisplayInfo) -> Self {
        Self { id, display }
    }
}

/// Pixel format requested from the camera
///
/// Providers always stream NV21, the one format every supported sensor
/// module delivers natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PreviewFormat {
    /// NV21 - Semi-planar 4:2:0 (Y plane + interleaved VU plane)
    #[default]
    Nv21,
}

impl PreviewFormat {
    pub fn bits_per_pixel(&self) -> u32 {
        match self {
            PreviewFormat::Nv21 => 12,
        }
    }

    /// Size of one frame buffer in bytes
    pub fn frame_size(&self, size: Resolution) -> usize {
        size.width as usize * size.height as usize * self.bits_per_pixel() as usize / 8
    }
}

/// Parameters applied to a device before streaming
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewParams {
    pub format: PreviewFormat,
    pub size: Resolution,
    /// Clockwise rotation applied to the preview output, in degrees
    pub display_orientation: u32,
}

/// A single frame from one camera
///
/// The pixel data is copied out of the driver's reusable buffer before the
/// frame is built, so a `Frame` never aliases memory the producer writes to.
#[derive(Clone)]
pub struct Frame {
    data: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub fn new(data: impl Into<Arc<[u8]>>, width: u32, height: u32) -> Self {
        Self {
            data: data.into(),
            width,
            height,
        }
    }

    /// Copy a borrowed driver buffer into an owned frame
    pub fn copy_from(data: &[u8], size: Resolution) -> Self {
        Self::new(Arc::<[u8]>::from(data), size.width, size.height)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Check whether two frames share the same underlying buffer
    pub fn same_buffer(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Frame({}x{}, {} bytes)",
            self.width,
            self.height,
            self.data.len()
        )
    }
}

/// Callback receiving a preview buffer and its resolution
///
/// The buffer is only valid for the duration of the call.
pub type FrameListener = Arc<dyn Fn(&[u8], Resolution) + Send + Sync>;

/// Callback receiving an encoded still image
pub type StillCallback = Box<dyn FnOnce(Vec<u8>) + Send>;

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Error types for backend operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Camera could not be opened (busy, missing, or rejected configuration)
    DeviceUnavailable(String),
    /// Device rejected a parameter change
    Configuration(String),
    /// Operation needs an open, streaming device
    NotStreaming,
    /// Preview is not attached to a running pipeline
    Detached,
    /// Still capture failed
    CaptureFailed(String),
    /// A release step on the device failed
    ReleaseFailed(String),
    /// Other errors
    Other(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::DeviceUnavailable(msg) => write!(f, "Device unavailable: {}", msg),
            BackendError::Configuration(msg) => write!(f, "Configuration rejected: {}", msg),
            BackendError::NotStreaming => write!(f, "Camera is not streaming"),
            BackendError::Detached => write!(f, "Preview is detached"),
            BackendError::CaptureFailed(msg) => write!(f, "Still capture failed: {}", msg),
            BackendError::ReleaseFailed(msg) => write!(f, "Release failed: {}", msg),
            BackendError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}
