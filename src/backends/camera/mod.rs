// SPDX-License-Identifier: MPL-2.0

//! Camera source abstraction
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │     DualPreview     │  ← Surface lifecycle, frame pairing
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │  CameraSource Trait │  ← open / stop / listener / still capture
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │   CameraProvider    │  ← Size + orientation selection, buffer ring
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │ CameraDriver Trait  │  ← Platform camera service
//! └──────────┬──────────┘
//!            │
//!            ▼
//!       ┌─────────┐
//!       │Synthetic│  ← In-process driver for demos and tests
//!       └─────────┘
//! ```

pub mod buffer_pool;
pub mod frame_loop;
pub mod provider;
pub mod selection;
pub mod synthetic;
pub mod types;

pub use buffer_pool::BufferPool;
pub use provider::CameraProvider;
pub use synthetic::{SyntheticCamera, SyntheticDriver};
pub use types::*;

use std::sync::Arc;

/// A camera whose preview frames can be streamed to a listener
///
/// Each source owns at most one open device and at most one listener.
pub trait CameraSource: Send {
    /// Logical camera index this source opens
    fn camera_id(&self) -> u32;

    /// Open the camera, configure it for the surface's display and start
    /// streaming
    ///
    /// Any device already open on this source is released first. On failure
    /// the source is stopped and left closed; the caller decides whether to
    /// retry.
    fn open(&mut self, surface: &PreviewSurface) -> BackendResult<()>;

    /// Stop streaming, release the device and drop the listener
    ///
    /// Calling this on a stopped source does nothing.
    fn stop(&mut self);

    /// Replace the frame listener
    fn set_listener(&mut self, listener: FrameListener);

    /// Preview size selected by the last successful `open`
    fn preview_size(&self) -> Option<Resolution>;

    /// Capture one encoded still image, resuming preview afterwards
    fn take_still(&mut self, callback: StillCallback) -> BackendResult<()>;

    /// Check if a device is currently open
    fn is_open(&self) -> bool;
}

/// Platform camera service
pub trait CameraDriver: Send + Sync {
    /// Static information about a camera
    fn camera_info(&self, camera_id: u32) -> BackendResult<CameraInfo>;

    /// Acquire exclusive access to a camera
    fn open(&self, camera_id: u32) -> BackendResult<Box<dyn CameraDevice>>;
}

/// Callback a device invokes with each filled preview buffer
///
/// The buffer was taken from the callback's pool; the receiver is
/// responsible for returning it.
pub type BufferSink = Arc<dyn Fn(Vec<u8>, Resolution) + Send + Sync>;

/// Buffer ring plus the sink that consumes filled buffers
#[derive(Clone)]
pub struct PreviewCallback {
    pub pool: Arc<BufferPool>,
    pub sink: BufferSink,
}

/// An open camera
///
/// Preview buffers are delivered on a thread owned by the device. Still
/// capture callbacks are also invoked from a device thread, never from
/// inside `take_picture` itself.
pub trait CameraDevice: Send {
    /// Preview sizes the sensor can stream
    fn supported_preview_sizes(&self) -> Vec<Resolution>;

    /// Preview size the device uses when none was configured
    fn default_preview_size(&self) -> Resolution;

    /// Apply format, size and output rotation
    fn set_parameters(&mut self, params: &PreviewParams) -> BackendResult<()>;

    /// Install or clear the preview buffer callback
    fn set_preview_callback(&mut self, callback: Option<PreviewCallback>) -> BackendResult<()>;

    /// Route the preview to a surface
    fn attach_surface(&mut self, surface: &PreviewSurface) -> BackendResult<()>;

    fn start_preview(&mut self) -> BackendResult<()>;

    fn stop_preview(&mut self) -> BackendResult<()>;

    /// Capture one JPEG still; preview stays stopped until restarted
    fn take_picture(&mut self, callback: StillCallback) -> BackendResult<()>;

    /// Give the camera back to the platform
    fn release(&mut self) -> BackendResult<()>;
}
