// SPDX-License-Identifier: MPL-2.0

//! Dual camera pipeline for RGB + IR kiosk hardware
//!
//! Streams a visible light camera and an infrared camera side by side,
//! pairs their newest frames and hands each pair to a frame processor
//! without ever queueing a backlog.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Camera source abstraction, drivers and buffer handling
//! - [`pipeline`]: Frame pairing, consumption loop and preview lifecycle
//! - [`config`]: User configuration handling
//! - [`constants`]: Tunables shared across modules
//! - [`errors`]: Error types for the command line front end
//!
//! # Example
//!
//! ```no_run
//! use dualcam::backends::camera::{DisplayInfo, PreviewSurface, Resolution, SyntheticDriver};
//! use dualcam::pipeline::{DualPreview, FrameProcessor, LumaMeter};
//! use dualcam::Config;
//! use std::sync::Arc;
//!
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! let config = Config::default();
//! let driver = Arc::new(SyntheticDriver::kiosk(0, 1, 30));
//! let preview = DualPreview::from_config(driver, &config);
//!
//! let meter: Arc<dyn FrameProcessor> = Arc::new(LumaMeter::new());
//! preview.set_frame_processor(&meter);
//! preview.attach(runtime.handle());
//!
//! let display = DisplayInfo { size: Resolution::new(1080, 1920), ..Default::default() };
//! preview.on_surface_available(PreviewSurface::new(1, display), 1080, 1920).unwrap();
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod pipeline;

// Re-export commonly used types
pub use backends::camera::{BackendError, CameraSource, Frame, Resolution, StreamKind};
pub use config::Config;
pub use errors::{AppError, AppResult};
pub use pipeline::{DualFrame, DualPreview, FrameFlow, FrameProcessor};
