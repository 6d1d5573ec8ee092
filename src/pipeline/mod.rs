// SPDX-License-Identifier: GPL-3.0-only

//! Frame pairing and preview pipeline
//!
//! - [`frame_flow`]: latest-wins RGB/IR pairing
//! - [`consumer`]: background loop feeding pairs to a processor
//! - [`preview`]: surface lifecycle and camera orchestration
//! - [`transform`]: display transform for the RGB preview

pub mod consumer;
pub mod frame_flow;
pub mod preview;
pub mod processor;
pub mod transform;

pub use consumer::{ConsumerLoop, PipelineStats, ProcessorSlot};
pub use frame_flow::{DualFrame, FrameFlow, PairReceiver, Pending};
pub use preview::{DualPreview, PreviewConfig, PreviewState};
pub use processor::{FrameProcessor, LumaMeter, LumaReading, ProcessError};
pub use transform::{Matrix, PreviewTransform, Rect, configure_transform};
