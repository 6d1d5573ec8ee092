// SPDX-License-Identifier: MPL-2.0

//! Frame processors
//!
//! A processor receives every pair the consumption loop picks up. It runs on
//! the pipeline's background task and may take as long as it needs: while
//! it runs, pairing is paused and the cameras keep overwriting their pending
//! frames, so a slow processor lowers the processed rate instead of building
//! a backlog.

use super::frame_flow::DualFrame;
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex};
use tracing::{trace, warn};

/// Error reported by a processor for one pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessError(pub String);

impl std::fmt::Display for ProcessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Frame processing failed: {}", self.0)
    }
}

impl std::error::Error for ProcessError {}

impl From<String> for ProcessError {
    fn from(msg: String) -> Self {
        ProcessError(msg)
    }
}

impl From<&str> for ProcessError {
    fn from(msg: &str) -> Self {
        ProcessError(msg.to_string())
    }
}

/// Consumer of paired frames
pub trait FrameProcessor: Send + Sync {
    /// Process one pair
    ///
    /// An error is logged and the loop moves on to the next pair.
    fn process(&self, frame: Arc<DualFrame>) -> BoxFuture<'_, Result<(), ProcessError>>;
}

/// Mean luma of both frames of a pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LumaReading {
    pub sequence: u64,
    pub rgb: f32,
    pub ir: f32,
}

/// Measures average brightness of the Y plane of each stream
///
/// Useful as an exposure sanity check on the kiosk: an IR reading near zero
/// means the illuminator is off.
pub struct LumaMeter {
    /// Only every `stride`-th luma sample is read
    stride: usize,
    last: Mutex<Option<LumaReading>>,
}

impl Default for LumaMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl LumaMeter {
    pub fn new() -> Self {
        Self::with_stride(16)
    }

    pub fn with_stride(stride: usize) -> Self {
        Self {
            stride: stride.max(1),
            last: Mutex::new(None),
        }
    }

    /// Most recent reading
    pub fn last_reading(&self) -> Option<LumaReading> {
        *self.last.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl FrameProcessor for LumaMeter {
    fn process(&self, frame: Arc<DualFrame>) -> BoxFuture<'_, Result<(), ProcessError>> {
        Box::pin(async move {
            let stride = self.stride;
            // Pixel work off the async runtime
            let reading = tokio::task::spawn_blocking(move || LumaReading {
                sequence: frame.sequence,
                rgb: mean_luma(frame.rgb.data(), frame.rgb.width, frame.rgb.height, stride),
                ir: mean_luma(frame.ir.data(), frame.ir.width, frame.ir.height, stride),
            })
            .await
            .map_err(|e| {
                warn!(error = %e, "Luma task panicked");
                ProcessError(e.to_string())
            })?;

            trace!(
                sequence = reading.sequence,
                rgb = reading.rgb,
                ir = reading.ir,
                "Luma measured"
            );
            *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some(reading);
            Ok(())
        })
    }
}

/// Average of the Y plane of a 4:2:0 frame, sampling every `stride` pixels
fn mean_luma(data: &[u8], width: u32, height: u32, stride: usize) -> f32 {
    let luma_len = (width as usize * height as usize).min(data.len());
    let samples = data[..luma_len].iter().step_by(stride);
    let (sum, count) = samples.fold((0u64, 0u64), |(sum, count), &y| (sum + y as u64, count + 1));
    if count == 0 {
        return 0.0;
    }
    sum as f32 / count as f32
}
