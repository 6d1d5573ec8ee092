// SPDX-License-Identifier: GPL-3.0-only

//! Synthetic camera driver
//!
//! Streams generated NV21 frames from a paced capture thread per open
//! device, the same way a platform driver delivers preview buffers. Used by
//! the `dualcam` CLI on machines without the kiosk sensors and by tests,
//! which can also inject open and release failures.
//!
//! Every frame starts with its little-endian `u64` frame number; the rest of
//! the luma plane is a flat gray level derived from it.

use super::frame_loop::{CaptureLoop, LoopAction};
use super::types::*;
use super::{CameraDevice, CameraDriver, PreviewCallback};
use crate::constants::{frame_interval, synthetic as timing};
use image::GrayImage;
use image::codecs::jpeg::JpegEncoder;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use tracing::{debug, warn};

/// Description of one synthetic sensor
#[derive(Debug, Clone)]
pub struct SyntheticCamera {
    pub info: CameraInfo,
    pub sizes: Vec<Resolution>,
    pub fps: u32,
}

impl SyntheticCamera {
    /// Front-facing color module as fitted to the kiosk
    pub fn rgb() -> Self {
        Self {
            info: CameraInfo {
                facing: CameraFacing::Front,
                sensor_orientation: 270,
            },
            sizes: vec![
                Resolution::new(640, 480),
                Resolution::new(1280, 720),
                Resolution::new(1920, 1080),
            ],
            fps: timing::DEFAULT_FPS,
        }
    }

    /// Front-facing infrared module as fitted to the kiosk
    pub fn ir() -> Self {
        Self {
            info: CameraInfo {
                facing: CameraFacing::Front,
                sensor_orientation: 270,
            },
            sizes: vec![Resolution::new(640, 480), Resolution::new(1280, 720)],
            fps: timing::DEFAULT_FPS,
        }
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    pub fn with_sizes(mut self, sizes: Vec<Resolution>) -> Self {
        self.sizes = sizes;
        self
    }
}

/// Per-camera call counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub opens: u32,
    pub releases: u32,
    pub preview_starts: u32,
    pub preview_stops: u32,
    pub callbacks_cleared: u32,
    pub stills: u32,
}

#[derive(Default)]
struct CameraState {
    live: u32,
    fail_open: bool,
    fail_release: bool,
    last_parameters: Option<PreviewParams>,
    stats: DeviceStats,
}

#[derive(Default)]
struct DriverState {
    cameras: HashMap<u32, CameraState>,
}

/// In-process [`CameraDriver`]
#[derive(Clone, Default)]
pub struct SyntheticDriver {
    cameras: HashMap<u32, SyntheticCamera>,
    state: Arc<Mutex<DriverState>>,
}

impl SyntheticDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a camera under a logical index
    pub fn with_camera(mut self, camera_id: u32, camera: SyntheticCamera) -> Self {
        self.cameras.insert(camera_id, camera);
        self
    }

    /// Kiosk layout: RGB module and IR module at the given indices
    pub fn kiosk(rgb_id: u32, ir_id: u32, fps: u32) -> Self {
        Self::new()
            .with_camera(rgb_id, SyntheticCamera::rgb().with_fps(fps))
            .with_camera(ir_id, SyntheticCamera::ir().with_fps(fps))
    }

    /// Make the next opens of a camera fail as if it were busy
    pub fn fail_open(&self, camera_id: u32, fail: bool) {
        self.camera_state(camera_id, |state| state.fail_open = fail);
    }

    /// Make releases of a camera report an error
    pub fn fail_release(&self, camera_id: u32, fail: bool) {
        self.camera_state(camera_id, |state| state.fail_release = fail);
    }

    pub fn stats(&self, camera_id: u32) -> DeviceStats {
        self.camera_state(camera_id, |state| state.stats)
    }

    /// Number of devices currently held open for a camera
    pub fn live_devices(&self, camera_id: u32) -> u32 {
        self.camera_state(camera_id, |state| state.live)
    }

    /// Parameters most recently applied to a camera
    pub fn last_parameters(&self, camera_id: u32) -> Option<PreviewParams> {
        self.camera_state(camera_id, |state| state.last_parameters)
    }

    fn camera_state<R>(&self, camera_id: u32, f: impl FnOnce(&mut CameraState) -> R) -> R {
        let mut state = lock(&self.state);
        f(state.cameras.entry(camera_id).or_default())
    }
}

impl CameraDriver for SyntheticDriver {
    fn camera_info(&self, camera_id: u32) -> BackendResult<CameraInfo> {
        self.cameras
            .get(&camera_id)
            .map(|camera| camera.info)
            .ok_or_else(|| BackendError::DeviceUnavailable(format!("no camera {}", camera_id)))
    }

    fn open(&self, camera_id: u32) -> BackendResult<Box<dyn CameraDevice>> {
        let camera = self
            .cameras
            .get(&camera_id)
            .ok_or_else(|| BackendError::DeviceUnavailable(format!("no camera {}", camera_id)))?;

        self.camera_state(camera_id, |state| {
            if state.fail_open {
                return Err(BackendError::DeviceUnavailable(format!(
                    "camera {} failed to connect",
                    camera_id
                )));
            }
            if state.live > 0 {
                return Err(BackendError::DeviceUnavailable(format!(
                    "camera {} is in use",
                    camera_id
                )));
            }
            state.live += 1;
            state.stats.opens += 1;
            Ok(())
        })?;

        debug!(camera_id, "Synthetic camera opened");
        Ok(Box::new(SyntheticDevice {
            camera_id,
            camera: camera.clone(),
            driver: Arc::clone(&self.state),
            params: None,
            callback: Arc::new(Mutex::new(None)),
            surface: None,
            capture: None,
            frame_number: Arc::new(AtomicU64::new(0)),
        }))
    }
}

struct SyntheticDevice {
    camera_id: u32,
    camera: SyntheticCamera,
    driver: Arc<Mutex<DriverState>>,
    params: Option<PreviewParams>,
    /// Read by the capture thread for every frame
    callback: Arc<Mutex<Option<PreviewCallback>>>,
    surface: Option<SurfaceId>,
    capture: Option<CaptureLoop>,
    frame_number: Arc<AtomicU64>,
}

impl SyntheticDevice {
    fn with_state<R>(&self, f: impl FnOnce(&mut CameraState) -> R) -> R {
        let mut state = lock(&self.driver);
        f(state.cameras.entry(self.camera_id).or_default())
    }

    fn preview_size(&self) -> Resolution {
        self.params
            .map(|p| p.size)
            .unwrap_or_else(|| self.default_preview_size())
    }

    fn spawn_capture(&mut self) -> BackendResult<()> {
        let size = self.preview_size();
        let callback = Arc::clone(&self.callback);
        let frame_number = Arc::clone(&self.frame_number);

        let capture = CaptureLoop::start(
            &format!("synthetic-cam-{}", self.camera_id),
            frame_interval(self.camera.fps),
            move || {
                let Some(callback) = lock(&callback).clone() else {
                    return LoopAction::Continue;
                };
                // Exhausted ring: drop the frame, the listener is still busy
                let Some(mut buffer) = callback.pool.acquire() else {
                    return LoopAction::Continue;
                };
                let number = frame_number.fetch_add(1, Ordering::Relaxed);
                fill_frame(&mut buffer, number);
                (callback.sink)(buffer, size);
                LoopAction::Continue
            },
        )?;
        self.capture = Some(capture);
        Ok(())
    }

    fn halt_capture(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
    }
}

impl CameraDevice for SyntheticDevice {
    fn supported_preview_sizes(&self) -> Vec<Resolution> {
        self.camera.sizes.clone()
    }

    fn default_preview_size(&self) -> Resolution {
        self.camera
            .sizes
            .first()
            .copied()
            .unwrap_or(Resolution::new(640, 480))
    }

    fn set_parameters(&mut self, params: &PreviewParams) -> BackendResult<()> {
        if !self.camera.sizes.is_empty() && !self.camera.sizes.contains(&params.size) {
            return Err(BackendError::Configuration(format!(
                "unsupported preview size {}",
                params.size
            )));
        }
        if params.display_orientation % 90 != 0 || params.display_orientation >= 360 {
            return Err(BackendError::Configuration(format!(
                "invalid display orientation {}",
                params.display_orientation
            )));
        }
        self.params = Some(*params);
        self.with_state(|state| state.last_parameters = Some(*params));
        Ok(())
    }

    fn set_preview_callback(&mut self, callback: Option<PreviewCallback>) -> BackendResult<()> {
        if callback.is_none() {
            self.with_state(|state| state.stats.callbacks_cleared += 1);
        }
        *lock(&self.callback) = callback;
        Ok(())
    }

    fn attach_surface(&mut self, surface: &PreviewSurface) -> BackendResult<()> {
        self.surface = Some(surface.id);
        Ok(())
    }

    fn start_preview(&mut self) -> BackendResult<()> {
        if self.capture.is_some() {
            return Ok(());
        }
        if self.surface.is_none() {
            return Err(BackendError::Configuration(
                "no preview surface attached".to_string(),
            ));
        }
        self.spawn_capture()?;
        self.with_state(|state| state.stats.preview_starts += 1);
        Ok(())
    }

    fn stop_preview(&mut self) -> BackendResult<()> {
        self.halt_capture();
        self.with_state(|state| state.stats.preview_stops += 1);
        Ok(())
    }

    fn take_picture(&mut self, callback: StillCallback) -> BackendResult<()> {
        if self.capture.is_none() {
            return Err(BackendError::CaptureFailed(
                "preview is not running".to_string(),
            ));
        }
        // Like the hardware, still capture takes over the sensor
        self.halt_capture();
        self.with_state(|state| state.stats.stills += 1);

        let size = self.preview_size();
        let seed = self.frame_number.load(Ordering::Relaxed);
        let camera_id = self.camera_id;
        thread::Builder::new()
            .name(format!("synthetic-still-{}", camera_id))
            .spawn(move || {
                thread::sleep(timing::STILL_CAPTURE_DELAY);
                match encode_still(size, seed) {
                    Ok(jpeg) => callback(jpeg),
                    Err(e) => warn!(camera_id, error = %e, "Synthetic still encoding failed"),
                }
            })
            .map_err(|e| BackendError::CaptureFailed(e.to_string()))?;
        Ok(())
    }

    fn release(&mut self) -> BackendResult<()> {
        self.halt_capture();
        let fail = self.with_state(|state| {
            state.stats.releases += 1;
            state.fail_release
        });
        if fail {
            return Err(BackendError::ReleaseFailed(format!(
                "camera {} did not acknowledge release",
                self.camera_id
            )));
        }
        Ok(())
    }
}

impl Drop for SyntheticDevice {
    fn drop(&mut self) {
        self.halt_capture();
        self.with_state(|state| state.live = state.live.saturating_sub(1));
    }
}

/// Write the frame number header and a flat luma level
fn fill_frame(buffer: &mut [u8], number: u64) {
    let header = number.to_le_bytes();
    let split = header.len().min(buffer.len());
    buffer[split..].fill((number % 256) as u8);
    buffer[..split].copy_from_slice(&header[..split]);
}

/// Read the frame number a synthetic frame was stamped with
pub fn frame_number(data: &[u8]) -> Option<u64> {
    let header: [u8; 8] = data.get(..8)?.try_into().ok()?;
    Some(u64::from_le_bytes(header))
}

/// Gradient still encoded as JPEG
fn encode_still(size: Resolution, seed: u64) -> image::ImageResult<Vec<u8>> {
    let offset = (seed % 256) as u32;
    let image = GrayImage::from_fn(size.width.max(1), size.height.max(1), |x, y| {
        image::Luma([((x + y + offset) % 256) as u8])
    });
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, timing::JPEG_QUALITY).encode_image(&image)?;
    Ok(jpeg)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
