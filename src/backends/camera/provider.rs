// SPDX-License-Identifier: GPL-3.0-only

//! Driver-backed camera source
//!
//! The provider owns one device at a time. Opening picks the preview size
//! closest to the display, corrects the output rotation for the current
//! display rotation, and streams NV21 frames through a small ring of
//! reusable buffers to the registered listener.

use super::buffer_pool::BufferPool;
use super::selection::{best_preview_size, display_orientation};
use super::types::*;
use super::{BufferSink, CameraDevice, CameraDriver, CameraSource, PreviewCallback};
use crate::constants::MIN_CALLBACK_BUFFERS;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{debug, info, trace, warn};

type DeviceSlot = Arc<Mutex<Option<Box<dyn CameraDevice>>>>;
type ListenerSlot = Arc<RwLock<Option<FrameListener>>>;

/// Camera source backed by a [`CameraDriver`]
pub struct CameraProvider {
    driver: Arc<dyn CameraDriver>,
    camera_id: u32,
    format: PreviewFormat,
    buffer_count: usize,
    /// Shared with still-capture completions, which restart the preview
    device: DeviceSlot,
    /// Shared with the preview callback running on the device thread
    listener: ListenerSlot,
    size: Option<Resolution>,
    pool: Option<Arc<BufferPool>>,
}

impl CameraProvider {
    /// Create a provider for one logical camera
    pub fn new(driver: Arc<dyn CameraDriver>, camera_id: u32) -> Self {
        Self {
            driver,
            camera_id,
            format: PreviewFormat::Nv21,
            buffer_count: MIN_CALLBACK_BUFFERS,
            device: Arc::new(Mutex::new(None)),
            listener: Arc::new(RwLock::new(None)),
            size: None,
            pool: None,
        }
    }

    /// Use more callback buffers than the default
    ///
    /// Counts below the minimum are raised to it.
    pub fn with_buffer_count(mut self, count: usize) -> Self {
        self.buffer_count = count.max(MIN_CALLBACK_BUFFERS);
        self
    }

    /// Frames dropped because every callback buffer was in use
    pub fn dropped_frames(&self) -> u64 {
        self.pool.as_ref().map_or(0, |pool| pool.exhausted_count())
    }

    pub fn has_listener(&self) -> bool {
        read_listener(&self.listener).is_some()
    }

    fn open_device(&mut self, surface: &PreviewSurface) -> BackendResult<()> {
        let info = self.driver.camera_info(self.camera_id)?;
        let device = self.driver.open(self.camera_id)?;
        // Stored before configuring so a failure below releases it in stop()
        let mut slot = lock_device(&self.device);
        let device = slot.insert(device);

        let size = best_preview_size(&device.supported_preview_sizes(), surface.display.size)
            .unwrap_or_else(|| device.default_preview_size());
        let orientation = display_orientation(&info, surface.display.rotation);
        debug!(
            camera_id = self.camera_id,
            size = %size,
            orientation,
            facing = ?info.facing,
            "Configuring camera"
        );

        device.set_parameters(&PreviewParams {
            format: self.format,
            size,
            display_orientation: orientation,
        })?;

        let pool = Arc::new(BufferPool::new(
            self.buffer_count,
            self.format.frame_size(size),
        ));
        device.set_preview_callback(Some(PreviewCallback {
            pool: Arc::clone(&pool),
            sink: self.buffer_sink(Arc::clone(&pool)),
        }))?;
        device.attach_surface(surface)?;
        device.start_preview()?;

        self.size = Some(size);
        self.pool = Some(pool);
        Ok(())
    }

    /// Sink handing each buffer to the current listener, then back to the ring
    fn buffer_sink(&self, pool: Arc<BufferPool>) -> BufferSink {
        let listener = Arc::clone(&self.listener);
        let camera_id = self.camera_id;
        Arc::new(move |buffer: Vec<u8>, size: Resolution| {
            let current = read_listener(&listener).clone();
            match current {
                Some(listener) => listener(&buffer, size),
                None => trace!(camera_id, "Frame without listener"),
            }
            pool.release(buffer);
        })
    }

    /// Stop and release the device, keeping the listener
    ///
    /// Every step runs even if an earlier one fails.
    fn release_device(&mut self) {
        let device = lock_device(&self.device).take();
        self.size = None;
        self.pool = None;

        let Some(mut device) = device else {
            return;
        };

        if let Err(e) = device.set_preview_callback(None) {
            warn!(camera_id = self.camera_id, error = %e, "Failed to clear preview callback");
        }
        if let Err(e) = device.stop_preview() {
            warn!(camera_id = self.camera_id, error = %e, "Failed to stop preview");
        }
        if let Err(e) = device.release() {
            warn!(camera_id = self.camera_id, error = %e, "Failed to release camera");
        }
        debug!(camera_id = self.camera_id, "Camera released");
    }
}

impl CameraSource for CameraProvider {
    fn camera_id(&self) -> u32 {
        self.camera_id
    }

    fn open(&mut self, surface: &PreviewSurface) -> BackendResult<()> {
        info!(camera_id = self.camera_id, surface = surface.id, "Opening camera");

        if self.is_open() {
            self.release_device();
        }

        match self.open_device(surface) {
            Ok(()) => {
                info!(
                    camera_id = self.camera_id,
                    size = ?self.size,
                    "Camera streaming"
                );
                Ok(())
            }
            Err(e) => {
                warn!(camera_id = self.camera_id, error = %e, "Failed to open camera");
                self.stop();
                Err(match e {
                    BackendError::DeviceUnavailable(_) => e,
                    other => BackendError::DeviceUnavailable(format!(
                        "camera {}: {}",
                        self.camera_id, other
                    )),
                })
            }
        }
    }

    fn stop(&mut self) {
        if self.is_open() {
            info!(camera_id = self.camera_id, "Stopping camera");
        }
        self.release_device();
        *write_listener(&self.listener) = None;
    }

    fn set_listener(&mut self, listener: FrameListener) {
        *write_listener(&self.listener) = Some(listener);
    }

    fn preview_size(&self) -> Option<Resolution> {
        self.size
    }

    fn take_still(&mut self, callback: StillCallback) -> BackendResult<()> {
        let mut slot = lock_device(&self.device);
        let device = slot.as_mut().ok_or(BackendError::NotStreaming)?;

        let resume = Arc::downgrade(&self.device);
        let camera_id = self.camera_id;
        device.take_picture(Box::new(move |jpeg: Vec<u8>| {
            debug!(camera_id, bytes = jpeg.len(), "Still captured");
            callback(jpeg);

            // The provider may have been stopped or dropped while capturing
            let Some(device) = resume.upgrade() else {
                return;
            };
            if let Some(device) = lock_device(&device).as_mut()
                && let Err(e) = device.start_preview()
            {
                warn!(camera_id, error = %e, "Failed to resume preview after still capture");
            }
        }))
    }

    fn is_open(&self) -> bool {
        lock_device(&self.device).is_some()
    }
}

impl Drop for CameraProvider {
    fn drop(&mut self) {
        self.release_device();
    }
}

impl std::fmt::Debug for CameraProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraProvider")
            .field("camera_id", &self.camera_id)
            .field("format", &self.format)
            .field("size", &self.size)
            .field("open", &self.is_open())
            .finish()
    }
}

fn lock_device(slot: &DeviceSlot) -> MutexGuard<'_, Option<Box<dyn CameraDevice>>> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

fn read_listener(slot: &ListenerSlot) -> std::sync::RwLockReadGuard<'_, Option<FrameListener>> {
    slot.read().unwrap_or_else(|e| e.into_inner())
}

fn write_listener(slot: &ListenerSlot) -> std::sync::RwLockWriteGuard<'_, Option<FrameListener>> {
    slot.write().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::synthetic::{SyntheticCamera, SyntheticDriver};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    fn surface(width: u32, height: u32) -> PreviewSurface {
        PreviewSurface::new(
            1,
            DisplayInfo {
                size: Resolution::new(width, height),
                rotation: DisplayRotation::Rotation0,
            },
        )
    }

    fn driver() -> Arc<SyntheticDriver> {
        Arc::new(
            SyntheticDriver::new()
                .with_camera(0, SyntheticCamera::rgb().with_fps(200))
                .with_camera(1, SyntheticCamera::ir().with_fps(200)),
        )
    }

    #[test]
    fn test_open_selects_size_and_streams() {
        let driver = driver();
        let mut provider = CameraProvider::new(driver.clone(), 0);

        let (tx, rx) = mpsc::channel();
        provider.set_listener(Arc::new(move |data: &[u8], size: Resolution| {
            let _ = tx.send((data.len(), size));
        }));
        provider.open(&surface(1280, 720)).unwrap();

        assert_eq!(provider.preview_size(), Some(Resolution::new(1280, 720)));
        let (len, size) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(size, Resolution::new(1280, 720));
        assert_eq!(len, PreviewFormat::Nv21.frame_size(size));

        let params = driver.last_parameters(0).unwrap();
        assert_eq!(params.format, PreviewFormat::Nv21);
        // Front RGB sensor mounted at 270 degrees, display unrotated
        assert_eq!(params.display_orientation, 90);
        provider.stop();
    }

    #[test]
    fn test_stop_twice_is_noop() {
        let driver = driver();
        let mut provider = CameraProvider::new(driver.clone(), 0);
        provider.open(&surface(640, 480)).unwrap();

        provider.stop();
        provider.stop();

        assert!(!provider.is_open());
        assert!(!provider.has_listener());
        assert_eq!(driver.stats(0).releases, 1);
        assert_eq!(driver.live_devices(0), 0);
    }

    #[test]
    fn test_stop_never_opened() {
        let driver = driver();
        let mut provider = CameraProvider::new(driver.clone(), 1);
        provider.stop();
        assert_eq!(driver.stats(1).releases, 0);
    }

    #[test]
    fn test_reopen_releases_previous_device() {
        let driver = driver();
        let mut provider = CameraProvider::new(driver.clone(), 0);
        provider.open(&surface(640, 480)).unwrap();
        provider.open(&surface(1920, 1080)).unwrap();

        assert_eq!(driver.stats(0).opens, 2);
        assert_eq!(driver.stats(0).releases, 1);
        assert_eq!(driver.live_devices(0), 1);
        assert_eq!(provider.preview_size(), Some(Resolution::new(1920, 1080)));
    }

    #[test]
    fn test_reopen_keeps_listener() {
        let driver = driver();
        let mut provider = CameraProvider::new(driver.clone(), 0);
        provider.set_listener(Arc::new(|_: &[u8], _: Resolution| {}));
        provider.open(&surface(640, 480)).unwrap();
        provider.open(&surface(1280, 720)).unwrap();
        assert!(provider.has_listener());
    }

    #[test]
    fn test_open_failure_cleans_up() {
        let driver = driver();
        driver.fail_open(0, true);
        let mut provider = CameraProvider::new(driver.clone(), 0);
        provider.set_listener(Arc::new(|_: &[u8], _: Resolution| {}));

        let err = provider.open(&surface(640, 480)).unwrap_err();
        assert!(matches!(err, BackendError::DeviceUnavailable(_)));
        assert!(!provider.is_open());
        assert!(!provider.has_listener());
        assert_eq!(provider.preview_size(), None);

        // Recoverable: caller may retry once the device is back
        driver.fail_open(0, false);
        provider.open(&surface(640, 480)).unwrap();
        assert!(provider.is_open());
    }

    #[test]
    fn test_release_failure_does_not_abort_teardown() {
        let driver = driver();
        driver.fail_release(0, true);
        let mut provider = CameraProvider::new(driver.clone(), 0);
        provider.open(&surface(640, 480)).unwrap();

        provider.stop();

        let stats = driver.stats(0);
        assert_eq!(stats.callbacks_cleared, 1);
        assert_eq!(stats.preview_stops, 1);
        assert_eq!(stats.releases, 1);
        assert!(!provider.is_open());
        assert_eq!(driver.live_devices(0), 0);
    }

    #[test]
    fn test_still_capture_resumes_preview() {
        let driver = driver();
        let mut provider = CameraProvider::new(driver.clone(), 0);
        let frames = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&frames);
        provider.set_listener(Arc::new(move |_: &[u8], _: Resolution| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        provider.open(&surface(640, 480)).unwrap();

        let (tx, rx) = mpsc::channel();
        provider
            .take_still(Box::new(move |jpeg| {
                let _ = tx.send(jpeg);
            }))
            .unwrap();
        let jpeg = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while driver.stats(0).preview_starts < 2 {
            assert!(std::time::Instant::now() < deadline, "preview never resumed");
            std::thread::sleep(Duration::from_millis(5));
        }
        let before = frames.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(100));
        assert!(frames.load(Ordering::SeqCst) > before);
    }

    #[test]
    fn test_still_capture_requires_open_device() {
        let mut provider = CameraProvider::new(driver(), 0);
        let err = provider.take_still(Box::new(|_| {})).unwrap_err();
        assert_eq!(err, BackendError::NotStreaming);
    }

    #[test]
    fn test_buffer_count_floor() {
        let provider = CameraProvider::new(driver(), 0).with_buffer_count(1);
        assert_eq!(provider.buffer_count, MIN_CALLBACK_BUFFERS);
    }
}
