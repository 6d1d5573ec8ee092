// SPDX-License-Identifier: GPL-3.0-only

//! Dual camera preview orchestration
//!
//! [`DualPreview`] ties the RGB and IR sources to one [`FrameFlow`] and one
//! consumption loop. The RGB camera follows the on-screen surface: every
//! real change of surface size or preview config reopens it and posts a new
//! display transform. The IR camera renders to an offscreen surface and is
//! only opened once per surface lifetime.
//!
//! ```text
//! Detached ──attach──▶ Attached ──surface──▶ Streaming
//!     ▲                   ▲  ▲                  │  ▲
//!     │                   │  └──destroyed───────┤  │
//!     │                   │                     ▼  │
//!     └──────detach───────┴──────────── Reconfiguring
//! ```
//!
//! `Reconfiguring` only exists while a surface or config call holds the
//! preview lock.

use super::consumer::{ConsumerLoop, PipelineStats, ProcessorSlot, SharedStats};
use super::frame_flow::{FrameFlow, PairReceiver};
use super::processor::FrameProcessor;
use super::transform::{PreviewTransform, configure_transform};
use crate::backends::camera::{
    BackendError, BackendResult, CameraDriver, CameraProvider, CameraSource, Frame,
    FrameListener, PreviewSurface, Resolution, StillCallback, StreamKind,
};
use crate::config::Config;
use crate::constants::IR_OFFSCREEN_SURFACE_ID;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lifecycle state of the preview
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewState {
    /// No consumption loop
    Detached,
    /// Loop running, no surface
    Attached,
    /// Both cameras streaming into the flow
    Streaming,
    /// RGB camera being reopened
    ///
    /// Only held inside a surface or config call, so [`DualPreview::state`]
    /// never reports it.
    Reconfiguring,
}

/// Display settings applied to the RGB preview
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PreviewConfig {
    /// Extra clockwise rotation of the preview, in degrees
    pub orientation_degrees: i32,
    /// Flip the preview horizontally
    pub mirror: bool,
}

struct Inner {
    rgb: Box<dyn CameraSource>,
    ir: Box<dyn CameraSource>,
    state: PreviewState,
    surface: Option<PreviewSurface>,
    last_size: Option<Resolution>,
    config: PreviewConfig,
    consumer: Option<ConsumerLoop>,
}

/// RGB + IR preview with paired frame processing
pub struct DualPreview {
    inner: Mutex<Inner>,
    flow: Arc<FrameFlow>,
    processor: ProcessorSlot,
    stats: SharedStats,
    transform: watch::Sender<Option<PreviewTransform>>,
}

impl DualPreview {
    pub fn new(rgb: Box<dyn CameraSource>, ir: Box<dyn CameraSource>, config: PreviewConfig) -> Self {
        let (transform, _) = watch::channel(None);
        Self {
            inner: Mutex::new(Inner {
                rgb,
                ir,
                state: PreviewState::Detached,
                surface: None,
                last_size: None,
                config,
                consumer: None,
            }),
            flow: Arc::new(FrameFlow::new()),
            processor: ProcessorSlot::new(),
            stats: SharedStats::default(),
            transform,
        }
    }

    /// Build driver-backed providers for the configured camera ids
    pub fn from_config(driver: Arc<dyn CameraDriver>, config: &Config) -> Self {
        let rgb = CameraProvider::new(Arc::clone(&driver), config.rgb_camera_id)
            .with_buffer_count(config.buffer_count);
        let ir = CameraProvider::new(driver, config.ir_camera_id)
            .with_buffer_count(config.buffer_count);
        Self::new(
            Box::new(rgb),
            Box::new(ir),
            PreviewConfig {
                orientation_degrees: config.orientation_degrees,
                mirror: config.mirror,
            },
        )
    }

    /// Start the consumption loop on `runtime`
    ///
    /// Attaching twice keeps the running loop. A loop that already exited,
    /// e.g. because its runtime shut down, is replaced.
    pub fn attach(&self, runtime: &Handle) {
        let mut inner = self.lock();
        if inner.consumer.as_ref().is_some_and(|c| !c.is_finished()) {
            debug!("Preview already attached");
            return;
        }
        if inner.consumer.take().is_some() {
            warn!("Consumption loop had exited, restarting it");
        }
        inner.consumer = Some(ConsumerLoop::spawn(
            runtime,
            Arc::clone(&self.flow),
            self.processor.clone(),
            Arc::clone(&self.stats),
        ));
        if inner.state == PreviewState::Detached {
            inner.state = PreviewState::Attached;
        }
        info!("Preview attached");
    }

    /// A surface became available to render into
    pub fn on_surface_available(
        &self,
        surface: PreviewSurface,
        width: u32,
        height: u32,
    ) -> BackendResult<()> {
        let size = Resolution::new(width, height);
        let mut inner = self.lock();
        if inner.state == PreviewState::Detached {
            return Err(BackendError::Detached);
        }
        if inner.state == PreviewState::Streaming
            && inner.surface == Some(surface)
            && inner.last_size == Some(size)
        {
            debug!(surface = surface.id, %size, "Surface unchanged, skipping reconfiguration");
            return Ok(());
        }

        info!(surface = surface.id, %size, "Surface available");
        inner.surface = Some(surface);
        self.reconfigure(&mut inner, size)
    }

    /// The current surface was resized
    pub fn on_surface_size_changed(&self, width: u32, height: u32) -> BackendResult<()> {
        let size = Resolution::new(width, height);
        let mut inner = self.lock();
        if inner.state == PreviewState::Detached {
            return Err(BackendError::Detached);
        }
        if inner.surface.is_none() {
            return Err(BackendError::NotStreaming);
        }
        if inner.state == PreviewState::Streaming && inner.last_size == Some(size) {
            debug!(%size, "Surface size unchanged, skipping reconfiguration");
            return Ok(());
        }

        info!(%size, "Surface resized");
        self.reconfigure(&mut inner, size)
    }

    /// The surface is gone: stop both cameras and drop unpaired frames
    pub fn on_surface_destroyed(&self) {
        let mut inner = self.lock();
        info!("Surface destroyed");
        self.shut_down_sources(&mut inner);
        if inner.state != PreviewState::Detached {
            inner.state = PreviewState::Attached;
        }
    }

    /// Stop the cameras and the consumption loop
    ///
    /// A pair already in the processor is finished. The returned handle
    /// resolves once the loop has exited.
    pub fn detach(&self) -> Option<JoinHandle<()>> {
        let mut inner = self.lock();
        let consumer = inner.consumer.take();
        self.shut_down_sources(&mut inner);
        inner.state = PreviewState::Detached;
        info!("Preview detached");
        consumer.and_then(ConsumerLoop::cancel)
    }

    /// Change preview rotation and mirroring
    ///
    /// Only the RGB camera is reopened; the IR stream never reaches the
    /// display so its configuration does not depend on these settings.
    pub fn set_config(&self, orientation_degrees: i32, mirror: bool) -> BackendResult<()> {
        let config = PreviewConfig {
            orientation_degrees,
            mirror,
        };
        let mut inner = self.lock();
        if inner.config == config {
            return Ok(());
        }
        info!(orientation_degrees, mirror, "Preview config changed");
        inner.config = config;

        match (inner.state, inner.last_size) {
            (PreviewState::Streaming, Some(size)) => self.reconfigure(&mut inner, size),
            // Applied on the next surface event
            _ => Ok(()),
        }
    }

    /// Capture a still from the RGB camera
    pub fn take_picture(&self, callback: StillCallback) -> BackendResult<()> {
        self.lock().rgb.take_still(callback)
    }

    /// Set the processor that receives paired frames
    ///
    /// Only a weak reference is kept; once the caller drops the processor,
    /// pairs are skipped.
    pub fn set_frame_processor(&self, processor: &Arc<dyn FrameProcessor>) {
        self.processor.set(processor);
    }

    pub fn clear_frame_processor(&self) {
        self.processor.clear();
    }

    /// Receiver for display transforms
    ///
    /// The display thread applies the newest value; `None` means no preview
    /// is showing.
    pub fn transforms(&self) -> watch::Receiver<Option<PreviewTransform>> {
        self.transform.subscribe()
    }

    /// Receiver for the newest published pair
    pub fn pairs(&self) -> PairReceiver {
        self.flow.subscribe()
    }

    pub fn stats(&self) -> PipelineStats {
        *self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> PreviewState {
        self.lock().state
    }

    /// Preview size the RGB camera streams at
    pub fn preview_size(&self) -> Option<Resolution> {
        self.lock().rgb.preview_size()
    }

    /// Reopen RGB for `size`, open IR if needed, then rewire listeners and
    /// post the transform
    fn reconfigure(&self, inner: &mut Inner, size: Resolution) -> BackendResult<()> {
        let Some(surface) = inner.surface else {
            return Err(BackendError::NotStreaming);
        };
        inner.state = PreviewState::Reconfiguring;
        inner.last_size = Some(size);

        inner.rgb.stop();
        if let Err(e) = Self::open_sources(inner, &surface) {
            warn!(error = %e, "Failed to start preview");
            self.shut_down_sources(inner);
            inner.state = PreviewState::Attached;
            return Err(e);
        }

        inner.rgb.set_listener(self.listener(StreamKind::Rgb));
        inner.ir.set_listener(self.listener(StreamKind::Ir));
        self.post_transform(inner, size);
        inner.state = PreviewState::Streaming;
        Ok(())
    }

    fn open_sources(inner: &mut Inner, surface: &PreviewSurface) -> BackendResult<()> {
        inner.rgb.open(surface)?;
        if !inner.ir.is_open() {
            let offscreen = PreviewSurface::new(IR_OFFSCREEN_SURFACE_ID, surface.display);
            inner.ir.open(&offscreen)?;
        }
        Ok(())
    }

    fn shut_down_sources(&self, inner: &mut Inner) {
        inner.rgb.stop();
        inner.ir.stop();
        self.flow.reset();
        inner.surface = None;
        inner.last_size = None;
        self.transform.send_replace(None);
    }

    /// Listener copying each buffer into a frame for `stream`
    fn listener(&self, stream: StreamKind) -> FrameListener {
        let flow = Arc::clone(&self.flow);
        Arc::new(move |data: &[u8], size: Resolution| {
            flow.add_frame(stream, Frame::copy_from(data, size));
        })
    }

    /// Compute the transform from the size RGB actually streams at
    fn post_transform(&self, inner: &Inner, surface_size: Resolution) {
        let transform = inner.rgb.preview_size().and_then(|buffer| {
            configure_transform(
                buffer,
                surface_size,
                inner.config.orientation_degrees,
                inner.config.mirror,
            )
        });
        match &transform {
            Some(t) => debug!(
                fill_scale = t.fill_scale,
                rotation = t.rotation_degrees,
                mirror = t.mirror,
                "Posting preview transform"
            ),
            None => debug!("No preview transform for empty geometry"),
        }
        self.transform.send_replace(transform);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for DualPreview {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("DualPreview")
            .field("state", &inner.state)
            .field("surface", &inner.surface)
            .field("last_size", &inner.last_size)
            .field("config", &inner.config)
            .field("flow", &self.flow)
            .finish()
    }
}
