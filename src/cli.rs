// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! Every command runs against the synthetic driver, laid out like the kiosk:
//! an RGB module and an IR module at the configured camera indices.

use chrono::Local;
use dualcam::backends::camera::selection::{best_preview_size, display_orientation};
use dualcam::backends::camera::{
    CameraDevice, CameraDriver, DisplayInfo, DisplayRotation, PreviewSurface, Resolution,
    SyntheticDriver,
};
use dualcam::constants::STATS_INTERVAL;
use dualcam::errors::{AppError, CaptureError};
use dualcam::pipeline::{DualPreview, FrameProcessor, LumaMeter, PipelineStats};
use dualcam::Config;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Surface id of the on-screen preview
const PREVIEW_SURFACE_ID: u64 = 1;

/// How long `still` waits for the image
const STILL_TIMEOUT: Duration = Duration::from_secs(5);

fn kiosk_driver(config: &Config) -> SyntheticDriver {
    SyntheticDriver::kiosk(
        config.rgb_camera_id,
        config.ir_camera_id,
        config.synthetic_fps,
    )
}

fn preview_surface(width: u32, height: u32, rotation: i32) -> PreviewSurface {
    PreviewSurface::new(
        PREVIEW_SURFACE_ID,
        DisplayInfo {
            size: Resolution::new(width, height),
            rotation: DisplayRotation::from_degrees(rotation),
        },
    )
}

/// Stream both cameras and print pipeline stats until done
pub fn run(
    config: &Config,
    duration: Option<u64>,
    width: u32,
    height: u32,
    rotation: i32,
) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Runtime::new()?;
    let driver: Arc<dyn CameraDriver> = Arc::new(kiosk_driver(config));
    let preview = DualPreview::from_config(driver, config);

    let meter = Arc::new(LumaMeter::new());
    let processor: Arc<dyn FrameProcessor> = meter.clone();
    preview.set_frame_processor(&processor);
    preview.attach(runtime.handle());
    preview
        .on_surface_available(preview_surface(width, height, rotation), width, height)
        .map_err(AppError::from)?;

    if let Some(size) = preview.preview_size() {
        println!("RGB preview: {}", size);
    }
    if let Some(transform) = *preview.transforms().borrow() {
        println!(
            "Transform: fill scale {:.3}, rotation {}°, mirror {}",
            transform.fill_scale, transform.rotation_degrees, transform.mirror
        );
    }

    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    println!();
    println!("Streaming... (press Ctrl+C to stop)");

    let start = Instant::now();
    let limit = duration.map(Duration::from_secs);
    let mut last_report = Instant::now();
    let mut last_processed = 0;

    loop {
        if stop_flag.load(Ordering::SeqCst) {
            println!();
            println!("Stopping...");
            break;
        }
        if limit.is_some_and(|limit| start.elapsed() >= limit) {
            break;
        }

        if last_report.elapsed() >= STATS_INTERVAL {
            let stats = preview.stats();
            let rate = (stats.processed - last_processed) as f64
                / last_report.elapsed().as_secs_f64();
            print_stats(&stats, rate, &meter);
            last_processed = stats.processed;
            last_report = Instant::now();
        }

        std::thread::sleep(Duration::from_millis(50));
    }

    preview.on_surface_destroyed();
    if let Some(handle) = preview.detach() {
        runtime.block_on(handle)?;
    }

    let stats = preview.stats();
    println!();
    println!(
        "Processed {} pairs in {:.1}s ({} failed, {} skipped)",
        stats.processed,
        start.elapsed().as_secs_f64(),
        stats.failures,
        stats.skipped
    );
    Ok(())
}

fn print_stats(stats: &PipelineStats, rate: f64, meter: &LumaMeter) {
    let luma = meter
        .last_reading()
        .map(|r| format!("luma rgb {:.0} ir {:.0}", r.rgb, r.ir))
        .unwrap_or_default();
    println!(
        "pairs {:>6} ({:>5.1}/s)  seq {:>6}  processing {:>5.2}ms (peak {:.2}ms)  failures {}  {}",
        stats.processed,
        rate,
        stats.last_sequence.map_or_else(|| "-".to_string(), |s| s.to_string()),
        stats.last_processing.as_secs_f64() * 1000.0,
        stats.peak_processing.as_secs_f64() * 1000.0,
        stats.failures,
        luma
    );
}

/// Capture one still and write it as JPEG
pub fn take_still(
    config: &Config,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Runtime::new()?;
    let driver: Arc<dyn CameraDriver> = Arc::new(kiosk_driver(config));
    let preview = DualPreview::from_config(driver, config);
    preview.attach(runtime.handle());

    let (width, height) = (1080, 1920);
    preview
        .on_surface_available(preview_surface(width, height, 0), width, height)
        .map_err(AppError::from)?;

    println!("Capturing...");
    let (sender, receiver) = std::sync::mpsc::channel();
    preview
        .take_picture(Box::new(move |jpeg| {
            let _ = sender.send(jpeg);
        }))
        .map_err(AppError::from)?;

    let jpeg = receiver
        .recv_timeout(STILL_TIMEOUT)
        .map_err(|e| match e {
            std::sync::mpsc::RecvTimeoutError::Timeout => CaptureError::Timeout,
            std::sync::mpsc::RecvTimeoutError::Disconnected => CaptureError::Cancelled,
        })
        .map_err(AppError::from)?;

    preview.on_surface_destroyed();
    if let Some(handle) = preview.detach() {
        runtime.block_on(handle)?;
    }

    let output_path = match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            path
        }
        None => {
            let dir = get_default_still_dir();
            std::fs::create_dir_all(&dir)?;
            let timestamp = Local::now().format("%Y%m%d_%H%M%S");
            dir.join(format!("still_{}.jpg", timestamp))
        }
    };

    std::fs::write(&output_path, &jpeg)
        .map_err(CaptureError::from)
        .map_err(AppError::from)?;
    println!("Still saved: {} ({} bytes)", output_path.display(), jpeg.len());
    Ok(())
}

/// Print supported sizes and the selected one for each camera
pub fn show_sizes(
    config: &Config,
    width: u32,
    height: u32,
    rotation: i32,
) -> Result<(), Box<dyn std::error::Error>> {
    let driver = kiosk_driver(config);
    let display = Resolution::new(width, height);
    let rotation = DisplayRotation::from_degrees(rotation);
    println!("Display: {} at {}", display, rotation);
    println!();

    for (label, camera_id) in [("RGB", config.rgb_camera_id), ("IR", config.ir_camera_id)] {
        let info = driver.camera_info(camera_id).map_err(AppError::from)?;
        let mut device = driver.open(camera_id).map_err(AppError::from)?;
        let sizes = device.supported_preview_sizes();
        let selected = best_preview_size(&sizes, display);
        device.release().map_err(AppError::from)?;

        let listed: Vec<String> = sizes.iter().map(|s| s.to_string()).collect();
        println!(
            "  [{}] {} ({:?}, sensor {}°)",
            camera_id, label, info.facing, info.sensor_orientation
        );
        println!("      Sizes: {}", listed.join(", "));
        match selected {
            Some(size) => println!("      Selected: {}", size),
            None => println!("      Selected: device default"),
        }
        println!("      Output rotation: {}°", display_orientation(&info, rotation));
        println!();
    }
    Ok(())
}

/// Print the effective configuration, optionally saving it
pub fn show_config(config: &Config, save: bool) -> Result<(), Box<dyn std::error::Error>> {
    let path = Config::default_path();
    match &path {
        Some(path) => println!("Config file: {}", path.display()),
        None => println!("Config file: (no config directory)"),
    }
    println!("{}", serde_json::to_string_pretty(config)?);

    if save {
        let path = path.ok_or_else(|| AppError::Config("no config directory".into()))?;
        config.save(&path)?;
        println!("Saved.");
    }
    Ok(())
}

/// Get the default still directory
fn get_default_still_dir() -> PathBuf {
    dirs::picture_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dualcam")
}
