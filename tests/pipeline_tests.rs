// SPDX-License-Identifier: MPL-2.0

//! Integration tests for frame pairing under load

use dualcam::backends::camera::synthetic::frame_number;
use dualcam::backends::camera::{
    CameraDriver, DisplayInfo, Frame, PreviewSurface, Resolution, StreamKind, SyntheticDriver,
};
use dualcam::pipeline::consumer::{ConsumerLoop, PipelineStats, ProcessorSlot};
use dualcam::pipeline::{DualFrame, DualPreview, FrameFlow, FrameProcessor, ProcessError};
use dualcam::Config;
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;

const FRAMES_PER_STREAM: u32 = 10_000;

/// Records what it sees and checks the pairing contract on every call
struct Recorder {
    flow: Arc<FrameFlow>,
    delay: Duration,
    pairs: Mutex<Vec<(u64, u32, u32)>>,
}

impl Recorder {
    fn new(flow: Arc<FrameFlow>, delay: Duration) -> Self {
        Self {
            flow,
            delay,
            pairs: Mutex::new(Vec::new()),
        }
    }
}

fn tagged(stream: StreamKind, index: u32) -> Frame {
    let tag = match stream {
        StreamKind::Rgb => b'R',
        StreamKind::Ir => b'I',
    };
    let mut data = vec![tag];
    data.extend_from_slice(&index.to_le_bytes());
    Frame::new(data, 1, 1)
}

fn index_of(frame: &Frame) -> u32 {
    let bytes: [u8; 4] = frame.data()[1..5].try_into().unwrap();
    u32::from_le_bytes(bytes)
}

impl FrameProcessor for Recorder {
    fn process(&self, frame: Arc<DualFrame>) -> BoxFuture<'_, Result<(), ProcessError>> {
        Box::pin(async move {
            if !self.flow.is_processing() {
                return Err("processing flag not set".into());
            }
            if frame.rgb.data()[0] != b'R' || frame.ir.data()[0] != b'I' {
                return Err("streams crossed".into());
            }
            tokio::time::sleep(self.delay).await;
            self.pairs.lock().unwrap().push((
                frame.sequence,
                index_of(&frame.rgb),
                index_of(&frame.ir),
            ));
            Ok(())
        })
    }
}

async fn wait_until(what: &str, check: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn snapshot(stats: &Arc<Mutex<PipelineStats>>) -> PipelineStats {
    *stats.lock().unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_producers_with_slow_consumer() {
    let flow = Arc::new(FrameFlow::new());
    let stats = Arc::new(Mutex::new(PipelineStats::default()));
    let recorder = Arc::new(Recorder::new(flow.clone(), Duration::from_millis(1)));
    let processor: Arc<dyn FrameProcessor> = recorder.clone();
    let slot = ProcessorSlot::new();
    slot.set(&processor);
    let consumer = ConsumerLoop::spawn(&Handle::current(), flow.clone(), slot, stats.clone());

    let producers: Vec<_> = [StreamKind::Rgb, StreamKind::Ir]
        .into_iter()
        .map(|stream| {
            let flow = flow.clone();
            std::thread::spawn(move || {
                for index in 0..FRAMES_PER_STREAM {
                    flow.add_frame(stream, tagged(stream, index));
                    if index % 64 == 0 {
                        std::thread::yield_now();
                    }
                }
            })
        })
        .collect();

    // A deadlock would hang the producers
    let joined = tokio::time::timeout(
        Duration::from_secs(30),
        tokio::task::spawn_blocking(move || {
            for producer in producers {
                producer.join().unwrap();
            }
        }),
    )
    .await;
    assert!(joined.is_ok(), "producers did not finish");

    wait_until("consumer idle", || !flow.is_processing()).await;

    let pairs = recorder.pairs.lock().unwrap().clone();
    assert!(!pairs.is_empty());
    // The slow consumer must have skipped most pairs instead of queueing them
    assert!((pairs.len() as u32) < FRAMES_PER_STREAM);
    for window in pairs.windows(2) {
        let (prev, next) = (window[0], window[1]);
        assert!(next.0 > prev.0, "sequence went backwards: {:?}", window);
        assert!(next.1 > prev.1, "RGB frame reused: {:?}", window);
        assert!(next.2 > prev.2, "IR frame reused: {:?}", window);
    }
    assert_eq!(snapshot(&stats).failures, 0);

    // The loop is still alive after the burst
    let before = snapshot(&stats).processed;
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut index = FRAMES_PER_STREAM;
    while snapshot(&stats).processed == before {
        assert!(Instant::now() < deadline, "loop stopped after the burst");
        flow.add_frame(StreamKind::Rgb, tagged(StreamKind::Rgb, index));
        flow.add_frame(StreamKind::Ir, tagged(StreamKind::Ir, index));
        index += 1;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    consumer.cancel().unwrap().await.unwrap();
}

#[test]
fn test_pending_never_exceeds_one_per_stream() {
    let flow = Arc::new(FrameFlow::new());
    flow.start_processing();

    let producers: Vec<_> = [StreamKind::Rgb, StreamKind::Ir]
        .into_iter()
        .map(|stream| {
            let flow = flow.clone();
            std::thread::spawn(move || {
                for index in 0..FRAMES_PER_STREAM {
                    flow.add_frame(stream, tagged(stream, index));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    // Nothing paired while processing; only the newest frame of each survives
    assert!(flow.latest().is_none());
    flow.end_processing();
    flow.add_frame(StreamKind::Rgb, tagged(StreamKind::Rgb, FRAMES_PER_STREAM));
    let pair = flow.latest().expect("pair after processing ends");
    assert_eq!(index_of(&pair.rgb), FRAMES_PER_STREAM);
    assert_eq!(index_of(&pair.ir), FRAMES_PER_STREAM - 1);
    assert_eq!(pair.sequence, 0);
}

/// Collects synthetic frame numbers of each processed pair
#[derive(Default)]
struct FrameNumbers(Mutex<Vec<(u64, u64)>>);

impl FrameProcessor for FrameNumbers {
    fn process(&self, frame: Arc<DualFrame>) -> BoxFuture<'_, Result<(), ProcessError>> {
        Box::pin(async move {
            let rgb = frame_number(frame.rgb.data()).ok_or("short RGB frame")?;
            let ir = frame_number(frame.ir.data()).ok_or("short IR frame")?;
            self.0.lock().unwrap().push((rgb, ir));
            tokio::time::sleep(Duration::from_millis(3)).await;
            Ok(())
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_synthetic_kiosk_end_to_end() {
    let config = Config {
        synthetic_fps: 120,
        ..Config::default()
    };
    let driver = SyntheticDriver::kiosk(config.rgb_camera_id, config.ir_camera_id, 120);
    let shared: Arc<dyn CameraDriver> = Arc::new(driver.clone());
    let preview = DualPreview::from_config(shared, &config);

    let numbers = Arc::new(FrameNumbers::default());
    let processor: Arc<dyn FrameProcessor> = numbers.clone();
    preview.set_frame_processor(&processor);
    preview.attach(&Handle::current());

    let display = DisplayInfo {
        size: Resolution::new(1080, 1920),
        ..Default::default()
    };
    preview
        .on_surface_available(PreviewSurface::new(1, display), 1080, 1920)
        .unwrap();
    wait_until("pairs", || preview.stats().processed >= 10).await;

    // Resize mid-stream; pairing keeps going
    let before = preview.stats().processed;
    preview.on_surface_size_changed(720, 1280).unwrap();
    wait_until("pairs after resize", || preview.stats().processed >= before + 5).await;

    preview.on_surface_destroyed();
    preview.detach().unwrap().await.unwrap();

    assert_eq!(driver.live_devices(config.rgb_camera_id), 0);
    assert_eq!(driver.live_devices(config.ir_camera_id), 0);
    assert_eq!(preview.stats().failures, 0);

    let numbers = numbers.0.lock().unwrap().clone();
    // IR is never reopened, so its frame numbers keep rising across the resize
    for window in numbers.windows(2) {
        assert!(window[1].1 > window[0].1, "IR frame reused: {:?}", window);
    }
}
