// SPDX-License-Identifier: GPL-3.0-only

//! Pair consumption loop
//!
//! One task watches the latest published pair and feeds it to the frame
//! processor. Processing is bracketed by `start_processing` /
//! `end_processing` on the [`FrameFlow`], so at most one pair is in the
//! processor at any time.

use super::frame_flow::{DualFrame, FrameFlow, PairReceiver};
use super::processor::FrameProcessor;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Processor reference shared between the owner and the loop
///
/// Held weakly: the loop never keeps a processor alive on its own.
#[derive(Clone, Default)]
pub struct ProcessorSlot(Arc<RwLock<Option<Weak<dyn FrameProcessor>>>>);

impl ProcessorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, processor: &Arc<dyn FrameProcessor>) {
        *self.0.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::downgrade(processor));
    }

    pub fn clear(&self) {
        *self.0.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Strong reference for the duration of one call, if still alive
    fn current(&self) -> Option<Arc<dyn FrameProcessor>> {
        self.0
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(Weak::upgrade)
    }
}

/// Counters kept by the consumption loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Pairs handed to a processor
    pub processed: u64,
    /// Pairs seen while no processor was set
    pub skipped: u64,
    /// Processor calls that returned an error or panicked
    pub failures: u64,
    pub last_sequence: Option<u64>,
    pub last_processing: Duration,
    pub peak_processing: Duration,
}

impl PipelineStats {
    fn record(&mut self, sequence: u64, elapsed: Duration) {
        self.processed += 1;
        self.last_sequence = Some(sequence);
        self.last_processing = elapsed;
        self.peak_processing = self.peak_processing.max(elapsed);
    }
}

/// Shared, lockable stats
pub type SharedStats = Arc<Mutex<PipelineStats>>;

/// Handle to a running consumption task
pub struct ConsumerLoop {
    cancel: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ConsumerLoop {
    /// Spawn the loop on `runtime`
    ///
    /// The loop sees every pair published after this returns.
    pub fn spawn(
        runtime: &Handle,
        flow: Arc<FrameFlow>,
        processor: ProcessorSlot,
        stats: SharedStats,
    ) -> Self {
        let (cancel, cancelled) = oneshot::channel();
        let pairs = flow.subscribe();
        let handle = runtime.spawn(consume(flow, pairs, processor, stats, cancelled));
        Self {
            cancel: Some(cancel),
            handle: Some(handle),
        }
    }

    /// Ask the loop to exit
    ///
    /// A pair already in the processor is finished first. The returned
    /// handle resolves once the task has exited.
    pub fn cancel(mut self) -> Option<JoinHandle<()>> {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        self.handle.take()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }
}

impl Drop for ConsumerLoop {
    fn drop(&mut self) {
        // Dropping the sender wakes the loop too; sending just makes it explicit
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

async fn consume(
    flow: Arc<FrameFlow>,
    mut pairs: PairReceiver,
    processor: ProcessorSlot,
    stats: SharedStats,
    mut cancelled: oneshot::Receiver<()>,
) {
    info!("Frame consumption loop started");

    loop {
        tokio::select! {
            biased;
            _ = &mut cancelled => break,
            changed = pairs.changed() => {
                if changed.is_err() {
                    debug!("Frame flow closed");
                    break;
                }
            }
        }

        let Some(pair) = pairs.borrow_and_update().clone() else {
            continue;
        };

        let processing = Processing::start(&flow);
        let started = Instant::now();
        let outcome = run_processor(&processor, Arc::clone(&pair)).await;
        let elapsed = started.elapsed();
        drop(processing);

        let mut totals = stats.lock().unwrap_or_else(|e| e.into_inner());
        match outcome {
            Outcome::Processed => {
                totals.record(pair.sequence, elapsed);
                trace!(
                    sequence = pair.sequence,
                    elapsed_us = elapsed.as_micros() as u64,
                    "Pair processed"
                );
            }
            Outcome::Failed => {
                totals.record(pair.sequence, elapsed);
                totals.failures += 1;
            }
            Outcome::NoProcessor => totals.skipped += 1,
        }
    }

    info!("Frame consumption loop stopped");
}

/// Holds the flow's processing flag for one pair
///
/// Clearing it on drop keeps pairing alive when the loop is dropped
/// mid-call, e.g. on runtime shutdown or task abort.
struct Processing<'a>(&'a FrameFlow);

impl<'a> Processing<'a> {
    fn start(flow: &'a FrameFlow) -> Self {
        flow.start_processing();
        Self(flow)
    }
}

impl Drop for Processing<'_> {
    fn drop(&mut self) {
        self.0.end_processing();
    }
}

enum Outcome {
    Processed,
    Failed,
    NoProcessor,
}

/// Run the processor, containing both errors and panics
async fn run_processor(slot: &ProcessorSlot, pair: Arc<DualFrame>) -> Outcome {
    let Some(processor) = slot.current() else {
        trace!(sequence = pair.sequence, "No frame processor, pair skipped");
        return Outcome::NoProcessor;
    };
    let sequence = pair.sequence;

    let result = AssertUnwindSafe(async move { processor.process(pair).await })
        .catch_unwind()
        .await;

    match result {
        Ok(Ok(())) => Outcome::Processed,
        Ok(Err(e)) => {
            warn!(sequence, error = %e, "Frame processor failed, continuing");
            Outcome::Failed
        }
        Err(_) => {
            error!(sequence, "Frame processor panicked, continuing");
            Outcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::{Frame, StreamKind};
    use crate::pipeline::processor::ProcessError;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Counting {
        calls: AtomicU64,
        fail_on: Option<u64>,
        panic_on: Option<u64>,
    }

    impl Counting {
        fn new() -> Self {
            Self {
                calls: AtomicU64::new(0),
                fail_on: None,
                panic_on: None,
            }
        }
    }

    impl FrameProcessor for Counting {
        fn process(&self, frame: Arc<DualFrame>) -> BoxFuture<'_, Result<(), ProcessError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if self.panic_on == Some(frame.sequence) {
                    panic!("boom");
                }
                if self.fail_on == Some(frame.sequence) {
                    return Err("bad pair".into());
                }
                Ok(())
            })
        }
    }

    fn push_pair(flow: &FrameFlow) {
        flow.add_frame(StreamKind::Rgb, Frame::new(vec![0u8; 4], 2, 2));
        flow.add_frame(StreamKind::Ir, Frame::new(vec![0u8; 4], 2, 2));
    }

    async fn wait_for(stats: &SharedStats, predicate: impl Fn(&PipelineStats) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if predicate(&stats.lock().unwrap()) {
                return;
            }
            assert!(Instant::now() < deadline, "timed out: {:?}", stats.lock().unwrap());
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    /// Publish one pair at a time, waiting for the loop to pick each up
    async fn feed(flow: &FrameFlow, stats: &SharedStats, count: u64) {
        for _ in 0..count {
            let seen = {
                let s = stats.lock().unwrap();
                s.processed + s.skipped
            };
            push_pair(flow);
            wait_for(stats, |s| s.processed + s.skipped > seen).await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_errors_and_panics_do_not_stop_loop() {
        let flow = Arc::new(FrameFlow::new());
        let stats = SharedStats::default();
        let slot = ProcessorSlot::new();
        let processor: Arc<dyn FrameProcessor> = Arc::new(Counting {
            fail_on: Some(1),
            panic_on: Some(2),
            ..Counting::new()
        });
        slot.set(&processor);

        let consumer = ConsumerLoop::spawn(&Handle::current(), flow.clone(), slot, stats.clone());
        feed(&flow, &stats, 5).await;

        let snapshot = *stats.lock().unwrap();
        assert_eq!(snapshot.processed, 5);
        assert_eq!(snapshot.failures, 2);
        assert_eq!(snapshot.last_sequence, Some(4));
        assert!(!flow.is_processing());
        assert!(!consumer.is_finished());

        consumer.cancel().unwrap().await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_processor_is_skipped() {
        let flow = Arc::new(FrameFlow::new());
        let stats = SharedStats::default();
        let slot = ProcessorSlot::new();
        let processor: Arc<dyn FrameProcessor> = Arc::new(Counting::new());
        slot.set(&processor);
        drop(processor);

        let consumer = ConsumerLoop::spawn(&Handle::current(), flow.clone(), slot, stats.clone());
        feed(&flow, &stats, 2).await;

        let snapshot = *stats.lock().unwrap();
        assert_eq!(snapshot.processed, 0);
        assert_eq!(snapshot.skipped, 2);
        consumer.cancel().unwrap().await.unwrap();
    }

    /// Never finishes on its own
    struct Stuck;

    impl FrameProcessor for Stuck {
        fn process(&self, _frame: Arc<DualFrame>) -> BoxFuture<'_, Result<(), ProcessError>> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
        }
    }

    #[test]
    fn test_runtime_shutdown_mid_process_releases_flow() {
        let flow = Arc::new(FrameFlow::new());
        let stuck: Arc<dyn FrameProcessor> = Arc::new(Stuck);
        let slot = ProcessorSlot::new();
        slot.set(&stuck);

        let first = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let consumer =
            ConsumerLoop::spawn(first.handle(), flow.clone(), slot, SharedStats::default());
        first.block_on(async {
            push_pair(&flow);
            let deadline = Instant::now() + Duration::from_secs(5);
            while !flow.is_processing() {
                assert!(Instant::now() < deadline, "pair never reached the processor");
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        });
        drop(consumer);
        drop(first);
        assert!(!flow.is_processing());

        // A fresh loop on another runtime keeps pairing
        let second = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let counting: Arc<dyn FrameProcessor> = Arc::new(Counting::new());
        let slot = ProcessorSlot::new();
        slot.set(&counting);
        let stats = SharedStats::default();
        let consumer = ConsumerLoop::spawn(second.handle(), flow.clone(), slot, stats.clone());
        second.block_on(async {
            feed(&flow, &stats, 3).await;
            assert_eq!(stats.lock().unwrap().processed, 3);
            assert_eq!(flow.latest().unwrap().sequence, 3);
            consumer.cancel().unwrap().await.unwrap();
        });
    }

    #[tokio::test]
    async fn test_cancel_exits_loop() {
        let flow = Arc::new(FrameFlow::new());
        let consumer = ConsumerLoop::spawn(
            &Handle::current(),
            flow,
            ProcessorSlot::new(),
            SharedStats::default(),
        );
        let handle = consumer.cancel().unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop exits")
            .unwrap();
    }
}
