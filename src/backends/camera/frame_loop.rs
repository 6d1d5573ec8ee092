// SPDX-License-Identifier: GPL-3.0-only
//! Paced capture threads
//!
//! Devices deliver preview buffers from a thread they own. This module runs
//! such a thread: a named loop that executes one capture iteration per frame
//! interval until it is stopped or the iteration asks to stop.

use super::types::{BackendError, BackendResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Action returned by the capture loop callback to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Continue running the loop
    Continue,
    /// Stop the loop gracefully
    Stop,
}

/// Handle to a capture thread
///
/// Dropping the handle stops the thread and waits for it.
pub struct CaptureLoop {
    thread_handle: Option<JoinHandle<()>>,
    stop_signal: Arc<AtomicBool>,
    iterations: Arc<AtomicU64>,
    name: String,
}

impl CaptureLoop {
    /// Spawn a thread calling `loop_fn` once per `interval`
    ///
    /// Iterations are scheduled against a fixed deadline so a slow iteration
    /// shortens the next wait instead of drifting the rate. The stop signal
    /// is checked before every iteration and while waiting.
    pub fn start<F>(name: &str, interval: Duration, mut loop_fn: F) -> BackendResult<Self>
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let iterations = Arc::new(AtomicU64::new(0));
        let thread_stop = Arc::clone(&stop_signal);
        let thread_iterations = Arc::clone(&iterations);
        let thread_name = name.to_string();

        info!(name = %name, interval_us = interval.as_micros() as u64, "Starting capture loop");

        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut next = Instant::now();
                loop {
                    if !wait_until(next, &thread_stop) {
                        debug!(name = %thread_name, "Stop signal received");
                        break;
                    }
                    thread_iterations.fetch_add(1, Ordering::Relaxed);
                    if loop_fn() == LoopAction::Stop {
                        debug!(name = %thread_name, "Loop requested stop");
                        break;
                    }
                    next += interval;
                    // Fell behind by more than a frame: skip instead of bursting
                    let now = Instant::now();
                    if next + interval < now {
                        next = now;
                    }
                }
                debug!(name = %thread_name, "Capture loop thread exiting");
            })
            .map_err(|e| BackendError::Other(format!("failed to spawn {}: {}", name, e)))?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            iterations,
            name: name.to_string(),
        })
    }

    /// Check if the loop is still running
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Number of iterations started so far
    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    /// Signal the loop to stop without waiting for it
    pub fn request_stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Stop the loop and wait for the thread to finish
    ///
    /// Must not be called from the loop's own thread.
    pub fn stop(&mut self) {
        self.request_stop();
        if let Some(handle) = self.thread_handle.take() {
            if handle.thread().id() == thread::current().id() {
                // Joining ourselves would deadlock; the loop exits after this iteration
                return;
            }
            if let Err(e) = handle.join() {
                warn!(name = %self.name, "Capture loop thread panicked: {:?}", e);
            }
        }
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            self.stop();
        }
    }
}

/// Sleep until `deadline` in short slices; false if stopped meanwhile
fn wait_until(deadline: Instant, stop: &AtomicBool) -> bool {
    const SLICE: Duration = Duration::from_millis(5);
    loop {
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(SLICE));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_loop_stops_itself() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut capture = CaptureLoop::start("test-loop", Duration::from_millis(1), move || {
            let count = counter_clone.fetch_add(1, Ordering::SeqCst);
            if count >= 10 {
                LoopAction::Stop
            } else {
                LoopAction::Continue
            }
        })
        .unwrap();

        while capture.is_running() {
            thread::sleep(Duration::from_millis(5));
        }
        capture.stop();

        assert_eq!(counter.load(Ordering::SeqCst), 11);
        assert_eq!(capture.iterations(), 11);
    }

    #[test]
    fn test_stop_interrupts_long_interval() {
        let mut capture =
            CaptureLoop::start("test-slow", Duration::from_secs(60), || LoopAction::Continue)
                .unwrap();
        thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        capture.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!capture.is_running());
    }

    #[test]
    fn test_drop_stops_thread() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);
        let capture = CaptureLoop::start("test-drop", Duration::from_millis(1), move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            LoopAction::Continue
        })
        .unwrap();
        thread::sleep(Duration::from_millis(20));
        drop(capture);

        let after_drop = counter.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(counter.load(Ordering::SeqCst), after_drop);
    }
}
