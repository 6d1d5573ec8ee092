// SPDX-License-Identifier: GPL-3.0-only

//! RGB/IR frame pairing
//!
//! [`FrameFlow`] keeps the newest unpaired frame of each stream. As soon as
//! both streams have a frame and no pair is being processed, the two are
//! moved out into a [`DualFrame`] and published as the latest value. There is
//! no queue: a consumer that falls behind sees only the newest pair, older
//! ones are dropped. Memory and backlog stay bounded at one pending frame per
//! stream plus one published pair.

use crate::backends::camera::types::{Frame, StreamKind};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::trace;

/// Time-paired RGB and IR frames
#[derive(Debug, Clone)]
pub struct DualFrame {
    pub rgb: Frame,
    pub ir: Frame,
    /// Pair number, strictly increasing for the lifetime of the flow
    pub sequence: u64,
}

/// Receiver side of the latest-pair channel
pub type PairReceiver = watch::Receiver<Option<Arc<DualFrame>>>;

#[derive(Default)]
struct Slots {
    rgb: Option<Frame>,
    ir: Option<Frame>,
    next_sequence: u64,
    processing: bool,
}

/// Which pending slots currently hold a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pending {
    pub rgb: bool,
    pub ir: bool,
}

/// Latest-wins synchronizer for the two camera streams
pub struct FrameFlow {
    slots: Mutex<Slots>,
    latest: watch::Sender<Option<Arc<DualFrame>>>,
}

impl Default for FrameFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameFlow {
    pub fn new() -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            slots: Mutex::new(Slots::default()),
            latest,
        }
    }

    /// Store a frame for `stream`, replacing any unpaired one, then try to
    /// pair
    pub fn add_frame(&self, stream: StreamKind, frame: Frame) {
        let pair = {
            let mut slots = self.lock();
            let slot = match stream {
                StreamKind::Rgb => &mut slots.rgb,
                StreamKind::Ir => &mut slots.ir,
            };
            if slot.replace(frame).is_some() {
                trace!(%stream, "Replaced unpaired frame");
            }
            Self::try_pair(&mut slots)
        };

        if let Some(pair) = pair {
            self.publish(pair);
        }
    }

    /// Move both pending frames into a pair if allowed
    fn try_pair(slots: &mut Slots) -> Option<DualFrame> {
        if slots.processing || slots.rgb.is_none() || slots.ir.is_none() {
            return None;
        }
        let rgb = slots.rgb.take()?;
        let ir = slots.ir.take()?;
        let sequence = slots.next_sequence;
        slots.next_sequence += 1;
        Some(DualFrame { rgb, ir, sequence })
    }

    /// Replace the latest pair unless a newer one was published first
    fn publish(&self, pair: DualFrame) {
        let sequence = pair.sequence;
        let pair = Arc::new(pair);
        let published = self.latest.send_if_modified(|latest| {
            if latest.as_ref().is_some_and(|l| l.sequence >= sequence) {
                return false;
            }
            *latest = Some(pair);
            true
        });
        if published {
            trace!(sequence, "Published frame pair");
        }
    }

    /// Block pairing while the consumer works on a pair
    pub fn start_processing(&self) {
        self.lock().processing = true;
    }

    /// Allow pairing again; the next `add_frame` pairs if both slots are full
    pub fn end_processing(&self) {
        self.lock().processing = false;
    }

    pub fn is_processing(&self) -> bool {
        self.lock().processing
    }

    /// Subscribe to the latest published pair
    ///
    /// The receiver treats the current value as already seen.
    pub fn subscribe(&self) -> PairReceiver {
        self.latest.subscribe()
    }

    /// Newest published pair, if any
    pub fn latest(&self) -> Option<Arc<DualFrame>> {
        self.latest.borrow().clone()
    }

    pub fn pending(&self) -> Pending {
        let slots = self.lock();
        Pending {
            rgb: slots.rgb.is_some(),
            ir: slots.ir.is_some(),
        }
    }

    /// Drop unpaired frames
    ///
    /// Used when cameras stop so a stale frame never pairs with one from a
    /// restarted stream. The sequence counter keeps counting.
    pub fn reset(&self) {
        let mut slots = self.lock();
        slots.rgb = None;
        slots.ir = None;
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        // Slots hold plain data, a panic mid-update cannot break them
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for FrameFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.lock();
        f.debug_struct("FrameFlow")
            .field("rgb_pending", &slots.rgb.is_some())
            .field("ir_pending", &slots.ir.is_some())
            .field("next_sequence", &slots.next_sequence)
            .field("processing", &slots.processing)
            .finish()
    }
}
