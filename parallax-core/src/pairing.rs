//! # Stereo Pairing
//!
//! Per-session state used to turn decoded pictures into left/right pairs:
//!
//! - [`FormatResolver`]: which layout applies to the current frame
//! - [`FrameSequencer`]: odd/even alternation for frame-sequential streams
//! - [`DelayTracker`]: rolling inter-frame delay, the pairing tolerance
//! - [`SlaveSlot`]: single-slot rendezvous between a master (left eye) and
//!   a slave (right eye) decode thread
//!
//! ## Master/slave rendezvous
//!
//! ```text
//!  slave thread                 SlaveSlot                master thread
//!  ────────────                 ─────────                ─────────────
//!  publish(frame) ──────────►  [ Frame ]  ◄──────────── wait_frame()
//!    (blocks while occupied)       │                     match_slave()
//!                                  ▼                       accept → take()
//!                               [ Empty ] ◄───────────── too old → release()
//! ```

use std::mem;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::image::NormalizedImage;
use crate::packet::StereoView;
use crate::stereo::StereoFormat;

/// Upper bound on a single condvar wait; cancellation is rechecked this often.
const CANCEL_POLL: Duration = Duration::from_millis(10);

// ============================================================================
// Format resolution
// ============================================================================

/// Sources of the stereo layout, strongest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormatResolver {
    pub by_user: StereoFormat,
    pub in_stream: StereoFormat,
    pub by_name: StereoFormat,
}

impl FormatResolver {
    /// User override, then stream metadata, then file name; `Auto` if none.
    pub fn resolve(&self) -> StereoFormat {
        [self.by_user, self.in_stream, self.by_name]
            .into_iter()
            .find(|f| *f != StereoFormat::Auto)
            .unwrap_or(StereoFormat::Auto)
    }
}

// ============================================================================
// Frame-sequential alternation
// ============================================================================

/// Alternates left/right views in a frame-sequential stream.
///
/// The counter starts at 1 (left) and returns to 1 on every key frame.
#[derive(Debug)]
pub struct FrameSequencer {
    counter: u64,
    cached_left: Option<NormalizedImage>,
}

impl Default for FrameSequencer {
    fn default() -> Self {
        Self {
            counter: 1,
            cached_left: None,
        }
    }
}

impl FrameSequencer {
    pub fn on_keyframe(&mut self) {
        self.counter = 1;
    }

    /// Apply an explicit view marker from the bitstream.
    pub fn set_view(&mut self, view: StereoView) {
        match view {
            StereoView::Left => self.counter = 1,
            StereoView::Right => self.counter = 2,
            StereoView::Packed => {}
        }
    }

    pub fn is_left_view(&self) -> bool {
        self.counter % 2 == 1
    }

    /// Consume one frame position; true when it was a left view.
    pub fn advance(&mut self) -> bool {
        let left = self.is_left_view();
        self.counter += 1;
        left
    }

    /// Feed one view. Left views are cached; a right view completes the pair.
    pub fn pair(&mut self, image: NormalizedImage) -> Option<(NormalizedImage, NormalizedImage)> {
        if self.advance() {
            self.cached_left = Some(image);
            None
        } else {
            let left = self.cached_left.take().unwrap_or_else(NormalizedImage::empty);
            Some((left, image))
        }
    }

    /// Forget the cached left view (flush).
    pub fn drop_cached(&mut self) {
        self.cached_left = None;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// Inter-frame delay
// ============================================================================

#[derive(Debug, Clone)]
pub struct DelayTracker {
    average: f64,
    prev_pts: f64,
    max_delay: f64,
}

impl DelayTracker {
    pub fn new(initial_average: f64, max_delay: f64) -> Self {
        Self {
            average: initial_average,
            prev_pts: 0.0,
            max_delay,
        }
    }

    /// Record a frame timestamp (seconds). Implausible gaps are ignored.
    pub fn update(&mut self, pts: f64) {
        let delay = pts - self.prev_pts;
        if delay > 0.0 && delay < self.max_delay {
            self.average = delay;
        }
        self.prev_pts = pts;
    }

    pub fn average(&self) -> f64 {
        self.average
    }

    /// New playback run; the average survives.
    pub fn restart(&mut self) {
        self.prev_pts = 0.0;
    }
}

// ============================================================================
// Master/slave matching
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveDecision {
    /// Within half a frame: pair them.
    Accept,
    /// Slave frame is too old: drop it and wait for a newer one.
    WaitNewer,
    /// Slave is ahead: show left alone, keep the slave frame for later.
    AheadKeep,
    /// Slave is so far ahead it must have seeked: drop its frame.
    AheadDiscard,
}

pub fn match_slave(left_pts: f64, right_pts: f64, average_delay: f64, seek_limit: f64) -> SlaveDecision {
    let diff = left_pts - right_pts;
    let tolerance = 0.5 * average_delay;
    if diff > tolerance {
        SlaveDecision::WaitNewer
    } else if diff < -tolerance {
        if diff < -seek_limit {
            SlaveDecision::AheadDiscard
        } else {
            SlaveDecision::AheadKeep
        }
    } else {
        SlaveDecision::Accept
    }
}

// ============================================================================
// Rendezvous slot
// ============================================================================

#[derive(Debug, Clone)]
pub struct SlaveFrame {
    pub image: NormalizedImage,
    pub pts: f64,
}

#[derive(Debug, Default)]
enum SlotState {
    #[default]
    Empty,
    Frame(SlaveFrame),
    /// Slave reached end of stream.
    Ended,
}

/// What the master found in the slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SlotPeek {
    Frame(f64),
    Ended,
    Timeout,
    Cancelled,
}

#[derive(Debug, Default)]
pub struct SlaveSlot {
    state: Mutex<SlotState>,
    changed: Condvar,
}

impl SlaveSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slave side: publish a frame and block until the master takes or
    /// releases it. Returns false when `cancel` fired first.
    pub fn publish(&self, frame: SlaveFrame, cancel: impl Fn() -> bool) -> bool {
        let mut state = self.state.lock();
        while matches!(*state, SlotState::Frame(_)) {
            if cancel() {
                return false;
            }
            self.changed.wait_for(&mut state, CANCEL_POLL);
        }
        *state = SlotState::Frame(frame);
        self.changed.notify_all();

        while matches!(*state, SlotState::Frame(_)) {
            if cancel() {
                return false;
            }
            self.changed.wait_for(&mut state, CANCEL_POLL);
        }
        true
    }

    /// Slave side: end of stream. Waits while an unconsumed frame sits in
    /// the slot unless `give_up` says the master stopped listening.
    pub fn finish(&self, give_up: impl Fn() -> bool) {
        let mut state = self.state.lock();
        while matches!(*state, SlotState::Frame(_)) && !give_up() {
            self.changed.wait_for(&mut state, CANCEL_POLL);
        }
        *state = SlotState::Ended;
        self.changed.notify_all();
    }

    /// Master side: wait up to `timeout` for the slave.
    pub fn wait_frame(&self, timeout: Duration, cancel: impl Fn() -> bool) -> SlotPeek {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            match &*state {
                SlotState::Frame(frame) => return SlotPeek::Frame(frame.pts),
                SlotState::Ended => return SlotPeek::Ended,
                SlotState::Empty => {}
            }
            if cancel() {
                return SlotPeek::Cancelled;
            }
            let now = Instant::now();
            if now >= deadline {
                return SlotPeek::Timeout;
            }
            let wait = (deadline - now).min(CANCEL_POLL);
            self.changed.wait_for(&mut state, wait);
        }
    }

    /// Master side: take the published frame.
    pub fn take(&self) -> Option<SlaveFrame> {
        let mut state = self.state.lock();
        let taken = match mem::take(&mut *state) {
            SlotState::Frame(frame) => Some(frame),
            other => {
                *state = other;
                None
            }
        };
        self.changed.notify_all();
        taken
    }

    /// Master side: discard the published frame, unblocking the slave.
    pub fn release(&self) {
        let mut state = self.state.lock();
        if matches!(*state, SlotState::Frame(_)) {
            *state = SlotState::Empty;
        }
        self.changed.notify_all();
    }

    /// Back to empty, also clearing an end-of-stream mark.
    pub fn reset(&self) {
        *self.state.lock() = SlotState::Empty;
        self.changed.notify_all();
    }

    pub fn has_frame(&self) -> bool {
        matches!(*self.state.lock(), SlotState::Frame(_))
    }

    /// Wake every waiter so it can recheck its cancel condition.
    pub fn wake(&self) {
        self.changed.notify_all();
    }
}
