//! # Texture Queue - Output side of the decode pipeline
//!
//! The decode loop hands finished stereo pairs to a [`TextureSink`]. The
//! sink is owned by the display side and synchronizes itself; the decoder
//! only polls [`TextureSink::is_full`] before pushing.
//!
//! [`TextureQueue`] is a bounded in-memory sink, used by headless consumers
//! and by the tests.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::image::{NormalizedImage, PlaneFormat};
use crate::stereo::{CubemapLayout, SharedStereoParams, StereoFormat};

// ============================================================================
// Device capabilities
// ============================================================================

/// Plane formats the consumer can upload without conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCaps {
    formats: HashSet<PlaneFormat>,
}

impl DeviceCaps {
    pub fn new(formats: &[PlaneFormat]) -> Self {
        Self {
            formats: formats.iter().copied().collect(),
        }
    }

    pub fn is_supported(&self, format: PlaneFormat) -> bool {
        self.formats.contains(&format)
    }
}

impl Default for DeviceCaps {
    fn default() -> Self {
        Self::new(&[
            PlaneFormat::Gray,
            PlaneFormat::Gray16,
            PlaneFormat::Uv,
            PlaneFormat::Rgb,
            PlaneFormat::Rgba,
            PlaneFormat::Rgb48,
        ])
    }
}

// ============================================================================
// Stereo frame
// ============================================================================

/// One unit of output: both eyes plus the geometry needed to display them.
#[derive(Debug, Clone)]
pub struct StereoFrame {
    pub left: NormalizedImage,
    /// Empty when the layout is packed into `left` or the right eye is missing.
    pub right: NormalizedImage,
    pub params: Option<SharedStereoParams>,
    pub format: StereoFormat,
    pub cubemap: CubemapLayout,
    /// Presentation time in seconds.
    pub pts: f64,
}

// ============================================================================
// Sink trait
// ============================================================================

pub trait TextureSink: Send + Sync {
    fn push(&self, frame: StereoFrame);
    fn is_full(&self) -> bool;
    fn is_empty(&self) -> bool;
    fn len(&self) -> usize;
    /// Drop every queued frame.
    fn clear(&self);
    /// Whether a decode session currently feeds this sink.
    fn set_connected_stream(&self, connected: bool);
    /// Show the next frame immediately, ignoring the playback timer.
    fn swap_front(&self);
    fn device_caps(&self) -> DeviceCaps;
}

// ============================================================================
// Bounded in-memory queue
// ============================================================================

pub struct TextureQueue {
    frames: Mutex<VecDeque<StereoFrame>>,
    ready: Condvar,
    capacity: usize,
    caps: DeviceCaps,
    connected: AtomicBool,
    swaps: AtomicU64,
    pushed: AtomicU64,
}

impl TextureQueue {
    pub fn new(capacity: usize) -> Self {
        Self::with_caps(capacity, DeviceCaps::default())
    }

    pub fn with_caps(capacity: usize, caps: DeviceCaps) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            ready: Condvar::new(),
            capacity: capacity.max(1),
            caps,
            connected: AtomicBool::new(false),
            swaps: AtomicU64::new(0),
            pushed: AtomicU64::new(0),
        }
    }

    /// Take the oldest frame.
    pub fn pop(&self) -> Option<StereoFrame> {
        self.frames.lock().pop_front()
    }

    /// Take the oldest frame, waiting at most `timeout` for one.
    pub fn pop_blocking(&self, timeout: Duration) -> Option<StereoFrame> {
        let deadline = Instant::now() + timeout;
        let mut frames = self.frames.lock();
        while frames.is_empty() {
            if self.ready.wait_until(&mut frames, deadline).timed_out() {
                break;
            }
        }
        frames.pop_front()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Number of forced front-buffer swaps requested so far.
    pub fn swap_count(&self) -> u64 {
        self.swaps.load(Ordering::Relaxed)
    }

    /// Total frames ever pushed.
    pub fn pushed_total(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }
}

impl TextureSink for TextureQueue {
    fn push(&self, frame: StereoFrame) {
        let mut frames = self.frames.lock();
        frames.push_back(frame);
        self.pushed.fetch_add(1, Ordering::Relaxed);
        drop(frames);
        self.ready.notify_one();
    }

    fn is_full(&self) -> bool {
        self.frames.lock().len() >= self.capacity
    }

    fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    fn len(&self) -> usize {
        self.frames.lock().len()
    }

    fn clear(&self) {
        self.frames.lock().clear();
    }

    fn set_connected_stream(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    fn swap_front(&self) {
        self.swaps.fetch_add(1, Ordering::Relaxed);
    }

    fn device_caps(&self) -> DeviceCaps {
        self.caps.clone()
    }
}
