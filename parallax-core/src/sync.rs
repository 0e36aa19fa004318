//! # A/V Sync
//!
//! Video is paced against an externally maintained audio clock. When video
//! falls behind by more than the discard threshold the codec is told to
//! skip non-reference frames until it catches up.
//!
//! ```text
//! diff = audio_clock + audio_delay - video_pts
//!
//!   diff <= 0.2s         decode everything
//!   0.2s < diff < 100s   skip non-reference frames
//!   diff >= 100s         discontinuity (seek), decode everything
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SyncConfig;

// ============================================================================
// Audio clock
// ============================================================================

/// Read-only view of the audio presentation clock.
pub trait AudioClock: Send + Sync {
    /// Current audio position in seconds.
    fn seconds(&self) -> f64;
}

/// Clock value shared between the audio output (writer) and decoders.
#[derive(Debug, Clone, Default)]
pub struct SharedAudioClock {
    bits: Arc<AtomicU64>,
}

impl SharedAudioClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, seconds: f64) {
        self.bits.store(seconds.to_bits(), Ordering::Release);
    }
}

impl AudioClock for SharedAudioClock {
    fn seconds(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }
}

// ============================================================================
// Discard gate
// ============================================================================

/// Codec frame-skipping mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Discard {
    /// Decode every frame.
    #[default]
    Default,
    /// Skip frames no other frame references.
    NonRef,
}

/// Tracks the discard mode of one master session.
#[derive(Debug, Clone)]
pub struct AudioSyncGate {
    threshold: f64,
    discontinuity: f64,
    mode: Discard,
}

impl AudioSyncGate {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            threshold: config.discard_threshold_secs,
            discontinuity: config.discontinuity_limit_secs,
            mode: Discard::Default,
        }
    }

    pub fn mode(&self) -> Discard {
        self.mode
    }

    /// Feed the clocks for one frame. Returns the new mode when it changed.
    pub fn update(&mut self, audio_clock: f64, video_pts: f64) -> Option<Discard> {
        let diff = audio_clock - video_pts;
        let wanted = if diff > self.threshold && diff < self.discontinuity {
            Discard::NonRef
        } else {
            Discard::Default
        };
        if wanted == self.mode {
            return None;
        }
        self.mode = wanted;
        match wanted {
            Discard::NonRef => debug!(
                "skip frames: non-ref (on) (aClock {:.3} vClock {:.3} diff {:.3})",
                audio_clock, video_pts, diff
            ),
            Discard::Default => debug!("skip frames: default (off)"),
        }
        Some(wanted)
    }

    pub fn reset(&mut self) {
        self.mode = Discard::Default;
    }
}
