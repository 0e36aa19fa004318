//! # Parallax Core
//!
//! Stereoscopic video decode pipeline: compressed packets in, matched
//! left/right images out, paced against an external audio clock.
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────────┐   ┌──────────────┐
//! │ PacketQueue │──►│ VideoDecoder │──►│ FrameAdapter  │──►│ TextureSink  │
//! │ (bounded)   │   │ (one thread) │   │ (zero-copy /  │   │ (consumer)   │
//! └─────────────┘   └──────┬───────┘   │  RGB scaler)  │   └──────────────┘
//!                          │           └───────────────┘
//!                   ┌──────┴───────┐
//!                   │ slave thread │  (dual-file stereo, rendezvous slot)
//!                   └──────────────┘
//! ```

// ============================================================================
// Shared vocabulary
// ============================================================================
pub mod config;
pub mod rational;
pub mod signal;
pub mod stereo;

// ============================================================================
// Packets and frames
// ============================================================================
pub mod frame;
pub mod image;
pub mod packet;
pub mod packet_queue;
pub mod pixel;
pub mod stream;

// ============================================================================
// Decode pipeline
// ============================================================================
pub mod adapter;
pub mod codec;
pub mod decoder;
pub mod pairing;
pub mod scaler;
pub mod sync;
pub mod texture_queue;

// ============================================================================
// Export
// ============================================================================
pub mod remux;

pub use config::DecoderConfig;
pub use decoder::{DecoderError, DecoderStats, LoopState, VideoDecoder};
pub use packet::{CompressedPacket, PacketKind};
pub use packet_queue::PacketQueue;
pub use stereo::{SharedStereoParams, StereoFormat, StereoParams};
pub use texture_queue::{StereoFrame, TextureQueue, TextureSink};

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
