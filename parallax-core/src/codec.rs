//! # Codec Negotiation
//!
//! The actual bitstream decoding is done by an external codec library
//! reached through [`CodecFactory`] / [`VideoCodec`]. This module owns the
//! policy around it:
//!
//! - pixel format selection with hardware first, software fallback
//! - custom buffer allocation for hardware surfaces
//! - decode thread count
//!
//! ## Hardware fallback
//!
//! A failed accelerator init marks the session as failed. The flag
//! is sticky until the session is deinitialized; the decode loop notices the
//! change and reopens the codec in software mode.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::frame::DecodedFrame;
use crate::packet::CompressedPacket;
use crate::pixel::PixelFormat;
use crate::stream::StreamInfo;
use crate::sync::Discard;

#[derive(Debug, Error)]
pub enum CodecError {
    /// The codec cannot take input until a frame is retrieved.
    #[error("Decoder would block")]
    WouldBlock,
    /// No frame ready; send more input.
    #[error("Need more input")]
    NeedMoreInput,
    #[error("End of stream")]
    EndOfStream,
    #[error("Could not open codec: {0}")]
    Open(String),
    #[error("Decode failed: {0}")]
    Decode(String),
    #[error("Hardware acceleration failed: {0}")]
    Hardware(String),
}

// ============================================================================
// Codec identification
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoCodecId {
    H264,
    Hevc,
    Mpeg2,
    Mpeg4,
    Vc1,
    Wmv3,
    Vp8,
    Vp9,
    Av1,
    Jpeg2000,
    Mjpeg,
    Unknown,
}

impl VideoCodecId {
    /// Parse from a codec name or fourcc.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "h264" | "avc" | "avc1" => Self::H264,
            "h265" | "hevc" | "hvc1" | "hev1" => Self::Hevc,
            "mpeg2" | "mpeg2video" | "mpg2" | "mp2v" => Self::Mpeg2,
            "mpeg4" | "mp4v" | "xvid" => Self::Mpeg4,
            "vc1" | "wvc1" => Self::Vc1,
            "wmv3" => Self::Wmv3,
            "vp8" => Self::Vp8,
            "vp9" => Self::Vp9,
            "av1" | "av01" => Self::Av1,
            "jpeg2000" | "j2k" => Self::Jpeg2000,
            "mjpeg" | "mjpg" => Self::Mjpeg,
            _ => Self::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::H264 => "h264",
            Self::Hevc => "hevc",
            Self::Mpeg2 => "mpeg2video",
            Self::Mpeg4 => "mpeg4",
            Self::Vc1 => "vc1",
            Self::Wmv3 => "wmv3",
            Self::Vp8 => "vp8",
            Self::Vp9 => "vp9",
            Self::Av1 => "av1",
            Self::Jpeg2000 => "jpeg2000",
            Self::Mjpeg => "mjpeg",
            Self::Unknown => "unknown",
        }
    }
}

// ============================================================================
// Codec traits
// ============================================================================

/// An open decoding context.
pub trait VideoCodec: Send {
    fn name(&self) -> &str;

    /// Submit a packet; `None` starts draining buffered frames.
    fn send_packet(&mut self, packet: Option<&CompressedPacket>) -> Result<(), CodecError>;

    /// Fetch the next decoded frame.
    fn receive_frame(&mut self) -> Result<DecodedFrame, CodecError>;

    /// Drop all buffered state.
    fn flush(&mut self);

    fn set_skip_frame(&mut self, discard: Discard);
}

/// Parameters for opening a decoding context.
#[derive(Debug, Clone)]
pub struct CodecOpenParams {
    pub stream: StreamInfo,
    pub thread_count: usize,
    pub use_hw: bool,
    /// Decode the full coded picture (tiled 720p-in-1080p sources).
    pub ignore_crop: bool,
}

/// Outcome of the buffer allocation callback.
#[derive(Debug, Clone)]
pub enum BufferAllocation {
    /// Use the codec's own allocator.
    Default,
    Provided(Bytes),
    Failed,
}

/// Callbacks the codec invokes while decoding.
pub trait DecodeHooks: Send + Sync {
    /// Pick the output format from the codec's candidates (preferred first).
    fn select_format(&self, candidates: &[PixelFormat]) -> Option<PixelFormat>;

    /// Provide a frame buffer for `format`.
    fn allocate_buffer(&self, format: PixelFormat, width: u32, height: u32) -> BufferAllocation;
}

pub trait CodecFactory: Send + Sync {
    fn open(
        &self,
        params: &CodecOpenParams,
        hooks: Arc<dyn DecodeHooks>,
    ) -> Result<Box<dyn VideoCodec>, CodecError>;
}

/// Platform hardware decoder context (DXVA2, VideoToolbox, VA-API...).
pub trait HwAccel: Send {
    fn name(&self) -> &str;

    /// Surface format the codec offers when this accelerator can be used.
    fn surface_format(&self) -> PixelFormat;

    fn supports(&self, codec: VideoCodecId) -> bool;

    fn init(&mut self) -> Result<(), CodecError>;

    /// Whether frames must be allocated through [`HwAccel::get_buffer`].
    fn needs_custom_buffers(&self) -> bool {
        false
    }

    fn get_buffer(&mut self, width: u32, height: u32) -> Result<Bytes, CodecError>;

    /// Download a hardware frame into system memory.
    fn retrieve_frame(&mut self, frame: DecodedFrame) -> Result<DecodedFrame, CodecError>;

    fn destroy(&mut self);
}

// ============================================================================
// Format negotiator
// ============================================================================

/// Hardware/software policy shared between the decode loop and the codec callbacks.
pub struct FormatNegotiator {
    use_gpu: AtomicBool,
    gpu_failed: AtomicBool,
    accel: Mutex<Option<Box<dyn HwAccel>>>,
}

impl FormatNegotiator {
    pub fn new(use_gpu: bool, accel: Option<Box<dyn HwAccel>>) -> Self {
        Self {
            use_gpu: AtomicBool::new(use_gpu),
            gpu_failed: AtomicBool::new(false),
            accel: Mutex::new(accel),
        }
    }

    pub fn set_use_gpu(&self, use_gpu: bool) {
        self.use_gpu.store(use_gpu, Ordering::SeqCst);
    }

    pub fn use_gpu(&self) -> bool {
        self.use_gpu.load(Ordering::SeqCst)
    }

    pub fn gpu_failed(&self) -> bool {
        self.gpu_failed.load(Ordering::SeqCst)
    }

    pub fn mark_gpu_failed(&self) {
        self.gpu_failed.store(true, Ordering::SeqCst);
    }

    /// Hardware decoding requested and not failed.
    pub fn gpu_active(&self) -> bool {
        self.use_gpu() && !self.gpu_failed()
    }

    /// Mark hardware as failed up-front when nothing can accelerate `codec`.
    pub fn check_support(&self, codec: VideoCodecId) {
        let supported = self
            .accel
            .lock()
            .as_ref()
            .map_or(false, |accel| accel.supports(codec));
        if !supported {
            self.mark_gpu_failed();
        }
    }

    pub fn accel_name(&self) -> Option<String> {
        self.accel.lock().as_ref().map(|a| a.name().to_string())
    }

    /// Download `frame` if it lives on the GPU.
    pub fn retrieve(&self, frame: DecodedFrame) -> Result<DecodedFrame, CodecError> {
        if !frame.format.is_hardware() {
            return Ok(frame);
        }
        match self.accel.lock().as_mut() {
            Some(accel) => accel.retrieve_frame(frame),
            None => Err(CodecError::Hardware("no accelerator for hardware frame".into())),
        }
    }

    /// Release the hardware context; the next session starts without failure.
    pub fn reset(&self) {
        self.gpu_failed.store(false, Ordering::SeqCst);
        if let Some(accel) = self.accel.lock().as_mut() {
            accel.destroy();
        }
    }

    fn default_format(candidates: &[PixelFormat]) -> Option<PixelFormat> {
        candidates
            .iter()
            .copied()
            .find(|f| !f.is_hardware())
            .or_else(|| candidates.first().copied())
    }
}

impl DecodeHooks for FormatNegotiator {
    fn select_format(&self, candidates: &[PixelFormat]) -> Option<PixelFormat> {
        if !self.gpu_active() {
            return Self::default_format(candidates);
        }

        let mut guard = self.accel.lock();
        let Some(accel) = guard.as_mut() else {
            return Self::default_format(candidates);
        };
        let surface = accel.surface_format();
        if candidates.contains(&surface) {
            return match accel.init() {
                Ok(()) => Some(surface),
                Err(err) => {
                    debug!("{} init failed, falling back to software: {}", accel.name(), err);
                    self.mark_gpu_failed();
                    Self::default_format(candidates)
                }
            };
        }
        candidates.first().copied()
    }

    fn allocate_buffer(&self, format: PixelFormat, width: u32, height: u32) -> BufferAllocation {
        let mut guard = self.accel.lock();
        match guard.as_mut() {
            Some(accel) if format == accel.surface_format() && accel.needs_custom_buffers() => {
                match accel.get_buffer(width, height) {
                    Ok(buf) => BufferAllocation::Provided(buf),
                    Err(_) => BufferAllocation::Failed,
                }
            }
            _ => BufferAllocation::Default,
        }
    }
}

impl std::fmt::Debug for FormatNegotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatNegotiator")
            .field("use_gpu", &self.use_gpu())
            .field("gpu_failed", &self.gpu_failed())
            .field("accel", &self.accel_name())
            .finish()
    }
}

/// Decode threads: one for hardware decoding and attached pictures,
/// otherwise one per logical processor.
pub fn decode_thread_count(use_hw: bool, attached_picture: bool) -> usize {
    if use_hw || attached_picture {
        1
    } else {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}
