//! Mock collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;

use parallax_core::codec::{
    CodecError, CodecFactory, CodecOpenParams, DecodeHooks, HwAccel, VideoCodec, VideoCodecId,
};
use parallax_core::frame::{DecodedFrame, FramePlane};
use parallax_core::pixel::PixelFormat;
use parallax_core::rational::Rational;
use parallax_core::stream::StreamInfo;
use parallax_core::sync::Discard;
use parallax_core::CompressedPacket;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Millisecond time base; packet pts are in milliseconds.
pub fn stream(width: u32, height: u32) -> StreamInfo {
    StreamInfo::new(VideoCodecId::H264, width, height, PixelFormat::Yuv420p)
        .with_time_base(Rational::new(1, 1000))
}

pub fn data_packet(pts_ms: i64) -> CompressedPacket {
    CompressedPacket::data(0, &[0x00, 0x00, 0x01, 0x65], Some(pts_ms))
}

/// A YUV 4:2:0 picture filled with a constant luma value.
pub fn yuv_frame(format: PixelFormat, width: u32, height: u32, luma: u8) -> DecodedFrame {
    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = ((w + 1) / 2, (h + 1) / 2);
    DecodedFrame::new(
        format,
        width,
        height,
        vec![
            FramePlane::new(Bytes::from(vec![luma; w * h]), w),
            FramePlane::new(Bytes::from(vec![128u8; cw * ch]), cw),
            FramePlane::new(Bytes::from(vec![128u8; cw * ch]), cw),
        ],
    )
}

// ============================================================================
// Codec
// ============================================================================

/// Emits one frame per data packet, carrying the packet's pts and side data.
pub struct MockCodec {
    width: u32,
    height: u32,
    use_hw: bool,
    hooks: Arc<dyn DecodeHooks>,
    format: Option<PixelFormat>,
    pending: VecDeque<DecodedFrame>,
    skip: Arc<Mutex<Vec<Discard>>>,
}

impl VideoCodec for MockCodec {
    fn name(&self) -> &str {
        "mock264"
    }

    fn send_packet(&mut self, packet: Option<&CompressedPacket>) -> Result<(), CodecError> {
        let Some(packet) = packet else {
            return Ok(());
        };
        if !self.pending.is_empty() {
            return Err(CodecError::WouldBlock);
        }
        let format = match self.format {
            Some(format) => format,
            None => {
                let candidates: &[PixelFormat] = if self.use_hw {
                    &[PixelFormat::Vaapi, PixelFormat::Yuv420p]
                } else {
                    &[PixelFormat::Yuv420p]
                };
                let chosen = self
                    .hooks
                    .select_format(candidates)
                    .ok_or_else(|| CodecError::Decode("no format".into()))?;
                self.format = Some(chosen);
                chosen
            }
        };

        let mut frame = yuv_frame(format, self.width, self.height, 16);
        frame.pts = packet.pts;
        frame.keyframe = packet.keyframe;
        frame.side_data = packet.side_data.clone();
        self.pending.push_back(frame);
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<DecodedFrame, CodecError> {
        self.pending.pop_front().ok_or(CodecError::NeedMoreInput)
    }

    fn flush(&mut self) {
        self.pending.clear();
    }

    fn set_skip_frame(&mut self, discard: Discard) {
        self.skip.lock().push(discard);
    }
}

#[derive(Default)]
pub struct MockFactory {
    pub opens: AtomicUsize,
    pub fail: AtomicBool,
    pub params: Mutex<Vec<CodecOpenParams>>,
    pub skip: Arc<Mutex<Vec<Discard>>>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn last_params(&self) -> Option<CodecOpenParams> {
        self.params.lock().last().cloned()
    }
}

impl CodecFactory for MockFactory {
    fn open(
        &self,
        params: &CodecOpenParams,
        hooks: Arc<dyn DecodeHooks>,
    ) -> Result<Box<dyn VideoCodec>, CodecError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CodecError::Open("decoder not found".into()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.params.lock().push(params.clone());
        Ok(Box::new(MockCodec {
            width: params.stream.width,
            height: params.stream.height,
            use_hw: params.use_hw,
            hooks,
            format: None,
            pending: VecDeque::new(),
            skip: self.skip.clone(),
        }))
    }
}

// ============================================================================
// Hardware accelerator
// ============================================================================

pub struct MockAccel {
    pub fail_init: bool,
    pub inits: Arc<AtomicUsize>,
}

impl MockAccel {
    pub fn boxed(fail_init: bool) -> Box<dyn HwAccel> {
        Box::new(Self {
            fail_init,
            inits: Arc::new(AtomicUsize::new(0)),
        })
    }
}

impl HwAccel for MockAccel {
    fn name(&self) -> &str {
        "mock-vaapi"
    }

    fn surface_format(&self) -> PixelFormat {
        PixelFormat::Vaapi
    }

    fn supports(&self, codec: VideoCodecId) -> bool {
        codec == VideoCodecId::H264
    }

    fn init(&mut self) -> Result<(), CodecError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        if self.fail_init {
            Err(CodecError::Hardware("device lost".into()))
        } else {
            Ok(())
        }
    }

    fn get_buffer(&mut self, _width: u32, _height: u32) -> Result<Bytes, CodecError> {
        Err(CodecError::Hardware("not used".into()))
    }

    fn retrieve_frame(&mut self, mut frame: DecodedFrame) -> Result<DecodedFrame, CodecError> {
        frame.format = PixelFormat::Yuv420p;
        Ok(frame)
    }

    fn destroy(&mut self) {}
}
