//! # Video Decoder
//!
//! One decode thread per elementary stream. The thread pops packets from a
//! bounded [`PacketQueue`], runs them through the codec, normalizes the
//! pictures and hands stereo pairs to the [`TextureSink`].
//!
//! Two decoders may be linked for dual-file stereo: the master decodes the
//! left eye and owns the output; the slave decodes the right eye and
//! publishes each picture into a rendezvous slot the master pairs from.
//!
//! ## Control packets
//!
//! ```text
//!   Start  ─► Active     reset clocks, baseline applied on the next frame
//!   Data   ─► (decode)   Idle becomes Active
//!   Flush  ─► Flushing   drop codec state and queued textures, then Idle
//!   End    ─► Draining   wait for the consumer to drain, then Idle
//!   Quit   ─► Terminated
//! ```
//!
//! `Quit` also raises a flag checked by every wait in the loop, so a
//! thread blocked on a full output or an absent partner stops within one
//! polling interval.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::adapter::{AdapterError, FrameAdapter};
use crate::codec::{
    decode_thread_count, CodecError, CodecFactory, CodecOpenParams, DecodeHooks,
    FormatNegotiator, HwAccel, VideoCodec,
};
use crate::config::{ConfigError, DecoderConfig};
use crate::frame::DecodedFrame;
use crate::image::NormalizedImage;
use crate::packet::{z_rotation_from_matrix, CompressedPacket, PacketKind, SideData, StereoView};
use crate::packet_queue::{PacketQueue, QueueFull};
use crate::pairing::{
    match_slave, DelayTracker, FormatResolver, FrameSequencer, SlaveDecision, SlaveFrame,
    SlaveSlot, SlotPeek,
};
use crate::signal::ErrorSignal;
use crate::stereo::{
    format_from_name, probe_panorama, CubemapLayout, SharedStereoParams, StereoFormat,
    ViewSurface, STEREO_MODE_TAG, WMV_LAYOUT_TAG,
};
use crate::stream::StreamInfo;
use crate::sync::{AudioClock, AudioSyncGate, Discard};
use crate::texture_queue::{StereoFrame, TextureSink};

const HALF_HEIGHT_TAG: &str = "StereoscopicHalfHeight";
const HALF_WIDTH_TAG: &str = "StereoscopicHalfWidth";
const H_PARALLAX_TAG: &str = "StereoscopicHorizontalParallax";

/// Poll step while waiting for the consumer to drain at end of stream.
const DRAIN_POLL: Duration = Duration::from_millis(2);

// ============================================================================
// Errors and public state
// ============================================================================

#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("Invalid stream: frame size {width}x{height}")]
    InvalidStream { width: u32, height: u32 },
    #[error("Could not open video codec: {0}")]
    CodecOpen(#[source] CodecError),
    #[error("Could not re-open video codec: {0}")]
    CodecReopen(#[source] CodecError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Decoder already has a stereo partner")]
    PartnerAttached,
    #[error("Failed to spawn decode thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Decode loop state, observable from any thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum LoopState {
    Idle = 0,
    Active = 1,
    Flushing = 2,
    Draining = 3,
    Terminated = 4,
}

impl LoopState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Active,
            2 => Self::Flushing,
            3 => Self::Draining,
            4 => Self::Terminated,
            _ => Self::Idle,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub frames_pushed: u64,
    /// Frames dropped by the adapter (unsupported or failed conversion).
    pub frames_skipped: u64,
    pub codec_opens: u64,
    pub discard: Discard,
    pub hw_active: bool,
}

#[derive(Debug, Default)]
struct Counters {
    decoded: AtomicU64,
    pushed: AtomicU64,
    skipped: AtomicU64,
    opens: AtomicU64,
    non_ref: AtomicBool,
    hw_active: AtomicBool,
}

/// Runtime knobs, read by the decode thread on every frame.
#[derive(Debug, Clone, Copy)]
struct Knobs {
    user_format: StereoFormat,
    audio_delay_ms: i32,
    theater_mode: bool,
    stick_pano_360: bool,
    swap_jps: bool,
}

impl From<&DecoderConfig> for Knobs {
    fn from(config: &DecoderConfig) -> Self {
        Self {
            user_format: config.user_format,
            audio_delay_ms: config.audio_delay_ms,
            theater_mode: config.theater_mode,
            stick_pano_360: config.stick_pano_360,
            swap_jps: config.swap_jps,
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// Everything that lives from `init` to `deinit`.
struct Session {
    stream: StreamInfo,
    codec: Box<dyn VideoCodec>,
    /// The codec was opened with hardware decoding requested.
    codec_hw: bool,
    ignore_crop: bool,
    adapter: FrameAdapter,
    resolver: FormatResolver,
    sequencer: FrameSequencer,
    sync_gate: AudioSyncGate,
    /// Stream pixel ratio including anamorphic compensation.
    pixel_ratio: f32,
    h_parallax: i32,
    rotate_deg: f32,
    description: String,
}

/// Session handover from the control thread to the decode thread.
enum SessionSwap {
    Install(Box<Session>),
    Clear,
}

/// Decode-thread state that survives sessions.
struct LoopCtx {
    delay: DelayTracker,
    /// A Start was seen and the baseline has not been applied yet.
    is_started: bool,
    /// Promote the next pushed frame to the front buffer.
    was_flushed: bool,
}

enum LoopExit {
    Quit,
    Fatal(DecoderError),
}

// ============================================================================
// Shared state
// ============================================================================

struct DecoderShared {
    config: DecoderConfig,
    packets: PacketQueue,
    textures: Arc<dyn TextureSink>,
    audio_clock: Arc<dyn AudioClock>,
    errors: ErrorSignal,
    factory: Arc<dyn CodecFactory>,
    negotiator: Arc<FormatNegotiator>,
    knobs: RwLock<Knobs>,

    to_quit: AtomicBool,
    to_flush: AtomicBool,
    downtime: AtomicBool,
    state: AtomicU8,

    incoming: Mutex<Option<SessionSwap>>,
    description: Mutex<String>,
    counters: Counters,

    /// Set on the master once a slave attaches.
    slave: OnceCell<Arc<DecoderShared>>,
    /// Set on the slave at construction.
    master: Option<Weak<DecoderShared>>,
    /// Slave side: where this decoder publishes its frames.
    slot: SlaveSlot,
    /// Slave side: discard mode requested by the master's sync gate.
    pending_discard: Mutex<Option<Discard>>,
}

impl DecoderShared {
    fn new(
        config: DecoderConfig,
        factory: Arc<dyn CodecFactory>,
        textures: Arc<dyn TextureSink>,
        audio_clock: Arc<dyn AudioClock>,
        errors: ErrorSignal,
        hwaccel: Option<Box<dyn HwAccel>>,
        master: Option<Weak<DecoderShared>>,
    ) -> Self {
        Self {
            packets: PacketQueue::new(config.packet_queue_capacity),
            negotiator: Arc::new(FormatNegotiator::new(config.use_gpu, hwaccel)),
            knobs: RwLock::new(Knobs::from(&config)),
            config,
            textures,
            audio_clock,
            errors,
            factory,
            to_quit: AtomicBool::new(false),
            to_flush: AtomicBool::new(false),
            downtime: AtomicBool::new(true),
            state: AtomicU8::new(LoopState::Idle as u8),
            incoming: Mutex::new(None),
            description: Mutex::new(String::new()),
            counters: Counters::default(),
            slave: OnceCell::new(),
            master,
            slot: SlaveSlot::new(),
            pending_discard: Mutex::new(None),
        }
    }

    fn is_slave(&self) -> bool {
        self.master.is_some()
    }

    fn quitting(&self) -> bool {
        self.to_quit.load(Ordering::SeqCst)
    }

    fn cancelled(&self) -> bool {
        self.quitting() || self.to_flush.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: LoopState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn state(&self) -> LoopState {
        LoopState::from_u8(self.state.load(Ordering::SeqCst))
    }

    // ------------------------------------------------------------------------
    // Session setup (caller thread)
    // ------------------------------------------------------------------------

    fn open_codec(
        &self,
        stream: &StreamInfo,
        use_hw: bool,
        ignore_crop: bool,
    ) -> Result<(Box<dyn VideoCodec>, String), CodecError> {
        let params = CodecOpenParams {
            stream: stream.clone(),
            thread_count: decode_thread_count(use_hw, stream.attached_picture),
            use_hw,
            ignore_crop,
        };
        let hooks: Arc<dyn DecodeHooks> = self.negotiator.clone();
        let codec = self.factory.open(&params, hooks)?;

        let mut description = format!("{} ({} threads)", codec.name(), params.thread_count);
        if use_hw {
            if let Some(accel) = self.negotiator.accel_name() {
                description.push_str(&format!(" [{}]", accel));
            }
        }
        info!("Opened video codec {}", description);

        self.counters.opens.fetch_add(1, Ordering::Relaxed);
        self.counters.hw_active.store(use_hw, Ordering::Relaxed);
        *self.description.lock() = description.clone();
        Ok((codec, description))
    }

    fn open_session(
        &self,
        stream: StreamInfo,
        params: &SharedStereoParams,
    ) -> Result<Session, DecoderError> {
        if !stream.is_valid() {
            return Err(DecoderError::InvalidStream {
                width: stream.width,
                height: stream.height,
            });
        }

        self.negotiator.reset();
        self.negotiator.check_support(stream.codec_id);
        let use_hw = self.negotiator.gpu_active();
        let ignore_crop = stream.is_720_in_1080();
        let (codec, description) = self
            .open_codec(&stream, use_hw, ignore_crop)
            .map_err(DecoderError::CodecOpen)?;

        // WMV stereo tags
        let mut ratio_comp = 1.0f32;
        if let Some(value) = stream.container_tag(HALF_HEIGHT_TAG) {
            if value == "1" {
                ratio_comp = 0.5;
            }
        } else if stream.container_tag(HALF_WIDTH_TAG) == Some("1") {
            ratio_comp = 2.0;
        }
        let h_parallax = stream
            .container_tag(H_PARALLAX_TAG)
            .and_then(|v| v.trim().parse::<i32>().ok())
            .unwrap_or(0);

        let mut rotate_deg = 0.0f32;
        {
            let mut p = params.write();
            for side in &stream.side_data {
                if let SideData::Spherical(mapping) = side {
                    let mode = mapping.viewing_mode();
                    if mode != ViewSurface::Plain {
                        p.viewing_mode = mode;
                    }
                    if p.viewing_mode != ViewSurface::Plain && p.is_zero_rotate() {
                        let [yaw, pitch, roll] = mapping.rotation_baseline();
                        rotate_deg = roll.trunc();
                        p.set_rotate_zero(yaw, pitch, rotate_deg);
                    }
                    break;
                }
            }
        }
        for side in &stream.side_data {
            if let SideData::DisplayMatrix(matrix) = side {
                if let Some(z) = z_rotation_from_matrix(matrix) {
                    rotate_deg = z;
                }
                break;
            }
        }

        let mut in_stream = if stream.is_720_in_1080() {
            StereoFormat::Tiled4x
        } else {
            StereoFormat::Auto
        };
        let tag = stream
            .tag(STEREO_MODE_TAG)
            .or_else(|| stream.container_tag(WMV_LAYOUT_TAG));
        if let Some(format) = tag.and_then(StereoFormat::from_tag) {
            in_stream = format;
        }

        let knobs = *self.knobs.read();
        let hint = format_from_name(&stream.file_name, knobs.swap_jps);
        if in_stream == StereoFormat::Auto && hint.anamorphic {
            if hint.format.is_side_by_side() {
                ratio_comp = 2.0;
            } else if hint.format.is_top_bottom() {
                ratio_comp = 0.5;
            }
        }

        debug!(
            "Stream {}x{} {}: in-stream {:?}, by name {:?}, rotate {}",
            stream.width, stream.height, stream.pixel_format, in_stream, hint.format, rotate_deg
        );

        let caps = self.textures.device_caps();
        Ok(Session {
            pixel_ratio: stream.pixel_ratio() * ratio_comp,
            codec,
            codec_hw: use_hw,
            ignore_crop,
            adapter: FrameAdapter::new(caps),
            resolver: FormatResolver {
                by_user: knobs.user_format,
                in_stream,
                by_name: hint.format,
            },
            sequencer: FrameSequencer::default(),
            sync_gate: AudioSyncGate::new(&self.config.sync),
            h_parallax,
            rotate_deg,
            description,
            stream,
        })
    }

    // ------------------------------------------------------------------------
    // Decode thread
    // ------------------------------------------------------------------------

    fn run(&self) {
        let mut session: Option<Session> = None;
        let mut ctx = LoopCtx {
            delay: DelayTracker::new(
                self.config.sync.initial_average_delay_secs,
                self.config.sync.max_frame_delay_secs,
            ),
            is_started: false,
            was_flushed: false,
        };

        while !self.quitting() {
            if self.packets.is_empty() {
                self.downtime.store(true, Ordering::SeqCst);
            }
            let Some(packet) = self.packets.pop_timeout(self.config.poll_interval()) else {
                continue;
            };
            self.downtime.store(false, Ordering::SeqCst);

            if let Some(swap) = self.incoming.lock().take() {
                let next = match swap {
                    SessionSwap::Install(next) => Some(*next),
                    SessionSwap::Clear => None,
                };
                let replaced = session.take();
                match (replaced, next.is_some()) {
                    (Some(old), false) => self.release_session(old),
                    (old, _) => drop(old),
                }
                session = next;
            }

            match packet.kind {
                PacketKind::Quit => break,
                PacketKind::Flush => {
                    self.on_flush(session.as_mut(), &mut ctx);
                    continue;
                }
                PacketKind::Start => {
                    ctx.delay.restart();
                    ctx.is_started = true;
                    ctx.was_flushed = true;
                    if self.is_slave() {
                        self.slot.reset();
                    }
                    self.set_state(LoopState::Active);
                    continue;
                }
                PacketKind::End => {
                    self.on_end(&ctx);
                    continue;
                }
                PacketKind::Data | PacketKind::Last => {}
            }

            // discarded until the next init
            let Some(current) = session.as_mut() else {
                continue;
            };
            if self.state() == LoopState::Idle {
                self.set_state(LoopState::Active);
            }

            match self.decode_packet(current, &mut ctx, &packet) {
                Ok(()) => {}
                Err(LoopExit::Quit) => break,
                Err(LoopExit::Fatal(err)) => {
                    self.errors.emit(&err.to_string());
                    if let Some(old) = session.take() {
                        self.release_session(old);
                    }
                    self.set_state(LoopState::Idle);
                }
            }
        }

        if let Some(old) = session.take() {
            self.release_session(old);
        }
        self.downtime.store(true, Ordering::SeqCst);
        self.set_state(LoopState::Terminated);
        debug!("Decode thread finished");
    }

    /// Drop the session's codec and hardware context.
    fn release_session(&self, session: Session) {
        drop(session);
        self.negotiator.reset();
        self.counters.hw_active.store(false, Ordering::Relaxed);
        if !self.is_slave() {
            self.textures.clear();
            self.textures.set_connected_stream(false);
        }
    }

    fn on_flush(&self, session: Option<&mut Session>, ctx: &mut LoopCtx) {
        self.set_state(LoopState::Flushing);
        if let Some(session) = session {
            session.codec.flush();
            session.sequencer.drop_cached();
        }
        if self.is_slave() {
            self.slot.reset();
        } else {
            self.textures.clear();
        }
        self.to_flush.store(false, Ordering::SeqCst);
        ctx.was_flushed = true;
        self.set_state(LoopState::Idle);
    }

    fn on_end(&self, ctx: &LoopCtx) {
        self.set_state(LoopState::Draining);
        if let Some(master) = &self.master {
            self.slot.finish(|| {
                self.quitting()
                    || master
                        .upgrade()
                        .map_or(true, |m| m.downtime.load(Ordering::SeqCst))
            });
        } else {
            if let Some(slave) = self.slave.get() {
                slave.slot.release();
            }
            let bound = ctx.delay.average() * self.textures.len() as f64 + 0.1;
            let started = Instant::now();
            while !self.textures.is_empty()
                && !self.quitting()
                && started.elapsed().as_secs_f64() < bound
            {
                thread::sleep(DRAIN_POLL);
            }
        }
        self.set_state(LoopState::Idle);
    }

    fn decode_packet(
        &self,
        session: &mut Session,
        ctx: &mut LoopCtx,
        packet: &CompressedPacket,
    ) -> Result<(), LoopExit> {
        if let Some(mode) = self.pending_discard.lock().take() {
            session.codec.set_skip_frame(mode);
        }

        // hardware toggled between packets
        let want_hw = self.negotiator.gpu_active();
        if want_hw != session.codec_hw {
            self.reopen_codec(session, want_hw)?;
        }

        let input = (packet.kind == PacketKind::Data).then_some(packet);
        let mut to_send = true;
        loop {
            if self.quitting() {
                return Err(LoopExit::Quit);
            }
            if to_send {
                to_send = false;
                match session.codec.send_packet(input) {
                    Ok(()) | Err(CodecError::EndOfStream) => {}
                    Err(CodecError::WouldBlock) => to_send = true,
                    Err(err) => {
                        debug!("{} rejected packet: {}", session.codec.name(), err);
                        return Ok(());
                    }
                }
            }

            let frame = match session.codec.receive_frame() {
                Ok(frame) => frame,
                Err(CodecError::WouldBlock) | Err(CodecError::NeedMoreInput) => {
                    if to_send {
                        thread::sleep(self.config.poll_interval());
                        continue;
                    }
                    return Ok(());
                }
                Err(CodecError::EndOfStream) => return Ok(()),
                Err(err) => {
                    warn!("{} failed to decode frame: {}", session.codec.name(), err);
                    return Ok(());
                }
            };

            // hardware init failed inside the codec callbacks
            let want_hw = self.negotiator.gpu_active();
            if want_hw != session.codec_hw {
                self.reopen_codec(session, want_hw)?;
                to_send = true;
                continue;
            }

            self.handle_frame(session, ctx, packet, frame)?;
        }
    }

    fn reopen_codec(&self, session: &mut Session, use_hw: bool) -> Result<(), LoopExit> {
        info!("Re-opening video codec (hw: {})", use_hw);
        let (codec, description) = self
            .open_codec(&session.stream, use_hw, session.ignore_crop)
            .map_err(|err| LoopExit::Fatal(DecoderError::CodecReopen(err)))?;
        session.codec = codec;
        session.codec_hw = use_hw;
        session.description = description;
        if !self.is_slave() {
            session.codec.set_skip_frame(session.sync_gate.mode());
        }
        Ok(())
    }

    fn handle_frame(
        &self,
        session: &mut Session,
        ctx: &mut LoopCtx,
        packet: &CompressedPacket,
        frame: DecodedFrame,
    ) -> Result<(), LoopExit> {
        if packet.keyframe {
            session.sequencer.on_keyframe();
        }
        let pts = session.stream.time_base.units_to_seconds(frame.presentation_ts())
            - session.stream.start_time;
        ctx.delay.update(pts);
        self.counters.decoded.fetch_add(1, Ordering::Relaxed);

        let knobs = *self.knobs.read();
        if !self.is_slave() {
            let audio = self.audio_clock.seconds() + f64::from(knobs.audio_delay_ms) * 0.001;
            if let Some(mode) = session.sync_gate.update(audio, pts) {
                session.codec.set_skip_frame(mode);
                if let Some(slave) = self.slave.get() {
                    *slave.pending_discard.lock() = Some(mode);
                }
                self.counters
                    .non_ref
                    .store(mode == Discard::NonRef, Ordering::Relaxed);
            }
        }

        let frame = match self.negotiator.retrieve(frame) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("Failed to retrieve hardware frame: {}", err);
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
        };

        for side in &frame.side_data {
            match side {
                SideData::Stereo3d(stereo) if !self.is_slave() => {
                    session.resolver.in_stream = stereo.to_format();
                    if session.resolver.in_stream == StereoFormat::FrameSequence
                        && stereo.view != StereoView::Packed
                    {
                        session.sequencer.set_view(stereo.view);
                    }
                }
                SideData::DisplayMatrix(matrix) => {
                    if let Some(z) = z_rotation_from_matrix(matrix) {
                        session.rotate_deg = z;
                    }
                }
                _ => {}
            }
        }
        if let Some(format) = frame.tag(STEREO_MODE_TAG).and_then(StereoFormat::from_tag) {
            session.resolver.in_stream = format;
        }

        session.resolver.by_user = knobs.user_format;
        let src_format = session.resolver.resolve();
        let cubemap = match packet.params.as_ref().map(|p| p.read().viewing_mode) {
            Some(ViewSurface::Cubemap) => CubemapLayout::Packed,
            Some(ViewSurface::CubemapEac) => CubemapLayout::PackedEac,
            _ => CubemapLayout::Off,
        };

        let image = match session.adapter.prepare(
            &frame,
            src_format,
            session.pixel_ratio,
            session.stream.color_range,
        ) {
            Ok(Some(image)) => image,
            Ok(None) => {
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            Err(err) if err.is_fatal() => return Err(LoopExit::Fatal(err.into())),
            Err(err) => {
                self.errors.emit(&err.to_string());
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
        };
        if let Some(notice) = session.adapter.scaler_notice() {
            let mut description = self.description.lock();
            if !description.contains(notice) {
                *description = format!("{}\n{}", session.description, notice);
            }
        }

        let out = Output {
            params: packet.params.clone(),
            cubemap,
            pts,
        };

        if let Some(slave) = self.slave.get() {
            self.apply_baseline(session, ctx, &out.params);
            return self.pair_with_slave(slave, ctx, image, src_format, out);
        }

        if self.is_slave() {
            let published = self.slot.publish(SlaveFrame { image, pts }, || self.cancelled());
            if !published && self.quitting() {
                return Err(LoopExit::Quit);
            }
            return Ok(());
        }

        self.apply_baseline(session, ctx, &out.params);
        if src_format == StereoFormat::FrameSequence {
            if let Some((left, right)) = session.sequencer.pair(image) {
                self.push_frame(ctx, left, right, src_format, out)?;
            }
        } else if session.resolver.in_stream == StereoFormat::FrameSequence {
            // shown as mono: right views are dropped
            if session.sequencer.advance() {
                self.push_frame(ctx, image, NormalizedImage::empty(), src_format, out)?;
            }
        } else {
            self.push_frame(ctx, image, NormalizedImage::empty(), src_format, out)?;
        }
        Ok(())
    }

    /// Write the per-session baseline on the first frame after Start.
    fn apply_baseline(
        &self,
        session: &Session,
        ctx: &mut LoopCtx,
        params: &Option<SharedStereoParams>,
    ) {
        if !ctx.is_started {
            return;
        }
        if let Some(params) = params {
            let mut p = params.write();
            p.set_separation_neutral(session.h_parallax);
            p.set_z_rotate_zero(session.rotate_deg);
        }
        ctx.is_started = false;
    }

    fn pair_with_slave(
        &self,
        slave: &DecoderShared,
        ctx: &mut LoopCtx,
        left: NormalizedImage,
        src_format: StereoFormat,
        out: Output,
    ) -> Result<(), LoopExit> {
        loop {
            match slave.slot.wait_frame(self.config.slave_wait(), || self.cancelled()) {
                SlotPeek::Frame(right_pts) => {
                    let decision = match_slave(
                        out.pts,
                        right_pts,
                        ctx.delay.average(),
                        self.config.sync.seek_mismatch_secs,
                    );
                    match decision {
                        SlaveDecision::Accept => {
                            return match slave.slot.take() {
                                Some(right) => self.push_frame(
                                    ctx,
                                    left,
                                    right.image,
                                    StereoFormat::SeparateFrames,
                                    out,
                                ),
                                None => self.push_frame(
                                    ctx,
                                    left,
                                    NormalizedImage::empty(),
                                    src_format,
                                    out,
                                ),
                            };
                        }
                        SlaveDecision::WaitNewer => slave.slot.release(),
                        SlaveDecision::AheadKeep => {
                            return self.push_frame(
                                ctx,
                                left,
                                NormalizedImage::empty(),
                                src_format,
                                out,
                            );
                        }
                        SlaveDecision::AheadDiscard => {
                            debug!(
                                "Slave ahead by {:.3}s, assuming independent seek",
                                right_pts - out.pts
                            );
                            slave.slot.release();
                            return self.push_frame(
                                ctx,
                                left,
                                NormalizedImage::empty(),
                                src_format,
                                out,
                            );
                        }
                    }
                }
                SlotPeek::Ended | SlotPeek::Timeout => {
                    return self.push_frame(ctx, left, NormalizedImage::empty(), src_format, out);
                }
                SlotPeek::Cancelled => {
                    return if self.quitting() {
                        Err(LoopExit::Quit)
                    } else {
                        Ok(())
                    };
                }
            }
        }
    }

    fn push_frame(
        &self,
        ctx: &mut LoopCtx,
        left: NormalizedImage,
        right: NormalizedImage,
        format: StereoFormat,
        out: Output,
    ) -> Result<(), LoopExit> {
        while !self.cancelled() && self.textures.is_full() {
            thread::sleep(self.config.output_poll_interval());
        }
        if self.quitting() {
            return Err(LoopExit::Quit);
        }
        if self.to_flush.load(Ordering::SeqCst) {
            // stale frame from before the flush
            return Ok(());
        }

        if let Some(params) = &out.params {
            let knobs = *self.knobs.read();
            let mut p = params.write();
            p.src1_size = left.size();
            p.src2_size = right.size();
            p.src_format = format;
            if knobs.stick_pano_360 && p.viewing_mode == ViewSurface::Plain {
                p.viewing_mode = probe_panorama(format, p.src1_size, p.src2_size);
            }
            let mode = p.viewing_mode;
            match mode {
                ViewSurface::Plain if knobs.theater_mode => p.viewing_mode = ViewSurface::Theater,
                ViewSurface::Theater if !knobs.theater_mode => p.viewing_mode = ViewSurface::Plain,
                _ => {}
            }
        }

        self.textures.push(StereoFrame {
            left,
            right,
            params: out.params,
            format,
            cubemap: out.cubemap,
            pts: out.pts,
        });
        self.textures.set_connected_stream(true);
        if ctx.was_flushed {
            self.textures.swap_front();
            ctx.was_flushed = false;
        }
        self.counters.pushed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Per-frame output attributes carried to the push.
struct Output {
    params: Option<SharedStereoParams>,
    cubemap: CubemapLayout,
    pts: f64,
}

// ============================================================================
// Public handle
// ============================================================================

/// Handle to one decode thread. Dropping it stops and joins the thread.
pub struct VideoDecoder {
    shared: Arc<DecoderShared>,
    thread: Option<JoinHandle<()>>,
}

impl VideoDecoder {
    /// Create a stand-alone (or master) decoder and start its thread.
    pub fn new(
        config: DecoderConfig,
        factory: Arc<dyn CodecFactory>,
        textures: Arc<dyn TextureSink>,
        audio_clock: Arc<dyn AudioClock>,
        errors: ErrorSignal,
        hwaccel: Option<Box<dyn HwAccel>>,
    ) -> Result<Self, DecoderError> {
        config.validate()?;
        let shared = Arc::new(DecoderShared::new(
            config,
            factory,
            textures,
            audio_clock,
            errors,
            hwaccel,
            None,
        ));
        Self::spawn(shared, "video-decode-master")
    }

    /// Create the right-eye decoder for `master`. Output, clock and error
    /// channel are shared with the master.
    pub fn new_slave(
        master: &VideoDecoder,
        config: DecoderConfig,
        factory: Arc<dyn CodecFactory>,
        hwaccel: Option<Box<dyn HwAccel>>,
    ) -> Result<Self, DecoderError> {
        config.validate()?;
        let owner = &master.shared;
        if owner.is_slave() {
            return Err(DecoderError::PartnerAttached);
        }
        let shared = Arc::new(DecoderShared::new(
            config,
            factory,
            owner.textures.clone(),
            owner.audio_clock.clone(),
            owner.errors.clone(),
            hwaccel,
            Some(Arc::downgrade(owner)),
        ));
        owner
            .slave
            .set(shared.clone())
            .map_err(|_| DecoderError::PartnerAttached)?;
        Self::spawn(shared, "video-decode-slave")
    }

    fn spawn(shared: Arc<DecoderShared>, name: &str) -> Result<Self, DecoderError> {
        let worker = shared.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker.run())?;
        Ok(Self {
            shared,
            thread: Some(handle),
        })
    }

    /// Open a decoding session for `stream`.
    ///
    /// Stream-level geometry (viewing surface, rotation baseline) is written
    /// into `params`. The session is picked up by the decode thread with the
    /// next packet. Failures are also reported on the error channel.
    pub fn init(&self, stream: StreamInfo, params: &SharedStereoParams) -> Result<(), DecoderError> {
        match self.shared.open_session(stream, params) {
            Ok(session) => {
                *self.shared.incoming.lock() = Some(SessionSwap::Install(Box::new(session)));
                Ok(())
            }
            Err(err) => {
                self.shared.errors.emit(&err.to_string());
                *self.shared.incoming.lock() = Some(SessionSwap::Clear);
                Err(err)
            }
        }
    }

    /// End the session; queued data packets are discarded until the next init.
    pub fn deinit(&self) {
        *self.shared.incoming.lock() = Some(SessionSwap::Clear);
    }

    /// Queue a data packet. Hands the packet back when the queue is full.
    pub fn push(&self, packet: CompressedPacket) -> Result<(), QueueFull> {
        self.shared.packets.push(packet)
    }

    pub fn push_start(&self) {
        self.shared.packets.push_control(CompressedPacket::start());
    }

    /// Request a flush. Frames still in flight are dropped.
    pub fn push_flush(&self) {
        self.shared.to_flush.store(true, Ordering::SeqCst);
        self.shared.packets.push_control(CompressedPacket::flush());
        self.shared.slot.wake();
    }

    pub fn push_end(&self) {
        self.shared.packets.push_control(CompressedPacket::end());
    }

    /// Drain frames buffered inside the codec.
    pub fn push_last(&self) {
        self.shared.packets.push_control(CompressedPacket::last());
    }

    /// Stop the thread, even in the middle of a decode.
    pub fn push_quit(&self) {
        self.shared.to_quit.store(true, Ordering::SeqCst);
        self.shared.packets.push_control(CompressedPacket::quit());
        self.shared.slot.wake();
        if let Some(slave) = self.shared.slave.get() {
            slave.slot.wake();
        }
    }

    pub fn set_use_gpu(&self, use_gpu: bool) {
        self.shared.negotiator.set_use_gpu(use_gpu);
    }

    pub fn set_user_format(&self, format: StereoFormat) {
        self.shared.knobs.write().user_format = format;
    }

    pub fn set_theater_mode(&self, enabled: bool) {
        self.shared.knobs.write().theater_mode = enabled;
    }

    pub fn set_audio_delay(&self, delay_ms: i32) {
        self.shared.knobs.write().audio_delay_ms = delay_ms;
    }

    pub fn set_stick_pano360(&self, enabled: bool) {
        self.shared.knobs.write().stick_pano_360 = enabled;
    }

    pub fn set_swap_jps(&self, enabled: bool) {
        self.shared.knobs.write().swap_jps = enabled;
    }

    pub fn is_slave(&self) -> bool {
        self.shared.is_slave()
    }

    /// The packet queue is empty and the thread is waiting for input.
    pub fn is_in_downtime(&self) -> bool {
        self.shared.downtime.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> LoopState {
        self.shared.state()
    }

    pub fn queued_packets(&self) -> usize {
        self.shared.packets.len()
    }

    /// Codec name, thread count and any active software converter.
    pub fn codec_description(&self) -> String {
        self.shared.description.lock().clone()
    }

    pub fn stats(&self) -> DecoderStats {
        let c = &self.shared.counters;
        DecoderStats {
            frames_decoded: c.decoded.load(Ordering::Relaxed),
            frames_pushed: c.pushed.load(Ordering::Relaxed),
            frames_skipped: c.skipped.load(Ordering::Relaxed),
            codec_opens: c.opens.load(Ordering::Relaxed),
            discard: if c.non_ref.load(Ordering::Relaxed) {
                Discard::NonRef
            } else {
                Discard::Default
            },
            hw_active: c.hw_active.load(Ordering::Relaxed),
        }
    }
}

impl Drop for VideoDecoder {
    fn drop(&mut self) {
        if !self.shared.is_slave() {
            self.shared.textures.clear();
        }
        self.push_quit();
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("Decode thread panicked");
            }
        }
        self.shared.negotiator.reset();
    }
}

impl std::fmt::Debug for VideoDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoDecoder")
            .field("slave", &self.shared.is_slave())
            .field("state", &self.state())
            .field("queued", &self.queued_packets())
            .field("codec", &self.codec_description())
            .finish()
    }
}
