//! End-to-end runs of the decode thread against mock codecs.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parallax_core::codec::HwAccel;
use parallax_core::packet::{SideData, Stereo3d, Stereo3dKind, StereoView};
use parallax_core::signal::{ErrorLog, ErrorSignal};
use parallax_core::sync::{Discard, SharedAudioClock};
use parallax_core::{
    DecoderConfig, DecoderError, LoopState, StereoFormat, StereoFrame, StereoParams,
    TextureQueue, TextureSink, VideoDecoder,
};

use common::{data_packet, init_tracing, stream, wait_until, MockAccel, MockFactory};

const TIMEOUT: Duration = Duration::from_secs(5);

struct Harness {
    decoder: VideoDecoder,
    factory: Arc<MockFactory>,
    textures: Arc<TextureQueue>,
    clock: SharedAudioClock,
    errors: ErrorLog,
}

fn harness(config: DecoderConfig, capacity: usize, accel: Option<Box<dyn HwAccel>>) -> Harness {
    init_tracing();
    let factory = MockFactory::new();
    let textures = Arc::new(TextureQueue::new(capacity));
    let clock = SharedAudioClock::new();
    let signal = ErrorSignal::new();
    let errors = ErrorLog::attach(&signal);
    let decoder = VideoDecoder::new(
        config,
        factory.clone(),
        textures.clone(),
        Arc::new(clock.clone()),
        signal,
        accel,
    )
    .unwrap();
    Harness {
        decoder,
        factory,
        textures,
        clock,
        errors,
    }
}

fn drain(textures: &TextureQueue) -> Vec<StereoFrame> {
    std::iter::from_fn(|| textures.pop()).collect()
}

#[test]
fn test_frame_sequential_stream_yields_pairs() {
    let h = harness(DecoderConfig::default(), 64, None);
    let params = StereoParams::default().shared();
    h.decoder
        .init(stream(16, 16).with_stream_tag("STEREO_MODE", "block_lr"), &params)
        .unwrap();

    h.decoder.push_start();
    for i in 0..30 {
        let packet = data_packet(i * 33)
            .with_keyframe(i == 0)
            .with_params(params.clone());
        h.decoder.push(packet).unwrap();
    }

    assert!(wait_until(TIMEOUT, || h.textures.pushed_total() >= 15));
    assert!(wait_until(TIMEOUT, || h.decoder.is_in_downtime()));

    let frames = drain(&h.textures);
    assert_eq!(frames.len(), 15);
    for pair in frames.windows(2) {
        assert!(pair[1].pts > pair[0].pts);
    }
    for frame in &frames {
        assert_eq!(frame.format, StereoFormat::FrameSequence);
        assert!(!frame.left.is_null());
        assert!(!frame.right.is_null());
    }
    assert_eq!(params.read().src_format, StereoFormat::FrameSequence);
    assert!(h.textures.is_connected());
    // Start promotes the first pushed frame
    assert_eq!(h.textures.swap_count(), 1);
    assert_eq!(h.decoder.stats().frames_decoded, 30);
    assert!(h.errors.messages().is_empty());
}

#[test]
fn test_stream_side_data_beats_file_name() {
    let h = harness(DecoderConfig::default(), 64, None);
    let params = StereoParams::default().shared();
    h.decoder
        .init(stream(32, 16).with_file_name("/media/trip.ou.mkv"), &params)
        .unwrap();

    h.decoder.push_start();
    let stereo = Stereo3d {
        kind: Stereo3dKind::SideBySide,
        inverted: true,
        view: StereoView::Packed,
    };
    h.decoder
        .push(
            data_packet(0)
                .with_keyframe(true)
                .with_side_data(SideData::Stereo3d(stereo))
                .with_params(params.clone()),
        )
        .unwrap();
    for i in 1..5 {
        h.decoder
            .push(data_packet(i * 40).with_params(params.clone()))
            .unwrap();
    }

    assert!(wait_until(TIMEOUT, || h.textures.pushed_total() >= 5));
    let frames = drain(&h.textures);
    assert!(frames.iter().all(|f| f.format == StereoFormat::SideBySideRL));
    assert!(frames.iter().all(|f| f.right.is_null()));
    assert_eq!(params.read().src_format, StereoFormat::SideBySideRL);

    // the user choice still wins
    h.decoder.set_user_format(StereoFormat::TopBottomLR);
    h.decoder
        .push(data_packet(200).with_params(params.clone()))
        .unwrap();
    assert!(wait_until(TIMEOUT, || h.textures.pushed_total() >= 6));
    let last = h.textures.pop().unwrap();
    assert_eq!(last.format, StereoFormat::TopBottomLR);
}

#[test]
fn test_gpu_toggle_reopens_without_losing_frames() {
    let h = harness(DecoderConfig::default(), 64, Some(MockAccel::boxed(false)));
    let params = StereoParams::default().shared();
    h.decoder.init(stream(16, 16), &params).unwrap();
    assert_eq!(h.factory.open_count(), 1);
    assert!(!h.decoder.stats().hw_active);

    h.decoder.push_start();
    for i in 0..5 {
        h.decoder.push(data_packet(i * 40)).unwrap();
    }
    assert!(wait_until(TIMEOUT, || h.textures.pushed_total() >= 5));

    h.decoder.set_use_gpu(true);
    for i in 5..10 {
        h.decoder.push(data_packet(i * 40)).unwrap();
    }
    assert!(wait_until(TIMEOUT, || h.textures.pushed_total() >= 10));
    assert!(wait_until(TIMEOUT, || h.decoder.is_in_downtime()));

    assert_eq!(h.factory.open_count(), 2);
    let reopened = h.factory.last_params().unwrap();
    assert!(reopened.use_hw);
    assert_eq!(reopened.thread_count, 1);
    assert!(h.decoder.stats().hw_active);
    assert!(h.decoder.codec_description().contains("mock-vaapi"));

    let pts: Vec<f64> = drain(&h.textures).iter().map(|f| f.pts).collect();
    assert_eq!(pts.len(), 10);
    for (i, value) in pts.iter().enumerate() {
        assert!((value - i as f64 * 0.040).abs() < 1e-9, "frame {} at {}", i, value);
    }
}

#[test]
fn test_failed_hw_init_falls_back_to_software() {
    let config = DecoderConfig {
        use_gpu: true,
        ..Default::default()
    };
    let h = harness(config, 64, Some(MockAccel::boxed(true)));
    let params = StereoParams::default().shared();
    h.decoder.init(stream(16, 16), &params).unwrap();
    assert!(h.factory.last_params().unwrap().use_hw);

    h.decoder.push_start();
    for i in 0..3 {
        h.decoder.push(data_packet(i * 40)).unwrap();
    }
    assert!(wait_until(TIMEOUT, || h.textures.pushed_total() >= 3));
    assert!(wait_until(TIMEOUT, || h.decoder.is_in_downtime()));

    assert_eq!(h.factory.open_count(), 2);
    assert!(!h.factory.last_params().unwrap().use_hw);
    assert!(!h.decoder.stats().hw_active);
    assert_eq!(drain(&h.textures).len(), 3);
}

#[test]
fn test_init_errors_reach_error_channel() {
    let h = harness(DecoderConfig::default(), 8, None);
    let params = StereoParams::default().shared();

    let err = h.decoder.init(stream(0, 16), &params).unwrap_err();
    assert!(matches!(err, DecoderError::InvalidStream { width: 0, height: 16 }));
    assert!(h.errors.contains("Invalid stream"));

    h.factory.fail.store(true, Ordering::SeqCst);
    let err = h.decoder.init(stream(16, 16), &params).unwrap_err();
    assert!(matches!(err, DecoderError::CodecOpen(_)));
    assert!(h.errors.contains("Could not open video codec"));
}

#[test]
fn test_data_without_session_is_discarded() {
    let h = harness(DecoderConfig::default(), 8, None);
    h.decoder.push_start();
    for i in 0..3 {
        h.decoder.push(data_packet(i * 40)).unwrap();
    }
    assert!(wait_until(TIMEOUT, || h.decoder.queued_packets() == 0));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(h.decoder.stats().frames_decoded, 0);
    assert_eq!(h.textures.pushed_total(), 0);
}

#[test]
fn test_flush_clears_output_and_promotes_next_frame() {
    let h = harness(DecoderConfig::default(), 64, None);
    let params = StereoParams::default().shared();
    h.decoder.init(stream(16, 16), &params).unwrap();
    h.decoder.push_start();
    for i in 0..5 {
        h.decoder.push(data_packet(i * 40)).unwrap();
    }
    assert!(wait_until(TIMEOUT, || h.textures.pushed_total() >= 5));
    assert_eq!(h.textures.swap_count(), 1);

    h.decoder.push_flush();
    assert!(wait_until(TIMEOUT, || h.decoder.state() == LoopState::Idle));
    assert!(h.textures.is_empty());

    h.decoder.push(data_packet(1000)).unwrap();
    assert!(wait_until(TIMEOUT, || h.textures.pushed_total() >= 6));
    assert_eq!(h.textures.swap_count(), 2);
    assert_eq!(h.decoder.state(), LoopState::Active);
}

#[test]
fn test_end_of_stream_drain_is_bounded() {
    let h = harness(DecoderConfig::default(), 64, None);
    let params = StereoParams::default().shared();
    h.decoder.init(stream(16, 16), &params).unwrap();
    h.decoder.push_start();
    for i in 0..3 {
        h.decoder.push(data_packet(i * 40)).unwrap();
    }
    h.decoder.push_end();

    // nobody consumes; the wait gives up after roughly avg * queued + 0.1s
    assert!(wait_until(TIMEOUT, || h.textures.pushed_total() >= 3));
    assert!(wait_until(Duration::from_secs(2), || {
        h.decoder.state() == LoopState::Idle && h.decoder.is_in_downtime()
    }));
    assert_eq!(h.textures.len(), 3);
}

#[test]
fn test_lagging_video_enables_non_ref_skipping() {
    let h = harness(DecoderConfig::default(), 64, None);
    let params = StereoParams::default().shared();
    h.decoder.init(stream(16, 16), &params).unwrap();
    h.clock.set(5.0);

    h.decoder.push_start();
    h.decoder.push(data_packet(0)).unwrap();
    assert!(wait_until(TIMEOUT, || h.textures.pushed_total() >= 1));
    assert_eq!(h.decoder.stats().discard, Discard::NonRef);
    assert_eq!(h.factory.skip.lock().last(), Some(&Discard::NonRef));

    h.clock.set(0.04);
    h.decoder.push(data_packet(40)).unwrap();
    assert!(wait_until(TIMEOUT, || h.textures.pushed_total() >= 2));
    assert_eq!(h.decoder.stats().discard, Discard::Default);
    assert_eq!(h.factory.skip.lock().last(), Some(&Discard::Default));
}

#[test]
fn test_quit_unblocks_full_output() {
    let h = harness(DecoderConfig::default(), 1, None);
    let params = StereoParams::default().shared();
    h.decoder.init(stream(16, 16), &params).unwrap();
    h.decoder.push_start();
    for i in 0..5 {
        h.decoder.push(data_packet(i * 40)).unwrap();
    }
    assert!(wait_until(TIMEOUT, || h.textures.is_full()));
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(h.textures.pushed_total(), 1);

    let Harness { decoder, .. } = h;
    let started = Instant::now();
    drop(decoder);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_master_and_slave_pair_by_timestamp() {
    let h = harness(DecoderConfig::default(), 64, None);
    let slave = VideoDecoder::new_slave(&h.decoder, DecoderConfig::default(), h.factory.clone(), None)
        .unwrap();
    assert!(slave.is_slave());
    assert!(matches!(
        VideoDecoder::new_slave(&h.decoder, DecoderConfig::default(), h.factory.clone(), None),
        Err(DecoderError::PartnerAttached)
    ));

    let left_params = StereoParams::default().shared();
    let right_params = StereoParams::default().shared();
    h.decoder.init(stream(16, 16), &left_params).unwrap();
    slave.init(stream(32, 16), &right_params).unwrap();

    h.decoder.push_start();
    slave.push_start();
    for i in 0..8 {
        h.decoder
            .push(data_packet(i * 40).with_params(left_params.clone()))
            .unwrap();
        slave.push(data_packet(i * 40)).unwrap();
    }

    assert!(wait_until(TIMEOUT, || h.textures.pushed_total() >= 8));
    let frames = drain(&h.textures);
    assert_eq!(frames.len(), 8);
    for frame in &frames {
        assert_eq!(frame.format, StereoFormat::SeparateFrames);
        assert_eq!(frame.left.size(), (16, 16));
        assert_eq!(frame.right.size(), (32, 16));
    }
    assert_eq!(left_params.read().src2_size, (32, 16));
    assert_eq!(slave.stats().frames_pushed, 0);
    drop(slave);
}

/// Run a master/slave pair over the given pts lists (ms) and report, per
/// pushed frame, whether a right view was attached.
fn run_pair(left_pts: &[i64], right_pts: &[i64]) -> (Vec<bool>, u64) {
    let h = harness(DecoderConfig::default(), 64, None);
    let slave =
        VideoDecoder::new_slave(&h.decoder, DecoderConfig::default(), h.factory.clone(), None)
            .unwrap();
    let left_params = StereoParams::default().shared();
    let right_params = StereoParams::default().shared();
    h.decoder.init(stream(16, 16), &left_params).unwrap();
    slave.init(stream(32, 16), &right_params).unwrap();

    h.decoder.push_start();
    slave.push_start();
    for &pts in right_pts {
        slave.push(data_packet(pts)).unwrap();
    }
    for &pts in left_pts {
        h.decoder
            .push(data_packet(pts).with_params(left_params.clone()))
            .unwrap();
    }

    let expected = left_pts.len() as u64;
    assert!(wait_until(TIMEOUT, || h.textures.pushed_total() >= expected));
    let paired = drain(&h.textures)
        .iter()
        .map(|frame| !frame.right.is_null())
        .collect();
    let slave_decoded = slave.stats().frames_decoded;
    drop(slave);
    (paired, slave_decoded)
}

#[test]
fn test_stale_slave_frame_is_dropped_for_a_newer_one() {
    // slave frame at 5ms is too old for the master frame at 40ms
    let (paired, slave_decoded) = run_pair(&[0, 40, 80], &[0, 5, 40, 80]);
    assert_eq!(paired, vec![true, true, true]);
    assert_eq!(slave_decoded, 4);
}

#[test]
fn test_slave_ahead_keeps_its_frame_for_later() {
    let (paired, _) = run_pair(&[0, 40, 80, 120], &[0, 80, 120]);
    assert_eq!(paired, vec![true, false, true, true]);
}

#[test]
fn test_slave_seeked_away_loses_its_frame() {
    // 10s ahead is past the seek mismatch limit
    let (paired, slave_decoded) = run_pair(&[0, 40, 80], &[0, 10_000, 80]);
    assert_eq!(paired, vec![true, false, true]);
    assert_eq!(slave_decoded, 3);
}

#[test]
fn test_quit_unblocks_master_waiting_for_slave() {
    let config = DecoderConfig {
        slave_wait_ms: 60_000,
        ..Default::default()
    };
    let h = harness(config, 64, None);
    let slave =
        VideoDecoder::new_slave(&h.decoder, DecoderConfig::default(), h.factory.clone(), None)
            .unwrap();
    let params = StereoParams::default().shared();
    h.decoder.init(stream(16, 16), &params).unwrap();
    slave.init(stream(16, 16), &StereoParams::default().shared()).unwrap();

    // the slave gets nothing, so the master sits in the rendezvous
    h.decoder.push_start();
    h.decoder.push(data_packet(0)).unwrap();
    assert!(wait_until(TIMEOUT, || h.decoder.stats().frames_decoded == 1));
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(h.textures.pushed_total(), 0);

    let Harness { decoder, .. } = h;
    let started = Instant::now();
    drop(decoder);
    assert!(started.elapsed() < Duration::from_secs(1));
    drop(slave);
}

#[test]
fn test_quit_unblocks_slave_waiting_for_master() {
    let h = harness(DecoderConfig::default(), 64, None);
    let slave =
        VideoDecoder::new_slave(&h.decoder, DecoderConfig::default(), h.factory.clone(), None)
            .unwrap();
    h.decoder.init(stream(16, 16), &StereoParams::default().shared()).unwrap();
    slave.init(stream(16, 16), &StereoParams::default().shared()).unwrap();

    // the master gets nothing, so the slave's frame is never taken
    slave.push_start();
    slave.push(data_packet(0)).unwrap();
    slave.push(data_packet(40)).unwrap();
    assert!(wait_until(TIMEOUT, || slave.stats().frames_decoded == 1));
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(slave.stats().frames_decoded, 1);

    let started = Instant::now();
    drop(slave);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = DecoderConfig {
        poll_interval_ms: 0,
        ..Default::default()
    };
    let result = VideoDecoder::new(
        config,
        MockFactory::new(),
        Arc::new(TextureQueue::new(4)),
        Arc::new(SharedAudioClock::new()),
        ErrorSignal::new(),
        None,
    );
    assert!(matches!(result, Err(DecoderError::Config(_))));

    let h = harness(DecoderConfig::default(), 4, None);
    let config = DecoderConfig {
        packet_queue_capacity: 0,
        ..Default::default()
    };
    assert!(matches!(
        VideoDecoder::new_slave(&h.decoder, config, h.factory.clone(), None),
        Err(DecoderError::Config(_))
    ));
}
