//! # Remux
//!
//! Batch export of one or more source containers into a single output,
//! tagged with a stereo layout. Typical use: join a left-eye and a
//! right-eye file into one Matroska file with two video tracks.
//!
//! Container parsing and writing are delegated to the caller through
//! [`SourceOpener`] / [`MediaSource`] and [`SinkFactory`] / [`MediaSink`].
//!
//! ```text
//! output stream order:  video (all sources) → audio (all sources) → other
//! packet order:         round-robin, one packet per source per pass
//! ```

use std::collections::HashMap;
use std::path::Path;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::rational::Rational;
use crate::signal::ErrorSignal;
use crate::stereo::{StereoFormat, STEREO_MODE_TAG};

#[derive(Debug, Error)]
pub enum RemuxError {
    #[error("Couldn't open video file '{path}': {reason}")]
    Open { path: String, reason: String },
    #[error("No source files to remux")]
    NoSources,
    #[error("Output path is empty")]
    EmptyPath,
    #[error("Unable to find a suitable output format for '{0}'")]
    UnknownFormat(String),
    #[error("Failed allocating output stream: {0}")]
    Stream(String),
    #[error("Error occurred when opening output file ({0})")]
    Header(String),
    #[error("Error muxing packet ({0})")]
    Write(String),
    #[error("Error finishing output file ({0})")]
    Trailer(String),
}

// ============================================================================
// Stream and packet model
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaType {
    Video,
    Audio,
    /// Subtitles, data, attachments.
    Other,
}

#[derive(Debug, Clone)]
pub struct RemuxStream {
    pub index: usize,
    pub media_type: MediaType,
    pub time_base: Rational,
    pub metadata: HashMap<String, String>,
    /// Only carried over for video streams.
    pub sample_aspect_ratio: Rational,
    /// Opaque codec parameters, copied as-is.
    pub codec_params: Bytes,
}

impl RemuxStream {
    pub fn new(index: usize, media_type: MediaType, time_base: Rational) -> Self {
        Self {
            index,
            media_type,
            time_base,
            metadata: HashMap::new(),
            sample_aspect_ratio: Rational::default(),
            codec_params: Bytes::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemuxPacket {
    pub stream_index: usize,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub duration: i64,
    /// Byte position in the source; cleared on output.
    pub pos: Option<u64>,
    pub keyframe: bool,
    pub data: Bytes,
}

// ============================================================================
// Adapter traits
// ============================================================================

/// An opened source container.
pub trait MediaSource: Send {
    fn streams(&self) -> &[RemuxStream];
    fn metadata(&self) -> &HashMap<String, String>;
    /// Next packet in file order, `None` at end of file.
    fn read_packet(&mut self) -> Option<RemuxPacket>;
}

pub trait SourceOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn MediaSource>, RemuxError>;
}

/// An output container being written.
pub trait MediaSink: Send {
    /// Register an output stream; returns its index.
    fn add_stream(&mut self, stream: &RemuxStream) -> Result<usize, RemuxError>;
    /// Time base chosen by the container for an output stream; valid after the header.
    fn stream_time_base(&self, index: usize) -> Rational;
    fn write_header(&mut self, metadata: &HashMap<String, String>) -> Result<(), RemuxError>;
    /// Write with interleaving by the container.
    fn write_packet(&mut self, packet: RemuxPacket) -> Result<(), RemuxError>;
    fn write_trailer(&mut self) -> Result<(), RemuxError>;
}

pub trait SinkFactory: Send + Sync {
    /// Create an output, guessing the container format from `path`.
    fn create(&self, path: &Path) -> Result<Box<dyn MediaSink>, RemuxError>;
}

// ============================================================================
// Muxer
// ============================================================================

/// Counts reported by a finished [`VideoMuxer::save`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemuxSummary {
    pub streams: usize,
    pub packets_written: u64,
    /// Packets of streams that could not be mapped to the output.
    pub packets_dropped: u64,
}

struct SourceState {
    source: Box<dyn MediaSource>,
    /// Source stream index → output stream index.
    mapping: Vec<Option<usize>>,
    open: bool,
}

pub struct VideoMuxer {
    opener: Box<dyn SourceOpener>,
    factory: Box<dyn SinkFactory>,
    sources: Vec<Box<dyn MediaSource>>,
    stereo_format: StereoFormat,
    errors: ErrorSignal,
}

impl VideoMuxer {
    pub fn new(
        opener: Box<dyn SourceOpener>,
        factory: Box<dyn SinkFactory>,
        errors: ErrorSignal,
    ) -> Self {
        Self {
            opener,
            factory,
            sources: Vec::new(),
            stereo_format: StereoFormat::Mono,
            errors,
        }
    }

    pub fn stereo_format(&self) -> StereoFormat {
        self.stereo_format
    }

    pub fn set_stereo_format(&mut self, format: StereoFormat) {
        self.stereo_format = format;
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Open `path` as an additional source. Failures go to the error channel.
    pub fn add_file<P: AsRef<Path>>(&mut self, path: P) -> bool {
        match self.opener.open(path.as_ref()) {
            Ok(source) => {
                debug!(
                    "Added remux source {} ({} streams)",
                    path.as_ref().display(),
                    source.streams().len()
                );
                self.sources.push(source);
                true
            }
            Err(err) => {
                self.errors.emit(&err.to_string());
                false
            }
        }
    }

    /// Close every source.
    pub fn close(&mut self) {
        self.sources.clear();
    }

    /// Write every source into `path`. Sources are consumed.
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<RemuxSummary, RemuxError> {
        let result = self.remux(path.as_ref());
        if let Err(err) = &result {
            self.errors.emit(&err.to_string());
        }
        result
    }

    fn remux(&mut self, path: &Path) -> Result<RemuxSummary, RemuxError> {
        if self.sources.is_empty() {
            return Err(RemuxError::NoSources);
        }
        if path.as_os_str().is_empty() {
            return Err(RemuxError::EmptyPath);
        }

        let mut sink = self.factory.create(path)?;

        let mut metadata = self.sources[0].metadata().clone();
        match self.stereo_format.to_tag() {
            Some(tag) => {
                metadata.insert(STEREO_MODE_TAG.to_string(), tag.to_string());
            }
            None => {
                metadata.remove(STEREO_MODE_TAG);
            }
        }

        let mut states: Vec<SourceState> = std::mem::take(&mut self.sources)
            .into_iter()
            .map(|source| SourceState {
                mapping: vec![None; source.streams().len()],
                source,
                open: true,
            })
            .collect();

        let mut stream_count = 0;
        for pass in [MediaType::Video, MediaType::Audio, MediaType::Other] {
            for state in &mut states {
                for stream in state.source.streams() {
                    if stream.media_type != pass {
                        continue;
                    }
                    let mut out = stream.clone();
                    if out.media_type != MediaType::Video {
                        out.sample_aspect_ratio = Rational::default();
                    }
                    // a stream the output can't hold stays unmapped
                    match sink.add_stream(&out) {
                        Ok(index) => {
                            if let Some(slot) = state.mapping.get_mut(stream.index) {
                                *slot = Some(index);
                                stream_count += 1;
                            }
                        }
                        Err(err) => self.errors.emit(&err.to_string()),
                    }
                }
            }
        }

        info!(
            "Remuxing {} sources ({} streams) into {} as {:?}",
            states.len(),
            stream_count,
            path.display(),
            self.stereo_format
        );
        sink.write_header(&metadata)?;

        let mut summary = RemuxSummary {
            streams: stream_count,
            ..Default::default()
        };
        while states.iter().any(|s| s.open) {
            for state in states.iter_mut().filter(|s| s.open) {
                let Some(mut packet) = state.source.read_packet() else {
                    state.open = false;
                    continue;
                };
                let Some(out_index) = state.mapping.get(packet.stream_index).copied().flatten()
                else {
                    summary.packets_dropped += 1;
                    continue;
                };
                let Some(in_base) = state
                    .source
                    .streams()
                    .iter()
                    .find(|s| s.index == packet.stream_index)
                    .map(|s| s.time_base)
                else {
                    summary.packets_dropped += 1;
                    continue;
                };
                let out_base = sink.stream_time_base(out_index);

                packet.pts = in_base.rescale_opt(packet.pts, out_base);
                packet.dts = in_base.rescale_opt(packet.dts, out_base);
                packet.duration = in_base.rescale(packet.duration, out_base);
                packet.pos = None;
                packet.stream_index = out_index;
                sink.write_packet(packet)?;
                summary.packets_written += 1;
            }
        }

        sink.write_trailer()?;
        info!(
            "Remux finished: {} packets written, {} dropped",
            summary.packets_written, summary.packets_dropped
        );
        Ok(summary)
    }
}

impl std::fmt::Debug for VideoMuxer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoMuxer")
            .field("sources", &self.sources.len())
            .field("stereo_format", &self.stereo_format)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::ErrorLog;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    struct MemorySource {
        streams: Vec<RemuxStream>,
        metadata: HashMap<String, String>,
        packets: VecDeque<RemuxPacket>,
    }

    impl MediaSource for MemorySource {
        fn streams(&self) -> &[RemuxStream] {
            &self.streams
        }
        fn metadata(&self) -> &HashMap<String, String> {
            &self.metadata
        }
        fn read_packet(&mut self) -> Option<RemuxPacket> {
            self.packets.pop_front()
        }
    }

    fn packet(stream_index: usize, pts: Option<i64>) -> RemuxPacket {
        RemuxPacket {
            stream_index,
            pts,
            dts: pts,
            duration: 40,
            pos: Some(1234),
            keyframe: true,
            data: Bytes::from_static(b"\x00\x01"),
        }
    }

    /// Left file: video + audio. Right file: subtitle + video.
    struct Opener;

    impl SourceOpener for Opener {
        fn open(&self, path: &Path) -> Result<Box<dyn MediaSource>, RemuxError> {
            let ms = Rational::new(1, 1000);
            match path.to_str() {
                Some("left.mkv") => {
                    let mut video = RemuxStream::new(0, MediaType::Video, ms);
                    video.sample_aspect_ratio = Rational::new(1, 1);
                    video.metadata.insert("title".into(), "left".into());
                    let mut audio = RemuxStream::new(1, MediaType::Audio, ms);
                    audio.sample_aspect_ratio = Rational::new(3, 2);
                    let mut metadata = HashMap::new();
                    metadata.insert("title".into(), "Trip".into());
                    metadata.insert(STEREO_MODE_TAG.into(), "mono".into());
                    Ok(Box::new(MemorySource {
                        streams: vec![video, audio],
                        metadata,
                        packets: VecDeque::from(vec![
                            packet(0, Some(0)),
                            packet(1, Some(0)),
                            packet(0, Some(40)),
                        ]),
                    }))
                }
                Some("right.mkv") => Ok(Box::new(MemorySource {
                    streams: vec![
                        RemuxStream::new(0, MediaType::Other, ms),
                        RemuxStream::new(1, MediaType::Video, ms),
                    ],
                    metadata: HashMap::new(),
                    packets: VecDeque::from(vec![packet(1, Some(0)), packet(0, None)]),
                })),
                _ => Err(RemuxError::Open {
                    path: path.display().to_string(),
                    reason: "No such file or directory".into(),
                }),
            }
        }
    }

    #[derive(Default)]
    struct Recorded {
        streams: Vec<RemuxStream>,
        metadata: HashMap<String, String>,
        packets: Vec<RemuxPacket>,
        trailer: bool,
    }

    /// 90 kHz output that refuses audio streams.
    struct MemorySink {
        out: Arc<Mutex<Recorded>>,
    }

    impl MediaSink for MemorySink {
        fn add_stream(&mut self, stream: &RemuxStream) -> Result<usize, RemuxError> {
            if stream.media_type == MediaType::Audio {
                return Err(RemuxError::Stream("audio not supported".into()));
            }
            let mut out = self.out.lock();
            out.streams.push(stream.clone());
            Ok(out.streams.len() - 1)
        }
        fn stream_time_base(&self, _index: usize) -> Rational {
            Rational::new(1, 90_000)
        }
        fn write_header(&mut self, metadata: &HashMap<String, String>) -> Result<(), RemuxError> {
            self.out.lock().metadata = metadata.clone();
            Ok(())
        }
        fn write_packet(&mut self, packet: RemuxPacket) -> Result<(), RemuxError> {
            self.out.lock().packets.push(packet);
            Ok(())
        }
        fn write_trailer(&mut self) -> Result<(), RemuxError> {
            self.out.lock().trailer = true;
            Ok(())
        }
    }

    struct Factory {
        out: Arc<Mutex<Recorded>>,
    }

    impl SinkFactory for Factory {
        fn create(&self, path: &Path) -> Result<Box<dyn MediaSink>, RemuxError> {
            match path.extension().and_then(|e| e.to_str()) {
                Some("mkv") => Ok(Box::new(MemorySink {
                    out: self.out.clone(),
                })),
                _ => Err(RemuxError::UnknownFormat(path.display().to_string())),
            }
        }
    }

    fn muxer() -> (VideoMuxer, Arc<Mutex<Recorded>>, ErrorLog) {
        let out = Arc::new(Mutex::new(Recorded::default()));
        let errors = ErrorSignal::new();
        let log = ErrorLog::attach(&errors);
        let muxer = VideoMuxer::new(
            Box::new(Opener),
            Box::new(Factory { out: out.clone() }),
            errors,
        );
        (muxer, out, log)
    }

    #[test]
    fn test_add_missing_file_reports_error() {
        let (mut muxer, _, log) = muxer();
        assert!(!muxer.add_file("missing.mkv"));
        assert!(log.contains("Couldn't open video file 'missing.mkv'"));
        assert_eq!(muxer.source_count(), 0);
    }

    #[test]
    fn test_save_orders_streams_and_rescales() {
        let (mut muxer, out, log) = muxer();
        assert!(muxer.add_file("left.mkv"));
        assert!(muxer.add_file("right.mkv"));
        muxer.set_stereo_format(StereoFormat::SideBySideLR);

        let summary = muxer.save("joined.mkv").unwrap();
        let out = out.lock();

        // video, video, other; audio refused by the sink
        let kinds: Vec<_> = out.streams.iter().map(|s| s.media_type).collect();
        assert_eq!(kinds, vec![MediaType::Video, MediaType::Video, MediaType::Other]);
        assert_eq!(out.streams[0].metadata.get("title").map(String::as_str), Some("left"));
        assert_eq!(summary.streams, 3);
        assert!(log.contains("audio not supported"));

        assert_eq!(out.metadata.get("title").map(String::as_str), Some("Trip"));
        assert_eq!(out.metadata.get(STEREO_MODE_TAG).map(String::as_str), Some("left_right"));

        // round-robin: left v0, right v1, left audio (dropped), right sub, left v0
        let written: Vec<_> = out.packets.iter().map(|p| (p.stream_index, p.pts)).collect();
        assert_eq!(
            written,
            vec![(0, Some(0)), (1, Some(0)), (2, None), (0, Some(3600))]
        );
        assert_eq!(summary.packets_written, 4);
        assert_eq!(summary.packets_dropped, 1);
        assert!(out.packets.iter().all(|p| p.pos.is_none() && p.duration == 3600));
        assert!(out.trailer);
    }

    #[test]
    fn test_format_without_tag_removes_stereo_mode() {
        let (mut muxer, out, _) = muxer();
        assert!(muxer.add_file("left.mkv"));
        muxer.set_stereo_format(StereoFormat::SeparateFrames);
        muxer.save("out.mkv").unwrap();
        assert!(!out.lock().metadata.contains_key(STEREO_MODE_TAG));
    }

    #[test]
    fn test_save_errors() {
        let (mut muxer, _, log) = muxer();
        assert!(matches!(muxer.save("out.mkv"), Err(RemuxError::NoSources)));

        assert!(muxer.add_file("left.mkv"));
        assert!(matches!(muxer.save("out.xyz"), Err(RemuxError::UnknownFormat(_))));
        assert!(log.contains("Unable to find a suitable output format"));
    }
}
