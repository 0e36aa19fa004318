//! Elementary stream description passed in by the demuxer adapter at session init.

use std::collections::HashMap;

use crate::codec::VideoCodecId;
use crate::packet::SideData;
use crate::pixel::{ColorRange, PixelFormat};
use crate::rational::Rational;

#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub index: usize,
    pub codec_id: VideoCodecId,
    pub time_base: Rational,
    /// Display size.
    pub width: u32,
    pub height: u32,
    /// Size of the coded picture, before cropping.
    pub coded_width: u32,
    pub coded_height: u32,
    pub pixel_format: PixelFormat,
    /// Aspect ratio declared by the container.
    pub sample_aspect_ratio: Rational,
    /// Aspect ratio declared by the bitstream.
    pub codec_sample_aspect_ratio: Rational,
    pub color_range: ColorRange,
    /// The stream is a single embedded picture (cover art), not a sequence.
    pub attached_picture: bool,
    /// Start time in seconds; subtracted from every frame timestamp.
    pub start_time: f64,
    pub container_tags: HashMap<String, String>,
    pub stream_tags: HashMap<String, String>,
    pub side_data: Vec<SideData>,
    pub file_name: String,
}

impl StreamInfo {
    pub fn new(codec_id: VideoCodecId, width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self {
            index: 0,
            codec_id,
            time_base: Rational::new(1, 90_000),
            width,
            height,
            coded_width: width,
            coded_height: height,
            pixel_format,
            sample_aspect_ratio: Rational::new(0, 1),
            codec_sample_aspect_ratio: Rational::new(0, 1),
            color_range: ColorRange::Unspecified,
            attached_picture: false,
            start_time: 0.0,
            container_tags: HashMap::new(),
            stream_tags: HashMap::new(),
            side_data: Vec::new(),
            file_name: String::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// 720p picture stored inside a 1080p H.264 frame (tiled stereo).
    pub fn is_720_in_1080(&self) -> bool {
        self.codec_id == VideoCodecId::H264
            && self.width == 1280
            && self.height == 720
            && self.coded_width >= 1920
            && self.coded_height >= 1080
    }

    /// Pixel aspect ratio: container SAR when it overrides the bitstream,
    /// otherwise bitstream SAR, otherwise square pixels.
    pub fn pixel_ratio(&self) -> f32 {
        let stream = self.sample_aspect_ratio;
        let codec = self.codec_sample_aspect_ratio;
        let differs = stream.num as i128 * codec.den as i128 != codec.num as i128 * stream.den as i128;
        if stream.num != 0 && stream.den != 0 && differs {
            stream.to_f64() as f32
        } else if codec.is_unset() {
            1.0
        } else {
            codec.to_f64() as f32
        }
    }

    /// Container tag first, then stream tag.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.container_tags
            .get(key)
            .or_else(|| self.stream_tags.get(key))
            .map(String::as_str)
    }

    pub fn container_tag(&self, key: &str) -> Option<&str> {
        self.container_tags.get(key).map(String::as_str)
    }

    pub fn with_container_tag(mut self, key: &str, value: &str) -> Self {
        self.container_tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_stream_tag(mut self, key: &str, value: &str) -> Self {
        self.stream_tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_file_name(mut self, name: &str) -> Self {
        self.file_name = name.to_string();
        self
    }

    pub fn with_time_base(mut self, time_base: Rational) -> Self {
        self.time_base = time_base;
        self
    }
}
