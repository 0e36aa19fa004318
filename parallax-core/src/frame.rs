//! Raw decoder output.

use std::collections::HashMap;

use bytes::Bytes;

use crate::packet::SideData;
use crate::pixel::{ColorRange, PixelFormat};

/// One plane of a decoded picture.
///
/// `data` is reference counted: cloning the plane (or wrapping it into a
/// normalized image) shares the decoder's buffer instead of copying it.
#[derive(Debug, Clone, PartialEq)]
pub struct FramePlane {
    pub data: Bytes,
    /// Bytes per row, may exceed the visible width.
    pub stride: usize,
}

impl FramePlane {
    pub fn new(data: Bytes, stride: usize) -> Self {
        Self { data, stride }
    }

    /// Row `y`, clipped to the plane.
    pub fn row(&self, y: usize) -> &[u8] {
        let start = (y * self.stride).min(self.data.len());
        let end = (start + self.stride).min(self.data.len());
        &self.data[start..end]
    }
}

#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub planes: Vec<FramePlane>,
    /// Presentation timestamp in stream time base units.
    pub pts: Option<i64>,
    pub best_effort_timestamp: Option<i64>,
    pub keyframe: bool,
    pub color_range: ColorRange,
    pub side_data: Vec<SideData>,
    pub metadata: HashMap<String, String>,
}

impl DecodedFrame {
    pub fn new(format: PixelFormat, width: u32, height: u32, planes: Vec<FramePlane>) -> Self {
        Self {
            format,
            width,
            height,
            planes,
            pts: None,
            best_effort_timestamp: None,
            keyframe: false,
            color_range: ColorRange::Unspecified,
            side_data: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = Some(pts);
        self.best_effort_timestamp = Some(pts);
        self
    }

    pub fn plane(&self, index: usize) -> Option<&FramePlane> {
        self.planes.get(index)
    }

    /// Timestamp used for presentation: best effort first, then the raw pts,
    /// then zero.
    pub fn presentation_ts(&self) -> i64 {
        self.best_effort_timestamp.or(self.pts).unwrap_or(0)
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}
