//! # Normalized Image
//!
//! Codec-independent picture handed to the texture consumer: a color model,
//! a color scale and up to four planes. Planes hold [`Bytes`], so a wrapped
//! decoder plane keeps the decoder buffer alive for as long as the image
//! (or any clone of it) exists.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub const MAX_PLANES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColorModel {
    #[default]
    Rgb,
    Rgba,
    /// Planar Y, U, V (or Y plus interleaved UV).
    Yuv,
    Yuva,
    Xyz,
}

/// Sample range and bit depth of the stored values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColorScale {
    #[default]
    Full,
    Mpeg,
    Jpeg9,
    Mpeg9,
    Jpeg10,
    Mpeg10,
    /// Semi-planar, full range.
    NvFull,
    /// Semi-planar, studio range.
    NvMpeg,
}

/// Sample layout of one plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaneFormat {
    Gray,
    Gray16,
    /// Interleaved U/V byte pairs.
    Uv,
    Rgb,
    Rgba,
    Rgb48,
}

impl PlaneFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::Gray => 1,
            Self::Gray16 | Self::Uv => 2,
            Self::Rgb => 3,
            Self::Rgba => 4,
            Self::Rgb48 => 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImagePlane {
    pub format: PlaneFormat,
    pub data: Bytes,
    pub width: usize,
    pub height: usize,
    /// Bytes per row.
    pub stride: usize,
}

impl ImagePlane {
    /// Wrap an existing buffer without copying.
    pub fn wrap(format: PlaneFormat, data: Bytes, width: usize, height: usize, stride: usize) -> Self {
        Self {
            format,
            data,
            width,
            height,
            stride,
        }
    }

    /// Tightly packed plane (stride = width * bytes per pixel).
    pub fn packed(format: PlaneFormat, data: Bytes, width: usize, height: usize) -> Self {
        let stride = width * format.bytes_per_pixel();
        Self::wrap(format, data, width, height, stride)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NormalizedImage {
    pub color_model: ColorModel,
    pub color_scale: ColorScale,
    pub pixel_ratio: f32,
    pub planes: Vec<ImagePlane>,
}

impl NormalizedImage {
    pub fn new(color_model: ColorModel, color_scale: ColorScale, pixel_ratio: f32) -> Self {
        Self {
            color_model,
            color_scale,
            pixel_ratio,
            planes: Vec::with_capacity(MAX_PLANES),
        }
    }

    /// Placeholder used for a missing eye.
    pub fn empty() -> Self {
        Self {
            pixel_ratio: 1.0,
            ..Self::default()
        }
    }

    pub fn with_plane(mut self, plane: ImagePlane) -> Self {
        debug_assert!(self.planes.len() < MAX_PLANES);
        self.planes.push(plane);
        self
    }

    pub fn is_null(&self) -> bool {
        self.planes.first().map_or(true, |p| p.data.is_empty())
    }

    /// Visible size of the first plane, `(0, 0)` for an empty image.
    pub fn size(&self) -> (u32, u32) {
        self.planes
            .first()
            .map_or((0, 0), |p| (p.width as u32, p.height as u32))
    }

    /// Address of the first plane; used to tell shared buffers from copies.
    pub fn plane0_ptr(&self) -> Option<*const u8> {
        self.planes.first().map(|p| p.data.as_ptr())
    }
}
