//! # Frame Adapter
//!
//! Turns one decoder-native [`DecodedFrame`] into a [`NormalizedImage`].
//!
//! Decision order, first match wins:
//! 1. packed RGB / RGBA / XYZ wrapped in place when the consumer supports the plane format
//! 2. planar YUV wrapped per plane (with the tiled 1080p size workaround)
//! 3. semi-planar NV12 wrapped as luma + interleaved chroma
//! 4. software conversion into an owned RGB buffer
//!
//! Wrapped planes share the decoder's buffers; only path 4 copies.

use bytes::Bytes;
use thiserror::Error;
use tracing::warn;

use crate::frame::DecodedFrame;
use crate::image::{ColorModel, ColorScale, ImagePlane, NormalizedImage, PlaneFormat};
use crate::pixel::{ColorRange, PixelFormat};
use crate::scaler::RgbScaler;
use crate::stereo::StereoFormat;
use crate::texture_queue::DeviceCaps;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Failed to create software scaler context for {0}")]
    ScalerContext(PixelFormat),
    #[error("Failed allocation of RGB frame (out of memory)")]
    OutOfMemory,
    #[error("Conversion failed: {0}")]
    Convert(String),
}

impl AdapterError {
    /// Errors that end the decode session rather than just the frame.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::OutOfMemory)
    }
}

pub struct FrameAdapter {
    caps: DeviceCaps,
    scaler: Option<RgbScaler>,
    rgb: Vec<u8>,
    /// Set when no converter could be created; later frames are skipped.
    broken: bool,
    scaler_notice: Option<String>,
}

impl FrameAdapter {
    pub fn new(caps: DeviceCaps) -> Self {
        Self {
            caps,
            scaler: None,
            rgb: Vec::new(),
            broken: false,
            scaler_notice: None,
        }
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Human-readable note about an active software converter.
    pub fn scaler_notice(&self) -> Option<&str> {
        self.scaler_notice.as_deref()
    }

    /// Release the converter and its buffer.
    pub fn reset(&mut self) {
        self.scaler = None;
        self.rgb = Vec::new();
        self.broken = false;
        self.scaler_notice = None;
    }

    /// Normalize `frame`.
    ///
    /// Returns `Ok(None)` when the frame is skipped because no converter
    /// could be created for this stream. A failed conversion of one frame
    /// returns `AdapterError::Convert` and leaves the adapter usable.
    pub fn prepare(
        &mut self,
        frame: &DecodedFrame,
        src_format: StereoFormat,
        pixel_ratio: f32,
        stream_range: ColorRange,
    ) -> Result<Option<NormalizedImage>, AdapterError> {
        let (w, h) = (frame.width as usize, frame.height as usize);
        let full_range =
            frame.color_range == ColorRange::Full || stream_range == ColorRange::Full;

        // packed formats wrapped as-is
        let packed = match frame.format {
            PixelFormat::Xyz12 => Some((PlaneFormat::Rgb48, ColorModel::Xyz)),
            PixelFormat::Rgb24 => Some((PlaneFormat::Rgb, ColorModel::Rgb)),
            PixelFormat::Rgba32 => Some((PlaneFormat::Rgba, ColorModel::Rgba)),
            _ => None,
        };
        if let Some((plane_format, model)) = packed {
            if self.caps.is_supported(plane_format) {
                if let Some(p0) = frame.plane(0) {
                    let image = NormalizedImage::new(model, ColorScale::Full, pixel_ratio)
                        .with_plane(ImagePlane::wrap(plane_format, p0.data.clone(), w, h, p0.stride));
                    return Ok(Some(image));
                }
            }
        }

        if let Some(mut dims) = frame.format.yuv_dims(frame.width, frame.height) {
            // Some encoders write a slightly wrong size for tiled 1080p content.
            let stride0 = frame.plane(0).map_or(0, |p| p.stride);
            if src_format == StereoFormat::Tiled4x
                && frame.format == PixelFormat::Yuv420p
                && (1906..=1920).contains(&frame.width)
                && stride0 >= 1920
                && frame.height >= 1074
                && holds_rows(frame, &[1080, 540, 540])
            {
                dims.width_y = 1920;
                dims.height_y = 1080;
                dims.width_u = 960;
                dims.width_v = 960;
                dims.height_u = 540;
                dims.height_v = 540;
            }

            let full = dims.full_scale || full_range;
            let (plane_format, scale) = match dims.bits_per_comp {
                9 => (
                    PlaneFormat::Gray16,
                    if full { ColorScale::Jpeg9 } else { ColorScale::Mpeg9 },
                ),
                10 => (
                    PlaneFormat::Gray16,
                    if full { ColorScale::Jpeg10 } else { ColorScale::Mpeg10 },
                ),
                16 => (
                    PlaneFormat::Gray16,
                    if full { ColorScale::Full } else { ColorScale::Mpeg },
                ),
                _ => (
                    PlaneFormat::Gray,
                    if full { ColorScale::Full } else { ColorScale::Mpeg },
                ),
            };

            let plane_count = if dims.has_alpha { 4 } else { 3 };
            if self.caps.is_supported(plane_format) && frame.planes.len() >= plane_count {
                let model = if dims.has_alpha {
                    ColorModel::Yuva
                } else {
                    ColorModel::Yuv
                };
                let sizes = [
                    (dims.width_y, dims.height_y),
                    (dims.width_u, dims.height_u),
                    (dims.width_v, dims.height_v),
                    (dims.width_y, dims.height_y),
                ];
                let mut image = NormalizedImage::new(model, scale, pixel_ratio);
                for (plane, (pw, ph)) in frame.planes.iter().zip(sizes).take(plane_count) {
                    image = image.with_plane(ImagePlane::wrap(
                        plane_format,
                        plane.data.clone(),
                        pw as usize,
                        ph as usize,
                        plane.stride,
                    ));
                }
                return Ok(Some(image));
            }
        } else if frame.format == PixelFormat::Nv12
            && self.caps.is_supported(PlaneFormat::Uv)
            && frame.planes.len() >= 2
        {
            let scale = if full_range {
                ColorScale::NvFull
            } else {
                ColorScale::NvMpeg
            };
            let luma = &frame.planes[0];
            let chroma = &frame.planes[1];
            let image = NormalizedImage::new(ColorModel::Yuv, scale, pixel_ratio)
                .with_plane(ImagePlane::wrap(PlaneFormat::Gray, luma.data.clone(), w, h, luma.stride))
                .with_plane(ImagePlane::wrap(
                    PlaneFormat::Uv,
                    chroma.data.clone(),
                    w / 2,
                    h / 2,
                    chroma.stride,
                ));
            return Ok(Some(image));
        }

        self.convert_to_rgb(frame, pixel_ratio, full_range)
    }

    fn convert_to_rgb(
        &mut self,
        frame: &DecodedFrame,
        pixel_ratio: f32,
        full_range: bool,
    ) -> Result<Option<NormalizedImage>, AdapterError> {
        if self.broken {
            return Ok(None);
        }

        let reusable = self
            .scaler
            .as_ref()
            .map_or(false, |s| s.matches(frame.format, frame.width, frame.height));
        if !reusable {
            self.scaler = None;
            let scaler = match RgbScaler::new(frame.format, frame.width, frame.height, full_range) {
                Ok(scaler) => scaler,
                Err(err) => {
                    self.broken = true;
                    return Err(err);
                }
            };
            let len = scaler.output_len();
            let mut buf = Vec::new();
            if buf.try_reserve_exact(len).is_err() {
                self.broken = true;
                return Err(AdapterError::OutOfMemory);
            }
            buf.resize(len, 0);
            self.rgb = buf;

            warn!(
                "Performance warning! Using software scaler for {} pixel format",
                frame.format
            );
            self.scaler_notice = Some(format!(
                "[scaler] Software converter (from {} into RGB)",
                frame.format
            ));
            self.scaler = Some(scaler);
        }

        let Some(scaler) = self.scaler.as_ref() else {
            return Ok(None);
        };
        // a bad frame only costs itself
        scaler.convert(frame, &mut self.rgb)?;

        let stride = scaler.output_stride();
        let image = NormalizedImage::new(ColorModel::Rgb, ColorScale::Full, pixel_ratio).with_plane(
            ImagePlane::wrap(
                PlaneFormat::Rgb,
                Bytes::copy_from_slice(&self.rgb),
                frame.width as usize,
                frame.height as usize,
                stride,
            ),
        );
        Ok(Some(image))
    }
}

/// True when every listed plane has `stride * rows` bytes behind it.
fn holds_rows(frame: &DecodedFrame, rows: &[usize]) -> bool {
    rows.iter().enumerate().all(|(i, &rows)| {
        frame
            .plane(i)
            .map_or(false, |p| p.data.len() >= p.stride.saturating_mul(rows))
    })
}

impl std::fmt::Debug for FrameAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameAdapter")
            .field("scaler", &self.scaler)
            .field("broken", &self.broken)
            .finish()
    }
}
