// SCALER - Software conversion into packed RGB
//
// Last resort of the frame adapter: whatever the texture consumer cannot
// take directly is converted on the CPU into 8-bit RGB. Conversion uses
// precomputed lookup tables (BT.601 integer coefficients) so the inner loop
// is adds and shifts only.

use crate::adapter::AdapterError;
use crate::frame::DecodedFrame;
use crate::pixel::PixelFormat;

// ============================================================================
// Source layouts
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceLayout {
    /// 8-bit planar YUV with the given chroma shifts.
    Planar { shift_w: u8, shift_h: u8 },
    /// Luma plane plus interleaved chroma; `swap` for V first.
    SemiPlanar { swap: bool },
    Gray,
    /// Packed 8-bit color; byte offsets of R, G, B and pixel size.
    Packed { r: usize, g: usize, b: usize, size: usize },
}

impl SourceLayout {
    fn for_format(format: PixelFormat) -> Option<Self> {
        if let Some(layout) = format.yuv_layout() {
            if layout.bits_per_comp != 8 {
                return None;
            }
            return Some(Self::Planar {
                shift_w: layout.log2_chroma_w,
                shift_h: layout.log2_chroma_h,
            });
        }
        match format {
            PixelFormat::Nv12 => Some(Self::SemiPlanar { swap: false }),
            PixelFormat::Nv21 => Some(Self::SemiPlanar { swap: true }),
            PixelFormat::Gray8 => Some(Self::Gray),
            PixelFormat::Rgb24 => Some(Self::Packed { r: 0, g: 1, b: 2, size: 3 }),
            PixelFormat::Bgr24 => Some(Self::Packed { r: 2, g: 1, b: 0, size: 3 }),
            PixelFormat::Rgba32 => Some(Self::Packed { r: 0, g: 1, b: 2, size: 4 }),
            PixelFormat::Bgra32 => Some(Self::Packed { r: 2, g: 1, b: 0, size: 4 }),
            _ => None,
        }
    }
}

// ============================================================================
// Scaler
// ============================================================================

/// Converter bound to one source format and size.
pub struct RgbScaler {
    src_format: PixelFormat,
    width: usize,
    height: usize,
    layout: SourceLayout,
    y_table: [i32; 256],
    u_table_g: [i32; 256],
    u_table_b: [i32; 256],
    v_table_r: [i32; 256],
    v_table_g: [i32; 256],
}

impl RgbScaler {
    /// Create a converter for frames of `src_format` and the given size.
    ///
    /// Fails for formats the converter cannot read and for empty sizes.
    pub fn new(
        src_format: PixelFormat,
        width: u32,
        height: u32,
        full_range: bool,
    ) -> Result<Self, AdapterError> {
        let layout = SourceLayout::for_format(src_format)
            .ok_or(AdapterError::ScalerContext(src_format))?;
        if width == 0 || height == 0 {
            return Err(AdapterError::ScalerContext(src_format));
        }

        let mut scaler = Self {
            src_format,
            width: width as usize,
            height: height as usize,
            layout,
            y_table: [0; 256],
            u_table_g: [0; 256],
            u_table_b: [0; 256],
            v_table_r: [0; 256],
            v_table_g: [0; 256],
        };
        scaler.build_tables(full_range);
        Ok(scaler)
    }

    fn build_tables(&mut self, full_range: bool) {
        // 8.8 fixed point
        for i in 0..256 {
            let c = i as i32 - 128;
            if full_range {
                self.y_table[i] = (i as i32) << 8;
                self.v_table_r[i] = 359 * c;
                self.u_table_g[i] = -88 * c;
                self.v_table_g[i] = -183 * c;
                self.u_table_b[i] = 454 * c;
            } else {
                self.y_table[i] = 298 * (i as i32 - 16);
                self.v_table_r[i] = 409 * c;
                self.u_table_g[i] = -100 * c;
                self.v_table_g[i] = -208 * c;
                self.u_table_b[i] = 516 * c;
            }
        }
    }

    pub fn src_format(&self) -> PixelFormat {
        self.src_format
    }

    /// True when this converter can be reused for a frame of the given shape.
    pub fn matches(&self, format: PixelFormat, width: u32, height: u32) -> bool {
        self.src_format == format && self.width == width as usize && self.height == height as usize
    }

    /// Size of the destination buffer in bytes.
    pub fn output_len(&self) -> usize {
        self.width * self.height * 3
    }

    pub fn output_stride(&self) -> usize {
        self.width * 3
    }

    #[inline]
    fn yuv_to_rgb(&self, y: u8, u: u8, v: u8, out: &mut [u8]) {
        let yc = self.y_table[y as usize];
        let r = (yc + self.v_table_r[v as usize] + 128) >> 8;
        let g = (yc + self.u_table_g[u as usize] + self.v_table_g[v as usize] + 128) >> 8;
        let b = (yc + self.u_table_b[u as usize] + 128) >> 8;
        out[0] = r.clamp(0, 255) as u8;
        out[1] = g.clamp(0, 255) as u8;
        out[2] = b.clamp(0, 255) as u8;
    }

    /// Convert `frame` into tightly packed RGB24 in `dst`.
    pub fn convert(&self, frame: &DecodedFrame, dst: &mut [u8]) -> Result<(), AdapterError> {
        if !self.matches(frame.format, frame.width, frame.height) {
            return Err(AdapterError::Convert(format!(
                "scaler bound to {} {}x{}, got {} {}x{}",
                self.src_format, self.width, self.height, frame.format, frame.width, frame.height
            )));
        }
        if dst.len() < self.output_len() {
            return Err(AdapterError::Convert("destination buffer too small".into()));
        }

        let (w, h) = (self.width, self.height);
        match self.layout {
            SourceLayout::Planar { shift_w, shift_h } => {
                let cw = (w + (1 << shift_w) - 1) >> shift_w;
                let ch = (h + (1 << shift_h) - 1) >> shift_h;
                let y_plane = plane(frame, 0, w, h)?;
                let u_plane = plane(frame, 1, cw, ch)?;
                let v_plane = plane(frame, 2, cw, ch)?;
                for row in 0..h {
                    let y_row = &y_plane.0[row * y_plane.1..];
                    let c_off = (row >> shift_h) * u_plane.1;
                    let u_row = &u_plane.0[c_off..];
                    let v_row = &v_plane.0[(row >> shift_h) * v_plane.1..];
                    let out_row = &mut dst[row * w * 3..(row + 1) * w * 3];
                    for x in 0..w {
                        let cx = x >> shift_w;
                        self.yuv_to_rgb(y_row[x], u_row[cx], v_row[cx], &mut out_row[x * 3..x * 3 + 3]);
                    }
                }
            }
            SourceLayout::SemiPlanar { swap } => {
                let cw = (w + 1) / 2;
                let y_plane = plane(frame, 0, w, h)?;
                let uv_plane = plane(frame, 1, cw * 2, (h + 1) / 2)?;
                for row in 0..h {
                    let y_row = &y_plane.0[row * y_plane.1..];
                    let uv_row = &uv_plane.0[(row / 2) * uv_plane.1..];
                    let out_row = &mut dst[row * w * 3..(row + 1) * w * 3];
                    for x in 0..w {
                        let i = (x / 2) * 2;
                        let (u, v) = if swap {
                            (uv_row[i + 1], uv_row[i])
                        } else {
                            (uv_row[i], uv_row[i + 1])
                        };
                        self.yuv_to_rgb(y_row[x], u, v, &mut out_row[x * 3..x * 3 + 3]);
                    }
                }
            }
            SourceLayout::Gray => {
                let g_plane = plane(frame, 0, w, h)?;
                for row in 0..h {
                    let src = &g_plane.0[row * g_plane.1..];
                    let out_row = &mut dst[row * w * 3..(row + 1) * w * 3];
                    for x in 0..w {
                        out_row[x * 3..x * 3 + 3].fill(src[x]);
                    }
                }
            }
            SourceLayout::Packed { r, g, b, size } => {
                let p = plane(frame, 0, w * size, h)?;
                for row in 0..h {
                    let src = &p.0[row * p.1..];
                    let out_row = &mut dst[row * w * 3..(row + 1) * w * 3];
                    for x in 0..w {
                        let px = &src[x * size..x * size + size];
                        out_row[x * 3] = px[r];
                        out_row[x * 3 + 1] = px[g];
                        out_row[x * 3 + 2] = px[b];
                    }
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for RgbScaler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RgbScaler")
            .field("src_format", &self.src_format)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// Plane `index` as `(bytes, stride)`, checked to hold `rows` rows of `row_bytes`.
fn plane(
    frame: &DecodedFrame,
    index: usize,
    row_bytes: usize,
    rows: usize,
) -> Result<(&[u8], usize), AdapterError> {
    let p = frame
        .plane(index)
        .ok_or_else(|| AdapterError::Convert(format!("missing plane {}", index)))?;
    let needed = p.stride * rows.saturating_sub(1) + row_bytes;
    if p.stride < row_bytes || p.data.len() < needed {
        return Err(AdapterError::Convert(format!("plane {} is truncated", index)));
    }
    Ok((&p.data[..], p.stride))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FramePlane;
    use bytes::Bytes;

    fn yuv420(width: u32, height: u32, y: u8, u: u8, v: u8) -> DecodedFrame {
        let (w, h) = (width as usize, height as usize);
        let (cw, ch) = ((w + 1) / 2, (h + 1) / 2);
        DecodedFrame::new(
            PixelFormat::Yuv420p,
            width,
            height,
            vec![
                FramePlane::new(Bytes::from(vec![y; w * h]), w),
                FramePlane::new(Bytes::from(vec![u; cw * ch]), cw),
                FramePlane::new(Bytes::from(vec![v; cw * ch]), cw),
            ],
        )
    }

    #[test]
    fn test_studio_range_white_and_black() {
        let scaler = RgbScaler::new(PixelFormat::Yuv420p, 4, 4, false).unwrap();
        let mut out = vec![0u8; scaler.output_len()];

        scaler.convert(&yuv420(4, 4, 235, 128, 128), &mut out).unwrap();
        assert!(out.iter().all(|&c| c == 255));

        scaler.convert(&yuv420(4, 4, 16, 128, 128), &mut out).unwrap();
        assert!(out.iter().all(|&c| c == 0));
    }

    #[test]
    fn test_full_range_gray() {
        let scaler = RgbScaler::new(PixelFormat::Yuv420p, 2, 2, true).unwrap();
        let mut out = vec![0u8; scaler.output_len()];
        scaler.convert(&yuv420(2, 2, 100, 128, 128), &mut out).unwrap();
        assert!(out.iter().all(|&c| c == 100));
    }

    #[test]
    fn test_bgra_reordered() {
        let frame = DecodedFrame::new(
            PixelFormat::Bgra32,
            1,
            1,
            vec![FramePlane::new(Bytes::from_static(&[10, 20, 30, 255]), 4)],
        );
        let scaler = RgbScaler::new(PixelFormat::Bgra32, 1, 1, true).unwrap();
        let mut out = [0u8; 3];
        scaler.convert(&frame, &mut out).unwrap();
        assert_eq!(out, [30, 20, 10]);
    }

    #[test]
    fn test_unsupported_and_truncated() {
        assert!(matches!(
            RgbScaler::new(PixelFormat::Xyz12, 4, 4, true),
            Err(AdapterError::ScalerContext(PixelFormat::Xyz12))
        ));
        assert!(RgbScaler::new(PixelFormat::Yuv420p, 0, 4, true).is_err());

        let scaler = RgbScaler::new(PixelFormat::Gray8, 4, 4, true).unwrap();
        let short = DecodedFrame::new(
            PixelFormat::Gray8,
            4,
            4,
            vec![FramePlane::new(Bytes::from(vec![0u8; 8]), 4)],
        );
        let mut out = vec![0u8; scaler.output_len()];
        assert!(scaler.convert(&short, &mut out).is_err());
    }
}
