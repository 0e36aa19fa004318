// PIXEL - Decoder-native pixel formats
//
// Decoders hand us frames in whatever layout the bitstream was coded in.
// This module describes those layouts well enough for the frame adapter to
// decide between wrapping planes in place and running the RGB scaler.

use serde::{Deserialize, Serialize};

// ============================================================================
// Pixel Formats
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    // YUV planar, studio range unless the stream says otherwise
    Yuv420p,
    Yuva420p,
    Yuv422p,
    Yuva422p,
    Yuv444p,
    Yuva444p,
    Yuv410p,
    Yuv411p,
    Yuv440p,

    // YUV planar, full range (JPEG)
    Yuvj420p,
    Yuvj422p,
    Yuvj444p,
    Yuvj440p,

    // Wide YUV planar (9/10/16 bits stored in 16-bit words)
    Yuv420p9,
    Yuv422p9,
    Yuv444p9,
    Yuv420p10,
    Yuv422p10,
    Yuv444p10,
    Yuv420p16,
    Yuv422p16,
    Yuv444p16,

    // YUV semi-planar
    Nv12,
    Nv21,

    // Packed RGB
    Rgb24,
    Bgr24,
    Rgba32,
    Bgra32,
    Rgb48,

    // Other
    Gray8,
    Gray16,
    Pal8,
    Xyz12,

    // Hardware surfaces (frame data lives on the GPU)
    Dxva2,
    VideoToolbox,
    Vaapi,
    Cuda,
    MediaCodec,
}

/// Plane geometry of a planar YUV format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YuvLayout {
    pub log2_chroma_w: u8,
    pub log2_chroma_h: u8,
    pub bits_per_comp: u8,
    pub full_scale: bool,
    pub has_alpha: bool,
}

/// Per-plane dimensions of a planar YUV frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YuvDims {
    pub width_y: u32,
    pub height_y: u32,
    pub width_u: u32,
    pub height_u: u32,
    pub width_v: u32,
    pub height_v: u32,
    pub bits_per_comp: u8,
    pub full_scale: bool,
    pub has_alpha: bool,
}

impl PixelFormat {
    /// Planar YUV layout, or `None` for every other format.
    pub fn yuv_layout(&self) -> Option<YuvLayout> {
        let (cw, ch, bits, full, alpha) = match self {
            Self::Yuv420p => (1, 1, 8, false, false),
            Self::Yuva420p => (1, 1, 8, false, true),
            Self::Yuv422p => (1, 0, 8, false, false),
            Self::Yuva422p => (1, 0, 8, false, true),
            Self::Yuv444p => (0, 0, 8, false, false),
            Self::Yuva444p => (0, 0, 8, false, true),
            Self::Yuv410p => (2, 2, 8, false, false),
            Self::Yuv411p => (2, 0, 8, false, false),
            Self::Yuv440p => (0, 1, 8, false, false),
            Self::Yuvj420p => (1, 1, 8, true, false),
            Self::Yuvj422p => (1, 0, 8, true, false),
            Self::Yuvj444p => (0, 0, 8, true, false),
            Self::Yuvj440p => (0, 1, 8, true, false),
            Self::Yuv420p9 => (1, 1, 9, false, false),
            Self::Yuv422p9 => (1, 0, 9, false, false),
            Self::Yuv444p9 => (0, 0, 9, false, false),
            Self::Yuv420p10 => (1, 1, 10, false, false),
            Self::Yuv422p10 => (1, 0, 10, false, false),
            Self::Yuv444p10 => (0, 0, 10, false, false),
            Self::Yuv420p16 => (1, 1, 16, false, false),
            Self::Yuv422p16 => (1, 0, 16, false, false),
            Self::Yuv444p16 => (0, 0, 16, false, false),
            _ => return None,
        };
        Some(YuvLayout {
            log2_chroma_w: cw,
            log2_chroma_h: ch,
            bits_per_comp: bits,
            full_scale: full,
            has_alpha: alpha,
        })
    }

    /// Plane dimensions for a planar YUV frame of the given luma size.
    pub fn yuv_dims(&self, width: u32, height: u32) -> Option<YuvDims> {
        let layout = self.yuv_layout()?;
        let chroma = |v: u32, shift: u8| -> u32 { (v + (1 << shift) - 1) >> shift };
        let width_u = chroma(width, layout.log2_chroma_w);
        let height_u = chroma(height, layout.log2_chroma_h);
        Some(YuvDims {
            width_y: width,
            height_y: height,
            width_u,
            height_u,
            width_v: width_u,
            height_v: height_u,
            bits_per_comp: layout.bits_per_comp,
            full_scale: layout.full_scale,
            has_alpha: layout.has_alpha,
        })
    }

    pub fn is_hardware(&self) -> bool {
        matches!(
            self,
            Self::Dxva2 | Self::VideoToolbox | Self::Vaapi | Self::Cuda | Self::MediaCodec
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Yuv420p => "yuv420p",
            Self::Yuva420p => "yuva420p",
            Self::Yuv422p => "yuv422p",
            Self::Yuva422p => "yuva422p",
            Self::Yuv444p => "yuv444p",
            Self::Yuva444p => "yuva444p",
            Self::Yuv410p => "yuv410p",
            Self::Yuv411p => "yuv411p",
            Self::Yuv440p => "yuv440p",
            Self::Yuvj420p => "yuvj420p",
            Self::Yuvj422p => "yuvj422p",
            Self::Yuvj444p => "yuvj444p",
            Self::Yuvj440p => "yuvj440p",
            Self::Yuv420p9 => "yuv420p9",
            Self::Yuv422p9 => "yuv422p9",
            Self::Yuv444p9 => "yuv444p9",
            Self::Yuv420p10 => "yuv420p10",
            Self::Yuv422p10 => "yuv422p10",
            Self::Yuv444p10 => "yuv444p10",
            Self::Yuv420p16 => "yuv420p16",
            Self::Yuv422p16 => "yuv422p16",
            Self::Yuv444p16 => "yuv444p16",
            Self::Nv12 => "nv12",
            Self::Nv21 => "nv21",
            Self::Rgb24 => "rgb24",
            Self::Bgr24 => "bgr24",
            Self::Rgba32 => "rgba",
            Self::Bgra32 => "bgra",
            Self::Rgb48 => "rgb48",
            Self::Gray8 => "gray",
            Self::Gray16 => "gray16",
            Self::Pal8 => "pal8",
            Self::Xyz12 => "xyz12",
            Self::Dxva2 => "dxva2_vld",
            Self::VideoToolbox => "videotoolbox_vld",
            Self::Vaapi => "vaapi",
            Self::Cuda => "cuda",
            Self::MediaCodec => "mediacodec",
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Sample range signalled by the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColorRange {
    #[default]
    Unspecified,
    /// 16..235 luma
    Studio,
    /// 0..255 luma
    Full,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuv_dims_round_up() {
        let dims = PixelFormat::Yuv420p.yuv_dims(1921, 1081).unwrap();
        assert_eq!((dims.width_u, dims.height_u), (961, 541));

        let dims = PixelFormat::Yuv410p.yuv_dims(1920, 1080).unwrap();
        assert_eq!((dims.width_u, dims.height_u), (480, 270));

        let dims = PixelFormat::Yuv411p.yuv_dims(1920, 1080).unwrap();
        assert_eq!((dims.width_u, dims.height_u), (480, 1080));
    }

    #[test]
    fn test_layout_flags() {
        assert!(PixelFormat::Yuvj420p.yuv_layout().unwrap().full_scale);
        assert!(PixelFormat::Yuva444p.yuv_layout().unwrap().has_alpha);
        assert_eq!(PixelFormat::Yuv422p10.yuv_layout().unwrap().bits_per_comp, 10);
        assert!(PixelFormat::Nv12.yuv_layout().is_none());
        assert!(PixelFormat::Dxva2.is_hardware());
        assert!(!PixelFormat::Rgb24.is_hardware());
    }
}
