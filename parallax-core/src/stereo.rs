//! Stereoscopic layout vocabulary and the per-session shared geometry record.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

// ============================================================================
// Formats
// ============================================================================

/// Source stereo layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StereoFormat {
    /// Not resolved yet; displayed as mono.
    #[default]
    Auto,
    Mono,
    SideBySideLR,
    SideBySideRL,
    TopBottomLR,
    TopBottomRL,
    Rows,
    Columns,
    /// Left and right views come from two independent streams.
    SeparateFrames,
    FrameSequence,
    AnaglyphRedCyan,
    AnaglyphGreenMagenta,
    AnaglyphYellowBlue,
    /// 720p left/right views tiled into one 1080p picture.
    Tiled4x,
}

impl StereoFormat {
    /// Swap the eye order; formats without an order are returned as-is.
    pub fn reversed(self) -> Self {
        match self {
            Self::SideBySideLR => Self::SideBySideRL,
            Self::SideBySideRL => Self::SideBySideLR,
            Self::TopBottomLR => Self::TopBottomRL,
            Self::TopBottomRL => Self::TopBottomLR,
            other => other,
        }
    }

    pub fn is_side_by_side(self) -> bool {
        matches!(self, Self::SideBySideLR | Self::SideBySideRL)
    }

    pub fn is_top_bottom(self) -> bool {
        matches!(self, Self::TopBottomLR | Self::TopBottomRL)
    }

    /// Look up a `STEREO_MODE` / `StereoscopicLayout` tag value.
    pub fn from_tag(value: &str) -> Option<Self> {
        STEREO_TAGS
            .iter()
            .find(|(name, _)| *name == value)
            .map(|(_, format)| *format)
    }

    /// Tag value written into output containers, if the format has one.
    pub fn to_tag(self) -> Option<&'static str> {
        match self {
            Self::Mono => Some("mono"),
            Self::SideBySideRL => Some("right_left"),
            Self::SideBySideLR => Some("left_right"),
            Self::TopBottomRL => Some("bottom_top"),
            Self::TopBottomLR => Some("top_bottom"),
            Self::Rows => Some("row_interleaved_lr"),
            Self::Columns => Some("col_interleaved_lr"),
            Self::FrameSequence => Some("block_lr"),
            Self::AnaglyphRedCyan => Some("anaglyph_cyan_red"),
            Self::AnaglyphGreenMagenta => Some("anaglyph_green_magenta"),
            Self::Auto | Self::SeparateFrames | Self::AnaglyphYellowBlue | Self::Tiled4x => None,
        }
    }
}

/// Container tag key carrying the stereo layout (Matroska and friends).
pub const STEREO_MODE_TAG: &str = "STEREO_MODE";
/// WMV container tag key carrying the stereo layout.
pub const WMV_LAYOUT_TAG: &str = "StereoscopicLayout";

/// Tag value → layout. Matroska `STEREO_MODE` names first, then WMV `StereoscopicLayout`.
pub const STEREO_TAGS: &[(&str, StereoFormat)] = &[
    ("mono", StereoFormat::Mono),
    ("right_left", StereoFormat::SideBySideRL),
    ("left_right", StereoFormat::SideBySideLR),
    ("bottom_top", StereoFormat::TopBottomRL),
    ("top_bottom", StereoFormat::TopBottomLR),
    ("row_interleaved_rl", StereoFormat::Rows),
    ("row_interleaved_lr", StereoFormat::Rows),
    ("col_interleaved_rl", StereoFormat::Columns),
    ("col_interleaved_lr", StereoFormat::Columns),
    ("block_lr", StereoFormat::FrameSequence),
    ("block_rl", StereoFormat::FrameSequence),
    ("anaglyph_cyan_red", StereoFormat::AnaglyphRedCyan),
    ("anaglyph_green_magenta", StereoFormat::AnaglyphGreenMagenta),
    ("SideBySideRF", StereoFormat::SideBySideRL),
    ("SideBySideLF", StereoFormat::SideBySideLR),
    ("OverUnderLT", StereoFormat::TopBottomLR),
    ("OverUnderRT", StereoFormat::TopBottomRL),
];

/// Packed cubemap layout handed to the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CubemapLayout {
    #[default]
    Off,
    Packed,
    PackedEac,
}

/// Surface the consumer projects the image onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ViewSurface {
    #[default]
    Plain,
    Theater,
    Sphere,
    Hemisphere,
    Cubemap,
    CubemapEac,
}

// ============================================================================
// Filename inference
// ============================================================================

/// Result of guessing the layout from a file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameHint {
    pub format: StereoFormat,
    /// Views are squeezed to half resolution (e.g. "half SBS").
    pub anamorphic: bool,
}

/// Guess the stereo layout from a file name.
///
/// `.jps`/`.pns` are cross-eyed side-by-side unless `swap_jps` is set. Other
/// names are split into alphanumeric tokens; the last recognized token wins.
pub fn format_from_name(file_name: &str, swap_jps: bool) -> NameHint {
    let path = Path::new(file_name);
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    if ext == "jps" || ext == "pns" {
        return NameHint {
            format: if swap_jps {
                StereoFormat::SideBySideLR
            } else {
                StereoFormat::SideBySideRL
            },
            anamorphic: false,
        };
    }

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let mut hint = NameHint {
        format: StereoFormat::Auto,
        anamorphic: false,
    };
    let mut half_prefix = false;
    for token in stem.split(|c: char| !c.is_ascii_alphanumeric()) {
        if token == "half" {
            half_prefix = true;
            continue;
        }
        let (format, squeezed) = match token {
            "sbs" | "lr" => (StereoFormat::SideBySideLR, false),
            "rl" => (StereoFormat::SideBySideRL, false),
            "hsbs" | "halfsbs" => (StereoFormat::SideBySideLR, true),
            "ou" | "tb" | "ab" => (StereoFormat::TopBottomLR, false),
            "hou" | "htb" | "hab" | "halfou" | "halftb" => (StereoFormat::TopBottomLR, true),
            "ba" => (StereoFormat::TopBottomRL, false),
            "2d" => (StereoFormat::Mono, false),
            _ => {
                half_prefix = false;
                continue;
            }
        };
        hint = NameHint {
            format,
            anamorphic: squeezed || half_prefix,
        };
        half_prefix = false;
    }
    hint
}

/// Guess a panorama surface from the source geometry.
///
/// Equirectangular: 2:1 per view. Cubemap: 6:1 strip or 3:2 grid per view.
pub fn probe_panorama(
    format: StereoFormat,
    left: (u32, u32),
    right: (u32, u32),
) -> ViewSurface {
    let (mut w, mut h) = (left.0 as f64, left.1 as f64);
    if w <= 0.0 || h <= 0.0 {
        return ViewSurface::Plain;
    }
    match format {
        StereoFormat::SideBySideLR | StereoFormat::SideBySideRL => w /= 2.0,
        StereoFormat::TopBottomLR | StereoFormat::TopBottomRL => h /= 2.0,
        StereoFormat::SeparateFrames if right != left && right.0 > 0 => {
            return ViewSurface::Plain;
        }
        _ => {}
    }
    let ratio = w / h;
    let near = |target: f64| (ratio - target).abs() < 0.01;
    if near(2.0) {
        ViewSurface::Sphere
    } else if near(6.0) || near(1.5) {
        ViewSurface::Cubemap
    } else {
        ViewSurface::Plain
    }
}

// ============================================================================
// Shared stereo parameters
// ============================================================================

/// Per-session geometry shared between the decode thread (single writer) and
/// the render thread (readers).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StereoParams {
    /// Layout of the frames last pushed for this session.
    pub src_format: StereoFormat,
    pub viewing_mode: ViewSurface,
    /// Neutral horizontal separation in pixels.
    pub separation_neutral: i32,
    /// Baseline panorama orientation (yaw, pitch, roll) in degrees.
    pub rotate_zero: [f32; 3],
    /// Baseline in-plane rotation in degrees.
    pub z_rotate_zero: f32,
    pub src1_size: (u32, u32),
    pub src2_size: (u32, u32),
}

impl Default for StereoParams {
    fn default() -> Self {
        Self {
            src_format: StereoFormat::Auto,
            viewing_mode: ViewSurface::Plain,
            separation_neutral: 0,
            rotate_zero: [0.0; 3],
            z_rotate_zero: 0.0,
            src1_size: (0, 0),
            src2_size: (0, 0),
        }
    }
}

impl StereoParams {
    pub fn is_zero_rotate(&self) -> bool {
        self.rotate_zero == [0.0; 3] && self.z_rotate_zero == 0.0
    }

    pub fn set_rotate_zero(&mut self, yaw: f32, pitch: f32, roll: f32) {
        self.rotate_zero = [yaw, pitch, roll];
    }

    pub fn set_separation_neutral(&mut self, pixels: i32) {
        self.separation_neutral = pixels;
    }

    pub fn set_z_rotate_zero(&mut self, degrees: f32) {
        self.z_rotate_zero = degrees;
    }

    pub fn shared(self) -> SharedStereoParams {
        Arc::new(RwLock::new(self))
    }
}

/// Reference-counted handle to a session's [`StereoParams`].
pub type SharedStereoParams = Arc<RwLock<StereoParams>>;
