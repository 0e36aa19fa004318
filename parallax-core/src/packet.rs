//! # Compressed Packets
//!
//! Unit of work on the packet queue: either a chunk of compressed video or a
//! control marker. Control markers travel through the same queue so their
//! order relative to data is preserved.

use bytes::{Bytes, BytesMut};

use crate::stereo::{SharedStereoParams, StereoFormat, ViewSurface};

/// Zero bytes appended after every payload so bitstream readers may overread.
pub const INPUT_PADDING: usize = 64;

// ============================================================================
// Packet kinds
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    /// Compressed video.
    Data,
    /// Drop decoder state and clear downstream output.
    Flush,
    /// Reset clocks, begin a new playback run.
    Start,
    /// End of stream; downstream drains.
    End,
    /// Terminate the decode thread.
    Quit,
    /// Null packet, drains frames still buffered inside the codec.
    Last,
}

impl PacketKind {
    pub fn is_control(&self) -> bool {
        !matches!(self, Self::Data)
    }
}

// ============================================================================
// Side data
// ============================================================================

/// Stereo layout signalled inside the bitstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stereo3dKind {
    TwoD,
    SideBySide,
    TopBottom,
    FrameSequence,
    Checkerboard,
    SideBySideQuincunx,
    Lines,
    Columns,
}

/// Which eye a frame carries, for frame-sequential streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StereoView {
    #[default]
    Packed,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stereo3d {
    pub kind: Stereo3dKind,
    /// Eyes are stored right first.
    pub inverted: bool,
    pub view: StereoView,
}

impl Stereo3d {
    pub fn new(kind: Stereo3dKind) -> Self {
        Self {
            kind,
            inverted: false,
            view: StereoView::Packed,
        }
    }

    /// Map to a source layout. Unknown kinds resolve to `Auto`.
    pub fn to_format(&self) -> StereoFormat {
        let format = match self.kind {
            Stereo3dKind::TwoD => StereoFormat::Mono,
            Stereo3dKind::SideBySide | Stereo3dKind::SideBySideQuincunx => {
                StereoFormat::SideBySideLR
            }
            Stereo3dKind::TopBottom => StereoFormat::TopBottomLR,
            Stereo3dKind::FrameSequence => StereoFormat::FrameSequence,
            Stereo3dKind::Lines => StereoFormat::Rows,
            Stereo3dKind::Columns => StereoFormat::Columns,
            Stereo3dKind::Checkerboard => StereoFormat::Auto,
        };
        if self.inverted {
            format.reversed()
        } else {
            format
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    Equirectangular,
    /// Half-sphere (180 degree) equirectangular.
    HalfEquirectangular,
    Cubemap,
    EquirectangularTile,
}

/// Spherical video mapping. Angles are 16.16 fixed-point degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SphericalMapping {
    pub projection: Projection,
    pub yaw: i32,
    pub pitch: i32,
    pub roll: i32,
}

impl SphericalMapping {
    pub fn viewing_mode(&self) -> ViewSurface {
        match self.projection {
            Projection::Equirectangular => ViewSurface::Sphere,
            Projection::HalfEquirectangular => ViewSurface::Hemisphere,
            Projection::Cubemap => ViewSurface::Cubemap,
            // tiled equirectangular needs tile bounds; shown flat
            Projection::EquirectangularTile => ViewSurface::Plain,
        }
    }

    /// Baseline orientation `(-yaw, pitch, -roll)` in degrees.
    pub fn rotation_baseline(&self) -> [f32; 3] {
        let deg = |v: i32| v as f64 / 65536.0;
        [
            -deg(self.yaw) as f32,
            deg(self.pitch) as f32,
            -deg(self.roll) as f32,
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SideData {
    Stereo3d(Stereo3d),
    /// 3x3 transformation matrix, 16.16 fixed point except the last column (2.30).
    DisplayMatrix([i32; 9]),
    Spherical(SphericalMapping),
    Raw { kind: u32, data: Bytes },
}

/// Counter-clockwise rotation encoded in a display matrix, in degrees (-180, 180].
pub fn display_rotation_degrees(matrix: &[i32; 9]) -> f64 {
    let conv = |v: i32| v as f64 / 65536.0;
    let scale0 = conv(matrix[0]).hypot(conv(matrix[3]));
    let scale1 = conv(matrix[1]).hypot(conv(matrix[4]));
    if scale0 == 0.0 || scale1 == 0.0 {
        return f64::NAN;
    }
    let rotation = (conv(matrix[1]) / scale1).atan2(conv(matrix[0]) / scale0);
    -rotation.to_degrees()
}

/// Baseline Z rotation for a display-matrix rotation, whole degrees in (-360, 0].
pub fn z_rotation_from_matrix(matrix: &[i32; 9]) -> Option<f32> {
    let theta = display_rotation_degrees(matrix);
    if theta.is_nan() {
        return None;
    }
    let r = -theta;
    let folded = (r - 360.0 * (r / 360.0 + 0.9 / 360.0).floor()).trunc();
    Some(-folded as f32)
}

/// Build a pure rotation display matrix; used by demuxer adapters and tests.
pub fn rotation_matrix(degrees: f64) -> [i32; 9] {
    let rad = degrees.to_radians();
    let fixed = |v: f64| (v * 65536.0).round() as i32;
    let (s, c) = rad.sin_cos();
    [
        fixed(c),
        fixed(-s),
        0,
        fixed(s),
        fixed(c),
        0,
        0,
        0,
        1 << 30,
    ]
}

// ============================================================================
// Packet
// ============================================================================

#[derive(Debug, Clone)]
pub struct CompressedPacket {
    pub kind: PacketKind,
    /// Payload followed by [`INPUT_PADDING`] zero bytes.
    data: Bytes,
    size: usize,
    pub stream_index: usize,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    /// Duration hint in stream time base units.
    pub duration: i64,
    pub keyframe: bool,
    pub side_data: Vec<SideData>,
    pub params: Option<SharedStereoParams>,
}

impl CompressedPacket {
    /// Create a data packet, copying `payload` into a padded buffer.
    pub fn data(stream_index: usize, payload: &[u8], pts: Option<i64>) -> Self {
        let mut buf = BytesMut::with_capacity(payload.len() + INPUT_PADDING);
        buf.extend_from_slice(payload);
        buf.resize(payload.len() + INPUT_PADDING, 0);
        Self {
            kind: PacketKind::Data,
            data: buf.freeze(),
            size: payload.len(),
            stream_index,
            pts,
            dts: pts,
            duration: 0,
            keyframe: false,
            side_data: Vec::new(),
            params: None,
        }
    }

    pub fn control(kind: PacketKind) -> Self {
        Self {
            kind,
            data: Bytes::new(),
            size: 0,
            stream_index: 0,
            pts: None,
            dts: None,
            duration: 0,
            keyframe: false,
            side_data: Vec::new(),
            params: None,
        }
    }

    pub fn start() -> Self {
        Self::control(PacketKind::Start)
    }

    pub fn flush() -> Self {
        Self::control(PacketKind::Flush)
    }

    pub fn end() -> Self {
        Self::control(PacketKind::End)
    }

    pub fn quit() -> Self {
        Self::control(PacketKind::Quit)
    }

    pub fn last() -> Self {
        Self::control(PacketKind::Last)
    }

    pub fn with_keyframe(mut self, keyframe: bool) -> Self {
        self.keyframe = keyframe;
        self
    }

    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_side_data(mut self, side: SideData) -> Self {
        self.side_data.push(side);
        self
    }

    pub fn with_params(mut self, params: SharedStereoParams) -> Self {
        self.params = Some(params);
        self
    }

    /// Payload without padding.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.size]
    }

    /// Payload including trailing zero padding.
    pub fn padded(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn stereo3d(&self) -> Option<&Stereo3d> {
        self.side_data.iter().find_map(|s| match s {
            SideData::Stereo3d(st) => Some(st),
            _ => None,
        })
    }
}
