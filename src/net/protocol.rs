//! Frame protocol: packet kinds, delta type tags, field flags and
//! acknowledgment packets.

use smallvec::SmallVec;

use crate::net::framing::{FrameBuilder, FrameReader, ReadError};

/// Identifier of one server-authoritative state update unit (wraps at 256)
pub type FrameSetId = u8;

/// Identifier of a retransmitted delta (separate namespace from sets)
pub type ResendId = u8;

/// Network thing id of a map object, unique within the loaded map
pub type ThingId = u16;

/// Tag bit marking a delta record as a retransmission
pub const DT_RESENT: u8 = 0x80;

/// Packet kinds carried in the first byte of every datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    /// Regular frame (server to client)
    Frame = 0x01,
    /// Frame establishing the trusted baseline for a map (server to client)
    FirstFrame = 0x02,
    /// Plain acknowledgment of a set (client to server)
    AckSet = 0x10,
    /// Acknowledgment of a set plus resend ids (client to server)
    AckSetResends = 0x11,
}

impl PacketKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Frame),
            0x02 => Some(Self::FirstFrame),
            0x10 => Some(Self::AckSet),
            0x11 => Some(Self::AckSetResends),
            _ => None,
        }
    }

    /// Whether this packet carries a frame payload
    pub fn is_frame(self) -> bool {
        matches!(self, Self::Frame | Self::FirstFrame)
    }
}

/// Delta record type tags (bit 7 reserved for [`DT_RESENT`])
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeltaType {
    Mobj = 0x00,
    Player = 0x01,
    Sector = 0x02,
    Side = 0x03,
    Poly = 0x04,
    Sound = 0x05,
    MobjSound = 0x06,
    SectorSound = 0x07,
    SideSound = 0x08,
    PolySound = 0x09,
    CreateMobj = 0x0a,
    NullMobj = 0x0b,
}

impl DeltaType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x00 => Self::Mobj,
            0x01 => Self::Player,
            0x02 => Self::Sector,
            0x03 => Self::Side,
            0x04 => Self::Poly,
            0x05 => Self::Sound,
            0x06 => Self::MobjSound,
            0x07 => Self::SectorSound,
            0x08 => Self::SideSound,
            0x09 => Self::PolySound,
            0x0a => Self::CreateMobj,
            0x0b => Self::NullMobj,
            _ => return None,
        })
    }
}

/// Mobj delta field bits
pub mod mobj_fields {
    pub const ORIGIN_X: u16 = 0x0001;
    pub const ORIGIN_Y: u16 = 0x0002;
    pub const ORIGIN_Z: u16 = 0x0004;
    pub const MOM_X: u16 = 0x0008;
    pub const MOM_Y: u16 = 0x0010;
    pub const MOM_Z: u16 = 0x0020;
    pub const ANGLE: u16 = 0x0040;
    pub const SELECTOR: u16 = 0x0080;
    pub const STATE: u16 = 0x0100;
    pub const RADIUS: u16 = 0x0200;
    pub const HEIGHT: u16 = 0x0400;
    pub const DDFLAGS: u16 = 0x0800;
    pub const FLOORCLIP: u16 = 0x1000;
    pub const TRANSLUCENCY: u16 = 0x2000;
    pub const STICK_FLOOR: u16 = 0x4000;
    pub const STICK_CEILING: u16 = 0x8000;

    pub const ORIGIN: u16 = ORIGIN_X | ORIGIN_Y | ORIGIN_Z;
    pub const MOM: u16 = MOM_X | MOM_Y | MOM_Z;
    pub const STICK: u16 = STICK_FLOOR | STICK_CEILING;
}

/// Server-side mobj flags carried in the DDFLAGS field
pub mod ddflags {
    pub const SOLID: u32 = 0x0000_0001;
    pub const MISSILE: u32 = 0x0000_0002;
    /// Freshly spawned missile still overlapping its shooter
    pub const UNPREDICTABLE: u32 = 0x0000_0008;
}

/// Player delta field bits
pub mod player_fields {
    pub const MOBJ: u16 = 0x0001;
    pub const FORWARD_MOVE: u16 = 0x0002;
    pub const SIDE_MOVE: u16 = 0x0004;
    pub const ANGLE: u16 = 0x0008;
    pub const LOOK_DIR: u16 = 0x0010;
    pub const FRICTION: u16 = 0x0020;
    pub const EXTRA_LIGHT: u16 = 0x0040;
    pub const FILTER: u16 = 0x0080;
    pub const PSPRITES: u16 = 0x0100;
}

/// Sector delta field bits
pub mod sector_fields {
    pub const FLOOR_HEIGHT: u8 = 0x01;
    pub const CEILING_HEIGHT: u8 = 0x02;
    pub const FLOOR_SPEED: u8 = 0x04;
    pub const CEILING_SPEED: u8 = 0x08;
    pub const FLOOR_TARGET: u8 = 0x10;
    pub const CEILING_TARGET: u8 = 0x20;
    pub const LIGHT: u8 = 0x40;
}

/// Side delta field bits
pub mod side_fields {
    pub const TOP_OFFSET: u8 = 0x01;
    pub const MIDDLE_OFFSET: u8 = 0x02;
    pub const BOTTOM_OFFSET: u8 = 0x04;
    pub const FLAGS: u8 = 0x08;
}

/// Polyobject delta field bits
pub mod poly_fields {
    pub const DEST_X: u8 = 0x01;
    pub const DEST_Y: u8 = 0x02;
    pub const SPEED: u8 = 0x04;
    pub const DEST_ANGLE: u8 = 0x08;
    pub const ANGLE_SPEED: u8 = 0x10;
}

/// Sound delta flag bits
pub mod sound_flags {
    pub const VOLUME: u8 = 0x01;
    pub const REPEAT: u8 = 0x02;
    pub const PLANE_FLOOR: u8 = 0x04;
    pub const PLANE_CEILING: u8 = 0x08;
    pub const SIDE_TOP: u8 = 0x10;
    pub const SIDE_MIDDLE: u8 = 0x20;
    pub const SIDE_BOTTOM: u8 = 0x40;

    /// Volume byte meaning full volume without distance attenuation
    pub const VOLUME_NO_ATTENUATION: u8 = 255;
}

// ============================================================================
// Fixed-point helpers
// ============================================================================

/// Read a map coordinate: i16 integer part + u8 fraction (/256)
pub fn read_coord(reader: &mut FrameReader<'_>) -> Result<f32, ReadError> {
    let whole = reader.read_i16()?;
    let frac = reader.read_u8()?;
    Ok(f32::from(whole) + f32::from(frac) / 256.0)
}

/// Write a map coordinate (see [`read_coord`])
pub fn write_coord(builder: FrameBuilder, value: f32) -> FrameBuilder {
    let fixed = (value * 256.0).round() as i32;
    let whole = fixed.div_euclid(256).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
    let frac = fixed.rem_euclid(256) as u8;
    builder.write_i16(whole).write_u8(frac)
}

/// Read a momentum component: i16 8.8 fixed point
pub fn read_momentum(reader: &mut FrameReader<'_>) -> Result<f32, ReadError> {
    Ok(f32::from(reader.read_i16()?) / 256.0)
}

/// Write a momentum component (see [`read_momentum`])
pub fn write_momentum(builder: FrameBuilder, value: f32) -> FrameBuilder {
    let fixed = (value * 256.0)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16;
    builder.write_i16(fixed)
}

/// Convert a 16-bit binary angle to degrees
pub fn angle_to_degrees(angle: u16) -> f32 {
    f32::from(angle) * 360.0 / 65536.0
}

// ============================================================================
// Acknowledgments
// ============================================================================

/// Acknowledgment produced after processing one frame packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    /// No resent deltas were observed
    Set(FrameSetId),
    /// One or more resent deltas were observed; each id listed once
    SetWithResends {
        set: FrameSetId,
        resends: SmallVec<[ResendId; 16]>,
    },
}

impl Ack {
    pub fn set(&self) -> FrameSetId {
        match self {
            Ack::Set(set) => *set,
            Ack::SetWithResends { set, .. } => *set,
        }
    }

    pub fn resends(&self) -> &[ResendId] {
        match self {
            Ack::Set(_) => &[],
            Ack::SetWithResends { resends, .. } => resends,
        }
    }

    pub fn kind(&self) -> PacketKind {
        match self {
            Ack::Set(_) => PacketKind::AckSet,
            Ack::SetWithResends { .. } => PacketKind::AckSetResends,
        }
    }

    /// Encode a complete datagram: packet kind followed by the body
    pub fn encode_packet(&self) -> Vec<u8> {
        FrameBuilder::with_capacity(2 + self.resends().len())
            .write_u8(self.kind() as u8)
            .write_u8(self.set())
            .write(self.resends())
            .build()
    }
}
