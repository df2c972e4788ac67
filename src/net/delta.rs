//! Delta record codec
//!
//! A frame payload is a flat concatenation of records, each starting with a
//! one-byte type tag. When the tag has [`DT_RESENT`] set, the original set id
//! and the resend id follow before the type-specific payload. Decoding stops
//! when the buffer is exhausted; there is no record count.
//!
//! Parsing produces typed [`DeltaRecord`]s without touching any client state,
//! so a malformed packet is rejected as a whole before anything is applied.

use smallvec::SmallVec;

use crate::game::constants::players::MAX_PSPRITES;
use crate::game::mobj::VerticalPosition;
use crate::net::framing::{FrameBuilder, FrameReader, ReadError};
use crate::net::protocol::{
    mobj_fields, player_fields, poly_fields, read_coord, read_momentum, sector_fields,
    side_fields, sound_flags, write_coord, write_momentum, DeltaType, FrameSetId, PacketKind,
    ResendId, ThingId, DT_RESENT,
};

/// Fatal decode errors: the stream position past this point is unknown
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Unknown delta type tag 0x{tag:02x} at offset {offset}")]
    UnknownDeltaType { tag: u8, offset: usize },
    #[error("Truncated resend header at offset {offset}")]
    TruncatedResendHeader { offset: usize },
    #[error("Truncated {kind:?} delta at offset {offset}: {source}")]
    Truncated {
        kind: DeltaType,
        offset: usize,
        #[source]
        source: ReadError,
    },
    #[error("Malformed {kind:?} delta at offset {offset}: {reason}")]
    Malformed {
        kind: DeltaType,
        offset: usize,
        reason: &'static str,
    },
}

/// Record-local failure, wrapped into a [`DecodeError`] with kind and offset
#[derive(Debug)]
enum RecordError {
    Read(ReadError),
    Malformed(&'static str),
}

impl From<ReadError> for RecordError {
    fn from(err: ReadError) -> Self {
        RecordError::Read(err)
    }
}

type RecordResult<T> = Result<T, RecordError>;

/// Resend header of a retransmitted record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resend {
    /// Set the content originally belonged to
    pub orig_set: FrameSetId,
    pub resend_id: ResendId,
}

/// One decoded record of a frame payload
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaRecord {
    pub resend: Option<Resend>,
    pub delta: Delta,
}

impl DeltaRecord {
    pub fn new(delta: Delta) -> Self {
        Self {
            resend: None,
            delta,
        }
    }

    pub fn resent(delta: Delta, orig_set: FrameSetId, resend_id: ResendId) -> Self {
        Self {
            resend: Some(Resend {
                orig_set,
                resend_id,
            }),
            delta,
        }
    }

    pub fn encode(&self, builder: FrameBuilder) -> FrameBuilder {
        let tag = self.delta.delta_type() as u8;
        let builder = match self.resend {
            Some(resend) => builder
                .write_u8(tag | DT_RESENT)
                .write_u8(resend.orig_set)
                .write_u8(resend.resend_id),
            None => builder.write_u8(tag),
        };
        self.delta.encode(builder)
    }
}

/// Typed delta content
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    CreateMobj(MobjDelta),
    Mobj(MobjDelta),
    NullMobj(ThingId),
    Player(PlayerDelta),
    Sector(SectorDelta),
    Side(SideDelta),
    Poly(PolyDelta),
    Sound(SoundDelta),
}

impl Delta {
    pub fn delta_type(&self) -> DeltaType {
        match self {
            Delta::CreateMobj(_) => DeltaType::CreateMobj,
            Delta::Mobj(_) => DeltaType::Mobj,
            Delta::NullMobj(_) => DeltaType::NullMobj,
            Delta::Player(_) => DeltaType::Player,
            Delta::Sector(_) => DeltaType::Sector,
            Delta::Side(_) => DeltaType::Side,
            Delta::Poly(_) => DeltaType::Poly,
            Delta::Sound(sound) => sound.target.delta_type(),
        }
    }

    fn decode(kind: DeltaType, reader: &mut FrameReader<'_>) -> RecordResult<Self> {
        Ok(match kind {
            DeltaType::CreateMobj => Delta::CreateMobj(MobjDelta::decode(reader)?),
            DeltaType::Mobj => Delta::Mobj(MobjDelta::decode(reader)?),
            DeltaType::NullMobj => Delta::NullMobj(reader.read_u16()?),
            DeltaType::Player => Delta::Player(PlayerDelta::decode(reader)?),
            DeltaType::Sector => Delta::Sector(SectorDelta::decode(reader)?),
            DeltaType::Side => Delta::Side(SideDelta::decode(reader)?),
            DeltaType::Poly => Delta::Poly(PolyDelta::decode(reader)?),
            DeltaType::Sound
            | DeltaType::MobjSound
            | DeltaType::SectorSound
            | DeltaType::SideSound
            | DeltaType::PolySound => Delta::Sound(SoundDelta::decode(kind, reader)?),
        })
    }

    pub fn encode(&self, builder: FrameBuilder) -> FrameBuilder {
        match self {
            Delta::CreateMobj(mobj) | Delta::Mobj(mobj) => mobj.encode(builder),
            Delta::NullMobj(id) => builder.write_u16(*id),
            Delta::Player(player) => player.encode(builder),
            Delta::Sector(sector) => sector.encode(builder),
            Delta::Side(side) => side.encode(builder),
            Delta::Poly(poly) => poly.encode(builder),
            Delta::Sound(sound) => sound.encode(builder),
        }
    }
}

// ============================================================================
// Payload parsing
// ============================================================================

/// Parse every record remaining in the reader
pub fn parse_records(reader: &mut FrameReader<'_>) -> Result<Vec<DeltaRecord>, DecodeError> {
    let mut records = Vec::new();

    while reader.has_remaining() {
        let offset = reader.position();
        let tag = reader
            .read_u8()
            .map_err(|_| DecodeError::TruncatedResendHeader { offset })?;

        let resend = if tag & DT_RESENT != 0 {
            let orig_set = reader.read_u8();
            let resend_id = reader.read_u8();
            match (orig_set, resend_id) {
                (Ok(orig_set), Ok(resend_id)) => Some(Resend {
                    orig_set,
                    resend_id,
                }),
                _ => return Err(DecodeError::TruncatedResendHeader { offset }),
            }
        } else {
            None
        };

        let kind = DeltaType::from_u8(tag & !DT_RESENT)
            .ok_or(DecodeError::UnknownDeltaType { tag, offset })?;

        let delta = Delta::decode(kind, reader).map_err(|err| match err {
            RecordError::Read(ReadError::PackedOverflow(_)) => DecodeError::Malformed {
                kind,
                offset,
                reason: "packed value overflow",
            },
            RecordError::Read(source) => DecodeError::Truncated {
                kind,
                offset,
                source,
            },
            RecordError::Malformed(reason) => DecodeError::Malformed {
                kind,
                offset,
                reason,
            },
        })?;

        records.push(DeltaRecord { resend, delta });
    }

    Ok(records)
}

/// Encode a frame payload: set id followed by the records
pub fn encode_frame(set: FrameSetId, records: &[DeltaRecord]) -> Vec<u8> {
    records
        .iter()
        .fold(FrameBuilder::new().write_u8(set), |builder, record| {
            record.encode(builder)
        })
        .build()
}

/// Encode a complete frame datagram including the packet kind byte
pub fn encode_frame_packet(kind: PacketKind, set: FrameSetId, records: &[DeltaRecord]) -> Vec<u8> {
    let payload = encode_frame(set, records);
    FrameBuilder::with_capacity(payload.len() + 1)
        .write_u8(kind as u8)
        .write(&payload)
        .build()
}

// ============================================================================
// Mobj deltas
// ============================================================================

/// Animation state reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateRef {
    pub state: u16,
    pub tics: u8,
}

/// Changed fields of one map object
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MobjDelta {
    pub id: ThingId,
    pub x: Option<f32>,
    pub y: Option<f32>,
    pub z: Option<VerticalPosition>,
    pub mom_x: Option<f32>,
    pub mom_y: Option<f32>,
    pub mom_z: Option<f32>,
    pub angle: Option<u16>,
    pub selector: Option<u16>,
    pub state: Option<StateRef>,
    pub radius: Option<u8>,
    pub height: Option<u8>,
    pub ddflags: Option<u32>,
    pub floorclip: Option<f32>,
    pub translucency: Option<u8>,
}

impl MobjDelta {
    pub fn new(id: ThingId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// Builder-style helper setting the horizontal and vertical origin
    pub fn with_origin(mut self, x: f32, y: f32, z: VerticalPosition) -> Self {
        self.x = Some(x);
        self.y = Some(y);
        self.z = Some(z);
        self
    }

    /// Field mask as it appears on the wire
    pub fn fields(&self) -> u16 {
        use mobj_fields::*;
        let mut fields = 0;
        let mut set = |present: bool, bit: u16| {
            if present {
                fields |= bit;
            }
        };
        set(self.x.is_some(), ORIGIN_X);
        set(self.y.is_some(), ORIGIN_Y);
        set(
            matches!(self.z, Some(VerticalPosition::Absolute(_))),
            ORIGIN_Z,
        );
        set(self.mom_x.is_some(), MOM_X);
        set(self.mom_y.is_some(), MOM_Y);
        set(self.mom_z.is_some(), MOM_Z);
        set(self.angle.is_some(), ANGLE);
        set(self.selector.is_some(), SELECTOR);
        set(self.state.is_some(), STATE);
        set(self.radius.is_some(), RADIUS);
        set(self.height.is_some(), HEIGHT);
        set(self.ddflags.is_some(), DDFLAGS);
        set(self.floorclip.is_some(), FLOORCLIP);
        set(self.translucency.is_some(), TRANSLUCENCY);
        set(
            matches!(self.z, Some(VerticalPosition::StickFloor)),
            STICK_FLOOR,
        );
        set(
            matches!(self.z, Some(VerticalPosition::StickCeiling)),
            STICK_CEILING,
        );
        fields
    }

    /// Whether the delta carries enough to place the mobj in the world
    pub fn has_full_placement(&self) -> bool {
        self.x.is_some()
            && self.y.is_some()
            && self.z.is_some()
            && self.radius.is_some()
            && self.height.is_some()
            && self.ddflags.is_some()
    }

    fn decode(reader: &mut FrameReader<'_>) -> RecordResult<Self> {
        use mobj_fields::*;
        let id = reader.read_u16()?;
        let fields = reader.read_u16()?;
        let has = |bit: u16| fields & bit != 0;

        let mut delta = MobjDelta::new(id);
        if has(ORIGIN_X) {
            delta.x = Some(read_coord(reader)?);
        }
        if has(ORIGIN_Y) {
            delta.y = Some(read_coord(reader)?);
        }
        let z = if has(ORIGIN_Z) {
            Some(read_coord(reader)?)
        } else {
            None
        };
        if has(MOM_X) {
            delta.mom_x = Some(read_momentum(reader)?);
        }
        if has(MOM_Y) {
            delta.mom_y = Some(read_momentum(reader)?);
        }
        if has(MOM_Z) {
            delta.mom_z = Some(read_momentum(reader)?);
        }
        if has(ANGLE) {
            delta.angle = Some(reader.read_u16()?);
        }
        if has(SELECTOR) {
            delta.selector = Some(reader.read_packed_u16()?);
        }
        if has(STATE) {
            let state = reader.read_packed_u16()?;
            let tics = reader.read_u8()?;
            delta.state = Some(StateRef { state, tics });
        }
        if has(RADIUS) {
            delta.radius = Some(reader.read_u8()?);
        }
        if has(HEIGHT) {
            delta.height = Some(reader.read_u8()?);
        }
        if has(DDFLAGS) {
            delta.ddflags = Some(reader.read_u32()?);
        }
        if has(FLOORCLIP) {
            delta.floorclip = Some(f32::from(reader.read_u8()?) / 4.0);
        }
        if has(TRANSLUCENCY) {
            delta.translucency = Some(reader.read_u8()?);
        }

        delta.z = if has(STICK_FLOOR) {
            Some(VerticalPosition::StickFloor)
        } else if has(STICK_CEILING) {
            Some(VerticalPosition::StickCeiling)
        } else {
            z.map(VerticalPosition::Absolute)
        };

        Ok(delta)
    }

    fn encode(&self, builder: FrameBuilder) -> FrameBuilder {
        let mut b = builder.write_u16(self.id).write_u16(self.fields());
        if let Some(x) = self.x {
            b = write_coord(b, x);
        }
        if let Some(y) = self.y {
            b = write_coord(b, y);
        }
        if let Some(VerticalPosition::Absolute(z)) = self.z {
            b = write_coord(b, z);
        }
        for mom in [self.mom_x, self.mom_y, self.mom_z].into_iter().flatten() {
            b = write_momentum(b, mom);
        }
        if let Some(angle) = self.angle {
            b = b.write_u16(angle);
        }
        if let Some(selector) = self.selector {
            b = b.write_packed_u16(selector);
        }
        if let Some(state) = self.state {
            b = b.write_packed_u16(state.state).write_u8(state.tics);
        }
        if let Some(radius) = self.radius {
            b = b.write_u8(radius);
        }
        if let Some(height) = self.height {
            b = b.write_u8(height);
        }
        if let Some(ddflags) = self.ddflags {
            b = b.write_u32(ddflags);
        }
        if let Some(floorclip) = self.floorclip {
            b = b.write_u8((floorclip * 4.0).round().clamp(0.0, 255.0) as u8);
        }
        if let Some(translucency) = self.translucency {
            b = b.write_u8(translucency);
        }
        b
    }
}

// ============================================================================
// Player deltas
// ============================================================================

/// Changed fields of one player
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerDelta {
    pub player: u8,
    pub mobj: Option<ThingId>,
    pub forward_move: Option<i8>,
    pub side_move: Option<i8>,
    pub angle: Option<u16>,
    /// Look direction in degrees
    pub look_dir: Option<f32>,
    pub friction: Option<f32>,
    pub extra_light: Option<u8>,
    pub filter: Option<u32>,
    pub psprites: Option<SmallVec<[StateRef; MAX_PSPRITES]>>,
}

impl PlayerDelta {
    pub fn new(player: u8) -> Self {
        Self {
            player,
            ..Default::default()
        }
    }

    pub fn fields(&self) -> u16 {
        use player_fields::*;
        [
            (self.mobj.is_some(), MOBJ),
            (self.forward_move.is_some(), FORWARD_MOVE),
            (self.side_move.is_some(), SIDE_MOVE),
            (self.angle.is_some(), ANGLE),
            (self.look_dir.is_some(), LOOK_DIR),
            (self.friction.is_some(), FRICTION),
            (self.extra_light.is_some(), EXTRA_LIGHT),
            (self.filter.is_some(), FILTER),
            (self.psprites.is_some(), PSPRITES),
        ]
        .iter()
        .filter(|(present, _)| *present)
        .fold(0, |acc, (_, bit)| acc | bit)
    }

    fn decode(reader: &mut FrameReader<'_>) -> RecordResult<Self> {
        use player_fields::*;
        let mut delta = PlayerDelta::new(reader.read_u8()?);
        let fields = reader.read_u16()?;
        let has = |bit: u16| fields & bit != 0;

        if has(MOBJ) {
            delta.mobj = Some(reader.read_u16()?);
        }
        if has(FORWARD_MOVE) {
            delta.forward_move = Some(reader.read_i8()?);
        }
        if has(SIDE_MOVE) {
            delta.side_move = Some(reader.read_i8()?);
        }
        if has(ANGLE) {
            delta.angle = Some(reader.read_u16()?);
        }
        if has(LOOK_DIR) {
            delta.look_dir = Some(f32::from(reader.read_i16()?) / 256.0);
        }
        if has(FRICTION) {
            delta.friction = Some(f32::from(reader.read_u16()?) / 65536.0);
        }
        if has(EXTRA_LIGHT) {
            delta.extra_light = Some(reader.read_u8()?);
        }
        if has(FILTER) {
            delta.filter = Some(reader.read_u32()?);
        }
        if has(PSPRITES) {
            let count = reader.read_u8()? as usize;
            if count > MAX_PSPRITES {
                return Err(RecordError::Malformed("too many player sprites"));
            }
            let mut psprites = SmallVec::new();
            for _ in 0..count {
                let state = reader.read_packed_u16()?;
                let tics = reader.read_u8()?;
                psprites.push(StateRef { state, tics });
            }
            delta.psprites = Some(psprites);
        }

        Ok(delta)
    }

    fn encode(&self, builder: FrameBuilder) -> FrameBuilder {
        let mut b = builder.write_u8(self.player).write_u16(self.fields());
        if let Some(mobj) = self.mobj {
            b = b.write_u16(mobj);
        }
        if let Some(forward) = self.forward_move {
            b = b.write_i8(forward);
        }
        if let Some(side) = self.side_move {
            b = b.write_i8(side);
        }
        if let Some(angle) = self.angle {
            b = b.write_u16(angle);
        }
        if let Some(look) = self.look_dir {
            b = b.write_i16((look * 256.0).round() as i16);
        }
        if let Some(friction) = self.friction {
            b = b.write_u16((friction * 65536.0).round().clamp(0.0, 65535.0) as u16);
        }
        if let Some(light) = self.extra_light {
            b = b.write_u8(light);
        }
        if let Some(filter) = self.filter {
            b = b.write_u32(filter);
        }
        if let Some(psprites) = &self.psprites {
            b = b.write_u8(psprites.len() as u8);
            for psp in psprites {
                b = b.write_packed_u16(psp.state).write_u8(psp.tics);
            }
        }
        b
    }
}

// ============================================================================
// Map geometry deltas
// ============================================================================

/// Changed fields of one sector
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SectorDelta {
    pub index: u16,
    pub floor_height: Option<f32>,
    pub ceiling_height: Option<f32>,
    pub floor_speed: Option<f32>,
    pub ceiling_speed: Option<f32>,
    pub floor_target: Option<f32>,
    pub ceiling_target: Option<f32>,
    pub light: Option<f32>,
}

impl SectorDelta {
    pub fn new(index: u16) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }

    pub fn fields(&self) -> u8 {
        use sector_fields::*;
        [
            (self.floor_height.is_some(), FLOOR_HEIGHT),
            (self.ceiling_height.is_some(), CEILING_HEIGHT),
            (self.floor_speed.is_some(), FLOOR_SPEED),
            (self.ceiling_speed.is_some(), CEILING_SPEED),
            (self.floor_target.is_some(), FLOOR_TARGET),
            (self.ceiling_target.is_some(), CEILING_TARGET),
            (self.light.is_some(), LIGHT),
        ]
        .iter()
        .filter(|(present, _)| *present)
        .fold(0, |acc, (_, bit)| acc | bit)
    }

    fn decode(reader: &mut FrameReader<'_>) -> RecordResult<Self> {
        use sector_fields::*;
        let mut delta = SectorDelta::new(reader.read_u16()?);
        let fields = reader.read_u8()?;
        let has = |bit: u8| fields & bit != 0;

        if has(FLOOR_HEIGHT) {
            delta.floor_height = Some(f32::from(reader.read_i16()?));
        }
        if has(CEILING_HEIGHT) {
            delta.ceiling_height = Some(f32::from(reader.read_i16()?));
        }
        if has(FLOOR_SPEED) {
            delta.floor_speed = Some(f32::from(reader.read_u8()?) / 8.0);
        }
        if has(CEILING_SPEED) {
            delta.ceiling_speed = Some(f32::from(reader.read_u8()?) / 8.0);
        }
        if has(FLOOR_TARGET) {
            delta.floor_target = Some(f32::from(reader.read_i16()?));
        }
        if has(CEILING_TARGET) {
            delta.ceiling_target = Some(f32::from(reader.read_i16()?));
        }
        if has(LIGHT) {
            delta.light = Some(f32::from(reader.read_u8()?) / 255.0);
        }
        Ok(delta)
    }

    fn encode(&self, builder: FrameBuilder) -> FrameBuilder {
        let mut b = builder.write_u16(self.index).write_u8(self.fields());
        if let Some(height) = self.floor_height {
            b = b.write_i16(height.round() as i16);
        }
        if let Some(height) = self.ceiling_height {
            b = b.write_i16(height.round() as i16);
        }
        if let Some(speed) = self.floor_speed {
            b = b.write_u8((speed * 8.0).round().clamp(0.0, 255.0) as u8);
        }
        if let Some(speed) = self.ceiling_speed {
            b = b.write_u8((speed * 8.0).round().clamp(0.0, 255.0) as u8);
        }
        if let Some(target) = self.floor_target {
            b = b.write_i16(target.round() as i16);
        }
        if let Some(target) = self.ceiling_target {
            b = b.write_i16(target.round() as i16);
        }
        if let Some(light) = self.light {
            b = b.write_u8((light * 255.0).round().clamp(0.0, 255.0) as u8);
        }
        b
    }
}

/// Changed fields of one line side
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SideDelta {
    pub index: u16,
    pub top_offset: Option<[i16; 2]>,
    pub middle_offset: Option<[i16; 2]>,
    pub bottom_offset: Option<[i16; 2]>,
    pub flags: Option<u8>,
}

impl SideDelta {
    pub fn new(index: u16) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }

    pub fn fields(&self) -> u8 {
        use side_fields::*;
        [
            (self.top_offset.is_some(), TOP_OFFSET),
            (self.middle_offset.is_some(), MIDDLE_OFFSET),
            (self.bottom_offset.is_some(), BOTTOM_OFFSET),
            (self.flags.is_some(), FLAGS),
        ]
        .iter()
        .filter(|(present, _)| *present)
        .fold(0, |acc, (_, bit)| acc | bit)
    }

    fn decode(reader: &mut FrameReader<'_>) -> RecordResult<Self> {
        use side_fields::*;
        let mut delta = SideDelta::new(reader.read_u16()?);
        let fields = reader.read_u8()?;

        fn offset(
            present: bool,
            reader: &mut FrameReader<'_>,
        ) -> RecordResult<Option<[i16; 2]>> {
            if !present {
                return Ok(None);
            }
            Ok(Some([reader.read_i16()?, reader.read_i16()?]))
        }
        delta.top_offset = offset(fields & TOP_OFFSET != 0, reader)?;
        delta.middle_offset = offset(fields & MIDDLE_OFFSET != 0, reader)?;
        delta.bottom_offset = offset(fields & BOTTOM_OFFSET != 0, reader)?;
        if fields & FLAGS != 0 {
            delta.flags = Some(reader.read_u8()?);
        }
        Ok(delta)
    }

    fn encode(&self, builder: FrameBuilder) -> FrameBuilder {
        let mut b = builder.write_u16(self.index).write_u8(self.fields());
        for [x, y] in [self.top_offset, self.middle_offset, self.bottom_offset]
            .into_iter()
            .flatten()
        {
            b = b.write_i16(x).write_i16(y);
        }
        if let Some(flags) = self.flags {
            b = b.write_u8(flags);
        }
        b
    }
}

/// Changed fields of one polyobject
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolyDelta {
    pub index: u16,
    pub dest_x: Option<f32>,
    pub dest_y: Option<f32>,
    pub speed: Option<f32>,
    pub dest_angle: Option<u16>,
    pub angle_speed: Option<u16>,
}

impl PolyDelta {
    pub fn new(index: u16) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }

    pub fn fields(&self) -> u8 {
        use poly_fields::*;
        [
            (self.dest_x.is_some(), DEST_X),
            (self.dest_y.is_some(), DEST_Y),
            (self.speed.is_some(), SPEED),
            (self.dest_angle.is_some(), DEST_ANGLE),
            (self.angle_speed.is_some(), ANGLE_SPEED),
        ]
        .iter()
        .filter(|(present, _)| *present)
        .fold(0, |acc, (_, bit)| acc | bit)
    }

    fn decode(reader: &mut FrameReader<'_>) -> RecordResult<Self> {
        use poly_fields::*;
        let mut delta = PolyDelta::new(reader.read_u16()?);
        let fields = reader.read_u8()?;
        let has = |bit: u8| fields & bit != 0;

        if has(DEST_X) {
            delta.dest_x = Some(read_coord(reader)?);
        }
        if has(DEST_Y) {
            delta.dest_y = Some(read_coord(reader)?);
        }
        if has(SPEED) {
            delta.speed = Some(f32::from(reader.read_u16()?) / 256.0);
        }
        if has(DEST_ANGLE) {
            delta.dest_angle = Some(reader.read_u16()?);
        }
        if has(ANGLE_SPEED) {
            delta.angle_speed = Some(reader.read_u16()?);
        }
        Ok(delta)
    }

    fn encode(&self, builder: FrameBuilder) -> FrameBuilder {
        let mut b = builder.write_u16(self.index).write_u8(self.fields());
        if let Some(x) = self.dest_x {
            b = write_coord(b, x);
        }
        if let Some(y) = self.dest_y {
            b = write_coord(b, y);
        }
        if let Some(speed) = self.speed {
            b = b.write_u16((speed * 256.0).round().clamp(0.0, 65535.0) as u16);
        }
        if let Some(angle) = self.dest_angle {
            b = b.write_u16(angle);
        }
        if let Some(speed) = self.angle_speed {
            b = b.write_u16(speed);
        }
        b
    }
}

// ============================================================================
// Sound deltas
// ============================================================================

/// What a sound delta's leading id refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoundTarget {
    /// Ambient, unattached; the leading id is the sound id
    Ambient,
    Mobj(ThingId),
    Sector(u16),
    Side(u16),
    Poly(u16),
}

impl SoundTarget {
    pub fn delta_type(self) -> DeltaType {
        match self {
            SoundTarget::Ambient => DeltaType::Sound,
            SoundTarget::Mobj(_) => DeltaType::MobjSound,
            SoundTarget::Sector(_) => DeltaType::SectorSound,
            SoundTarget::Side(_) => DeltaType::SideSound,
            SoundTarget::Poly(_) => DeltaType::PolySound,
        }
    }
}

/// Decoded volume of a sound delta
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoundVolume {
    /// 0.0 ..= 1.0; zero stops sounds on the emitter
    pub level: f32,
    /// Distance attenuation applies
    pub attenuate: bool,
}

impl SoundVolume {
    pub const FULL: SoundVolume = SoundVolume {
        level: 1.0,
        attenuate: true,
    };
}

/// A sound trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoundDelta {
    pub target: SoundTarget,
    pub sound_id: u16,
    pub flags: u8,
    pub volume: Option<u8>,
}

impl SoundDelta {
    pub fn new(target: SoundTarget, sound_id: u16) -> Self {
        Self {
            target,
            sound_id,
            flags: 0,
            volume: None,
        }
    }

    pub fn with_volume(mut self, volume: u8) -> Self {
        self.volume = Some(volume);
        self.flags |= sound_flags::VOLUME;
        self
    }

    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags |= flags & !sound_flags::VOLUME;
        self
    }

    pub fn repeat(&self) -> bool {
        self.flags & sound_flags::REPEAT != 0
    }

    /// Interpret the volume byte; 255 means full volume without attenuation
    pub fn volume(&self) -> SoundVolume {
        match self.volume {
            None => SoundVolume::FULL,
            Some(sound_flags::VOLUME_NO_ATTENUATION) => SoundVolume {
                level: 1.0,
                attenuate: false,
            },
            Some(byte) => SoundVolume {
                level: (f32::from(byte) / 127.0).min(1.0),
                attenuate: true,
            },
        }
    }

    fn decode(kind: DeltaType, reader: &mut FrameReader<'_>) -> RecordResult<Self> {
        let delta_id = reader.read_u16()?;
        let flags = reader.read_u8()?;
        let (target, sound_id) = match kind {
            DeltaType::Sound => (SoundTarget::Ambient, delta_id),
            DeltaType::MobjSound => (SoundTarget::Mobj(delta_id), reader.read_u16()?),
            DeltaType::SectorSound => (SoundTarget::Sector(delta_id), reader.read_u16()?),
            DeltaType::SideSound => (SoundTarget::Side(delta_id), reader.read_u16()?),
            DeltaType::PolySound => (SoundTarget::Poly(delta_id), reader.read_u16()?),
            _ => return Err(RecordError::Malformed("not a sound delta")),
        };
        let volume = if flags & sound_flags::VOLUME != 0 {
            Some(reader.read_u8()?)
        } else {
            None
        };
        Ok(SoundDelta {
            target,
            sound_id,
            flags,
            volume,
        })
    }

    fn encode(&self, builder: FrameBuilder) -> FrameBuilder {
        let flags = match self.volume {
            Some(_) => self.flags | sound_flags::VOLUME,
            None => self.flags & !sound_flags::VOLUME,
        };
        let b = match self.target {
            SoundTarget::Ambient => builder.write_u16(self.sound_id).write_u8(flags),
            SoundTarget::Mobj(id)
            | SoundTarget::Sector(id)
            | SoundTarget::Side(id)
            | SoundTarget::Poly(id) => builder
                .write_u16(id)
                .write_u8(flags)
                .write_u16(self.sound_id),
        };
        match self.volume {
            Some(volume) => b.write_u8(volume),
            None => b,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn parse(bytes: &[u8]) -> Result<Vec<DeltaRecord>, DecodeError> {
        let mut reader = FrameReader::new(bytes);
        parse_records(&mut reader)
    }

    fn body(records: &[DeltaRecord]) -> Vec<u8> {
        // Strip the set id byte
        encode_frame(0, records)[1..].to_vec()
    }

    #[test]
    fn test_empty_payload() {
        assert_eq!(parse(&[]).unwrap(), vec![]);
    }

    #[test]
    fn test_create_mobj_full() {
        let mut delta =
            MobjDelta::new(42).with_origin(10.5, -20.25, VerticalPosition::Absolute(4.0));
        delta.radius = Some(16);
        delta.height = Some(56);
        delta.ddflags = Some(crate::net::protocol::ddflags::SOLID);
        delta.angle = Some(16384);
        delta.state = Some(StateRef { state: 300, tics: 4 });
        let records = vec![DeltaRecord::new(Delta::CreateMobj(delta.clone()))];

        let decoded = parse(&body(&records)).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].resend, None);
        match &decoded[0].delta {
            Delta::CreateMobj(d) => {
                assert_eq!(d, &delta);
                assert!(d.has_full_placement());
            }
            other => panic!("Wrong delta type: {:?}", other),
        }
    }

    #[test]
    fn test_stick_floor_replaces_z() {
        let delta = MobjDelta::new(7).with_origin(0.0, 0.0, VerticalPosition::StickFloor);
        assert_eq!(delta.fields() & mobj_fields::ORIGIN_Z, 0);
        assert_ne!(delta.fields() & mobj_fields::STICK_FLOOR, 0);

        let decoded = parse(&body(&[DeltaRecord::new(Delta::Mobj(delta))])).unwrap();
        match &decoded[0].delta {
            Delta::Mobj(d) => assert_eq!(d.z, Some(VerticalPosition::StickFloor)),
            other => panic!("Wrong delta type: {:?}", other),
        }
    }

    #[test]
    fn test_stick_flag_wins_over_encoded_z() {
        // ORIGIN_Z present on the wire together with STICK_CEILING
        let bytes = FrameBuilder::new()
            .write_u8(DeltaType::Mobj as u8)
            .write_u16(9)
            .write_u16(mobj_fields::ORIGIN_Z | mobj_fields::STICK_CEILING)
            .write_i16(100)
            .write_u8(0)
            .build();
        let decoded = parse(&bytes).unwrap();
        match &decoded[0].delta {
            Delta::Mobj(d) => assert_eq!(d.z, Some(VerticalPosition::StickCeiling)),
            other => panic!("Wrong delta type: {:?}", other),
        }
    }

    #[test]
    fn test_resent_header() {
        let mut delta = MobjDelta::new(42);
        delta.mom_x = Some(1.5);
        let records = vec![DeltaRecord::resent(Delta::Mobj(delta), 5, 9)];
        let bytes = body(&records);
        assert_eq!(bytes[0], DeltaType::Mobj as u8 | DT_RESENT);
        assert_eq!(&bytes[1..3], &[5, 9]);

        let decoded = parse(&bytes).unwrap();
        assert_eq!(
            decoded[0].resend,
            Some(Resend {
                orig_set: 5,
                resend_id: 9
            })
        );
    }

    #[test]
    fn test_multiple_records_keep_alignment() {
        let mut sector = SectorDelta::new(3);
        sector.floor_height = Some(-64.0);
        sector.light = Some(1.0);
        let mut side = SideDelta::new(11);
        side.middle_offset = Some([8, -8]);
        let mut poly = PolyDelta::new(1);
        poly.dest_x = Some(128.0);
        poly.dest_angle = Some(100);
        let records = vec![
            DeltaRecord::new(Delta::Sector(sector)),
            DeltaRecord::new(Delta::NullMobj(77)),
            DeltaRecord::new(Delta::Side(side)),
            DeltaRecord::resent(Delta::Poly(poly), 1, 2),
            DeltaRecord::new(Delta::Sound(SoundDelta::new(SoundTarget::Ambient, 31))),
        ];

        let decoded = parse(&body(&records)).unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn test_player_delta() {
        let mut player = PlayerDelta::new(2);
        player.mobj = Some(1001);
        player.angle = Some(32768);
        player.look_dir = Some(-10.5);
        player.psprites = Some(smallvec![StateRef { state: 12, tics: 3 }]);
        let records = vec![DeltaRecord::new(Delta::Player(player.clone()))];

        let decoded = parse(&body(&records)).unwrap();
        assert_eq!(decoded[0].delta, Delta::Player(player));
    }

    #[test]
    fn test_too_many_psprites_is_malformed() {
        let bytes = FrameBuilder::new()
            .write_u8(DeltaType::Player as u8)
            .write_u8(0)
            .write_u16(player_fields::PSPRITES)
            .write_u8(3)
            .build();
        assert!(matches!(
            parse(&bytes),
            Err(DecodeError::Malformed {
                kind: DeltaType::Player,
                offset: 0,
                ..
            })
        ));
    }

    #[test]
    fn test_sound_payload_layout() {
        let ambient = SoundDelta::new(SoundTarget::Ambient, 12);
        assert_eq!(
            body(&[DeltaRecord::new(Delta::Sound(ambient))]),
            vec![DeltaType::Sound as u8, 12, 0, 0]
        );

        let mobj = SoundDelta::new(SoundTarget::Mobj(77), 3).with_volume(255);
        assert_eq!(
            body(&[DeltaRecord::new(Delta::Sound(mobj))]),
            vec![DeltaType::MobjSound as u8, 77, 0, sound_flags::VOLUME, 3, 0, 255]
        );
    }

    #[test]
    fn test_sound_volume_interpretation() {
        let full = SoundDelta::new(SoundTarget::Mobj(1), 3).with_volume(255);
        assert_eq!(
            full.volume(),
            SoundVolume {
                level: 1.0,
                attenuate: false
            }
        );
        let half = SoundDelta::new(SoundTarget::Mobj(1), 3).with_volume(64);
        assert!((half.volume().level - 64.0 / 127.0).abs() < 1e-6);
        assert!(half.volume().attenuate);
        let silent = SoundDelta::new(SoundTarget::Mobj(1), 3).with_volume(0);
        assert_eq!(silent.volume().level, 0.0);
        assert_eq!(SoundDelta::new(SoundTarget::Ambient, 1).volume(), SoundVolume::FULL);
    }

    #[test]
    fn test_sector_and_side_sound_flags() {
        let sector = SoundDelta::new(SoundTarget::Sector(4), 9)
            .with_flags(sound_flags::PLANE_CEILING | sound_flags::REPEAT);
        let side = SoundDelta::new(SoundTarget::Side(6), 10).with_flags(sound_flags::SIDE_TOP);
        let records = vec![
            DeltaRecord::new(Delta::Sound(sector.clone())),
            DeltaRecord::new(Delta::Sound(side.clone())),
        ];
        let decoded = parse(&body(&records)).unwrap();
        assert_eq!(decoded, records);
        assert!(sector.repeat());
    }

    #[test]
    fn test_unknown_tag_is_fatal() {
        let bytes = vec![DeltaType::NullMobj as u8, 1, 0, 0x3f];
        assert_eq!(
            parse(&bytes),
            Err(DecodeError::UnknownDeltaType { tag: 0x3f, offset: 3 })
        );
    }

    #[test]
    fn test_unknown_resent_tag_reports_full_tag() {
        let bytes = vec![0x3f | DT_RESENT, 1, 2];
        assert_eq!(
            parse(&bytes),
            Err(DecodeError::UnknownDeltaType {
                tag: 0x3f | DT_RESENT,
                offset: 0
            })
        );
    }

    #[test]
    fn test_underrun_mid_record() {
        // NullMobj needs two bytes of payload
        let bytes = vec![DeltaType::NullMobj as u8, 1];
        assert!(matches!(
            parse(&bytes),
            Err(DecodeError::Truncated {
                kind: DeltaType::NullMobj,
                offset: 0,
                ..
            })
        ));

        // Tag with nothing after it
        let bytes = vec![DeltaType::Sector as u8];
        assert!(matches!(parse(&bytes), Err(DecodeError::Truncated { .. })));
    }

    #[test]
    fn test_truncated_resend_header() {
        let bytes = vec![DeltaType::Mobj as u8 | DT_RESENT, 5];
        assert_eq!(
            parse(&bytes),
            Err(DecodeError::TruncatedResendHeader { offset: 0 })
        );
    }

    #[test]
    fn test_encode_frame_packet() {
        let packet = encode_frame_packet(
            PacketKind::FirstFrame,
            5,
            &[DeltaRecord::new(Delta::NullMobj(1))],
        );
        assert_eq!(
            packet,
            vec![PacketKind::FirstFrame as u8, 5, DeltaType::NullMobj as u8, 1, 0]
        );
    }
}
