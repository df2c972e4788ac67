//! Client-side shadow copies of server map objects

use bitflags::bitflags;

use crate::game::smoother::Smoother;
use crate::net::delta::{MobjDelta, SoundVolume, StateRef};
use crate::net::protocol::{ddflags, mobj_fields, ThingId};
use crate::util::vec3::Vec3;

bitflags! {
    /// Client-side state of a shadow mobj
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct MobjFlags: u8 {
        /// No create delta seen yet; never linked or rendered
        const HIDDEN        = 0x01;
        /// Exists but must not be collided with yet
        const UNPREDICTABLE = 0x02;
        /// z follows the floor of the current sector
        const STICK_FLOOR   = 0x04;
        /// top follows the ceiling of the current sector
        const STICK_CEILING = 0x08;
        /// A sound is waiting for the mobj to be revealed
        const PENDING_SOUND = 0x10;
    }
}

/// Vertical placement carried by a mobj delta
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VerticalPosition {
    Absolute(f32),
    StickFloor,
    StickCeiling,
}

/// Sound deferred until a hidden mobj is revealed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingSound {
    pub sound_id: u16,
    pub volume: SoundVolume,
    pub repeat: bool,
}

/// Shadow copy of a server mobj
#[derive(Debug, Clone)]
pub struct ClientMobj {
    pub id: ThingId,
    pub origin: Vec3,
    pub momentum: Vec3,
    pub angle: u16,
    pub selector: u32,
    pub state: StateRef,
    pub radius: f32,
    pub height: f32,
    pub ddflags: u32,
    pub floorclip: f32,
    pub translucency: u8,
    pub flags: MobjFlags,
    /// Sector containing the origin, resolved at placement
    pub sector: Option<usize>,
    pub floor_z: f32,
    pub ceiling_z: f32,
    pub pending_sound: Option<PendingSound>,
    pub smoother: Smoother,
    /// Client clock (ms) of the last delta touching this mobj
    pub last_update_ms: u64,
    /// Player whose view mobj this is
    pub owner: Option<u8>,
}

impl ClientMobj {
    /// Placeholder created by the first reference to an unknown id
    pub fn hidden(id: ThingId, now_ms: u64) -> Self {
        Self {
            id,
            origin: Vec3::ZERO,
            momentum: Vec3::ZERO,
            angle: 0,
            selector: 0,
            state: StateRef::default(),
            radius: 0.0,
            height: 0.0,
            ddflags: 0,
            floorclip: 0.0,
            translucency: 0,
            flags: MobjFlags::HIDDEN,
            sector: None,
            floor_z: 0.0,
            ceiling_z: 0.0,
            pending_sound: None,
            smoother: Smoother::new(),
            last_update_ms: now_ms,
            owner: None,
        }
    }

    #[inline]
    pub fn is_hidden(&self) -> bool {
        self.flags.contains(MobjFlags::HIDDEN)
    }

    #[inline]
    pub fn is_unpredictable(&self) -> bool {
        self.flags.contains(MobjFlags::UNPREDICTABLE)
    }

    #[inline]
    pub fn is_solid(&self) -> bool {
        self.ddflags & ddflags::SOLID != 0
    }

    /// Whether the mobj may enter the world's spatial structures
    pub fn is_linkable(&self) -> bool {
        !self.flags.intersects(MobjFlags::HIDDEN | MobjFlags::UNPREDICTABLE) && self.owner.is_none()
    }

    /// Whether the mobj rests on the floor of its sector
    pub fn on_floor(&self) -> bool {
        self.flags.contains(MobjFlags::STICK_FLOOR) || self.origin.z <= self.floor_z
    }

    /// Copy every field present in the delta; returns the applied field mask.
    ///
    /// Stick flags are recorded here and resolved against the map by
    /// placement. Ddflags refresh the Unpredictable flag: set while the
    /// server marks it, cleared by the first update that doesn't.
    pub fn apply_delta(&mut self, delta: &MobjDelta, now_ms: u64) -> u16 {
        if let Some(x) = delta.x {
            self.origin.x = x;
        }
        if let Some(y) = delta.y {
            self.origin.y = y;
        }
        match delta.z {
            Some(VerticalPosition::Absolute(z)) => {
                self.origin.z = z;
                self.flags
                    .remove(MobjFlags::STICK_FLOOR | MobjFlags::STICK_CEILING);
            }
            Some(VerticalPosition::StickFloor) => {
                self.flags.remove(MobjFlags::STICK_CEILING);
                self.flags.insert(MobjFlags::STICK_FLOOR);
            }
            Some(VerticalPosition::StickCeiling) => {
                self.flags.remove(MobjFlags::STICK_FLOOR);
                self.flags.insert(MobjFlags::STICK_CEILING);
            }
            None => {}
        }
        if let Some(mom) = delta.mom_x {
            self.momentum.x = mom;
        }
        if let Some(mom) = delta.mom_y {
            self.momentum.y = mom;
        }
        if let Some(mom) = delta.mom_z {
            self.momentum.z = mom;
        }
        if let Some(angle) = delta.angle {
            self.angle = angle;
        }
        if let Some(selector) = delta.selector {
            self.selector = u32::from(selector);
        }
        if let Some(state) = delta.state {
            self.state = state;
        }
        if let Some(radius) = delta.radius {
            self.radius = f32::from(radius);
        }
        if let Some(height) = delta.height {
            self.height = f32::from(height);
        }
        if let Some(flags) = delta.ddflags {
            self.ddflags = flags;
        }
        if let Some(floorclip) = delta.floorclip {
            self.floorclip = floorclip;
        }
        if let Some(translucency) = delta.translucency {
            self.translucency = translucency;
        }

        self.flags.set(
            MobjFlags::UNPREDICTABLE,
            self.ddflags & ddflags::UNPREDICTABLE != 0,
        );
        if delta.ddflags.is_none() && self.is_unpredictable() {
            // Any later delta without the bit releases the mobj
            self.ddflags &= !ddflags::UNPREDICTABLE;
            self.flags.remove(MobjFlags::UNPREDICTABLE);
        }

        self.last_update_ms = now_ms;
        delta.fields()
    }

    /// Resolve stick flags against the surrounding planes
    pub fn resolve_vertical(&mut self, floor_z: f32, ceiling_z: f32) {
        self.floor_z = floor_z;
        self.ceiling_z = ceiling_z;
        if self.flags.contains(MobjFlags::STICK_FLOOR) {
            self.origin.z = floor_z;
        } else if self.flags.contains(MobjFlags::STICK_CEILING) {
            self.origin.z = ceiling_z - self.height;
        }
    }

    /// Whether a changed-field mask touched the horizontal position
    #[inline]
    pub fn moved(fields: u16) -> bool {
        fields & (mobj_fields::ORIGIN_X | mobj_fields::ORIGIN_Y) != 0
    }

    /// Take the deferred sound, clearing the pending flag
    pub fn take_pending_sound(&mut self) -> Option<PendingSound> {
        self.flags.remove(MobjFlags::PENDING_SOUND);
        self.pending_sound.take()
    }

    pub fn set_pending_sound(&mut self, sound: PendingSound) {
        self.flags.insert(MobjFlags::PENDING_SOUND);
        self.pending_sound = Some(sound);
    }
}
