//! Players and their real mobjs
//!
//! A local player's shadow mobj is never linked into the world; its real
//! mobj, owned by game logic, is. Reconciliation copies authoritative state
//! from the shadow onto the real mobj.

use smallvec::SmallVec;

use crate::game::constants::mobj::SELECTOR_MASK;
use crate::game::constants::players::MAX_PSPRITES;
use crate::game::mobj::ClientMobj;
use crate::game::spatial::{SpatialEntity, SpatialRef, SpatialWorld};
use crate::net::delta::{PlayerDelta, StateRef};
use crate::net::protocol::{ddflags, ThingId};
use crate::util::vec3::Vec3;

/// The game-logic mobj of a player
#[derive(Debug, Clone, PartialEq)]
pub struct RealMobj {
    pub origin: Vec3,
    pub momentum: Vec3,
    pub angle: u16,
    pub selector: u32,
    pub state: StateRef,
    pub radius: f32,
    pub height: f32,
    pub ddflags: u32,
    pub sector: Option<usize>,
    pub floor_z: f32,
    pub ceiling_z: f32,
}

impl RealMobj {
    pub fn from_shadow(shadow: &ClientMobj) -> Self {
        Self {
            origin: shadow.origin,
            momentum: shadow.momentum,
            angle: shadow.angle,
            selector: shadow.selector,
            state: shadow.state,
            radius: shadow.radius,
            height: shadow.height,
            ddflags: shadow.ddflags,
            sector: shadow.sector,
            floor_z: shadow.floor_z,
            ceiling_z: shadow.ceiling_z,
        }
    }

    fn spatial_entity(&self, player: u8) -> SpatialEntity {
        SpatialEntity {
            id: SpatialRef::Player(player),
            x: self.origin.x,
            y: self.origin.y,
            radius: self.radius,
        }
    }

    pub fn is_solid(&self) -> bool {
        self.ddflags & ddflags::SOLID != 0
    }

    pub fn link(&self, player: u8, spatial: &mut SpatialWorld) {
        spatial.link(self.spatial_entity(player), self.sector, self.is_solid());
    }
}

/// Client state of one player slot
#[derive(Debug, Clone, Default)]
pub struct PlayerState {
    pub in_game: bool,
    /// Shadow mobj bound by the last MOBJ field
    pub mobj_id: Option<ThingId>,
    pub real: Option<RealMobj>,
    pub forward_move: i8,
    pub side_move: i8,
    pub angle: u16,
    /// Degrees
    pub look_dir: f32,
    pub friction: f32,
    pub extra_light: u8,
    pub filter: u32,
    pub psprites: SmallVec<[StateRef; MAX_PSPRITES]>,
}

impl PlayerState {
    /// Copy the non-binding fields of a player delta
    pub fn apply_delta(&mut self, delta: &PlayerDelta) {
        self.in_game = true;
        if let Some(forward) = delta.forward_move {
            self.forward_move = forward;
        }
        if let Some(side) = delta.side_move {
            self.side_move = side;
        }
        if let Some(angle) = delta.angle {
            self.angle = angle;
        }
        if let Some(look) = delta.look_dir {
            self.look_dir = look;
        }
        if let Some(friction) = delta.friction {
            self.friction = friction;
        }
        if let Some(light) = delta.extra_light {
            self.extra_light = light;
        }
        if let Some(filter) = delta.filter {
            self.filter = filter;
        }
        if let Some(psprites) = &delta.psprites {
            self.psprites = psprites.clone();
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Synchronize a player's real mobj from its shadow.
///
/// When x or y changed the real mobj leaves the spatial structures before
/// moving and re-enters after. Everything else is copied on every call.
pub fn reconcile_real_player_mobj(
    player: u8,
    real: &mut RealMobj,
    shadow: &ClientMobj,
    changed: u16,
    spatial: &mut SpatialWorld,
) {
    if ClientMobj::moved(changed) {
        spatial.unlink(SpatialRef::Player(player));
        real.origin.x = shadow.origin.x;
        real.origin.y = shadow.origin.y;
        real.sector = shadow.sector;
        real.floor_z = shadow.floor_z;
        real.ceiling_z = shadow.ceiling_z;
        real.link(player, spatial);
    }

    real.origin.z = shadow.origin.z;
    real.momentum = shadow.momentum;
    real.angle = shadow.angle;
    real.state = shadow.state;
    real.selector = (real.selector & !SELECTOR_MASK) | (shadow.selector & SELECTOR_MASK);
}
