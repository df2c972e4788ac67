//! Applying decoded deltas to the client world

use std::ops::ControlFlow;

use tracing::{debug, warn};

use crate::client::engine::{ApplyOutcome, ReconciliationEngine};
use crate::game::constants::players::MAX_PLAYERS;
use crate::game::mobj::{ClientMobj, MobjFlags};
use crate::game::mobj_table::MobjHandle;
use crate::game::player::{reconcile_real_player_mobj, RealMobj};
use crate::game::sound::SoundSink;
use crate::game::spatial::{SpatialEntity, SpatialRef};
use crate::net::delta::{Delta, MobjDelta, PlayerDelta, SectorDelta};
use crate::net::protocol::{mobj_fields, sector_fields, ThingId};

impl<S: SoundSink> ReconciliationEngine<S> {
    pub(crate) fn apply_delta(&mut self, delta: &Delta) -> ApplyOutcome {
        match delta {
            Delta::CreateMobj(mobj) => self.apply_mobj(mobj, true),
            Delta::Mobj(mobj) => self.apply_mobj(mobj, false),
            Delta::NullMobj(id) => self.apply_null_mobj(*id),
            Delta::Player(player) => self.apply_player(player),
            Delta::Sector(sector) => self.apply_sector(sector),
            Delta::Side(side) => match self.map.apply_side(side) {
                Ok(()) => ApplyOutcome::Applied,
                Err(err) => {
                    warn!("Side delta skipped: {}", err);
                    ApplyOutcome::SoftFailure
                }
            },
            Delta::Poly(poly) => match self.map.apply_poly(poly) {
                Ok(()) => ApplyOutcome::Applied,
                Err(err) => {
                    warn!("Poly delta skipped: {}", err);
                    ApplyOutcome::SoftFailure
                }
            },
            Delta::Sound(sound) => self.apply_sound(sound),
        }
    }

    /// Existing mobj for the id, or a new hidden placeholder
    pub(crate) fn find_or_create_hidden(&mut self, id: ThingId) -> MobjHandle {
        match self.mobjs.find(id) {
            Some(handle) => handle,
            None => {
                debug!("New hidden client mobj {}", id);
                let mut mobj = ClientMobj::hidden(id, self.clock_ms());
                mobj.smoother.set_max_delta(self.config.smoother_max_delta);
                self.mobjs.insert(mobj)
            }
        }
    }

    fn apply_mobj(&mut self, delta: &MobjDelta, create: bool) -> ApplyOutcome {
        let handle = self.find_or_create_hidden(delta.id);
        let now_ms = self.clock_ms();
        let time = self.time();

        let Some(mobj) = self.mobjs.get_mut(handle) else {
            return ApplyOutcome::SoftFailure;
        };
        let was_hidden = mobj.is_hidden();
        let changed = mobj.apply_delta(delta, now_ms);
        if was_hidden && (create || delta.has_full_placement()) {
            mobj.flags.remove(MobjFlags::HIDDEN);
        }
        let revealed = was_hidden && !mobj.is_hidden();
        if mobj.is_hidden() {
            return ApplyOutcome::Applied;
        }

        self.check_placement(handle);

        if changed & (mobj_fields::ORIGIN | mobj_fields::STICK) != 0 || revealed {
            if let Some(mobj) = self.mobjs.get_mut(handle) {
                let (origin, on_floor) = (mobj.origin, mobj.on_floor());
                mobj.smoother.add_sample(time, origin, on_floor);
            }
        }

        self.set_spatial_position(handle);
        self.sync_player_mobj(handle, changed);

        if revealed {
            debug!("Client mobj {} revealed", delta.id);
            self.play_pending_sound(handle);
        }
        ApplyOutcome::Applied
    }

    fn apply_null_mobj(&mut self, id: ThingId) -> ApplyOutcome {
        let Some(handle) = self.mobjs.find(id) else {
            debug!("Null delta for unknown client mobj {}", id);
            return ApplyOutcome::SoftFailure;
        };
        self.spatial.unlink(SpatialRef::Mobj(id));
        if let Some(mobj) = self.mobjs.remove(handle) {
            if let Some(player) = mobj.owner {
                if let Some(state) = self.players.get_mut(usize::from(player)) {
                    if state.mobj_id == Some(id) {
                        state.mobj_id = None;
                    }
                }
            }
        }
        ApplyOutcome::Applied
    }

    fn apply_player(&mut self, delta: &PlayerDelta) -> ApplyOutcome {
        let index = usize::from(delta.player);
        if index >= MAX_PLAYERS {
            warn!("Player delta for invalid player {}", delta.player);
            return ApplyOutcome::SoftFailure;
        }
        self.players[index].apply_delta(delta);

        if let Some(id) = delta.mobj {
            self.bind_player_mobj(delta.player, id);
        }
        // The console player's view angle is steered locally
        if delta.player != self.config.console_player {
            if let (Some(angle), Some(real)) = (delta.angle, self.players[index].real.as_mut()) {
                real.angle = angle;
            }
        }
        ApplyOutcome::Applied
    }

    /// Bind a shadow mobj to a player, releasing the previous one
    fn bind_player_mobj(&mut self, player: u8, id: ThingId) {
        let index = usize::from(player);
        let previous = self.players[index].mobj_id;

        if let Some(old) = previous.filter(|old| *old != id) {
            if let Some(handle) = self.mobjs.find(old) {
                if let Some(mobj) = self.mobjs.get_mut(handle) {
                    mobj.owner = None;
                }
                self.set_spatial_position(handle);
            }
        }

        let handle = self.find_or_create_hidden(id);
        if let Some(mobj) = self.mobjs.get_mut(handle) {
            mobj.owner = Some(player);
        }
        // A player's own shadow never stays in the world
        self.spatial.unlink(SpatialRef::Mobj(id));
        self.players[index].mobj_id = Some(id);
        debug!("Player {} bound to client mobj {}", player, id);

        self.sync_player_mobj(handle, mobj_fields::ORIGIN);
    }

    /// Create or reconcile the real mobj of the player owning this shadow
    fn sync_player_mobj(&mut self, handle: MobjHandle, changed: u16) {
        let Some(shadow) = self.mobjs.get(handle) else {
            return;
        };
        let Some(player) = shadow.owner else {
            return;
        };
        if shadow.is_hidden() {
            return;
        }
        let Some(state) = self.players.get_mut(usize::from(player)) else {
            return;
        };

        match state.real.as_mut() {
            Some(real) => {
                reconcile_real_player_mobj(player, real, shadow, changed, &mut self.spatial)
            }
            None => {
                let real = RealMobj::from_shadow(shadow);
                real.link(player, &mut self.spatial);
                state.real = Some(real);
            }
        }
    }

    fn apply_sector(&mut self, delta: &SectorDelta) -> ApplyOutcome {
        if let Err(err) = self.map.apply_sector(delta) {
            warn!("Sector delta skipped: {}", err);
            return ApplyOutcome::SoftFailure;
        }
        let planes = sector_fields::FLOOR_HEIGHT | sector_fields::CEILING_HEIGHT;
        if delta.fields() & planes != 0 {
            self.place_stuck_mobjs(Some(usize::from(delta.index)));
        }
        ApplyOutcome::Applied
    }

    /// Resolve sector and planes at the mobj's position; stick flags are
    /// reapplied every time since planes move
    pub(crate) fn check_placement(&mut self, handle: MobjHandle) {
        let Some(mobj) = self.mobjs.get_mut(handle) else {
            return;
        };
        match self.map.planes_at(mobj.origin.x, mobj.origin.y) {
            Some((sector, floor, ceiling)) => {
                mobj.sector = Some(sector);
                mobj.resolve_vertical(floor, ceiling);
            }
            None => {
                mobj.sector = None;
                let (floor, ceiling) = (mobj.floor_z, mobj.ceiling_z);
                mobj.resolve_vertical(floor, ceiling);
            }
        }
    }

    /// Re-place visible mobjs glued to a plane, optionally in one sector
    pub(crate) fn place_stuck_mobjs(&mut self, sector: Option<usize>) {
        let mut stuck = Vec::new();
        let _ = self.mobjs.for_each(|handle, mobj| {
            let glued = mobj
                .flags
                .intersects(MobjFlags::STICK_FLOOR | MobjFlags::STICK_CEILING);
            if glued && !mobj.is_hidden() && sector.map_or(true, |s| mobj.sector == Some(s)) {
                stuck.push(handle);
            }
            ControlFlow::<()>::Continue(())
        });

        for handle in stuck {
            self.check_placement(handle);
            self.sync_player_mobj(handle, 0);
        }
    }

    /// Link into the world if the mobj may be there, unlink otherwise.
    /// Hidden, unpredictable and player-owned mobjs are never linked.
    pub(crate) fn set_spatial_position(&mut self, handle: MobjHandle) {
        let Some(mobj) = self.mobjs.get(handle) else {
            return;
        };
        let id = SpatialRef::Mobj(mobj.id);
        if !mobj.is_linkable() {
            self.spatial.unlink(id);
            return;
        }
        let entity = SpatialEntity {
            id,
            x: mobj.origin.x,
            y: mobj.origin.y,
            radius: mobj.radius,
        };
        self.spatial.link(entity, mobj.sector, mobj.is_solid());
    }
}
