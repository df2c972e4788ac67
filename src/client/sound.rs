//! Sound deltas: emitter resolution and deferred mobj sounds

use tracing::{debug, warn};

use crate::client::engine::{ApplyOutcome, ReconciliationEngine};
use crate::game::map::{MapLookupError, SectorPlane, SideSection};
use crate::game::mobj::PendingSound;
use crate::game::mobj_table::MobjHandle;
use crate::game::sound::{Emitter, SoundRequest, SoundSink};
use crate::net::delta::{SoundDelta, SoundTarget, SoundVolume};
use crate::net::protocol::{sound_flags, ThingId};
use crate::util::vec3::Vec3;

/// Plane of a sector sound; neither flag selects the general emitter
fn sector_plane(flags: u8) -> Option<SectorPlane> {
    if flags & sound_flags::PLANE_FLOOR != 0 {
        Some(SectorPlane::Floor)
    } else if flags & sound_flags::PLANE_CEILING != 0 {
        Some(SectorPlane::Ceiling)
    } else {
        None
    }
}

fn side_section(flags: u8) -> SideSection {
    if flags & sound_flags::SIDE_TOP != 0 {
        SideSection::Top
    } else if flags & sound_flags::SIDE_BOTTOM != 0 {
        SideSection::Bottom
    } else {
        SideSection::Middle
    }
}

impl<S: SoundSink> ReconciliationEngine<S> {
    pub(crate) fn apply_sound(&mut self, delta: &SoundDelta) -> ApplyOutcome {
        let volume = delta.volume();
        let resolved = match delta.target {
            SoundTarget::Ambient => {
                if volume.level <= 0.0 {
                    return ApplyOutcome::Applied;
                }
                Ok(None)
            }
            SoundTarget::Mobj(id) => {
                return self.mobj_sound(id, delta, volume);
            }
            SoundTarget::Sector(index) => {
                let plane = sector_plane(delta.flags);
                self.map
                    .sector_emitter_origin(index, plane)
                    .map(|origin| Some((Emitter::Sector(index, plane), origin)))
            }
            SoundTarget::Side(index) => {
                let section = side_section(delta.flags);
                self.map
                    .side_emitter_origin(index, section)
                    .map(|origin| Some((Emitter::Side(index, section), origin)))
            }
            SoundTarget::Poly(index) => self
                .map
                .poly_emitter_origin(index)
                .map(|origin| Some((Emitter::Poly(index), origin))),
        };

        match resolved {
            Ok(anchor) => {
                self.emit(delta.sound_id, anchor, volume, delta.repeat());
                ApplyOutcome::Applied
            }
            Err(err) => {
                warn!("Sound {} dropped: {}", delta.sound_id, err);
                ApplyOutcome::SoftFailure
            }
        }
    }

    fn mobj_sound(&mut self, id: ThingId, delta: &SoundDelta, volume: SoundVolume) -> ApplyOutcome {
        let handle = self.find_or_create_hidden(id);
        let Some(mobj) = self.mobjs.get_mut(handle) else {
            return ApplyOutcome::SoftFailure;
        };

        if mobj.is_hidden() {
            if volume.level <= 0.0 {
                mobj.take_pending_sound();
                return ApplyOutcome::Applied;
            }
            debug!("Sound {} deferred until mobj {} is revealed", delta.sound_id, id);
            mobj.set_pending_sound(PendingSound {
                sound_id: delta.sound_id,
                volume,
                repeat: delta.repeat(),
            });
            return ApplyOutcome::Applied;
        }

        let anchor = self.mobj_emitter(handle);
        self.emit(delta.sound_id, anchor, volume, delta.repeat());
        ApplyOutcome::Applied
    }

    /// Emitter for a mobj; a local player's view mobj sounds from the real mobj
    fn mobj_emitter(&self, handle: MobjHandle) -> Option<(Emitter, Vec3)> {
        let mobj = self.mobjs.get(handle)?;
        let real = mobj.owner.and_then(|player| {
            let real = self.players.get(usize::from(player))?.real.as_ref()?;
            Some((player, real))
        });
        Some(match real {
            Some((player, real)) => (Emitter::Player(player), real.origin),
            None => (Emitter::Mobj(mobj.id), mobj.origin),
        })
    }

    /// Start the sound deferred on a freshly revealed mobj
    pub(crate) fn play_pending_sound(&mut self, handle: MobjHandle) {
        let Some(pending) = self
            .mobjs
            .get_mut(handle)
            .and_then(|mobj| mobj.take_pending_sound())
        else {
            return;
        };
        let anchor = self.mobj_emitter(handle);
        self.emit(pending.sound_id, anchor, pending.volume, pending.repeat);
    }

    /// Stop whatever plays on the emitter, then start unless volume is zero
    fn emit(
        &mut self,
        sound_id: u16,
        anchor: Option<(Emitter, Vec3)>,
        volume: SoundVolume,
        repeat: bool,
    ) {
        if let Some((emitter, _)) = anchor {
            self.sound.stop_emitter(emitter);
        }
        if volume.level <= 0.0 {
            return;
        }
        self.sound.start(&SoundRequest {
            sound_id,
            emitter: anchor.map(|(emitter, _)| emitter),
            origin: anchor.map(|(_, origin)| origin),
            volume,
            repeat,
        });
    }

    /// Origin of any emitter in the current world, if it still exists
    pub fn emitter_origin(&self, emitter: Emitter) -> Result<Option<Vec3>, MapLookupError> {
        Ok(match emitter {
            Emitter::Mobj(id) => self.find_mobj(id).map(|mobj| mobj.origin),
            Emitter::Player(player) => self
                .player(player)
                .and_then(|state| state.real.as_ref())
                .map(|real| real.origin),
            Emitter::Sector(index, plane) => Some(self.map.sector_emitter_origin(index, plane)?),
            Emitter::Side(index, section) => Some(self.map.side_emitter_origin(index, section)?),
            Emitter::Poly(index) => Some(self.map.poly_emitter_origin(index)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::client::engine::{EngineConfig, ReconciliationEngine};
    use crate::game::map::{Bounds, MapState, Polyobj, Sector, SectorPlane, Side, SideSection};
    use crate::game::mobj::{MobjFlags, VerticalPosition};
    use crate::game::sound::{Emitter, RecordingSoundSink, SoundCommand};
    use crate::net::delta::{
        encode_frame, Delta, DeltaRecord, MobjDelta, PlayerDelta, SoundDelta, SoundTarget,
    };
    use crate::net::protocol::{ddflags, sound_flags, FrameSetId, PacketKind};
    use crate::util::vec3::Vec3;

    fn engine() -> ReconciliationEngine<RecordingSoundSink> {
        let map = MapState::new(
            vec![Sector::new(Bounds::new(0.0, 0.0, 256.0, 256.0), 0.0, 128.0)],
            vec![Side::new(0, 10.0, 20.0)],
            vec![Polyobj::new(100.0, 100.0)],
        );
        let mut engine = ReconciliationEngine::with_sound_sink(
            EngineConfig::default(),
            map,
            RecordingSoundSink::default(),
        );
        engine
            .receive_frame(PacketKind::FirstFrame, &encode_frame(0, &[]))
            .unwrap();
        engine
    }

    fn send(
        engine: &mut ReconciliationEngine<RecordingSoundSink>,
        set: FrameSetId,
        deltas: Vec<Delta>,
    ) -> usize {
        let records: Vec<_> = deltas.into_iter().map(DeltaRecord::new).collect();
        engine
            .receive_frame(PacketKind::Frame, &encode_frame(set, &records))
            .unwrap()
            .soft_failures
    }

    fn visible(id: u16, x: f32, y: f32) -> Delta {
        let mut delta = MobjDelta::new(id).with_origin(x, y, VerticalPosition::Absolute(0.0));
        delta.radius = Some(16);
        delta.height = Some(56);
        delta.ddflags = Some(ddflags::SOLID);
        Delta::CreateMobj(delta)
    }

    #[test]
    fn test_ambient_sound_has_no_emitter() {
        let mut engine = engine();
        let sound = SoundDelta::new(SoundTarget::Ambient, 12).with_volume(64);
        send(&mut engine, 1, vec![Delta::Sound(sound)]);

        let sink = engine.sound_sink();
        assert_eq!(sink.commands.len(), 1);
        let request = sink.started().next().unwrap();
        assert_eq!(request.emitter, None);
        assert_eq!(request.origin, None);
        assert!((request.volume.level - 64.0 / 127.0).abs() < 1e-6);
    }

    #[test]
    fn test_ambient_zero_volume_ignored() {
        let mut engine = engine();
        let sound = SoundDelta::new(SoundTarget::Ambient, 12).with_volume(0);
        send(&mut engine, 1, vec![Delta::Sound(sound)]);
        assert!(engine.sound_sink().commands.is_empty());
    }

    #[test]
    fn test_visible_mobj_sound_starts_immediately() {
        let mut engine = engine();
        let sound = SoundDelta::new(SoundTarget::Mobj(4), 9).with_flags(sound_flags::REPEAT);
        send(&mut engine, 1, vec![visible(4, 50.0, 60.0), Delta::Sound(sound)]);

        let sink = engine.sound_sink();
        assert_eq!(sink.commands[0], SoundCommand::Stop(Emitter::Mobj(4)));
        let request = sink.started().next().unwrap();
        assert_eq!(request.emitter, Some(Emitter::Mobj(4)));
        assert_eq!(request.origin, Some(Vec3::new(50.0, 60.0, 0.0)));
        assert!(request.repeat);
    }

    #[test]
    fn test_zero_volume_stops_emitter() {
        let mut engine = engine();
        let sound = SoundDelta::new(SoundTarget::Mobj(4), 9).with_volume(0);
        send(&mut engine, 1, vec![visible(4, 50.0, 60.0), Delta::Sound(sound)]);

        assert_eq!(
            engine.sound_sink().commands,
            vec![SoundCommand::Stop(Emitter::Mobj(4))]
        );
    }

    #[test]
    fn test_pending_sound_replaced_and_cancelled() {
        let mut engine = engine();
        let first = SoundDelta::new(SoundTarget::Mobj(5), 1);
        let second = SoundDelta::new(SoundTarget::Mobj(5), 2);
        send(&mut engine, 1, vec![Delta::Sound(first), Delta::Sound(second)]);

        let mobj = engine.find_mobj(5).unwrap();
        assert!(mobj.flags.contains(MobjFlags::PENDING_SOUND));
        assert_eq!(mobj.pending_sound.map(|p| p.sound_id), Some(2));

        let stop = SoundDelta::new(SoundTarget::Mobj(5), 2).with_volume(0);
        send(&mut engine, 2, vec![Delta::Sound(stop)]);
        let mobj = engine.find_mobj(5).unwrap();
        assert!(!mobj.flags.contains(MobjFlags::PENDING_SOUND));
        assert!(mobj.pending_sound.is_none());

        send(&mut engine, 3, vec![visible(5, 1.0, 1.0)]);
        assert!(engine.sound_sink().commands.is_empty());
    }

    #[test]
    fn test_sector_plane_emitters() {
        let mut engine = engine();
        let floor = SoundDelta::new(SoundTarget::Sector(0), 3).with_flags(sound_flags::PLANE_FLOOR);
        let ceiling =
            SoundDelta::new(SoundTarget::Sector(0), 4).with_flags(sound_flags::PLANE_CEILING);
        let general = SoundDelta::new(SoundTarget::Sector(0), 5);
        send(
            &mut engine,
            1,
            vec![Delta::Sound(floor), Delta::Sound(ceiling), Delta::Sound(general)],
        );

        let started: Vec<_> = engine.sound_sink().started().copied().collect();
        assert_eq!(started[0].emitter, Some(Emitter::Sector(0, Some(SectorPlane::Floor))));
        assert_eq!(started[0].origin, Some(Vec3::new(128.0, 128.0, 0.0)));
        assert_eq!(started[1].emitter, Some(Emitter::Sector(0, Some(SectorPlane::Ceiling))));
        assert_eq!(started[1].origin, Some(Vec3::new(128.0, 128.0, 128.0)));
        assert_eq!(started[2].emitter, Some(Emitter::Sector(0, None)));
    }

    #[test]
    fn test_side_section_defaults_to_middle() {
        let mut engine = engine();
        let top = SoundDelta::new(SoundTarget::Side(0), 3).with_flags(sound_flags::SIDE_TOP);
        let plain = SoundDelta::new(SoundTarget::Side(0), 4);
        send(&mut engine, 1, vec![Delta::Sound(top), Delta::Sound(plain)]);

        let started: Vec<_> = engine.sound_sink().started().copied().collect();
        assert_eq!(started[0].emitter, Some(Emitter::Side(0, SideSection::Top)));
        assert_eq!(started[0].origin, Some(Vec3::new(10.0, 20.0, 128.0)));
        assert_eq!(started[1].emitter, Some(Emitter::Side(0, SideSection::Middle)));
        assert_eq!(started[1].origin, Some(Vec3::new(10.0, 20.0, 64.0)));
    }

    #[test]
    fn test_poly_and_unknown_targets() {
        let mut engine = engine();
        let poly = SoundDelta::new(SoundTarget::Poly(0), 3);
        let missing = SoundDelta::new(SoundTarget::Poly(7), 3);
        let failures = send(&mut engine, 1, vec![Delta::Sound(poly), Delta::Sound(missing)]);

        assert_eq!(failures, 1);
        let started: Vec<_> = engine.sound_sink().started().copied().collect();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].emitter, Some(Emitter::Poly(0)));
    }

    #[test]
    fn test_view_mobj_sound_uses_real_mobj() {
        let mut engine = engine();
        let mut bind = PlayerDelta::new(0);
        bind.mobj = Some(20);
        let sound = SoundDelta::new(SoundTarget::Mobj(20), 8);
        send(
            &mut engine,
            1,
            vec![visible(20, 30.0, 40.0), Delta::Player(bind), Delta::Sound(sound)],
        );

        let request = engine.sound_sink().started().next().copied().unwrap();
        assert_eq!(request.emitter, Some(Emitter::Player(0)));
        assert_eq!(request.origin, Some(Vec3::new(30.0, 40.0, 0.0)));
        assert_eq!(
            engine.emitter_origin(Emitter::Player(0)).unwrap(),
            Some(Vec3::new(30.0, 40.0, 0.0))
        );
    }
}
