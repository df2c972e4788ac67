//! Frame reception and the acknowledgment protocol
//!
//! `ReconciliationEngine` owns all connection-scoped state: the first-frame
//! barrier, set and resend histories, predicted tic counter, the client mobj
//! table with its spatial structures, map state and players. One packet is
//! parsed completely, then applied in order, then acknowledged.

use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::game::constants::mobj::TIMEOUT_MS;
use crate::game::constants::net::{RESEND_HISTORY_SIZE, SET_HISTORY_SIZE};
use crate::game::constants::players::MAX_PLAYERS;
use crate::game::constants::spatial::BLOCKMAP_CELL_SIZE;
use crate::game::constants::time::TICK_RATE;
use crate::game::map::MapState;
use crate::game::mobj::ClientMobj;
use crate::game::mobj_table::MobjTable;
use crate::game::player::PlayerState;
use crate::game::sound::{LogSoundSink, SoundSink};
use crate::game::spatial::{SpatialRef, SpatialWorld};
use crate::net::delta::{parse_records, DecodeError, DeltaRecord};
use crate::net::framing::FrameReader;
use crate::net::history::{ResendHistory, SetHistory};
use crate::net::protocol::{Ack, FrameSetId, PacketKind, ResendId, ThingId};

/// Fatal reception errors; the caller should drop the connection
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReceiveError {
    #[error("Protocol desync in set {set}: {source}")]
    Desync {
        set: FrameSetId,
        #[source]
        source: DecodeError,
    },
    #[error("Empty frame packet")]
    EmptyPacket,
    #[error("Packet kind {0:?} carries no frame")]
    NotAFrame(PacketKind),
}

/// Engine tunables
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Player whose view mobj is predicted locally
    pub console_player: u8,
    pub tick_rate: u32,
    pub set_history_size: usize,
    pub resend_history_size: usize,
    pub mobj_timeout_ms: u64,
    pub smoother_max_delta: Option<f64>,
    pub blockmap_cell_size: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            console_player: 0,
            tick_rate: TICK_RATE,
            set_history_size: SET_HISTORY_SIZE,
            resend_history_size: RESEND_HISTORY_SIZE,
            mobj_timeout_ms: TIMEOUT_MS,
            smoother_max_delta: None,
            blockmap_cell_size: BLOCKMAP_CELL_SIZE,
        }
    }
}

/// What happened to a frame packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    /// Decoded and applied
    Applied,
    /// Set already seen; nothing applied, still acknowledged
    Duplicate,
    /// Arrived before the first frame; dropped without an ack
    Premature,
}

/// Result of processing one frame packet
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub set: FrameSetId,
    pub disposition: FrameDisposition,
    /// Acknowledgment to send back, if any
    pub ack: Option<Ack>,
    pub records: usize,
    pub applied: usize,
    /// Resent records whose content was already seen
    pub skipped: usize,
    pub resends: usize,
    pub soft_failures: usize,
}

impl FrameReport {
    fn new(set: FrameSetId, disposition: FrameDisposition) -> Self {
        Self {
            set,
            disposition,
            ack: None,
            records: 0,
            applied: 0,
            skipped: 0,
            resends: 0,
            soft_failures: 0,
        }
    }
}

/// Effect of applying one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ApplyOutcome {
    Applied,
    /// Referenced something this client doesn't have; record skipped
    SoftFailure,
}

/// Connection-scoped client reconciliation state
#[derive(Debug)]
pub struct ReconciliationEngine<S: SoundSink = LogSoundSink> {
    pub(crate) config: EngineConfig,
    got_first_frame: bool,
    got_frame: bool,
    set_history: SetHistory,
    resend_history: ResendHistory,
    predicted_tics: u32,
    pub(crate) mobjs: MobjTable,
    pub(crate) spatial: SpatialWorld,
    pub(crate) map: MapState,
    pub(crate) players: Vec<PlayerState>,
    pub(crate) sound: S,
    tick: u64,
}

impl ReconciliationEngine<LogSoundSink> {
    pub fn new(config: EngineConfig, map: MapState) -> Self {
        Self::with_sound_sink(config, map, LogSoundSink)
    }
}

impl<S: SoundSink> ReconciliationEngine<S> {
    pub fn with_sound_sink(config: EngineConfig, map: MapState, sound: S) -> Self {
        Self {
            set_history: SetHistory::new(config.set_history_size),
            resend_history: ResendHistory::new(config.resend_history_size),
            spatial: SpatialWorld::new(config.blockmap_cell_size),
            config,
            got_first_frame: false,
            got_frame: false,
            predicted_tics: 0,
            mobjs: MobjTable::new(),
            map,
            players: vec![PlayerState::default(); MAX_PLAYERS],
            sound,
            tick: 0,
        }
    }

    /// Process one frame packet body (everything after the kind byte)
    pub fn receive_frame(
        &mut self,
        kind: PacketKind,
        payload: &[u8],
    ) -> Result<FrameReport, ReceiveError> {
        if !kind.is_frame() {
            return Err(ReceiveError::NotAFrame(kind));
        }
        let (&set, body) = payload.split_first().ok_or(ReceiveError::EmptyPacket)?;

        if kind == PacketKind::FirstFrame {
            self.got_first_frame = true;
        } else if !self.got_first_frame {
            // Belongs to a map we left or haven't joined; the server resends
            trace!("Dropping frame {} before first frame", set);
            return Ok(FrameReport::new(set, FrameDisposition::Premature));
        }

        if self.set_history.contains(set) {
            trace!("Duplicate frame {}", set);
            let mut report = FrameReport::new(set, FrameDisposition::Duplicate);
            report.ack = Some(Ack::Set(set));
            return Ok(report);
        }

        let mut reader = FrameReader::new(body);
        let records =
            parse_records(&mut reader).map_err(|source| ReceiveError::Desync { set, source })?;

        self.set_history.add(set);
        let mut report = FrameReport::new(set, FrameDisposition::Applied);
        report.records = records.len();

        let acks = self.apply_records(&records, &mut report);

        self.got_frame = true;
        self.predicted_tics = 0;

        report.ack = Some(if acks.is_empty() {
            Ack::Set(set)
        } else {
            Ack::SetWithResends { set, resends: acks }
        });
        debug!(
            "Frame {} applied: {} records, {} skipped, {} resends, {} soft failures",
            set, report.records, report.skipped, report.resends, report.soft_failures
        );
        Ok(report)
    }

    /// Apply parsed records in order, returning the distinct resend ids seen
    fn apply_records(
        &mut self,
        records: &[DeltaRecord],
        report: &mut FrameReport,
    ) -> SmallVec<[ResendId; 16]> {
        let mut acks: SmallVec<[ResendId; 16]> = SmallVec::new();

        for record in records {
            let mut skip = false;
            if let Some(resend) = record.resend {
                report.resends += 1;
                if !acks.contains(&resend.resend_id) {
                    acks.push(resend.resend_id);
                }
                skip = self.set_history.contains(resend.orig_set)
                    || self.resend_history.contains(resend.resend_id);
                if !self.resend_history.contains(resend.resend_id) {
                    self.resend_history.add(resend.resend_id);
                }
            }

            if skip {
                trace!("Skipping resent {:?}", record.delta.delta_type());
                report.skipped += 1;
                continue;
            }

            match self.apply_delta(&record.delta) {
                ApplyOutcome::Applied => report.applied += 1,
                ApplyOutcome::SoftFailure => report.soft_failures += 1,
            }
        }
        acks
    }

    /// Advance the client clock by one tick
    pub fn run_tick(&mut self) {
        self.tick += 1;
        self.predicted_tics = self.predicted_tics.saturating_add(1);

        if self.map.run_tick() {
            self.place_stuck_mobjs(None);
        }

        let dt = 1.0 / f64::from(self.config.tick_rate.max(1));
        let _ = self.mobjs.for_each_mut(|_, mobj| {
            mobj.smoother.advance(dt);
            std::ops::ControlFlow::<()>::Continue(())
        });
    }

    /// Remove mobjs not updated within the timeout; player mobjs stay
    pub fn expire_mobjs(&mut self, now_ms: u64) -> usize {
        let timeout = self.config.mobj_timeout_ms;
        let expired: Vec<_> = self
            .mobjs
            .handles()
            .into_iter()
            .filter(|&handle| {
                self.mobjs.get(handle).is_some_and(|mobj| {
                    mobj.owner.is_none() && now_ms.saturating_sub(mobj.last_update_ms) > timeout
                })
            })
            .collect();

        for &handle in &expired {
            if let Some(mobj) = self.mobjs.remove(handle) {
                self.spatial.unlink(SpatialRef::Mobj(mobj.id));
                debug!("Expired client mobj {}", mobj.id);
            }
        }
        expired.len()
    }

    /// Flush everything tied to the current map and install a new one
    pub fn reset_for_map(&mut self, map: MapState) {
        self.got_first_frame = false;
        self.got_frame = false;
        self.set_history.clear();
        self.resend_history.clear();
        self.predicted_tics = 0;
        self.mobjs.clear();
        self.spatial.clear();
        self.players.iter_mut().for_each(PlayerState::reset);
        self.map = map;
    }

    pub fn got_first_frame(&self) -> bool {
        self.got_first_frame
    }

    pub fn got_frame(&self) -> bool {
        self.got_frame
    }

    pub fn predicted_tics(&self) -> u32 {
        self.predicted_tics
    }

    /// Client clock in seconds
    pub fn time(&self) -> f64 {
        self.tick as f64 / f64::from(self.config.tick_rate.max(1))
    }

    /// Client clock in milliseconds
    pub fn clock_ms(&self) -> u64 {
        self.tick * 1000 / u64::from(self.config.tick_rate.max(1))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn mobjs(&self) -> &MobjTable {
        &self.mobjs
    }

    pub fn find_mobj(&self, id: ThingId) -> Option<&ClientMobj> {
        self.mobjs.find_mobj(id)
    }

    pub fn spatial(&self) -> &SpatialWorld {
        &self.spatial
    }

    pub fn map(&self) -> &MapState {
        &self.map
    }

    pub fn player(&self, player: u8) -> Option<&PlayerState> {
        self.players.get(usize::from(player))
    }

    pub fn sound_sink(&self) -> &S {
        &self.sound
    }

    pub fn sound_sink_mut(&mut self) -> &mut S {
        &mut self.sound
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::map::{Bounds, Sector};
    use crate::game::mobj::{MobjFlags, VerticalPosition};
    use crate::game::sound::RecordingSoundSink;
    use crate::net::delta::{encode_frame, Delta, MobjDelta, SoundDelta, SoundTarget};
    use crate::net::protocol::ddflags;

    fn test_map() -> MapState {
        MapState::new(
            vec![Sector::new(Bounds::new(-1024.0, -1024.0, 1024.0, 1024.0), 0.0, 256.0)],
            vec![],
            vec![],
        )
    }

    fn engine() -> ReconciliationEngine<RecordingSoundSink> {
        ReconciliationEngine::with_sound_sink(
            EngineConfig::default(),
            test_map(),
            RecordingSoundSink::default(),
        )
    }

    fn create(id: ThingId, x: f32, y: f32) -> Delta {
        let mut delta = MobjDelta::new(id).with_origin(x, y, VerticalPosition::Absolute(0.0));
        delta.radius = Some(16);
        delta.height = Some(56);
        delta.ddflags = Some(ddflags::SOLID);
        Delta::CreateMobj(delta)
    }

    fn frame(set: FrameSetId, records: &[DeltaRecord]) -> Vec<u8> {
        encode_frame(set, records)
    }

    #[test]
    fn test_first_frame_scenario() {
        let mut engine = engine();
        let payload = frame(5, &[DeltaRecord::new(create(42, 0.0, 0.0))]);

        let report = engine.receive_frame(PacketKind::FirstFrame, &payload).unwrap();
        assert_eq!(report.disposition, FrameDisposition::Applied);
        assert_eq!(report.ack, Some(Ack::Set(5)));
        assert!(engine.got_first_frame());
        assert!(engine.got_frame());
        assert_eq!(engine.predicted_tics(), 0);

        let mobj = engine.find_mobj(42).unwrap();
        assert!(!mobj.is_hidden());
        assert!(engine.spatial().is_linked(SpatialRef::Mobj(42)));

        // Lost ack: the same set again
        let report = engine.receive_frame(PacketKind::Frame, &payload).unwrap();
        assert_eq!(report.disposition, FrameDisposition::Duplicate);
        assert_eq!(report.ack, Some(Ack::Set(5)));
        assert_eq!(report.applied, 0);
        assert_eq!(engine.mobjs().len(), 1);
    }

    #[test]
    fn test_duplicate_applies_side_effects_once() {
        let mut engine = engine();
        engine
            .receive_frame(PacketKind::FirstFrame, &frame(1, &[]))
            .unwrap();

        let mut update = MobjDelta::new(42);
        update.mom_x = Some(2.0);
        let payload = frame(
            2,
            &[
                DeltaRecord::new(create(42, 0.0, 0.0)),
                DeltaRecord::new(Delta::Mobj(update)),
            ],
        );
        engine.receive_frame(PacketKind::Frame, &payload).unwrap();
        let after_first = engine.find_mobj(42).unwrap().clone();

        // Locally perturb, then replay: nothing may be reapplied
        engine.mobjs.find_mobj_mut(42).unwrap().momentum.x = 9.0;
        let report = engine.receive_frame(PacketKind::Frame, &payload).unwrap();
        assert_eq!(report.ack, Some(Ack::Set(2)));
        assert_eq!(engine.find_mobj(42).unwrap().momentum.x, 9.0);
        assert_eq!(after_first.momentum.x, 2.0);
    }

    #[test]
    fn test_premature_frame_dropped_without_ack() {
        let mut engine = engine();
        let payload = frame(3, &[DeltaRecord::new(create(1, 0.0, 0.0))]);
        let report = engine.receive_frame(PacketKind::Frame, &payload).unwrap();
        assert_eq!(report.disposition, FrameDisposition::Premature);
        assert_eq!(report.ack, None);
        assert!(engine.mobjs().is_empty());

        // Not remembered either: accepted once the barrier is crossed
        engine.receive_frame(PacketKind::FirstFrame, &frame(2, &[])).unwrap();
        let report = engine.receive_frame(PacketKind::Frame, &payload).unwrap();
        assert_eq!(report.disposition, FrameDisposition::Applied);
    }

    #[test]
    fn test_resent_duplicate_is_consumed_but_skipped() {
        let mut engine = engine();
        engine
            .receive_frame(
                PacketKind::FirstFrame,
                &frame(5, &[DeltaRecord::new(create(42, 0.0, 0.0))]),
            )
            .unwrap();

        let mut moved = MobjDelta::new(42);
        moved.x = Some(64.0);
        let payload = frame(
            6,
            &[
                DeltaRecord::resent(Delta::Mobj(moved), 5, 9),
                DeltaRecord::new(create(43, 10.0, 10.0)),
            ],
        );
        let report = engine.receive_frame(PacketKind::Frame, &payload).unwrap();

        assert_eq!(engine.find_mobj(42).unwrap().origin.x, 0.0);
        // The record after the skipped one was still decoded correctly
        assert!(engine.find_mobj(43).is_some());
        assert_eq!(report.skipped, 1);
        assert_eq!(
            report.ack,
            Some(Ack::SetWithResends {
                set: 6,
                resends: smallvec::smallvec![9]
            })
        );
    }

    #[test]
    fn test_resend_applied_once_and_acked_once_per_packet() {
        let mut engine = engine();
        engine.receive_frame(PacketKind::FirstFrame, &frame(1, &[])).unwrap();

        let mut first = MobjDelta::new(50);
        first.mom_x = Some(1.0);
        let mut second = MobjDelta::new(50);
        second.mom_x = Some(5.0);
        // Original set 3 never arrived; the same resend twice in one packet
        let payload = frame(
            4,
            &[
                DeltaRecord::resent(Delta::Mobj(first), 3, 7),
                DeltaRecord::resent(Delta::Mobj(second), 3, 7),
            ],
        );
        let report = engine.receive_frame(PacketKind::Frame, &payload).unwrap();

        assert_eq!(report.applied, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.ack.as_ref().map(|ack| ack.resends().to_vec()), Some(vec![7]));
        assert_eq!(engine.find_mobj(50).unwrap().momentum.x, 1.0);

        // Resend 7 arriving in a later packet is skipped but acked again
        let mut third = MobjDelta::new(50);
        third.mom_x = Some(8.0);
        let report = engine
            .receive_frame(
                PacketKind::Frame,
                &frame(5, &[DeltaRecord::resent(Delta::Mobj(third), 3, 7)]),
            )
            .unwrap();
        assert_eq!(report.ack.as_ref().map(|ack| ack.resends().to_vec()), Some(vec![7]));
        assert_eq!(engine.find_mobj(50).unwrap().momentum.x, 1.0);
    }

    #[test]
    fn test_every_distinct_resend_id_is_acked() {
        let mut engine = engine();
        engine.receive_frame(PacketKind::FirstFrame, &frame(1, &[])).unwrap();

        let records: Vec<_> = (0..=u8::MAX)
            .map(|id| DeltaRecord::resent(Delta::NullMobj(1000 + u16::from(id)), 3, id))
            .collect();
        let payload = frame(4, &records);
        assert!(payload.len() < crate::game::constants::net::MAX_DATAGRAM_SIZE);

        let report = engine.receive_frame(PacketKind::Frame, &payload).unwrap();
        assert_eq!(report.resends, 256);
        let ack = report.ack.unwrap();
        assert_eq!(ack.resends().len(), 256);
        assert_eq!(ack.resends().to_vec(), (0..=u8::MAX).collect::<Vec<_>>());
    }

    #[test]
    fn test_desync_applies_nothing() {
        let mut engine = engine();
        engine.receive_frame(PacketKind::FirstFrame, &frame(1, &[])).unwrap();

        let mut payload = frame(2, &[DeltaRecord::new(create(9, 0.0, 0.0))]);
        payload.push(0x3f);
        let err = engine.receive_frame(PacketKind::Frame, &payload).unwrap_err();
        assert!(matches!(
            err,
            ReceiveError::Desync {
                set: 2,
                source: DecodeError::UnknownDeltaType { tag: 0x3f, .. }
            }
        ));
        assert!(engine.find_mobj(9).is_none());

        // Set 2 was not remembered
        let clean = frame(2, &[DeltaRecord::new(create(9, 0.0, 0.0))]);
        let report = engine.receive_frame(PacketKind::Frame, &clean).unwrap();
        assert_eq!(report.disposition, FrameDisposition::Applied);
    }

    #[test]
    fn test_empty_and_non_frame_packets() {
        let mut engine = engine();
        assert_eq!(
            engine.receive_frame(PacketKind::FirstFrame, &[]),
            Err(ReceiveError::EmptyPacket)
        );
        assert_eq!(
            engine.receive_frame(PacketKind::AckSet, &[1]),
            Err(ReceiveError::NotAFrame(PacketKind::AckSet))
        );
    }

    #[test]
    fn test_predicted_tics_reset_by_new_frames_only() {
        let mut engine = engine();
        engine.receive_frame(PacketKind::FirstFrame, &frame(1, &[])).unwrap();
        engine.run_tick();
        engine.run_tick();
        assert_eq!(engine.predicted_tics(), 2);

        engine.receive_frame(PacketKind::Frame, &frame(1, &[])).unwrap();
        assert_eq!(engine.predicted_tics(), 2);

        engine.receive_frame(PacketKind::Frame, &frame(2, &[])).unwrap();
        assert_eq!(engine.predicted_tics(), 0);
    }

    #[test]
    fn test_expire_mobjs() {
        let mut engine = engine();
        engine
            .receive_frame(
                PacketKind::FirstFrame,
                &frame(1, &[DeltaRecord::new(create(1, 0.0, 0.0))]),
            )
            .unwrap();

        assert_eq!(engine.expire_mobjs(TIMEOUT_MS), 0);
        assert_eq!(engine.expire_mobjs(TIMEOUT_MS + 1), 1);
        assert!(engine.find_mobj(1).is_none());
        assert!(!engine.spatial().is_linked(SpatialRef::Mobj(1)));
    }

    #[test]
    fn test_reset_for_map() {
        let mut engine = engine();
        engine
            .receive_frame(
                PacketKind::FirstFrame,
                &frame(1, &[DeltaRecord::new(create(1, 0.0, 0.0))]),
            )
            .unwrap();
        engine.reset_for_map(test_map());

        assert!(!engine.got_first_frame());
        assert!(!engine.got_frame());
        assert!(engine.mobjs().is_empty());
        assert!(engine.spatial().blockmap.is_empty());

        // Set 1 forgotten, and frames wait for the barrier again
        let report = engine.receive_frame(PacketKind::Frame, &frame(1, &[])).unwrap();
        assert_eq!(report.disposition, FrameDisposition::Premature);
        let report = engine.receive_frame(PacketKind::FirstFrame, &frame(1, &[])).unwrap();
        assert_eq!(report.disposition, FrameDisposition::Applied);
    }

    #[test]
    fn test_deferred_mobj_sound_scenario() {
        let mut engine = engine();
        engine.receive_frame(PacketKind::FirstFrame, &frame(1, &[])).unwrap();

        let sound = SoundDelta::new(SoundTarget::Mobj(77), 3).with_volume(255);
        engine
            .receive_frame(
                PacketKind::Frame,
                &frame(2, &[DeltaRecord::new(Delta::Sound(sound))]),
            )
            .unwrap();

        let mobj = engine.find_mobj(77).unwrap();
        assert!(mobj.is_hidden());
        assert!(mobj.flags.contains(MobjFlags::PENDING_SOUND));
        assert_eq!(mobj.pending_sound.map(|s| s.sound_id), Some(3));
        assert_eq!(engine.sound_sink().started().count(), 0);

        engine
            .receive_frame(
                PacketKind::Frame,
                &frame(3, &[DeltaRecord::new(create(77, 32.0, 48.0))]),
            )
            .unwrap();

        let started: Vec<_> = engine.sound_sink().started().copied().collect();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].sound_id, 3);
        assert!(!started[0].volume.attenuate);
        assert_eq!(started[0].origin.map(|o| (o.x, o.y)), Some((32.0, 48.0)));
        assert!(!engine.find_mobj(77).unwrap().flags.contains(MobjFlags::PENDING_SOUND));
    }
}
