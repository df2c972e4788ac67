//! Sound emitters and the playback boundary
//!
//! The reconciliation core only decides which sound starts or stops on which
//! emitter; actual playback belongs to whatever implements [`SoundSink`].

use tracing::debug;

use crate::game::map::{SectorPlane, SideSection};
use crate::net::delta::SoundVolume;
use crate::net::protocol::ThingId;
use crate::util::vec3::Vec3;

/// Spatial anchor a sound is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Emitter {
    Mobj(ThingId),
    /// Real mobj of a local player
    Player(u8),
    /// `None` plane is the sector's general emitter
    Sector(u16, Option<SectorPlane>),
    Side(u16, SideSection),
    Poly(u16),
}

/// A sound to start
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoundRequest {
    pub sound_id: u16,
    /// `None` for ambient sounds
    pub emitter: Option<Emitter>,
    /// Emitter position at the time of the request
    pub origin: Option<Vec3>,
    pub volume: SoundVolume,
    pub repeat: bool,
}

/// Playback backend
pub trait SoundSink {
    fn start(&mut self, request: &SoundRequest);

    /// Stop everything playing on the emitter
    fn stop_emitter(&mut self, emitter: Emitter);
}

/// Sink that only traces requests
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSoundSink;

impl SoundSink for LogSoundSink {
    fn start(&mut self, request: &SoundRequest) {
        debug!(
            "Sound {} on {:?} at {:?} (volume {:.2}, attenuate {}, repeat {})",
            request.sound_id,
            request.emitter,
            request.origin,
            request.volume.level,
            request.volume.attenuate,
            request.repeat
        );
    }

    fn stop_emitter(&mut self, emitter: Emitter) {
        debug!("Stop sounds on {:?}", emitter);
    }
}

/// Recorded sink call
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SoundCommand {
    Start(SoundRequest),
    Stop(Emitter),
}

/// Sink that records every call, for inspection
#[derive(Debug, Clone, Default)]
pub struct RecordingSoundSink {
    pub commands: Vec<SoundCommand>,
}

impl RecordingSoundSink {
    /// Started requests, in order
    pub fn started(&self) -> impl Iterator<Item = &SoundRequest> {
        self.commands.iter().filter_map(|command| match command {
            SoundCommand::Start(request) => Some(request),
            SoundCommand::Stop(_) => None,
        })
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

impl SoundSink for RecordingSoundSink {
    fn start(&mut self, request: &SoundRequest) {
        self.commands.push(SoundCommand::Start(*request));
    }

    fn stop_emitter(&mut self, emitter: Emitter) {
        self.commands.push(SoundCommand::Stop(emitter));
    }
}
