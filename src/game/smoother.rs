//! Movement smoother
//!
//! Keeps a continuously evaluable position for a moving point, fed by a short
//! queue of authoritative samples. The evaluation cursor `at` only moves
//! forward and never passes the newest known sample: when data runs out the
//! position stalls instead of extrapolating.

use crate::game::constants::smoother::{FUTURE_POINTS, MOVE_EPSILON};
use crate::util::vec3::Vec3;

/// One timestamped position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Seconds
    pub time: f64,
    pub pos: Vec3,
    pub on_floor: bool,
}

impl Sample {
    pub fn new(time: f64, pos: Vec3, on_floor: bool) -> Self {
        Self {
            time,
            pos,
            on_floor,
        }
    }
}

/// Bounded-lookahead interpolator for one entity
#[derive(Debug, Clone, Default)]
pub struct Smoother {
    past: Option<Sample>,
    now: Option<Sample>,
    /// Buffered future samples, oldest first, contiguous from index 0
    future: [Option<Sample>; FUTURE_POINTS],
    at: f64,
    /// Cap on `now.time - past.time` after a forced advance
    max_delta: Option<f64>,
}

impl Smoother {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_delta(max_delta: Option<f64>) -> Self {
        Self {
            max_delta: max_delta.filter(|delta| *delta > 0.0),
            ..Self::default()
        }
    }

    pub fn set_max_delta(&mut self, max_delta: Option<f64>) {
        self.max_delta = max_delta.filter(|delta| *delta > 0.0);
    }

    /// Forget every sample; the smoother becomes invalid
    pub fn clear(&mut self) {
        self.past = None;
        self.now = None;
        self.future = [None; FUTURE_POINTS];
        self.at = 0.0;
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.past.is_some() && self.now.is_some()
    }

    /// Current evaluation time
    pub fn cursor(&self) -> f64 {
        self.at
    }

    pub fn past(&self) -> Option<&Sample> {
        self.past.as_ref()
    }

    pub fn now(&self) -> Option<&Sample> {
        self.now.as_ref()
    }

    /// Number of buffered future samples
    pub fn buffered(&self) -> usize {
        self.future.iter().take_while(|slot| slot.is_some()).count()
    }

    fn newest_future(&mut self) -> Option<&mut Sample> {
        self.future.iter_mut().rev().find_map(|slot| slot.as_mut())
    }

    /// Feed an authoritative sample
    pub fn add_sample(&mut self, time: f64, pos: Vec3, on_floor: bool) {
        let sample = Sample::new(time, pos, on_floor);

        let Some(now) = self.now else {
            // First sample: the interval degenerates to a single point
            self.past = Some(sample);
            self.now = Some(sample);
            self.at = time;
            return;
        };

        if let Some(newest) = self.newest_future() {
            if newest.time == time {
                // Same instant: identical is a no-op, otherwise correct in place
                *newest = sample;
                return;
            }
            if time < newest.time {
                self.clear();
                return;
            }
        }

        if time <= now.time {
            // Not strictly newer than the interpolation target
            self.clear();
            return;
        }

        if self.future.iter().all(Option::is_some) {
            self.force_advance();
            self.future.rotate_left(1);
            self.future[FUTURE_POINTS - 1] = Some(sample);
        } else if let Some(slot) = self.future.iter_mut().find(|slot| slot.is_none()) {
            *slot = Some(sample);
        }
    }

    /// Splice the current position in as `past` and promote the oldest future
    /// sample to `now`, so the oldest buffered sample can be dropped without a
    /// jump in the evaluated position.
    fn force_advance(&mut self) {
        let (Some(pos), Some(now), Some(next)) = (self.evaluate(), self.now, self.future[0]) else {
            return;
        };

        self.past = Some(Sample::new(self.at, pos, now.on_floor));
        self.now = Some(next);

        if let (Some(max), Some(past)) = (self.max_delta, self.past.as_mut()) {
            if next.time - past.time > max {
                past.time = next.time - max;
                self.at = self.at.max(past.time);
            }
        }
    }

    /// Move the evaluation cursor forward
    pub fn advance(&mut self, delta: f64) {
        if !self.is_valid() || delta <= 0.0 {
            return;
        }
        self.at += delta;

        while let (Some(past), Some(now)) = (self.past, self.now) {
            if self.at < past.time {
                self.at = past.time;
            }
            if self.at <= now.time {
                break;
            }
            match self.future[0] {
                Some(next) => {
                    self.past = Some(now);
                    self.now = Some(next);
                    self.future.rotate_left(1);
                    self.future[FUTURE_POINTS - 1] = None;
                }
                None => {
                    // Out of data: stall at the newest known point
                    self.at = now.time;
                    break;
                }
            }
        }
    }

    /// Position at the cursor
    pub fn evaluate(&self) -> Option<Vec3> {
        self.evaluate_at(self.at)
    }

    /// Position at an arbitrary time, clamped to the active interval
    pub fn evaluate_at(&self, time: f64) -> Option<Vec3> {
        let (past, now) = (self.past?, self.now?);

        if now.time <= past.time || time >= now.time {
            return Some(now.pos);
        }
        if time <= past.time {
            return Some(past.pos);
        }
        let t = (time - past.time) / (now.time - past.time);
        Some(past.pos.lerp(now.pos, t as f32))
    }

    /// A genuine interval whose endpoints differ by more than jitter
    pub fn is_moving(&self) -> bool {
        match (self.past, self.now) {
            (Some(past), Some(now)) => {
                past.time < now.time && past.pos.max_axis_delta(now.pos) > MOVE_EPSILON
            }
            _ => false,
        }
    }

    pub fn is_on_floor(&self) -> bool {
        matches!(
            (self.past, self.now),
            (Some(past), Some(now)) if past.on_floor && now.on_floor
        )
    }
}
