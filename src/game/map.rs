//! Map geometry mirrored on the client
//!
//! Only the state that frame deltas touch is kept: sector planes and light,
//! side surface offsets and polyobject motion. Geometry is loaded once per
//! map (JSON via serde) and mutated by sector/side/poly deltas afterwards.

use serde::{Deserialize, Serialize};

use crate::game::constants::time::{DT, TICK_RATE};
use crate::net::delta::{PolyDelta, SectorDelta, SideDelta};
use crate::net::protocol::angle_to_degrees;
use crate::util::vec3::Vec3;

/// Lookup of a map element the current map doesn't have
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MapLookupError {
    #[error("Unknown sector {0}")]
    UnknownSector(u16),
    #[error("Unknown side {0}")]
    UnknownSide(u16),
    #[error("Unknown polyobject {0}")]
    UnknownPoly(u16),
}

/// Axis-aligned bounds in map units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl Bounds {
    pub fn new(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    #[inline]
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    pub fn area(&self) -> f32 {
        (self.max_x - self.min_x) * (self.max_y - self.min_y)
    }

    pub fn center(&self) -> (f32, f32) {
        (
            (self.min_x + self.max_x) * 0.5,
            (self.min_y + self.max_y) * 0.5,
        )
    }
}

/// A moving plane: current height, target and speed per second
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    pub height: f32,
    pub target: f32,
    pub speed: f32,
}

impl Plane {
    pub fn at(height: f32) -> Self {
        Self {
            height,
            target: height,
            speed: 0.0,
        }
    }

    /// Move toward the target; returns true if the height changed
    fn step(&mut self, dt: f32) -> bool {
        if self.height == self.target || self.speed <= 0.0 {
            return false;
        }
        let step = self.speed * dt;
        let delta = self.target - self.height;
        self.height = if delta.abs() <= step {
            self.target
        } else {
            self.height + step.copysign(delta)
        };
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sector {
    pub bounds: Bounds,
    pub floor: Plane,
    pub ceiling: Plane,
    /// 0.0 ..= 1.0
    pub light: f32,
}

impl Sector {
    pub fn new(bounds: Bounds, floor: f32, ceiling: f32) -> Self {
        Self {
            bounds,
            floor: Plane::at(floor),
            ceiling: Plane::at(ceiling),
            light: 1.0,
        }
    }
}

/// Floor or ceiling of a sector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SectorPlane {
    Floor,
    Ceiling,
}

/// One of the three wall sections of a side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SideSection {
    Top,
    Middle,
    Bottom,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Surface {
    pub offset: [f32; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Side {
    pub sector: usize,
    /// Midpoint of the line the side belongs to
    pub x: f32,
    pub y: f32,
    pub top: Surface,
    pub middle: Surface,
    pub bottom: Surface,
    pub flags: u8,
}

impl Side {
    pub fn new(sector: usize, x: f32, y: f32) -> Self {
        Self {
            sector,
            x,
            y,
            top: Surface::default(),
            middle: Surface::default(),
            bottom: Surface::default(),
            flags: 0,
        }
    }

    pub fn surface(&self, section: SideSection) -> &Surface {
        match section {
            SideSection::Top => &self.top,
            SideSection::Middle => &self.middle,
            SideSection::Bottom => &self.bottom,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polyobj {
    pub x: f32,
    pub y: f32,
    /// Binary angle
    pub angle: u16,
    pub dest_x: f32,
    pub dest_y: f32,
    /// Map units per tick
    pub speed: f32,
    pub dest_angle: u16,
    /// Binary angle units per tick
    pub angle_speed: u16,
}

impl Polyobj {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            angle: 0,
            dest_x: x,
            dest_y: y,
            speed: 0.0,
            dest_angle: 0,
            angle_speed: 0,
        }
    }

    fn step(&mut self) {
        let (dx, dy) = (self.dest_x - self.x, self.dest_y - self.y);
        let dist = (dx * dx + dy * dy).sqrt();
        if dist > 0.0 && self.speed > 0.0 {
            if dist <= self.speed {
                self.x = self.dest_x;
                self.y = self.dest_y;
            } else {
                self.x += dx / dist * self.speed;
                self.y += dy / dist * self.speed;
            }
        }

        if self.angle != self.dest_angle && self.angle_speed > 0 {
            let diff = self.dest_angle.wrapping_sub(self.angle) as i16;
            let step = i32::from(self.angle_speed);
            self.angle = if i32::from(diff).abs() <= step {
                self.dest_angle
            } else {
                self.angle
                    .wrapping_add((step * i32::from(diff.signum())) as u16)
            };
        }
    }

    pub fn angle_degrees(&self) -> f32 {
        angle_to_degrees(self.angle)
    }
}

/// Client view of the loaded map
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapState {
    pub sectors: Vec<Sector>,
    pub sides: Vec<Side>,
    pub polyobjs: Vec<Polyobj>,
}

impl MapState {
    pub fn new(sectors: Vec<Sector>, sides: Vec<Side>, polyobjs: Vec<Polyobj>) -> Self {
        Self {
            sectors,
            sides,
            polyobjs,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn sector(&self, index: u16) -> Result<&Sector, MapLookupError> {
        self.sectors
            .get(usize::from(index))
            .ok_or(MapLookupError::UnknownSector(index))
    }

    pub fn side(&self, index: u16) -> Result<&Side, MapLookupError> {
        self.sides
            .get(usize::from(index))
            .ok_or(MapLookupError::UnknownSide(index))
    }

    pub fn polyobj(&self, index: u16) -> Result<&Polyobj, MapLookupError> {
        self.polyobjs
            .get(usize::from(index))
            .ok_or(MapLookupError::UnknownPoly(index))
    }

    /// Sector containing the point; the smallest when sectors nest
    pub fn point_in_sector(&self, x: f32, y: f32) -> Option<usize> {
        self.sectors
            .iter()
            .enumerate()
            .filter(|(_, sector)| sector.bounds.contains(x, y))
            .min_by(|(_, a), (_, b)| a.bounds.area().total_cmp(&b.bounds.area()))
            .map(|(index, _)| index)
    }

    /// Sector index with its floor and ceiling heights at a point
    pub fn planes_at(&self, x: f32, y: f32) -> Option<(usize, f32, f32)> {
        let index = self.point_in_sector(x, y)?;
        let sector = &self.sectors[index];
        Some((index, sector.floor.height, sector.ceiling.height))
    }

    pub fn apply_sector(&mut self, delta: &SectorDelta) -> Result<(), MapLookupError> {
        let sector = self
            .sectors
            .get_mut(usize::from(delta.index))
            .ok_or(MapLookupError::UnknownSector(delta.index))?;

        if let Some(height) = delta.floor_height {
            sector.floor.height = height;
            sector.floor.target = height;
        }
        if let Some(height) = delta.ceiling_height {
            sector.ceiling.height = height;
            sector.ceiling.target = height;
        }
        if let Some(speed) = delta.floor_speed {
            sector.floor.speed = speed * TICK_RATE as f32;
        }
        if let Some(speed) = delta.ceiling_speed {
            sector.ceiling.speed = speed * TICK_RATE as f32;
        }
        if let Some(target) = delta.floor_target {
            sector.floor.target = target;
        }
        if let Some(target) = delta.ceiling_target {
            sector.ceiling.target = target;
        }
        if let Some(light) = delta.light {
            sector.light = light;
        }
        Ok(())
    }

    pub fn apply_side(&mut self, delta: &SideDelta) -> Result<(), MapLookupError> {
        let side = self
            .sides
            .get_mut(usize::from(delta.index))
            .ok_or(MapLookupError::UnknownSide(delta.index))?;

        let to_offset = |[x, y]: [i16; 2]| [f32::from(x), f32::from(y)];
        if let Some(offset) = delta.top_offset {
            side.top.offset = to_offset(offset);
        }
        if let Some(offset) = delta.middle_offset {
            side.middle.offset = to_offset(offset);
        }
        if let Some(offset) = delta.bottom_offset {
            side.bottom.offset = to_offset(offset);
        }
        if let Some(flags) = delta.flags {
            side.flags = flags;
        }
        Ok(())
    }

    pub fn apply_poly(&mut self, delta: &PolyDelta) -> Result<(), MapLookupError> {
        let poly = self
            .polyobjs
            .get_mut(usize::from(delta.index))
            .ok_or(MapLookupError::UnknownPoly(delta.index))?;

        if let Some(x) = delta.dest_x {
            poly.dest_x = x;
        }
        if let Some(y) = delta.dest_y {
            poly.dest_y = y;
        }
        if let Some(speed) = delta.speed {
            poly.speed = speed;
        }
        if let Some(angle) = delta.dest_angle {
            poly.dest_angle = angle;
        }
        if let Some(speed) = delta.angle_speed {
            poly.angle_speed = speed;
        }
        Ok(())
    }

    /// Advance movers by one tick; returns true if any plane moved
    pub fn run_tick(&mut self) -> bool {
        let mut planes_moved = false;
        for sector in &mut self.sectors {
            planes_moved |= sector.floor.step(DT);
            planes_moved |= sector.ceiling.step(DT);
        }
        self.polyobjs.iter_mut().for_each(Polyobj::step);
        planes_moved
    }

    /// Origin of a sector emitter; `None` is the sector's general emitter
    pub fn sector_emitter_origin(
        &self,
        index: u16,
        plane: Option<SectorPlane>,
    ) -> Result<Vec3, MapLookupError> {
        let sector = self.sector(index)?;
        let (x, y) = sector.bounds.center();
        let z = match plane {
            Some(SectorPlane::Floor) => sector.floor.height,
            Some(SectorPlane::Ceiling) => sector.ceiling.height,
            None => (sector.floor.height + sector.ceiling.height) * 0.5,
        };
        Ok(Vec3::new(x, y, z))
    }

    /// Origin of a side section emitter
    pub fn side_emitter_origin(
        &self,
        index: u16,
        section: SideSection,
    ) -> Result<Vec3, MapLookupError> {
        let side = self.side(index)?;
        let (floor, ceiling) = self
            .sectors
            .get(side.sector)
            .map(|sector| (sector.floor.height, sector.ceiling.height))
            .unwrap_or((0.0, 0.0));
        let z = match section {
            SideSection::Top => ceiling,
            SideSection::Middle => (floor + ceiling) * 0.5,
            SideSection::Bottom => floor,
        };
        Ok(Vec3::new(side.x, side.y, z))
    }

    pub fn poly_emitter_origin(&self, index: u16) -> Result<Vec3, MapLookupError> {
        let poly = self.polyobj(index)?;
        let z = self
            .planes_at(poly.x, poly.y)
            .map_or(0.0, |(_, floor, _)| floor);
        Ok(Vec3::new(poly.x, poly.y, z))
    }
}
